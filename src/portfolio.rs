// src/portfolio.rs
//! Average-cost aggregation of the transaction log.
//!
//! Positions are never stored; they are replayed from the log on every read
//! and every write is checked by replaying the log it would produce.

use crate::models::{Side, Transaction};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Quantities at or below this are treated as zero.
pub const EPSILON: f64 = 1e-6;

#[derive(Debug, Error, PartialEq)]
#[error("cannot sell {requested} {symbol}: only {held} held")]
pub struct Oversold {
    pub symbol: String,
    pub requested: f64,
    pub held: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Running {
    pub quantity: f64,
    pub total_cost: f64,
}

impl Running {
    pub fn average_cost(&self) -> f64 {
        if self.quantity > EPSILON {
            self.total_cost / self.quantity
        } else {
            0.0
        }
    }

    pub fn buy(&mut self, quantity: f64, price: f64) {
        self.quantity += quantity;
        self.total_cost += quantity * price;
    }

    pub fn sell(&mut self, symbol: &str, quantity: f64) -> Result<(), Oversold> {
        if quantity > self.quantity + EPSILON {
            return Err(Oversold {
                symbol: symbol.to_string(),
                requested: quantity,
                held: self.quantity,
            });
        }
        let average = self.average_cost();
        self.total_cost -= average * quantity;
        self.quantity -= quantity;
        if self.quantity <= EPSILON {
            self.quantity = 0.0;
            self.total_cost = 0.0;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub section: String,
    pub is_real: bool,
    pub quantity: f64,
    pub average_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct PortfolioView {
    pub holdings: Vec<Position>,
    pub watchlist: Vec<Position>,
}

/// Replays every book (real and watchlist) for every symbol and returns the
/// open positions. Fails on the first sell that exceeds its holding.
pub fn aggregate(transactions: &[Transaction]) -> Result<PortfolioView, Oversold> {
    let mut ordered: Vec<&Transaction> = transactions.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));

    let mut books: BTreeMap<(bool, String), (Running, &Transaction)> = BTreeMap::new();
    for tx in ordered {
        let entry = books
            .entry((tx.is_real, tx.symbol.clone()))
            .or_insert_with(|| (Running::default(), tx));
        match tx.side {
            Side::Buy => entry.0.buy(tx.quantity, tx.price),
            Side::Sell => entry.0.sell(&tx.symbol, tx.quantity)?,
        }
        entry.1 = tx;
    }

    let mut view = PortfolioView::default();
    for ((is_real, symbol), (running, latest)) in books {
        if running.quantity <= EPSILON {
            continue;
        }
        let position = Position {
            symbol,
            name: latest.name.clone(),
            sector: latest.sector.clone(),
            section: latest.section.clone(),
            is_real,
            quantity: running.quantity,
            average_cost: running.average_cost(),
            total_cost: running.total_cost,
        };
        if is_real {
            view.holdings.push(position);
        } else {
            view.watchlist.push(position);
        }
    }
    let by_section = |a: &Position, b: &Position| {
        a.section.cmp(&b.section).then_with(|| a.symbol.cmp(&b.symbol))
    };
    view.holdings.sort_by(by_section);
    view.watchlist.sort_by(by_section);
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

    fn tx(symbol: &str, side: Side, quantity: f64, price: f64, day: u32, is_real: bool) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            name: format!("{} Corp", symbol),
            sector: "Tech".to_string(),
            is_real,
            side,
            quantity,
            price,
            total_value: quantity * price,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            section: String::new(),
            created_by: "tester".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn weighted_average_cost_example() {
        let mut log = vec![
            tx("ACME", Side::Buy, 10.0, 10.0, 1, true),
            tx("ACME", Side::Buy, 20.0, 15.0, 2, true),
            tx("ACME", Side::Buy, 10.0, 20.0, 3, true),
        ];
        let view = aggregate(&log).unwrap();
        let acme = &view.holdings[0];
        // (100 + 300 + 200) / 40
        assert!((acme.average_cost - 15.0).abs() < 1e-9);
        assert!((acme.total_cost - 600.0).abs() < 1e-9);

        log.push(tx("ACME", Side::Sell, 15.0, 30.0, 4, true));
        let view = aggregate(&log).unwrap();
        let acme = &view.holdings[0];
        assert!((acme.quantity - 25.0).abs() < 1e-9);
        assert!((acme.total_cost - (600.0 - 225.0)).abs() < 1e-9);
        // average cost is unchanged by a sell
        assert!((acme.average_cost - 15.0).abs() < 1e-9);
    }

    #[test]
    fn oversell_is_rejected() {
        let log = vec![
            tx("ACME", Side::Buy, 5.0, 10.0, 1, true),
            tx("ACME", Side::Sell, 6.0, 10.0, 2, true),
        ];
        let err = aggregate(&log).unwrap_err();
        assert_eq!(err.symbol, "ACME");
        assert_eq!(err.requested, 6.0);
    }

    #[test]
    fn sell_before_buy_in_date_order_is_rejected() {
        // inserted in this order, but the sell is dated before the buy
        let log = vec![
            tx("ACME", Side::Buy, 5.0, 10.0, 5, true),
            tx("ACME", Side::Sell, 5.0, 10.0, 2, true),
        ];
        assert!(aggregate(&log).is_err());
    }

    #[test]
    fn fully_sold_positions_are_closed() {
        let log = vec![
            tx("ACME", Side::Buy, 0.1, 10.0, 1, true),
            tx("ACME", Side::Buy, 0.2, 10.0, 2, true),
            tx("ACME", Side::Sell, 0.3, 12.0, 3, true),
        ];
        let view = aggregate(&log).unwrap();
        assert!(view.holdings.is_empty());
    }

    #[test]
    fn books_are_independent() {
        let log = vec![
            tx("ACME", Side::Buy, 5.0, 10.0, 1, true),
            tx("ACME", Side::Buy, 3.0, 11.0, 1, false),
            tx("ZZZ", Side::Buy, 1.0, 1.0, 1, false),
        ];
        let view = aggregate(&log).unwrap();
        assert_eq!(view.holdings.len(), 1);
        assert_eq!(view.watchlist.len(), 2);
        assert_eq!(view.watchlist[0].symbol, "ACME");
        assert_eq!(view.watchlist[0].quantity, 3.0);

        // a watchlist buy does not cover a real sell
        let log = vec![
            tx("ACME", Side::Buy, 3.0, 11.0, 1, false),
            tx("ACME", Side::Sell, 1.0, 11.0, 2, true),
        ];
        assert!(aggregate(&log).is_err());
    }

    #[test]
    fn zero_quantity_guard() {
        let running = Running::default();
        assert_eq!(running.average_cost(), 0.0);
    }
}
