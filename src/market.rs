// src/market.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PERIODS: &[&str] = &[
    "1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max",
];
pub const INTERVALS: &[&str] = &[
    "1m", "2m", "5m", "15m", "30m", "60m", "90m", "1h", "1d", "5d", "1wk", "1mo", "3mo",
];

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("no market data for {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("market data provider error: {0}")]
    Upstream(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub long_name: Option<String>,
    pub current_price: f64,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume: Option<u64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<Quote, MarketError>;
    async fn history(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<Candle>, MarketError>;
}

/// Upper-cases and checks a ticker before it goes anywhere near a URL.
pub fn normalize_symbol(raw: &str) -> Result<String, MarketError> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 15
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(symbol)
    } else {
        Err(MarketError::InvalidInput(format!("Invalid ticker symbol `{}`", raw)))
    }
}

pub fn validate_range(period: &str, interval: &str) -> Result<(), MarketError> {
    if !PERIODS.contains(&period) {
        return Err(MarketError::InvalidInput(format!(
            "Unsupported period `{}`; expected one of {}",
            period,
            PERIODS.join(", ")
        )));
    }
    if !INTERVALS.contains(&interval) {
        return Err(MarketError::InvalidInput(format!(
            "Unsupported interval `{}`; expected one of {}",
            interval,
            INTERVALS.join(", ")
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: Option<String>,
    long_name: Option<String>,
    short_name: Option<String>,
    currency: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<u64>,
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

fn first_result(body: &str, symbol: &str) -> Result<ChartResult, MarketError> {
    let response: ChartResponse = serde_json::from_str(body)
        .map_err(|e| MarketError::Upstream(format!("unreadable chart payload: {}", e)))?;
    response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| MarketError::NotFound(symbol.to_string()))
}

pub fn parse_quote(body: &str, symbol: &str) -> Result<Quote, MarketError> {
    let meta = first_result(body, symbol)?.meta;
    let current_price = meta
        .regular_market_price
        .ok_or_else(|| MarketError::NotFound(symbol.to_string()))?;
    Ok(Quote {
        symbol: meta.symbol.unwrap_or_else(|| symbol.to_string()),
        long_name: meta.long_name.or(meta.short_name),
        current_price,
        day_high: meta.regular_market_day_high,
        day_low: meta.regular_market_day_low,
        market_cap: meta.market_cap,
        volume: meta.regular_market_volume,
        currency: meta.currency,
    })
}

/// Candles with any missing OHLC value are skipped; the provider emits nulls
/// for halted or not-yet-closed bars.
pub fn parse_history(body: &str, symbol: &str) -> Result<Vec<Candle>, MarketError> {
    let result = first_result(body, symbol)?;
    let series = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();
    let at = |values: &Vec<Option<f64>>, i: usize| values.get(i).copied().flatten();

    let candles = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            Some(Candle {
                date: DateTime::<Utc>::from_timestamp(*ts, 0)?,
                open: at(&series.open, i)?,
                high: at(&series.high, i)?,
                low: at(&series.low, i)?,
                close: at(&series.close, i)?,
                volume: series.volume.get(i).copied().flatten().unwrap_or(0),
            })
        })
        .collect();
    Ok(candles)
}

/// Chart-API client; one request per lookup, no retries.
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(base_url: &str) -> Result<Self, MarketError> {
        let client = Client::builder()
            .user_agent(concat!("club_dashboard/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| MarketError::Upstream(e.to_string()))?;
        Ok(YahooClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn chart(&self, symbol: &str, period: &str, interval: &str) -> Result<String, MarketError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        info!("Fetching chart for {} ({} / {})", symbol, period, interval);
        let response = self
            .client
            .get(&url)
            .query(&[("range", period), ("interval", interval)])
            .send()
            .await
            .map_err(|e| {
                error!("HTTP request failed: {}", e);
                MarketError::Upstream(e.to_string())
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            error!("Failed to fetch data from provider: HTTP {}", status);
            return Err(MarketError::Upstream(format!("HTTP {}", status)));
        }
        response
            .text()
            .await
            .map_err(|e| MarketError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl MarketData for YahooClient {
    async fn quote(&self, symbol: &str) -> Result<Quote, MarketError> {
        let body = self.chart(symbol, "1d", "1d").await?;
        parse_quote(&body, symbol)
    }

    async fn history(
        &self,
        symbol: &str,
        period: &str,
        interval: &str,
    ) -> Result<Vec<Candle>, MarketError> {
        let body = self.chart(symbol, period, interval).await?;
        parse_history(&body, symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "symbol": "AAPL",
                    "longName": "Apple Inc.",
                    "currency": "USD",
                    "regularMarketPrice": 190.5,
                    "regularMarketDayHigh": 192.0,
                    "regularMarketDayLow": 188.25,
                    "regularMarketVolume": 51234567
                },
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{
                        "open":   [187.15, null, 182.15],
                        "high":   [188.44, 185.88, 183.09],
                        "low":    [183.89, 183.43, 180.88],
                        "close":  [185.64, 184.25, 181.91],
                        "volume": [82488700, 58414500, null]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parses_quote_meta() {
        let quote = parse_quote(CHART, "AAPL").unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.long_name.as_deref(), Some("Apple Inc."));
        assert_eq!(quote.current_price, 190.5);
        assert_eq!(quote.day_low, Some(188.25));
        assert_eq!(quote.market_cap, None);
        assert_eq!(quote.volume, Some(51_234_567));

        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["currentPrice"], 190.5);
        assert_eq!(json["longName"], "Apple Inc.");
    }

    #[test]
    fn history_skips_incomplete_bars() {
        let candles = parse_history(CHART, "AAPL").unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 185.64);
        assert_eq!(candles[1].close, 181.91);
        assert_eq!(candles[1].volume, 0);
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        assert!(matches!(parse_quote(body, "NOPE"), Err(MarketError::NotFound(_))));

        let no_price = r#"{"chart":{"result":[{"meta":{"symbol":"X"}}]}}"#;
        assert!(matches!(parse_quote(no_price, "X"), Err(MarketError::NotFound(_))));
    }

    #[test]
    fn garbage_payload_is_an_upstream_error() {
        assert!(matches!(
            parse_quote("<html>", "AAPL"),
            Err(MarketError::Upstream(_))
        ));
    }

    #[test]
    fn symbol_and_range_validation() {
        assert_eq!(normalize_symbol(" brk-b ").unwrap(), "BRK-B");
        assert_eq!(normalize_symbol("^gspc").unwrap(), "^GSPC");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("../etc").is_err());
        assert!(validate_range("1mo", "1d").is_ok());
        assert!(validate_range("2w", "1d").is_err());
        assert!(validate_range("1y", "7h").is_err());
    }
}
