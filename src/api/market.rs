// src/api/market.rs
use super::{json_body, with_state, AppState};
use crate::error::{reject, ApiError};
use crate::market::{normalize_symbol, validate_range, Quote};
use futures::future::join_all;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warp::{Filter, Rejection, Reply};

const MAX_BATCH: usize = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    period: Option<String>,
    interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuotesRequest {
    symbols: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct QuotesResponse {
    quotes: BTreeMap<String, Quote>,
    errors: BTreeMap<String, String>,
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let quote = warp::path!("api" / "stock" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(stock_handler);

    let history = warp::path!("api" / "stock" / String / "history")
        .and(warp::get())
        .and(warp::query::<HistoryParams>())
        .and(with_state(state.clone()))
        .and_then(history_handler);

    let batch = warp::path!("api" / "quotes")
        .and(warp::post())
        .and(with_state(state))
        .and(json_body())
        .and_then(quotes_handler);

    quote.or(history).or(batch)
}

async fn stock_handler(symbol: String, state: AppState) -> Result<impl Reply, Rejection> {
    let symbol = normalize_symbol(&symbol).map_err(reject)?;
    match state.market.quote(&symbol).await {
        Ok(quote) => {
            info!("Quote for {} retrieved.", symbol);
            Ok(warp::reply::json(&quote))
        }
        Err(e) => {
            error!("Failed to fetch quote for {}: {}", symbol, e);
            Err(reject(e))
        }
    }
}

async fn history_handler(
    symbol: String,
    params: HistoryParams,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let symbol = normalize_symbol(&symbol).map_err(reject)?;
    let period = params.period.unwrap_or_else(|| "1mo".to_string());
    let interval = params.interval.unwrap_or_else(|| "1d".to_string());
    validate_range(&period, &interval).map_err(reject)?;

    match state.market.history(&symbol, &period, &interval).await {
        Ok(candles) => {
            info!("Fetched {} candles for {}.", candles.len(), symbol);
            Ok(warp::reply::json(&candles))
        }
        Err(e) => {
            error!("Failed to fetch history for {}: {}", symbol, e);
            Err(reject(e))
        }
    }
}

async fn quotes_handler(state: AppState, request: QuotesRequest) -> Result<impl Reply, Rejection> {
    if request.symbols.is_empty() || request.symbols.len() > MAX_BATCH {
        return Err(reject(ApiError::BadRequest(format!(
            "Provide between 1 and {} symbols",
            MAX_BATCH
        ))));
    }

    let mut response = QuotesResponse::default();
    let mut symbols: Vec<String> = Vec::new();
    for raw in &request.symbols {
        match normalize_symbol(raw) {
            Ok(symbol) if !symbols.contains(&symbol) => symbols.push(symbol),
            Ok(_) => {}
            Err(e) => {
                response.errors.insert(raw.clone(), e.to_string());
            }
        }
    }

    let lookups = symbols.iter().map(|symbol| state.market.quote(symbol));
    let results = join_all(lookups).await;
    for (symbol, result) in symbols.into_iter().zip(results) {
        match result {
            Ok(quote) => {
                response.quotes.insert(symbol, quote);
            }
            Err(e) => {
                // Same wording as the single-symbol endpoint, minus internals.
                response.errors.insert(symbol, ApiError::from(e).public_message());
            }
        }
    }
    info!(
        "Batch quote: {} ok, {} failed.",
        response.quotes.len(),
        response.errors.len()
    );
    Ok(warp::reply::json(&response))
}
