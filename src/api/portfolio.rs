// src/api/portfolio.rs
use super::{json_body, with_caller, with_state, AppState};
use crate::auth::Caller;
use crate::db::StoreError;
use crate::error::{reject, ApiError};
use crate::market::normalize_symbol;
use crate::models::{NewTransaction, Role, SectionUpdate, Transaction};
use crate::portfolio::aggregate;
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const MAX_LABEL_LEN: usize = 64;

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let view = warp::path!("api" / "portfolio")
        .and(warp::get())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and_then(portfolio_handler);

    let list = warp::path!("api" / "transaction")
        .and(warp::get())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_transactions_handler);

    let add = warp::path!("api" / "transaction")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(add_transaction_handler);

    let delete = warp::path!("api" / "transaction" / Uuid)
        .and(warp::delete())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_transaction_handler);

    let section = warp::path!("api" / "portfolio" / "section")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state))
        .and(json_body())
        .and_then(section_handler);

    view.or(list).or(add).or(delete).or(section)
}

fn label(raw: Option<String>, field: &str) -> Result<String, ApiError> {
    let value = raw.unwrap_or_default().trim().to_string();
    if value.chars().count() > MAX_LABEL_LEN {
        return Err(ApiError::BadRequest(format!(
            "{} must be at most {} characters",
            field, MAX_LABEL_LEN
        )));
    }
    Ok(value)
}

async fn portfolio_handler(caller: Caller, state: AppState) -> Result<impl Reply, Rejection> {
    caller.require(Role::Guest).map_err(reject)?;
    let transactions = state.store.list_transactions().await.map_err(reject)?;
    match aggregate(&transactions) {
        Ok(view) => {
            info!(
                "Portfolio aggregated: {} holdings, {} watchlist.",
                view.holdings.len(),
                view.watchlist.len()
            );
            Ok(warp::reply::json(&view))
        }
        Err(e) => {
            error!("Stored transaction log is inconsistent: {}", e);
            Err(reject(ApiError::Internal(e.to_string())))
        }
    }
}

async fn list_transactions_handler(
    caller: Caller,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    caller.require(Role::Guest).map_err(reject)?;
    let mut transactions = state.store.list_transactions().await.map_err(reject)?;
    transactions.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
    Ok(warp::reply::json(&transactions))
}

async fn add_transaction_handler(
    caller: Caller,
    state: AppState,
    new: NewTransaction,
) -> Result<impl Reply, Rejection> {
    let user = caller.require(Role::Member).map_err(reject)?;
    let symbol = normalize_symbol(&new.symbol).map_err(reject)?;
    if !new.quantity.is_finite() || new.quantity <= 0.0 {
        return Err(reject(ApiError::BadRequest(
            "Quantity must be a positive number".to_string(),
        )));
    }
    if !new.price.is_finite() || new.price < 0.0 {
        return Err(reject(ApiError::BadRequest(
            "Price must be zero or more".to_string(),
        )));
    }
    if !(new.quantity * new.price).is_finite() {
        return Err(reject(ApiError::BadRequest(
            "Transaction value is out of range".to_string(),
        )));
    }

    let name = label(new.name, "Name").map_err(reject)?;
    let now = Utc::now();
    let tx = Transaction {
        id: Uuid::new_v4(),
        name: if name.is_empty() { symbol.clone() } else { name },
        sector: label(new.sector, "Sector").map_err(reject)?,
        section: label(new.section, "Section").map_err(reject)?,
        symbol,
        is_real: new.is_real,
        side: new.side,
        quantity: new.quantity,
        price: new.price,
        total_value: new.quantity * new.price,
        date: new.date.unwrap_or_else(|| now.date_naive()),
        created_by: user.username.clone(),
        created_at: now,
    };

    match state.store.insert_transaction_checked(&tx).await {
        Ok(_) => {
            info!(
                "Transaction {} added: {} {} {} @ {}.",
                tx.id,
                tx.side.as_str(),
                tx.quantity,
                tx.symbol,
                tx.price
            );
            Ok(warp::reply::with_status(
                warp::reply::json(&tx),
                StatusCode::CREATED,
            ))
        }
        Err(StoreError::Oversold(e)) => {
            warn!("Rejected {} by {}: {}", tx.side.as_str(), user.username, e);
            Err(reject(e))
        }
        Err(e) => {
            error!("Failed to add transaction: {}", e);
            Err(reject(e))
        }
    }
}

async fn delete_transaction_handler(
    id: Uuid,
    caller: Caller,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    caller.require(Role::Admin).map_err(reject)?;
    match state.store.delete_transaction_checked(id).await {
        Ok(true) => {
            info!("Transaction {} deleted.", id);
            Ok(warp::reply::json(&json!({ "message": "Transaction deleted" })))
        }
        Ok(false) => Err(reject(ApiError::NotFound(
            "Transaction not found".to_string(),
        ))),
        Err(StoreError::Oversold(e)) => Err(reject(ApiError::BadRequest(format!(
            "Deleting this transaction would leave the log inconsistent: {}",
            e
        )))),
        Err(e) => {
            error!("Failed to delete transaction {}: {}", id, e);
            Err(reject(e))
        }
    }
}

async fn section_handler(
    caller: Caller,
    state: AppState,
    update: SectionUpdate,
) -> Result<impl Reply, Rejection> {
    caller.require(Role::Member).map_err(reject)?;
    let symbol = normalize_symbol(&update.symbol).map_err(reject)?;
    let section = label(Some(update.section), "Section").map_err(reject)?;

    match state.store.set_section(&symbol, &section).await {
        Ok(0) => Err(reject(ApiError::NotFound(format!(
            "No transactions for {}",
            symbol
        )))),
        Ok(updated) => {
            info!("Moved {} to section `{}` ({} records).", symbol, section, updated);
            Ok(warp::reply::json(&json!({
                "symbol": symbol,
                "section": section,
                "updated": updated,
            })))
        }
        Err(e) => {
            error!("Failed to update section for {}: {}", symbol, e);
            Err(reject(e))
        }
    }
}
