// src/api/mod.rs
use crate::auth::{extract_token, Caller, Sessions, SESSION_COOKIE};
use crate::db::Store;
use crate::error::{handle_rejection, reject};
use crate::market::MarketData;
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply};

mod market;
mod pages;
mod portfolio;
mod presentations;
mod users;


pub use self::users::ensure_admin;

/// Largest accepted request body (page content is the biggest payload).
const MAX_BODY_BYTES: u64 = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub market: Arc<dyn MarketData>,
    pub sessions: Arc<Sessions>,
}

/// Every route plus JSON error recovery and request logging.
pub fn app(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    routes(state)
        .recover(handle_rejection)
        .with(warp::log("club_dashboard::access"))
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    market::routes(state.clone())
        .or(portfolio::routes(state.clone()))
        .or(presentations::routes(state.clone()))
        .or(pages::routes(state.clone()))
        .or(users::routes(state))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the session token (bearer header or cookie) to a stored user.
/// Missing, invalid or expired tokens yield an anonymous caller.
fn with_caller(state: AppState) -> impl Filter<Extract = (Caller,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::cookie::optional::<String>(SESSION_COOKIE))
        .and(with_state(state))
        .and_then(resolve_caller)
}

async fn resolve_caller(
    authorization: Option<String>,
    cookie: Option<String>,
    state: AppState,
) -> Result<Caller, Rejection> {
    let token = match extract_token(authorization.as_deref(), cookie.as_deref()) {
        Some(token) => token,
        None => return Ok(Caller(None)),
    };
    let claims = match state.sessions.verify_token(&token) {
        Some(claims) => claims,
        None => return Ok(Caller(None)),
    };
    // Re-read the user so role changes and deletions apply immediately.
    let user = state.store.get_user(&claims.sub).await.map_err(reject)?;
    Ok(Caller(user))
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}
