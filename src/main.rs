// src/main.rs
mod api;
mod auth;
mod config;
mod db;
mod error;
mod market;
mod models;
mod portfolio;

use crate::api::AppState;
use crate::auth::Sessions;
use crate::config::{Config, StoreBackend};
use crate::db::{MemoryStore, ScyllaStore, Store};
use crate::market::YahooClient;
use env_logger::{Builder, Env};
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;

async fn build_state(config: &Config) -> Result<AppState, String> {
    let store: Arc<dyn Store> = match config.store_backend {
        StoreBackend::Scylla => {
            let store = ScyllaStore::connect(&config.scylla_node, &config.scylla_keyspace)
                .await
                .map_err(|e| format!("Failed to initialize database: {}", e))?;
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; nothing will survive a restart.");
            Arc::new(MemoryStore::new())
        }
    };

    let secret = match &config.jwt_secret {
        Some(secret) => secret.clone(),
        None => {
            warn!("JWT_SECRET is not set; generated a random one. Sessions end on restart.");
            auth::random_secret()
        }
    };

    let market = YahooClient::new(&config.market_data_url)
        .map_err(|e| format!("Failed to build market data client: {}", e))?;

    Ok(AppState {
        store,
        market: Arc::new(market),
        sessions: Arc::new(Sessions::new(secret, config.session_ttl_hours)),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let state = match build_state(&config).await {
        Ok(state) => state,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Store ready ({:?} backend).", config.store_backend);

    if let Some((username, password)) = &config.admin {
        if let Err(e) = api::ensure_admin(&state, username, password).await {
            error!("Failed to create admin account: {}", e);
            return ExitCode::FAILURE;
        }
    }

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api::app(state)).run(config.bind_addr).await;
    ExitCode::SUCCESS
}
