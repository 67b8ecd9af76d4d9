// src/api/pages.rs
use super::{json_body, with_caller, with_state, AppState};
use crate::auth::Caller;
use crate::error::{reject, ApiError};
use crate::models::{PageContent, PageUpdate, Role};
use chrono::Utc;
use log::{error, info};
use warp::{Filter, Rejection, Reply};

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let get = warp::path!("api" / "page" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_page_handler);

    let update = warp::path!("api" / "page" / String)
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state))
        .and(json_body())
        .and_then(update_page_handler);

    get.or(update)
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "Page names use lowercase letters, digits and `-`".to_string(),
        ))
    }
}

async fn get_page_handler(name: String, state: AppState) -> Result<impl Reply, Rejection> {
    validate_name(&name).map_err(reject)?;
    let page = state
        .store
        .get_page(&name)
        .await
        .map_err(reject)?
        .unwrap_or_else(|| PageContent::default_for(&name));
    Ok(warp::reply::json(&page))
}

async fn update_page_handler(
    name: String,
    caller: Caller,
    state: AppState,
    update: PageUpdate,
) -> Result<impl Reply, Rejection> {
    let user = caller.require(Role::Admin).map_err(reject)?;
    validate_name(&name).map_err(reject)?;
    let page = PageContent {
        name,
        content: update.content,
        updated_at: Some(Utc::now()),
        updated_by: Some(user.username.clone()),
    };
    match state.store.put_page(&page).await {
        Ok(_) => {
            info!("Page `{}` updated by {}.", page.name, user.username);
            Ok(warp::reply::json(&page))
        }
        Err(e) => {
            error!("Failed to save page `{}`: {}", page.name, e);
            Err(reject(e))
        }
    }
}
