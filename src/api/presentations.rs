// src/api/presentations.rs
use super::{json_body, with_caller, with_state, AppState};
use crate::auth::Caller;
use crate::error::{reject, ApiError};
use crate::market::normalize_symbol;
use crate::models::{NewPresentation, Presentation, PresentationView, Role, Vote, VoteRequest};
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "presentations")
        .and(warp::get())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_handler);

    let create = warp::path!("api" / "presentations")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(create_handler);

    let vote = warp::path!("api" / "presentations" / Uuid / "vote")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(vote_handler);

    let delete = warp::path!("api" / "presentations" / Uuid)
        .and(warp::delete())
        .and(with_caller(state.clone()))
        .and(with_state(state))
        .and_then(delete_handler);

    list.or(create).or(vote).or(delete)
}

fn validate(new: &NewPresentation) -> Result<(), ApiError> {
    let title = new.title.trim();
    if title.is_empty() || title.chars().count() > 200 {
        return Err(ApiError::BadRequest(
            "Title must be between 1 and 200 characters".to_string(),
        ));
    }
    let link = new.link.trim();
    if !(link.starts_with("https://") || link.starts_with("http://")) || link.len() > 2048 {
        return Err(ApiError::BadRequest(
            "Link must be an http(s) URL".to_string(),
        ));
    }
    Ok(())
}

async fn list_handler(caller: Caller, state: AppState) -> Result<impl Reply, Rejection> {
    caller.require(Role::Guest).map_err(reject)?;
    let mut presentations = state.store.list_presentations().await.map_err(reject)?;
    presentations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let views: Vec<PresentationView> = presentations.into_iter().map(Into::into).collect();
    Ok(warp::reply::json(&views))
}

async fn create_handler(
    caller: Caller,
    state: AppState,
    new: NewPresentation,
) -> Result<impl Reply, Rejection> {
    let user = caller.require(Role::Member).map_err(reject)?;
    validate(&new).map_err(reject)?;
    let ticker = normalize_symbol(&new.ticker).map_err(reject)?;
    let presentation = Presentation::new(
        new.title.trim().to_string(),
        new.link.trim().to_string(),
        ticker,
        new.action,
        user.username.clone(),
    );

    match state.store.insert_presentation(&presentation).await {
        Ok(_) => {
            info!(
                "Presentation {} created by {}; voting closes {}.",
                presentation.id, user.username, presentation.deadline
            );
            Ok(warp::reply::with_status(
                warp::reply::json(&PresentationView::from(presentation)),
                StatusCode::CREATED,
            ))
        }
        Err(e) => {
            error!("Failed to add presentation: {}", e);
            Err(reject(e))
        }
    }
}

async fn vote_handler(
    id: Uuid,
    caller: Caller,
    state: AppState,
    request: VoteRequest,
) -> Result<impl Reply, Rejection> {
    let user = caller.require(Role::Member).map_err(reject)?;
    let presentation = state
        .store
        .get_presentation(id)
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound("Presentation not found".to_string())))?;

    let now = Utc::now();
    if !presentation.voting_open_at(now) {
        warn!("{} tried to vote on closed presentation {}.", user.username, id);
        return Err(reject(ApiError::Forbidden(
            "Voting has closed for this presentation".to_string(),
        )));
    }

    let vote = Vote {
        presentation_id: id,
        username: user.username.clone(),
        direction: request.vote,
        cast_at: now,
    };
    match state.store.cast_vote(&vote).await {
        Ok(updated) => {
            info!(
                "{} voted {} on presentation {}.",
                vote.username,
                vote.direction.as_str(),
                id
            );
            Ok(warp::reply::json(&PresentationView::from(updated)))
        }
        Err(e) => {
            warn!("Vote by {} on {} refused: {}", vote.username, id, e);
            Err(reject(e))
        }
    }
}

async fn delete_handler(id: Uuid, caller: Caller, state: AppState) -> Result<impl Reply, Rejection> {
    caller.require(Role::Admin).map_err(reject)?;
    match state.store.delete_presentation(id).await {
        Ok(true) => {
            info!("Presentation {} deleted.", id);
            Ok(warp::reply::json(&json!({ "message": "Presentation deleted" })))
        }
        Ok(false) => Err(reject(ApiError::NotFound(
            "Presentation not found".to_string(),
        ))),
        Err(e) => {
            error!("Failed to delete presentation {}: {}", id, e);
            Err(reject(e))
        }
    }
}
