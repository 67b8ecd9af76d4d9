// src/api/users.rs
use super::{json_body, with_caller, with_state, AppState};
use crate::auth::{
    cleared_cookie, hash_password, validate_password, validate_username, verify_password, Caller,
};
use crate::error::{reject, ApiError};
use crate::models::{LoginRequest, NewUser, PasswordUpdate, Role, RoleUpdate, User};
use chrono::Utc;
use log::{error, info, warn};
use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let login = warp::path!("api" / "login")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(login_handler);

    let logout = warp::path!("api" / "logout")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and_then(logout_handler);

    let session = warp::path!("api" / "session")
        .or(warp::path!("api" / "status"))
        .unify()
        .and(warp::get())
        .and(with_caller(state.clone()))
        .and_then(session_handler);

    let list = warp::path!("api" / "users")
        .and(warp::get())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and_then(list_users_handler);

    let create = warp::path!("api" / "users")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(create_user_handler);

    let role = warp::path!("api" / "users" / String / "role")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(role_handler);

    let password = warp::path!("api" / "users" / String / "password")
        .and(warp::post())
        .and(with_caller(state.clone()))
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(password_handler);

    let delete = warp::path!("api" / "users" / String)
        .and(warp::delete())
        .and(with_caller(state.clone()))
        .and(with_state(state))
        .and_then(delete_user_handler);

    login
        .or(logout)
        .or(session)
        .or(list)
        .or(create)
        .or(role)
        .or(password)
        .or(delete)
}

/// Creates the configured admin account unless that username already exists.
pub async fn ensure_admin(state: &AppState, username: &str, password: &str) -> Result<(), ApiError> {
    validate_username(username)?;
    validate_password(password)?;
    if state.store.get_user(username).await?.is_some() {
        info!("Admin account `{}` already present.", username);
        return Ok(());
    }
    let user = User {
        username: username.to_string(),
        password_hash: hash_password(password),
        role: Role::Admin,
        created_at: Utc::now(),
    };
    state.store.insert_user(&user).await?;
    info!("Created admin account `{}`.", username);
    Ok(())
}

async fn login_handler(state: AppState, login: LoginRequest) -> Result<impl Reply, Rejection> {
    let user = state.store.get_user(&login.username).await.map_err(reject)?;
    let user = match user {
        Some(user) if verify_password(&login.password, &user.password_hash) => user,
        _ => {
            warn!("Failed login for `{}`.", login.username);
            return Err(reject(ApiError::Unauthorized(
                "Invalid username or password".to_string(),
            )));
        }
    };

    let token = state.sessions.create_token(&user).map_err(reject)?;
    info!("{} logged in.", user.username);
    let body = json!({
        "username": user.username,
        "role": user.role,
        "token": token,
    });
    Ok(warp::reply::with_header(
        warp::reply::json(&body),
        "set-cookie",
        state.sessions.session_cookie(&token),
    ))
}

async fn logout_handler(caller: Caller) -> Result<impl Reply, Rejection> {
    if let Some(user) = caller.user() {
        info!("{} logged out.", user.username);
    }
    Ok(warp::reply::with_header(
        warp::reply::json(&json!({ "message": "Logged out" })),
        "set-cookie",
        cleared_cookie(),
    ))
}

async fn session_handler(caller: Caller) -> Result<impl Reply, Rejection> {
    let body = match caller.user() {
        Some(user) => json!({
            "authenticated": true,
            "username": user.username,
            "role": user.role,
        }),
        None => json!({ "authenticated": false }),
    };
    Ok(warp::reply::json(&body))
}

async fn list_users_handler(caller: Caller, state: AppState) -> Result<impl Reply, Rejection> {
    caller.require(Role::Admin).map_err(reject)?;
    let mut users = state.store.list_users().await.map_err(reject)?;
    users.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(warp::reply::json(&users))
}

async fn create_user_handler(
    caller: Caller,
    state: AppState,
    new: NewUser,
) -> Result<impl Reply, Rejection> {
    let admin = caller.require(Role::Admin).map_err(reject)?;
    validate_username(&new.username).map_err(reject)?;
    validate_password(&new.password).map_err(reject)?;

    let user = User {
        username: new.username,
        password_hash: hash_password(&new.password),
        role: new.role.unwrap_or(Role::Guest),
        created_at: Utc::now(),
    };
    match state.store.insert_user(&user).await {
        Ok(_) => {
            info!(
                "{} created user `{}` as {}.",
                admin.username, user.username, user.role
            );
            Ok(warp::reply::with_status(
                warp::reply::json(&user),
                StatusCode::CREATED,
            ))
        }
        Err(e) => {
            warn!("Could not create user `{}`: {}", user.username, e);
            Err(reject(e))
        }
    }
}

async fn role_handler(
    username: String,
    caller: Caller,
    state: AppState,
    update: RoleUpdate,
) -> Result<impl Reply, Rejection> {
    let admin = caller.require(Role::Admin).map_err(reject)?;
    if admin.username == username && update.role != Role::Admin {
        return Err(reject(ApiError::Forbidden(
            "Admins cannot demote their own account".to_string(),
        )));
    }
    match state.store.update_role(&username, update.role).await {
        Ok(true) => {
            info!(
                "{} set role of `{}` to {}.",
                admin.username, username, update.role
            );
            Ok(warp::reply::json(&json!({
                "username": username,
                "role": update.role,
            })))
        }
        Ok(false) => Err(reject(ApiError::NotFound("User not found".to_string()))),
        Err(e) => {
            error!("Failed to update role of `{}`: {}", username, e);
            Err(reject(e))
        }
    }
}

async fn password_handler(
    username: String,
    caller: Caller,
    state: AppState,
    update: PasswordUpdate,
) -> Result<impl Reply, Rejection> {
    let actor = caller.require(Role::Guest).map_err(reject)?;
    if actor.username == username {
        // Changing your own password needs the current one, admins included.
        let current = update.current_password.as_deref().unwrap_or_default();
        if !verify_password(current, &actor.password_hash) {
            return Err(reject(ApiError::Forbidden(
                "Current password is incorrect".to_string(),
            )));
        }
    } else {
        caller.require(Role::Admin).map_err(reject)?;
    }
    validate_password(&update.password).map_err(reject)?;

    match state
        .store
        .update_password(&username, &hash_password(&update.password))
        .await
    {
        Ok(true) => {
            info!("Password of `{}` changed by {}.", username, actor.username);
            Ok(warp::reply::json(&json!({ "message": "Password updated" })))
        }
        Ok(false) => Err(reject(ApiError::NotFound("User not found".to_string()))),
        Err(e) => {
            error!("Failed to update password of `{}`: {}", username, e);
            Err(reject(e))
        }
    }
}

async fn delete_user_handler(
    username: String,
    caller: Caller,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let admin = caller.require(Role::Admin).map_err(reject)?;
    if admin.username == username {
        return Err(reject(ApiError::Forbidden(
            "Admins cannot delete their own account".to_string(),
        )));
    }
    match state.store.delete_user(&username).await {
        Ok(true) => {
            info!("{} deleted user `{}`.", admin.username, username);
            Ok(warp::reply::json(&json!({ "message": "User deleted" })))
        }
        Ok(false) => Err(reject(ApiError::NotFound("User not found".to_string()))),
        Err(e) => {
            error!("Failed to delete user `{}`: {}", username, e);
            Err(reject(e))
        }
    }
}
