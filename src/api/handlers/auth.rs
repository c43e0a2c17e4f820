use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::auth::{verify_password, CurrentUser, PrincipalKind, TOKEN_COOKIE};
use crate::error::{Error, Result};
use crate::models::Role;
use crate::notify::{format_business_alert, format_feedback, BusinessEvent};

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: CurrentUser,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackInput {
    pub text: String,
}

fn cookie_header(value: &str, max_age: i64) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        TOKEN_COOKIE, value, max_age
    ))
    .map_err(|e| Error::Other(e.into()))
}

/// Back-office users are tried first, then technicians.
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> Result<(HeaderMap, Json<LoginResponse>)> {
    let login = input.login.trim();

    let principal = if let Some(creds) = state.db.get_user_credentials(login)? {
        Some((creds, PrincipalKind::User))
    } else {
        state
            .db
            .get_master_credentials(login)?
            .map(|creds| (creds, PrincipalKind::Master))
    };

    let Some((creds, kind)) = principal else {
        tracing::info!(login, "Login failed: unknown account");
        return Err(Error::Unauthorized);
    };
    if !verify_password(&input.password, &creds.password_hash) {
        tracing::info!(login, "Login failed: wrong password");
        return Err(Error::Unauthorized);
    }
    if !creds.is_active {
        tracing::info!(login, "Login refused: account inactive");
        return Err(Error::Forbidden);
    }

    let user = match kind {
        PrincipalKind::User => state.db.get_user(creds.id)?.map(|u| CurrentUser {
            id: u.id,
            kind,
            role: u.role,
            city_id: u.city_id,
            name: u.name,
            login: u.login,
        }),
        PrincipalKind::Master => state.db.get_master(creds.id)?.map(|m| CurrentUser {
            id: m.id,
            kind,
            role: Role::Master,
            city_id: m.city_id,
            name: m.name,
            login: m.login,
        }),
    }
    .ok_or(Error::Unauthorized)?;

    let token = state.signer.issue(user.id, kind, user.role, user.city_id)?;
    let expires_in = state.signer.ttl().num_seconds();

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, cookie_header(&token, expires_in)?);

    tracing::info!(login = %user.login, role = user.role.as_str(), "Login succeeded");
    state.notifier.spawn_send(format_business_alert(
        BusinessEvent::Login,
        "User signed in",
        Some(&format!("{} ({})", user.name, user.login)),
        &[("role", user.role.as_str().to_string())],
    ));

    Ok((
        headers,
        Json(LoginResponse {
            token,
            expires_in,
            user,
        }),
    ))
}

pub async fn logout() -> Result<(HeaderMap, Json<serde_json::Value>)> {
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, cookie_header("", 0)?);
    Ok((headers, Json(serde_json::json!({ "status": "logged_out" }))))
}

pub async fn me(user: CurrentUser) -> Json<CurrentUser> {
    Json(user)
}

pub async fn feedback(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<FeedbackInput>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let text = input.text.trim();
    if text.is_empty() {
        return Err(Error::validation("Feedback text must not be empty"));
    }

    state
        .notifier
        .spawn_send(format_feedback(&user.name, &user.login, text));
    tracing::info!(login = %user.login, "Feedback received");

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "delivered": state.notifier.is_enabled() })),
    ))
}
