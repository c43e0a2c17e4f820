//! Webhooks called by the telephony provider. Authenticated by body
//! signature when keys are configured, not by user tokens.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::de::DeserializeOwned;

use crate::api::AppState;
use crate::error::{Error, Result};
use crate::notify::format_incoming_call;
use crate::recordings::RecordingOutcome;
use crate::telephony::{
    handle_incoming_call, verify_signature, IncomingCall, RecordingUpload, SIGNATURE_HEADER,
};

fn check_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let Some(keys) = &state.config.telephony else {
        return Ok(());
    };
    let sign = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::Unauthorized)?;

    if verify_signature(keys, body, sign) {
        Ok(())
    } else {
        tracing::warn!("Telephony webhook with invalid signature");
        Err(Error::Unauthorized)
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::validation(format!("Invalid payload: {}", e)))
}

pub async fn incoming_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    check_signature(&state, &headers, &body)?;
    let call: IncomingCall = parse_body(&body)?;
    tracing::info!(from = %call.from.number, entry_id = ?call.entry_id, "Incoming call");

    let outcome = handle_incoming_call(&state.db, &call, Utc::now())?;
    let request = &outcome.request;

    state.notifier.spawn_send(format_incoming_call(
        &request.client_phone,
        request.atc_phone.as_deref().unwrap_or(""),
        &request.id.to_string(),
        !outcome.created,
    ));

    Ok(Json(serde_json::json!({
        "success": true,
        "request_id": request.id,
        "created": outcome.created,
    })))
}

/// Other call events (summary, recording notices) are acknowledged only.
pub async fn event(
    State(state): State<AppState>,
    Path(event): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    check_signature(&state, &headers, &body)?;
    tracing::debug!(%event, bytes = body.len(), "Telephony event acknowledged");
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn upload_recording(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RecordingOutcome>> {
    check_signature(&state, &headers, &body)?;
    let upload: RecordingUpload = parse_body(&body)?;

    let bytes = STANDARD
        .decode(upload.content_base64.trim())
        .map_err(|_| Error::validation("content_base64 is not valid base64"))?;

    let outcome = state.reconciler().reconcile(&upload.file_name, &bytes)?;
    Ok(Json(outcome))
}
