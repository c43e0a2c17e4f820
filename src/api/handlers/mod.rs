pub mod auth;
pub mod finance;
pub mod people;
pub mod reference;
pub mod requests;
pub mod telephony;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::error::{Error, Result};
use crate::recordings::{content_type_for, MediaStore};

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.db.ping() {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!("Database health check failed: {}", e);
            "error"
        }
    };

    Json(serde_json::json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "telegram": state.notifier.is_enabled(),
        "telephony_signature": state.config.telephony.is_some(),
    }))
}

// ============================================================
// Files
// ============================================================

/// Decode a base64 upload body, rejecting empty files.
fn decode_upload(content_base64: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(content_base64.trim())
        .map_err(|_| Error::validation("content_base64 is not valid base64"))?;
    if bytes.is_empty() {
        return Err(Error::validation("File is empty"));
    }
    Ok(bytes)
}

/// Stream a stored file as an attachment named `file_name`.
async fn serve_media(media: &MediaStore, stored_path: &str, file_name: &str) -> Result<Response> {
    let file = media
        .open(stored_path)
        .await?
        .ok_or(Error::NotFound("File"))?;

    let ascii_name: String = file_name
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"') || c == ' ' { c } else { '_' })
        .collect();
    let headers = [
        (header::CONTENT_TYPE, content_type_for(file_name).to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", ascii_name),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
