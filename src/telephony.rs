//! Call-centre telephony webhook: incoming calls become `waiting` requests.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::TelephonyKeys;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CreateRequestInput, RequestStatus, ServiceRequest};
use crate::phone::{normalize_phone, validate_phone};

pub const SIGNATURE_HEADER: &str = "x-telephony-sign";

/// Repeat calls from the same number within this window reuse the open
/// request instead of creating another.
pub const DUPLICATE_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParty {
    #[serde(default)]
    pub number: String,
    /// Public line the call arrived on, when it differs from `number`.
    pub line_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingCall {
    pub entry_id: Option<String>,
    pub call_id: Option<String>,
    pub from: CallParty,
    pub to: Option<CallParty>,
}

impl IncomingCall {
    /// The called line: `to.line_number`, falling back to `to.number`.
    pub fn line(&self) -> Option<String> {
        let to = self.to.as_ref()?;
        to.line_number
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or(Some(to.number.as_str()).filter(|n| !n.trim().is_empty()))
            .map(normalize_phone)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IncomingCallOutcome {
    pub request: ServiceRequest,
    /// False when a recent open request for the caller was reused.
    pub created: bool,
}

/// Recording pushed by the telephony system.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingUpload {
    pub file_name: String,
    /// Audio content, standard base64.
    pub content_base64: String,
}

/// `hex(sha256(key + body + salt))`, compared case-insensitively.
pub fn verify_signature(keys: &TelephonyKeys, body: &[u8], sign: &str) -> bool {
    let expected = sign_body(keys, body);
    let given = sign.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

pub fn sign_body(keys: &TelephonyKeys, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(keys.api_key.as_bytes());
    hasher.update(body);
    hasher.update(keys.api_salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Register an incoming call. The caller's city is resolved from the line
/// that was dialled; calls on unknown lines are rejected.
pub fn handle_incoming_call(
    db: &Database,
    call: &IncomingCall,
    now: DateTime<Utc>,
) -> Result<IncomingCallOutcome> {
    let caller = validate_phone(&call.from.number)?;
    let line = call
        .line()
        .ok_or_else(|| Error::Unprocessable("Called line is missing".to_string()))?;
    let city_id = db
        .find_city_by_line(&line)?
        .ok_or_else(|| Error::Unprocessable(format!("Unknown line {}", line)))?;

    let since = now - Duration::minutes(DUPLICATE_WINDOW_MINUTES);
    if let Some(request) = db.find_recent_open_request(city_id, &caller, since)? {
        tracing::info!(request_id = %request.id, %caller, "Repeat call, reusing open request");
        return Ok(IncomingCallOutcome {
            request,
            created: false,
        });
    }

    let request = db.create_request(CreateRequestInput {
        city_id,
        ad_channel_id: db.find_ad_channel_by_phone(&line)?,
        request_type_id: None,
        client_phone: caller.clone(),
        atc_phone: Some(line),
        client_name: "Incoming call".to_string(),
        address: "Not specified".to_string(),
        meeting_date: now,
        appliance_type: "Not specified".to_string(),
        problem: "Incoming call".to_string(),
        status: Some(RequestStatus::Waiting),
        master_id: None,
        total: None,
        expense: None,
        master_comment: None,
        call_centre_name: "Telephony".to_string(),
        call_centre_comment: call.entry_id.as_ref().map(|id| format!("entry {}", id)),
    })?;
    tracing::info!(request_id = %request.id, %caller, "Request created from incoming call");

    Ok(IncomingCallOutcome {
        request,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TelephonyKeys {
        TelephonyKeys {
            api_key: "key".to_string(),
            api_salt: "salt".to_string(),
        }
    }

    #[test]
    fn signature_is_key_body_salt_digest() {
        let body = br#"{"from":{"number":"79161234567"}}"#;
        let mut hasher = Sha256::new();
        hasher.update(b"key");
        hasher.update(body);
        hasher.update(b"salt");
        let expected = hex::encode(hasher.finalize());

        assert_eq!(sign_body(&keys(), body), expected);
        assert!(verify_signature(&keys(), body, &expected.to_uppercase()));
        assert!(!verify_signature(&keys(), b"other", &expected));
    }

    #[test]
    fn truncated_or_padded_signatures_are_rejected() {
        let body = b"{}";
        let sign = sign_body(&keys(), body);

        assert!(verify_signature(&keys(), body, &format!("  {}\n", sign)));
        assert!(!verify_signature(&keys(), body, &sign[..sign.len() - 1]));
        assert!(!verify_signature(&keys(), body, &format!("{}0", sign)));
        assert!(!verify_signature(&keys(), body, ""));
    }

    #[test]
    fn line_prefers_line_number() {
        let call: IncomingCall = serde_json::from_str(
            r#"{"from":{"number":"89161234567"},"to":{"number":"101","line_number":"84951234567"}}"#,
        )
        .unwrap();
        assert_eq!(call.line().as_deref(), Some("74951234567"));
    }

    #[test]
    fn line_is_missing_without_to() {
        let call: IncomingCall =
            serde_json::from_str(r#"{"from":{"number":"89161234567"}}"#).unwrap();
        assert_eq!(call.line(), None);
    }
}
