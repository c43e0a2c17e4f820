//! Pulls call recordings from the telephony vendor's call-history API.
//!
//! Every request is a form POST of `vpbx_api_key`, `json` and
//! `sign = hex(sha256(key + json + salt))`. Calls are listed page by page
//! from `stats/request`; each recording is downloaded from its
//! `record_url` and handed to the [`Reconciler`] under a file name that
//! carries the call time and the caller's phone.

use std::fmt;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::Deserialize;

use crate::config::TelephonyKeys;
use crate::phone::validate_phone;
use crate::recordings::{
    sanitize_file_name, ImportReport, RecordingOutcome, Reconciler, MIN_RECORDING_BYTES,
};
use crate::telephony::sign_body;

pub const PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched in one run.
const MAX_PAGES: usize = 500;

const API_TIMEOUT: StdDuration = StdDuration::from_secs(30);
const DOWNLOAD_TIMEOUT: StdDuration = StdDuration::from_secs(60);

/// The vendor sends ids, numbers and timestamps either as JSON strings or
/// as numbers.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(i64),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallRecord {
    pub id: Scalar,
    /// Unix seconds or RFC 3339.
    pub start: Option<Scalar>,
    pub from_number: Option<Scalar>,
    pub to_number: Option<Scalar>,
    pub record_url: Option<String>,
}

impl CallRecord {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self.start.as_ref()? {
            Scalar::Number(secs) => DateTime::from_timestamp(*secs, 0),
            Scalar::Text(text) => match text.trim().parse::<i64>() {
                Ok(secs) => DateTime::from_timestamp(secs, 0),
                Err(_) => DateTime::parse_from_rfc3339(text.trim())
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc)),
            },
        }
    }

    /// The outside party: the caller, or the callee when the caller is an
    /// internal extension.
    pub fn client_phone(&self) -> Option<String> {
        [&self.from_number, &self.to_number]
            .into_iter()
            .flatten()
            .filter_map(|number| validate_phone(&number.to_string()).ok())
            .find(|phone| phone.len() >= 10)
    }
}

#[derive(Debug, Deserialize)]
struct CallHistoryPage {
    #[serde(default)]
    data: Vec<CallRecord>,
}

/// Name under which a downloaded recording is reconciled, e.g.
/// `2025.07.05__17-16-36__79161234567__call-42.mp3`. The time is written
/// as wall-clock time at `offset`, which is how the reconciler reads it back.
pub fn recording_file_name(record: &CallRecord, offset: FixedOffset) -> Option<String> {
    let phone = record.client_phone()?;
    let id = sanitize_file_name(&record.id.to_string());
    let name = match record.started_at() {
        Some(at) => format!(
            "{}__{}__{}.mp3",
            offset.from_utc_datetime(&at.naive_utc()).format("%Y.%m.%d__%H-%M-%S"),
            phone,
            id
        ),
        None => format!("{}__{}.mp3", phone, id),
    };
    Some(name)
}

#[derive(Clone)]
pub struct CallHistoryClient {
    http: reqwest::Client,
    base_url: String,
    keys: TelephonyKeys,
}

impl CallHistoryClient {
    pub fn new(base_url: impl Into<String>, keys: TelephonyKeys) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_http(http, base_url, keys))
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>, keys: TelephonyKeys) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            keys,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        let json = serde_json::to_string(payload)?;
        let sign = sign_body(&self.keys, json.as_bytes());
        let url = format!("{}/{}", self.base_url, method);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("vpbx_api_key", self.keys.api_key.as_str()),
                ("sign", sign.as_str()),
                ("json", json.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error", url))?;

        response
            .json()
            .await
            .with_context(|| format!("Unexpected response from {}", url))
    }

    /// One page of the call history between `from` and `to`.
    pub async fn calls_page(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: usize,
    ) -> Result<Vec<CallRecord>> {
        let payload = serde_json::json!({
            "date_from": from.timestamp(),
            "date_to": to.timestamp(),
            "limit": PAGE_SIZE,
            "offset": offset,
        });
        let page: CallHistoryPage = self.call("stats/request", &payload).await?;
        Ok(page.data)
    }

    /// Every call between `from` and `to`, following pages until a short one.
    pub async fn calls(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        let mut calls = Vec::new();
        for page in 0..MAX_PAGES {
            let batch = self.calls_page(from, to, page * PAGE_SIZE).await?;
            let done = batch.len() < PAGE_SIZE;
            calls.extend(batch);
            if done {
                return Ok(calls);
            }
        }
        tracing::warn!(pages = MAX_PAGES, "Call history truncated");
        Ok(calls)
    }

    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Download of {} failed", url))?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Import the recordings of every call between `from` and `to`.
///
/// A recording is downloaded only once the reconciler has confirmed it
/// matches a request and is not attached yet. Failures on single calls are
/// counted and logged; the run continues.
pub async fn import_calls(
    client: &CallHistoryClient,
    reconciler: &Reconciler,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    dry_run: bool,
) -> Result<ImportReport> {
    let calls = client.calls(from, to).await?;
    tracing::info!(count = calls.len(), %from, %to, "Fetched call history");

    let mut report = ImportReport::default();
    for call in &calls {
        report.scanned += 1;

        let Some(url) = call.record_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            report.skipped += 1;
            continue;
        };
        let Some(file_name) = recording_file_name(call, reconciler.offset()) else {
            tracing::debug!(call_id = %call.id, "No client phone on call");
            report.skipped += 1;
            continue;
        };

        match reconciler.preview(&file_name) {
            Ok(RecordingOutcome::WouldAttach { .. }) => {}
            Ok(RecordingOutcome::AlreadyAttached { .. }) => {
                report.duplicates += 1;
                continue;
            }
            Ok(RecordingOutcome::NoMatch { .. }) => {
                report.unmatched += 1;
                continue;
            }
            Ok(_) => {
                report.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(call_id = %call.id, "Failed to match recording: {}", e);
                report.errors += 1;
                continue;
            }
        }

        if dry_run {
            report.attached += 1;
            continue;
        }

        let bytes = match client.download(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(call_id = %call.id, "{:#}", e);
                report.errors += 1;
                continue;
            }
        };
        if (bytes.len() as u64) < MIN_RECORDING_BYTES {
            tracing::warn!(call_id = %call.id, size = bytes.len(), "Recording too small, skipped");
            report.skipped += 1;
            continue;
        }

        match reconciler.reconcile(&file_name, &bytes) {
            Ok(RecordingOutcome::Attached { .. }) => report.attached += 1,
            Ok(RecordingOutcome::AlreadyAttached { .. }) => report.duplicates += 1,
            Ok(RecordingOutcome::NoMatch { .. }) => report.unmatched += 1,
            Ok(_) => report.skipped += 1,
            Err(e) => {
                tracing::warn!(call_id = %call.id, "Failed to attach recording: {}", e);
                report.errors += 1;
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        attached = report.attached,
        duplicates = report.duplicates,
        unmatched = report.unmatched,
        errors = report.errors,
        dry_run,
        "Call history import finished"
    );
    Ok(report)
}
