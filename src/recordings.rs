//! Reconciliation of call recordings to service requests.
//!
//! Telephony systems name recordings after the call, e.g.
//! `2025.07.05__17-16-36__79161234567.mp3`. The caller's phone and, when
//! present, the call time are parsed out of the name; the recording is then
//! attached to the request for that phone whose meeting time is closest to
//! the call, within [`MATCH_WINDOW_MINUTES`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::db::Database;
use crate::error::Result;
use crate::models::{AttachFileInput, FileKind, RequestFile, ServiceRequest};
use crate::phone::normalize_phone;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "aac", "flac"];

/// A recording matches requests whose meeting is this close to the call.
pub const MATCH_WINDOW_MINUTES: i64 = 30;

/// Smaller files are treated as failed recordings by the directory importer.
pub const MIN_RECORDING_BYTES: u64 = 1024;

static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digit regex"));

// 2025.07.05__17-16-36
static DOTTED_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})\.(\d{2})\.(\d{2})__(\d{2})-(\d{2})-(\d{2})").expect("valid time regex")
});
// 05.07.2025_17:16:36
static DAY_FIRST_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2})\.(\d{2})\.(\d{4})_(\d{2}):(\d{2}):(\d{2})").expect("valid time regex")
});
// 2025-07-05_17-16-36
static ISO_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})-(\d{2})-(\d{2})_(\d{2})-(\d{2})-(\d{2})").expect("valid time regex")
});

pub fn is_audio_file(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_stem(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
}

/// First run of 10 to 15 digits in the file stem, normalised.
pub fn extract_phone(file_name: &str) -> Option<String> {
    DIGIT_RUN_RE
        .find_iter(file_stem(file_name))
        .map(|m| m.as_str())
        .find(|run| (10..=15).contains(&run.len()))
        .map(normalize_phone)
}

/// Call time embedded in the file name, read as wall-clock time at `offset`.
pub fn extract_call_time(file_name: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    // Capture order of each pattern as (year, month, day) group indexes.
    let patterns: [(&Regex, [usize; 3]); 3] = [
        (&DOTTED_TIME_RE, [1, 2, 3]),
        (&DAY_FIRST_TIME_RE, [3, 2, 1]),
        (&ISO_TIME_RE, [1, 2, 3]),
    ];

    patterns.iter().find_map(|(re, [y, m, d])| {
        let caps = re.captures(file_name)?;
        let num = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();

        let date = NaiveDate::from_ymd_opt(num(*y)? as i32, num(*m)?, num(*d)?)?;
        let naive = date.and_hms_opt(num(4)?, num(5)?, num(6)?)?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Replace characters that are unsafe in file names.
pub fn sanitize_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.trim_matches(['.', '_', ' ']).is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// The request a recording belongs to: closest meeting within the window
/// around the call, or the latest request for the phone when the call time
/// is unknown.
pub fn pick_request(
    candidates: Vec<ServiceRequest>,
    call_time: Option<DateTime<Utc>>,
) -> Option<ServiceRequest> {
    match call_time {
        Some(at) => candidates
            .into_iter()
            .filter(|r| (r.meeting_date - at).abs() <= Duration::minutes(MATCH_WINDOW_MINUTES))
            .min_by_key(|r| (r.meeting_date - at).abs()),
        None => candidates.into_iter().max_by_key(|r| r.meeting_date),
    }
}

// ============================================================
// Media storage
// ============================================================

/// Directory that holds uploaded and ingested files. Stored paths are
/// relative to its root.
#[derive(Clone, Debug)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, stored_path: &str) -> PathBuf {
        self.root.join(stored_path)
    }

    /// Write `bytes` under `subdir` with a timestamped, sanitised name and
    /// return the path relative to the root.
    pub fn store(&self, subdir: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(subdir);
        fs::create_dir_all(&dir)?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let unique = &Uuid::new_v4().simple().to_string()[..8];
        let name = format!("{}_{}_{}", stamp, unique, sanitize_file_name(file_name));

        fs::write(dir.join(&name), bytes)?;
        Ok(format!("{}/{}", subdir, name))
    }

    /// Open a stored file for streaming. Paths that escape the root are
    /// reported as missing.
    pub async fn open(&self, stored_path: &str) -> Result<Option<tokio::fs::File>> {
        let relative = Path::new(stored_path);
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Ok(None);
        }
        match tokio::fs::File::open(self.root.join(relative)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// MIME type served for a stored file, by extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("m4a") | Some("aac") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

// ============================================================
// Reconciler
// ============================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordingOutcome {
    Attached { request_id: Uuid, file: RequestFile },
    /// Matched during a dry run; nothing was written.
    WouldAttach { request_id: Uuid },
    AlreadyAttached { request_id: Uuid },
    NoMatch { phone: String },
    NoPhone,
    NotAudio,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub scanned: usize,
    pub attached: usize,
    pub duplicates: usize,
    pub unmatched: usize,
    /// Not audio, too small, or without a phone in the name.
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    db: Database,
    media: MediaStore,
    offset: FixedOffset,
}

impl Reconciler {
    pub fn new(db: Database, media: MediaStore, offset: FixedOffset) -> Self {
        Self { db, media, offset }
    }

    /// Offset at which call times in file names are read.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn find_request(
        &self,
        phone: &str,
        call_time: Option<DateTime<Utc>>,
    ) -> Result<Option<ServiceRequest>> {
        let window = call_time.map(|at| {
            let span = Duration::minutes(MATCH_WINDOW_MINUTES);
            (at - span, at + span)
        });
        let candidates = self.db.find_requests_by_phone(phone, window)?;
        Ok(pick_request(candidates, call_time))
    }

    /// Attach one recording. `bytes` is `None` for a dry run.
    fn reconcile_inner(&self, file_name: &str, bytes: Option<&[u8]>) -> Result<RecordingOutcome> {
        if !is_audio_file(file_name) {
            return Ok(RecordingOutcome::NotAudio);
        }
        let Some(phone) = extract_phone(file_name) else {
            tracing::debug!(file_name, "No phone number in recording name");
            return Ok(RecordingOutcome::NoPhone);
        };
        if let Some(existing) = self.db.find_audio_by_file_name(file_name)? {
            return Ok(RecordingOutcome::AlreadyAttached {
                request_id: existing.request_id,
            });
        }

        let call_time = extract_call_time(file_name, self.offset);
        let Some(request) = self.find_request(&phone, call_time)? else {
            tracing::info!(file_name, %phone, "No request matches recording");
            return Ok(RecordingOutcome::NoMatch { phone });
        };

        let Some(bytes) = bytes else {
            return Ok(RecordingOutcome::WouldAttach {
                request_id: request.id,
            });
        };

        let stored_path = self.media.store("recordings", file_name, bytes)?;
        let file = self.db.attach_file(
            request.id,
            AttachFileInput {
                kind: FileKind::Audio,
                file_name: file_name.to_string(),
                stored_path,
                uploaded_by: None,
            },
        )?;
        tracing::info!(file_name, request_id = %request.id, "Recording attached");

        Ok(RecordingOutcome::Attached {
            request_id: request.id,
            file,
        })
    }

    pub fn reconcile(&self, file_name: &str, bytes: &[u8]) -> Result<RecordingOutcome> {
        self.reconcile_inner(file_name, Some(bytes))
    }

    /// Match a recording without storing or attaching anything.
    pub fn preview(&self, file_name: &str) -> Result<RecordingOutcome> {
        self.reconcile_inner(file_name, None)
    }

    /// Import every recording found under `dir`. Failures on single files
    /// are counted and logged; the scan continues.
    pub fn import_directory(&self, dir: &Path, dry_run: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            report.scanned += 1;

            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                report.skipped += 1;
                continue;
            };
            if !is_audio_file(file_name) {
                report.skipped += 1;
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size < MIN_RECORDING_BYTES {
                tracing::warn!(path = %path.display(), size, "Recording too small, skipped");
                report.skipped += 1;
                continue;
            }

            let outcome = if dry_run {
                self.preview(file_name)
            } else {
                fs::read(path)
                    .map_err(Into::into)
                    .and_then(|bytes| self.reconcile(file_name, &bytes))
            };

            match outcome {
                Ok(RecordingOutcome::Attached { .. } | RecordingOutcome::WouldAttach { .. }) => {
                    report.attached += 1
                }
                Ok(RecordingOutcome::AlreadyAttached { .. }) => report.duplicates += 1,
                Ok(RecordingOutcome::NoMatch { .. }) => report.unmatched += 1,
                Ok(RecordingOutcome::NoPhone | RecordingOutcome::NotAudio) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to import recording: {}", e);
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            attached = report.attached,
            duplicates = report.duplicates,
            unmatched = report.unmatched,
            dry_run,
            "Recording import finished"
        );
        Ok(report)
    }
}
