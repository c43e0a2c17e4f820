//! Runtime configuration loaded from `CRM_*` environment variables.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, FixedOffset};

/// Call-history API of the telephony vendor, used by `import-recordings --from-api`.
pub const DEFAULT_TELEPHONY_API_URL: &str = "https://app.mango-office.ru/vpbx";

/// Telegram bot credentials. Alerts are disabled when either is missing.
#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

/// Shared secrets used to verify telephony webhook signatures.
#[derive(Clone, Debug)]
pub struct TelephonyKeys {
    pub api_key: String,
    pub api_salt: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: PathBuf,
    /// Directory for uploaded request files and ingested call recordings.
    pub media_dir: PathBuf,
    pub secret_key: Vec<u8>,
    /// True when no secret was configured and a random one was generated.
    pub ephemeral_secret: bool,
    pub token_ttl: Duration,
    /// Allowed CORS origins (from CRM_CORS_ORIGINS, comma-separated)
    pub cors_origins: Option<Vec<String>>,
    /// Login attempts per minute per client IP
    pub login_rate_limit: u32,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
    pub telegram: Option<TelegramConfig>,
    pub telephony: Option<TelephonyKeys>,
    pub telephony_api_url: String,
    /// Offset of the wall-clock times embedded in recording file names.
    pub recording_utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let data_dir = default_data_dir()?;

        let database_path = env("CRM_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("crm.db"));
        let media_dir = env("CRM_MEDIA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("media"));

        let (secret_key, ephemeral_secret) = match env("CRM_SECRET_KEY") {
            Some(key) => (key.into_bytes(), false),
            None => (random_secret(), true),
        };

        let token_ttl = parse_token_ttl(env("CRM_TOKEN_TTL_HOURS").as_deref())?;

        let cors_origins = env("CRM_CORS_ORIGINS")
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect());

        let login_rate_limit = env("CRM_LOGIN_RATE_LIMIT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(20);

        let trusted_proxies = parse_trusted_proxies(env("CRM_TRUSTED_PROXIES").as_deref())?;

        let telegram = match (env("CRM_TELEGRAM_BOT_TOKEN"), env("CRM_TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
            _ => None,
        };

        let telephony = match (env("CRM_TELEPHONY_KEY"), env("CRM_TELEPHONY_SALT")) {
            (Some(api_key), Some(api_salt)) => Some(TelephonyKeys { api_key, api_salt }),
            _ => None,
        };

        let telephony_api_url = env("CRM_TELEPHONY_API_URL")
            .unwrap_or_else(|| DEFAULT_TELEPHONY_API_URL.to_string());

        let recording_utc_offset =
            parse_utc_offset(env("CRM_RECORDING_UTC_OFFSET_HOURS").as_deref())?;

        Ok(Self {
            database_path,
            media_dir,
            secret_key,
            ephemeral_secret,
            token_ttl,
            cors_origins,
            login_rate_limit,
            trusted_proxies,
            telegram,
            telephony,
            telephony_api_url,
            recording_utc_offset,
        })
    }

    /// A configuration for tests: fixed secret, no external integrations.
    pub fn for_tests(media_dir: PathBuf) -> Self {
        Self {
            database_path: PathBuf::from(":memory:"),
            media_dir,
            secret_key: b"test-secret".to_vec(),
            ephemeral_secret: false,
            token_ttl: Duration::hours(24),
            cors_origins: None,
            login_rate_limit: 1000,
            trusted_proxies: Vec::new(),
            telegram: None,
            telephony: None,
            telephony_api_url: DEFAULT_TELEPHONY_API_URL.to_string(),
            recording_utc_offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
        }
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Session lifetime in hours; 24 when unset. Must be positive and
/// representable as a duration.
pub fn parse_token_ttl(raw: Option<&str>) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(Duration::hours(24));
    };
    let hours: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid CRM_TOKEN_TTL_HOURS: {}", raw))?;
    Duration::try_hours(hours)
        .filter(|ttl| *ttl > Duration::zero())
        .ok_or_else(|| anyhow::anyhow!("CRM_TOKEN_TTL_HOURS out of range: {}", hours))
}

/// Whole-hour UTC offset; UTC+3 when unset.
pub fn parse_utc_offset(raw: Option<&str>) -> Result<FixedOffset> {
    let hours: i32 = match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid CRM_RECORDING_UTC_OFFSET_HOURS: {}", raw))?,
        None => 3,
    };
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow::anyhow!("CRM_RECORDING_UTC_OFFSET_HOURS out of range: {}", hours))
}

pub fn parse_trusted_proxies(raw: Option<&str>) -> Result<Vec<IpAddr>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .with_context(|| format!("Invalid address in CRM_TRUSTED_PROXIES: {}", s))
        })
        .collect()
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "dispatch-crm")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

fn random_secret() -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    key.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    key
}
