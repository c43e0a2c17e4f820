//! Password hashing, signed session tokens and the [`CurrentUser`] extractor.
//!
//! Tokens are `base64url(claims_json).hex(hmac_sha256(secret, payload))`.
//! They are accepted from an `Authorization: Bearer` header or from the
//! `crm_token` cookie set at login.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::FromRequestParts, http::request::Parts};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::{Error, Result};
use crate::models::Role;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_COOKIE: &str = "crm_token";

/// Directors and admins.
pub const DIRECTORS: &[Role] = &[Role::Director, Role::Admin];

/// Everyone who works with requests: the call centre and above.
pub const STAFF: &[Role] = &[
    Role::CallCentre,
    Role::Kc,
    Role::Avitolog,
    Role::Master,
    Role::Director,
    Role::Admin,
];

pub const MASTERS_OR_ABOVE: &[Role] = &[Role::Master, Role::Director, Role::Admin];

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

// ============================================================
// Passwords
// ============================================================

/// Hash a password into an Argon2id PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to encode salt: {}", e))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string. Unparsable hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

// ============================================================
// Tokens
// ============================================================

/// Which table the principal lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Master,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub kind: PrincipalKind,
    pub role: Role,
    pub city_id: Uuid,
    /// Expiry, unix seconds.
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: Vec<u8>, ttl: Duration) -> Self {
        Self { secret, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, sub: Uuid, kind: PrincipalKind, role: Role, city_id: Uuid) -> Result<String> {
        let claims = Claims {
            sub,
            kind,
            role,
            city_id,
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        let json = serde_json::to_vec(&claims).map_err(anyhow::Error::from)?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let signature = hex::encode(self.mac(&payload).finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    /// Check the signature and expiry and return the claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let (payload, signature) = token.split_once('.').ok_or(Error::Unauthorized)?;
        let signature = hex::decode(signature).map_err(|_| Error::Unauthorized)?;
        self.mac(payload)
            .verify_slice(&signature)
            .map_err(|_| Error::Unauthorized)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| Error::Unauthorized)?;
        let claims: Claims = serde_json::from_slice(&json).map_err(|_| Error::Unauthorized)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(Error::Unauthorized);
        }
        Ok(claims)
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        mac
    }
}

// ============================================================
// Current principal
// ============================================================

/// The authenticated caller, reloaded from the database on every request.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub kind: PrincipalKind,
    pub role: Role,
    pub city_id: Uuid,
    pub name: String,
    pub login: String,
}

impl CurrentUser {
    pub fn require(&self, allowed: &[Role]) -> Result<()> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::debug!(login = %self.login, role = self.role.as_str(), "Permission denied");
            Err(Error::Forbidden)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_master(&self) -> bool {
        self.kind == PrincipalKind::Master
    }

    /// City the caller is restricted to. Admins see every city.
    pub fn city_scope(&self) -> Option<Uuid> {
        (!self.is_admin()).then_some(self.city_id)
    }

    /// Technician the caller is restricted to, for master logins.
    pub fn master_scope(&self) -> Option<Uuid> {
        self.is_master().then_some(self.id)
    }

    pub fn can_access_city(&self, city_id: Uuid) -> bool {
        self.city_scope().map_or(true, |own| own == city_id)
    }

    /// Narrow a requested city filter to what the caller may see.
    pub fn scoped_city(&self, requested: Option<Uuid>) -> Option<Uuid> {
        self.city_scope().or(requested)
    }
}

fn token_from_parts(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if bearer.is_some() {
        return bearer;
    }

    parts
        .headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = token_from_parts(parts).ok_or(Error::Unauthorized)?;
        let claims = state.signer.verify(&token)?;

        let principal = match claims.kind {
            PrincipalKind::User => state
                .db
                .get_user(claims.sub)?
                .filter(|u| u.is_active)
                .map(|u| CurrentUser {
                    id: u.id,
                    kind: PrincipalKind::User,
                    role: u.role,
                    city_id: u.city_id,
                    name: u.name,
                    login: u.login,
                }),
            PrincipalKind::Master => state
                .db
                .get_master(claims.sub)?
                .filter(|m| m.is_active)
                .map(|m| CurrentUser {
                    id: m.id,
                    kind: PrincipalKind::Master,
                    role: Role::Master,
                    city_id: m.city_id,
                    name: m.name,
                    login: m.login,
                }),
        };

        principal.ok_or_else(|| {
            tracing::warn!(sub = %claims.sub, "Token for missing or inactive account");
            Error::Unauthorized
        })
    }
}
