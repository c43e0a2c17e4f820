use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of an authenticated principal.
///
/// Masters log in with their own credentials and always carry
/// [`Role::Master`]; back-office users may have any other role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Director,
    #[serde(rename = "callcentre")]
    CallCentre,
    Kc,
    Avitolog,
    Master,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Director => "director",
            Self::CallCentre => "callcentre",
            Self::Kc => "kc",
            Self::Avitolog => "avitolog",
            Self::Master => "master",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "director" => Some(Self::Director),
            "callcentre" => Some(Self::CallCentre),
            "kc" => Some(Self::Kc),
            "avitolog" => Some(Self::Avitolog),
            "master" => Some(Self::Master),
            _ => None,
        }
    }
}

/// A back-office account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub city_id: Uuid,
    pub name: String,
    pub role: Role,
    pub login: String,
    pub is_active: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserInput {
    pub city_id: Uuid,
    pub name: String,
    pub role: Role,
    pub login: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub note: Option<String>,
}

/// Partial update. The password is re-hashed only when supplied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserInput {
    pub city_id: Option<Uuid>,
    pub name: Option<String>,
    pub role: Option<Role>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub city_id: Option<Uuid>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// A field technician.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Master {
    pub id: Uuid,
    pub city_id: Uuid,
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub passport: Option<String>,
    pub phone: String,
    pub is_active: bool,
    /// Telegram chat of the technician, for direct notifications.
    pub chat_id: Option<String>,
    pub note: Option<String>,
    pub login: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMasterInput {
    pub city_id: Uuid,
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub passport: Option<String>,
    pub phone: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub chat_id: Option<String>,
    pub note: Option<String>,
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMasterInput {
    pub city_id: Option<Uuid>,
    pub name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub passport: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    pub chat_id: Option<String>,
    pub note: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MasterFilter {
    pub city_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

/// Stored credentials of a principal, loaded for login only.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub id: Uuid,
    pub password_hash: String,
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}
