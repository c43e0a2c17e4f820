use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three reference lists that consist of a unique name only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    City,
    RequestType,
    TransactionType,
}

impl ReferenceKind {
    pub fn table(&self) -> &'static str {
        match self {
            Self::City => "cities",
            Self::RequestType => "request_types",
            Self::TransactionType => "transaction_types",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::City => "City",
            Self::RequestType => "Request type",
            Self::TransactionType => "Transaction type",
        }
    }
}

/// An entry of one of the [`ReferenceKind`] lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedEntry {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedEntryInput {
    pub name: String,
}

/// An advertising channel ("RK") through which customers reach a city's
/// call centre. The phone is the number advertised on that channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdChannel {
    pub id: Uuid,
    pub name: String,
    pub city_id: Uuid,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAdChannelInput {
    pub name: String,
    pub city_id: Uuid,
    pub phone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAdChannelInput {
    pub name: Option<String>,
    pub city_id: Option<Uuid>,
    pub phone: Option<String>,
}

/// A telephone line belonging to a city. Incoming calls on this line are
/// routed to that city's requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityPhone {
    pub id: Uuid,
    pub city_id: Uuid,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityPhoneInput {
    pub city_id: Uuid,
    pub phone: String,
}

/// Optional city filter for city-scoped reference lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CityFilter {
    pub city_id: Option<Uuid>,
}
