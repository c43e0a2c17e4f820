use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A customer service request ("zayavka") for appliance repair.
///
/// `net` and `technician_share` are derived on every save and never taken
/// from client input; see [`crate::settlement`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub city_id: Uuid,
    /// Advertising channel the customer came through.
    pub ad_channel_id: Option<Uuid>,
    pub request_type_id: Option<Uuid>,
    /// Customer phone, normalised to digits with a leading country code.
    pub client_phone: String,
    /// The call-centre line the customer called.
    pub atc_phone: Option<String>,
    pub client_name: String,
    pub address: String,
    pub meeting_date: DateTime<Utc>,
    pub appliance_type: String,
    pub problem: String,
    pub status: RequestStatus,
    pub master_id: Option<Uuid>,
    /// Amount charged to the customer.
    pub total: Option<Decimal>,
    /// Costs incurred by the technician (parts, travel).
    pub expense: Option<Decimal>,
    pub net: Option<Decimal>,
    pub technician_share: Option<Decimal>,
    pub master_comment: Option<String>,
    pub call_centre_name: String,
    pub call_centre_comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a service request.
///
/// - `Calling`: the call centre is still on the phone with the customer
/// - `Waiting`: registered, not yet offered to a technician (the "incoming" queue)
/// - `AwaitingAcceptance`: offered to a technician
/// - `Accepted`, `InProgress`: technician has taken the job
/// - `Modern`: closed as a modernisation job (settles like `Done`)
/// - `Done`: repair completed
/// - `NotOrdered`, `Refused`: closed without work
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Calling,
    #[default]
    Waiting,
    AwaitingAcceptance,
    Accepted,
    InProgress,
    Modern,
    NotOrdered,
    Done,
    Refused,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calling => "calling",
            Self::Waiting => "waiting",
            Self::AwaitingAcceptance => "awaiting_acceptance",
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Modern => "modern",
            Self::NotOrdered => "not_ordered",
            Self::Done => "done",
            Self::Refused => "refused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "calling" => Some(Self::Calling),
            "waiting" => Some(Self::Waiting),
            "awaiting_acceptance" => Some(Self::AwaitingAcceptance),
            "accepted" => Some(Self::Accepted),
            "in_progress" => Some(Self::InProgress),
            "modern" => Some(Self::Modern),
            "not_ordered" => Some(Self::NotOrdered),
            "done" => Some(Self::Done),
            "refused" => Some(Self::Refused),
            _ => None,
        }
    }

    /// Statuses in which a request is settled and owes a payout.
    pub fn closes_settlement(&self) -> bool {
        matches!(self, Self::Done | Self::Modern)
    }

    /// Statuses of a request that has not been worked on yet.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Calling | Self::Waiting)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequestInput {
    pub city_id: Uuid,
    pub ad_channel_id: Option<Uuid>,
    pub request_type_id: Option<Uuid>,
    pub client_phone: String,
    pub atc_phone: Option<String>,
    pub client_name: String,
    pub address: String,
    pub meeting_date: DateTime<Utc>,
    pub appliance_type: String,
    pub problem: String,
    /// Defaults to `Waiting`.
    pub status: Option<RequestStatus>,
    pub master_id: Option<Uuid>,
    pub total: Option<Decimal>,
    pub expense: Option<Decimal>,
    pub master_comment: Option<String>,
    pub call_centre_name: String,
    pub call_centre_comment: Option<String>,
}

/// Partial update. Fields wrapped in a double `Option` can be cleared by
/// sending an explicit `null`; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRequestInput {
    pub city_id: Option<Uuid>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub ad_channel_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub request_type_id: Option<Option<Uuid>>,
    pub client_phone: Option<String>,
    pub atc_phone: Option<String>,
    pub client_name: Option<String>,
    pub address: Option<String>,
    pub meeting_date: Option<DateTime<Utc>>,
    pub appliance_type: Option<String>,
    pub problem: Option<String>,
    pub status: Option<RequestStatus>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub master_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub total: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub expense: Option<Option<Decimal>>,
    pub master_comment: Option<String>,
    pub call_centre_name: Option<String>,
    pub call_centre_comment: Option<String>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Query parameters for listing requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub city_id: Option<Uuid>,
    pub master_id: Option<Uuid>,
    pub ad_channel_id: Option<Uuid>,
    pub request_type_id: Option<Uuid>,
    /// Free-text search over client name, phone and address.
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Kind of a file attached to a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Strict-reporting form filled in by the technician.
    Bso,
    /// Receipt for an expense.
    Receipt,
    /// Call recording.
    Audio,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bso => "bso",
            Self::Receipt => "receipt",
            Self::Audio => "audio",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bso" => Some(Self::Bso),
            "receipt" => Some(Self::Receipt),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFile {
    pub id: Uuid,
    pub request_id: Uuid,
    pub kind: FileKind,
    /// Original file name as uploaded or received.
    pub file_name: String,
    /// Path relative to the media directory.
    pub stored_path: String,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

/// Input for recording an already-stored file against a request.
#[derive(Debug, Clone)]
pub struct AttachFileInput {
    pub kind: FileKind,
    pub file_name: String,
    pub stored_path: String,
    pub uploaded_by: Option<Uuid>,
}

/// Upload body for `POST /requests/{id}/files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileInput {
    pub kind: FileKind,
    pub file_name: String,
    /// File content, standard base64.
    pub content_base64: String,
}
