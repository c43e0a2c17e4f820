use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A city-level cash movement (rent, advertising, handover, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub city_id: Uuid,
    pub transaction_type_id: Uuid,
    pub amount: Decimal,
    pub note: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionInput {
    pub city_id: Uuid,
    pub transaction_type_id: Uuid,
    pub amount: Decimal,
    pub note: Option<String>,
    /// Defaults to today (UTC).
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTransactionInput {
    pub transaction_type_id: Option<Uuid>,
    pub amount: Option<Decimal>,
    pub note: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub city_id: Option<Uuid>,
    pub transaction_type_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Transactions of one type over a date range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionSummary {
    pub transaction_type: String,
    pub count: u32,
    pub total: Decimal,
}

/// Money owed to a technician for a closed request.
///
/// Payouts are created by the settlement rule, never directly by clients;
/// clients only move them through their review states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub request_id: Uuid,
    pub amount: Decimal,
    pub status: PayoutStatus,
    /// Reviewer's comment.
    pub comment: Option<String>,
    /// Transfer receipt, relative to the media directory.
    pub receipt_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// - `Pending`: awaiting transfer
/// - `Checking`: transfer reported, sent for review
/// - `Confirmed`: reviewed and settled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    #[default]
    Pending,
    Checking,
    Confirmed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Checking => "checking",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "checking" => Some(Self::Checking),
            "confirmed" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePayoutInput {
    pub status: Option<PayoutStatus>,
    pub comment: Option<String>,
    /// Receipt uploaded with the update, usually when reporting a transfer.
    #[serde(default, skip_serializing)]
    pub receipt: Option<ReceiptUpload>,
    /// Where `receipt` was stored. Set by the server, never by clients.
    #[serde(skip)]
    pub receipt_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptUpload {
    pub file_name: String,
    /// File content, standard base64.
    pub content_base64: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutFilter {
    pub status: Option<PayoutStatus>,
    pub request_id: Option<Uuid>,
    pub master_id: Option<Uuid>,
    pub city_id: Option<Uuid>,
}
