//! Settlement of a service request.
//!
//! When both the amount charged (`total`) and the expense are known, the net
//! proceeds are `total - expense`. A positive net becomes the technician's
//! share; a zero or negative net leaves the share unset. Once the request is
//! closed with a technician assigned and a positive share, exactly one
//! payout exists for it.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::RequestStatus;

/// Derived money fields of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Settlement {
    pub net: Option<Decimal>,
    pub technician_share: Option<Decimal>,
}

impl Settlement {
    /// Both fields are `None` unless `total` and `expense` are both present.
    pub fn compute(total: Option<Decimal>, expense: Option<Decimal>) -> Self {
        let (Some(total), Some(expense)) = (total, expense) else {
            return Self::default();
        };

        let net = total - expense;
        let technician_share = (net > Decimal::ZERO).then_some(net);
        Self {
            net: Some(net),
            technician_share,
        }
    }
}

/// What the persistence layer must do with the request's payout after a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutAction {
    /// No payout exists and one is now owed.
    Create(Decimal),
    /// A payout exists but the share changed.
    UpdateAmount(Decimal),
    /// A payout exists and already matches the share.
    Keep,
    /// No payout is owed; an existing one is left as it is.
    Nothing,
}

/// Decide the payout action for a request that has just been saved.
///
/// `existing_amount` is the amount of the request's payout, if it has one.
pub fn payout_action(
    status: RequestStatus,
    master_id: Option<Uuid>,
    technician_share: Option<Decimal>,
    existing_amount: Option<Decimal>,
) -> PayoutAction {
    let owed = match (status.closes_settlement(), master_id, technician_share) {
        (true, Some(_), Some(share)) if share > Decimal::ZERO => share,
        _ => return PayoutAction::Nothing,
    };

    match existing_amount {
        None => PayoutAction::Create(owed),
        Some(amount) if amount != owed => PayoutAction::UpdateAmount(owed),
        Some(_) => PayoutAction::Keep,
    }
}
