use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{CurrentUser, DIRECTORS, MASTERS_OR_ABOVE};
use crate::error::{Error, Result};
use crate::models::*;

// ============================================================
// Transactions
// ============================================================

fn visible_transaction(state: &AppState, user: &CurrentUser, id: Uuid) -> Result<Transaction> {
    state
        .db
        .get_transaction(id)?
        .filter(|t| user.can_access_city(t.city_id))
        .ok_or(Error::NotFound("Transaction"))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut filter): Query<TransactionFilter>,
) -> Result<Json<Vec<Transaction>>> {
    user.require(DIRECTORS)?;
    filter.city_id = user.scoped_city(filter.city_id);
    Ok(Json(state.db.list_transactions(&filter)?))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Transaction>> {
    user.require(DIRECTORS)?;
    visible_transaction(&state, &user, id).map(Json)
}

pub async fn create_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<CreateTransactionInput>,
) -> Result<(StatusCode, Json<Transaction>)> {
    user.require(DIRECTORS)?;
    if !user.can_access_city(input.city_id) {
        return Err(Error::Forbidden);
    }
    let transaction = state.db.create_transaction(input)?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

pub async fn update_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateTransactionInput>,
) -> Result<Json<Transaction>> {
    user.require(DIRECTORS)?;
    visible_transaction(&state, &user, id)?;
    state
        .db
        .update_transaction(id, input)?
        .map(Json)
        .ok_or(Error::NotFound("Transaction"))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.require(DIRECTORS)?;
    visible_transaction(&state, &user, id)?;
    state.db.delete_transaction(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Per-type totals between `start_date` and `end_date` (inclusive).
pub async fn transaction_summary(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut filter): Query<TransactionFilter>,
) -> Result<Json<Vec<TransactionSummary>>> {
    user.require(DIRECTORS)?;
    if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
        if start > end {
            return Err(Error::validation("start_date must not be after end_date"));
        }
    }
    filter.city_id = user.scoped_city(filter.city_id);
    Ok(Json(state.db.summarize_transactions(&filter)?))
}

// ============================================================
// Payouts
// ============================================================

/// Payouts are visible through their request: same city, and for
/// technicians only their own requests.
fn visible_payout(state: &AppState, user: &CurrentUser, id: Uuid) -> Result<Payout> {
    let payout = state.db.get_payout(id)?.ok_or(Error::NotFound("Payout"))?;
    let request = state
        .db
        .get_request(payout.request_id)?
        .ok_or(Error::NotFound("Payout"))?;

    let own = user
        .master_scope()
        .map_or(true, |master| request.master_id == Some(master));
    if user.can_access_city(request.city_id) && own {
        Ok(payout)
    } else {
        Err(Error::NotFound("Payout"))
    }
}

pub async fn list_payouts(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut filter): Query<PayoutFilter>,
) -> Result<Json<Vec<Payout>>> {
    user.require(MASTERS_OR_ABOVE)?;
    filter.city_id = user.scoped_city(filter.city_id);
    if let Some(own) = user.master_scope() {
        filter.master_id = Some(own);
    }
    Ok(Json(state.db.list_payouts(&filter)?))
}

pub async fn get_payout(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Payout>> {
    user.require(MASTERS_OR_ABOVE)?;
    visible_payout(&state, &user, id).map(Json)
}

/// Directors may set any status. A technician may only report a pending
/// payout as transferred, moving it to `checking`.
pub async fn update_payout(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(mut input): Json<UpdatePayoutInput>,
) -> Result<Json<Payout>> {
    user.require(MASTERS_OR_ABOVE)?;
    let existing = visible_payout(&state, &user, id)?;

    if user.is_master() {
        let allowed = existing.status == PayoutStatus::Pending
            && input.status == Some(PayoutStatus::Checking);
        if !allowed {
            return Err(Error::Forbidden);
        }
    }

    input.receipt_path = None;
    if let Some(receipt) = input.receipt.take() {
        let bytes = super::decode_upload(&receipt.content_base64)?;
        let stored_path =
            state
                .media
                .store(&format!("payouts/{}", id), &receipt.file_name, &bytes)?;
        tracing::info!(payout_id = %id, %stored_path, "Payout receipt stored");
        input.receipt_path = Some(stored_path);
    }

    let payout = state
        .db
        .update_payout(id, input)?
        .ok_or(Error::NotFound("Payout"))?;
    tracing::info!(
        payout_id = %id,
        status = payout.status.as_str(),
        by = %user.login,
        "Payout updated"
    );
    Ok(Json(payout))
}

pub async fn download_receipt(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    user.require(MASTERS_OR_ABOVE)?;
    let payout = visible_payout(&state, &user, id)?;
    let stored_path = payout.receipt_path.ok_or(Error::NotFound("Receipt"))?;
    let file_name = stored_path
        .rsplit('/')
        .next()
        .unwrap_or(stored_path.as_str())
        .to_string();
    super::serve_media(&state.media, &stored_path, &file_name).await
}

pub async fn delete_payout(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.require(DIRECTORS)?;
    visible_payout(&state, &user, id)?;
    state.db.delete_payout(id)?;
    Ok(StatusCode::NO_CONTENT)
}
