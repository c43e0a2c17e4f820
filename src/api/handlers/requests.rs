use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{CurrentUser, DIRECTORS, STAFF};
use crate::error::{Error, Result};
use crate::models::*;
use crate::notify::{format_business_alert, BusinessEvent};

/// Roles that take new requests. Technicians only work on assigned ones.
const INTAKE: &[Role] = &[
    Role::CallCentre,
    Role::Kc,
    Role::Avitolog,
    Role::Director,
    Role::Admin,
];

fn can_see(user: &CurrentUser, request: &ServiceRequest) -> bool {
    user.can_access_city(request.city_id)
        && user
            .master_scope()
            .map_or(true, |own| request.master_id == Some(own))
}

/// Load a request the caller is allowed to see. Others look missing.
fn visible_request(state: &AppState, user: &CurrentUser, id: Uuid) -> Result<ServiceRequest> {
    state
        .db
        .get_request(id)?
        .filter(|r| can_see(user, r))
        .ok_or(Error::NotFound("Request"))
}

fn scope_filter(user: &CurrentUser, filter: &mut RequestFilter) {
    filter.city_id = user.scoped_city(filter.city_id);
    if let Some(own) = user.master_scope() {
        filter.master_id = Some(own);
    }
}

pub async fn list_requests(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut filter): Query<RequestFilter>,
) -> Result<Json<Vec<ServiceRequest>>> {
    user.require(STAFF)?;
    scope_filter(&user, &mut filter);
    Ok(Json(state.db.list_requests(&filter)?))
}

/// The incoming queue: requests waiting to be offered to a technician.
pub async fn list_incoming(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut filter): Query<RequestFilter>,
) -> Result<Json<Vec<ServiceRequest>>> {
    user.require(STAFF)?;
    filter.status = Some(RequestStatus::Waiting);
    scope_filter(&user, &mut filter);
    Ok(Json(state.db.list_requests(&filter)?))
}

pub async fn get_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>> {
    user.require(STAFF)?;
    visible_request(&state, &user, id).map(Json)
}

pub async fn create_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<CreateRequestInput>,
) -> Result<(StatusCode, Json<ServiceRequest>)> {
    user.require(INTAKE)?;
    if !user.can_access_city(input.city_id) {
        return Err(Error::Forbidden);
    }

    let request = state.db.create_request(input)?;
    tracing::info!(request_id = %request.id, by = %user.login, "Request created");

    state.notifier.spawn_send(format_business_alert(
        BusinessEvent::NewRequest,
        &format!("{}: {}", request.appliance_type, request.problem),
        Some(&user.name),
        &[
            ("client", request.client_name.clone()),
            ("phone", request.client_phone.clone()),
            ("address", request.address.clone()),
        ],
    ));

    Ok((StatusCode::CREATED, Json(request)))
}

/// Technicians may update their own requests but cannot reassign them.
pub async fn update_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateRequestInput>,
) -> Result<Json<ServiceRequest>> {
    user.require(STAFF)?;
    let existing = visible_request(&state, &user, id)?;

    if user.is_master() && (input.master_id.is_some() || input.city_id.is_some()) {
        return Err(Error::Forbidden);
    }
    if let Some(city_id) = input.city_id {
        if !user.can_access_city(city_id) {
            return Err(Error::Forbidden);
        }
    }

    let had_payout = state.db.get_payout_by_request(id)?.is_some();
    let request = state
        .db
        .update_request(id, input)?
        .ok_or(Error::NotFound("Request"))?;

    if request.status != existing.status {
        tracing::info!(
            request_id = %id,
            from = existing.status.as_str(),
            to = request.status.as_str(),
            by = %user.login,
            "Request status changed"
        );
    }
    if !had_payout {
        if let Some(payout) = state.db.get_payout_by_request(id)? {
            state.notifier.spawn_send(format_business_alert(
                BusinessEvent::Payment,
                "Payout owed for closed request",
                Some(&user.name),
                &[
                    ("request", id.to_string()),
                    ("amount", payout.amount.to_string()),
                ],
            ));
        }
    }

    Ok(Json(request))
}

pub async fn delete_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.require(DIRECTORS)?;
    visible_request(&state, &user, id)?;
    state.db.delete_request(id)?;
    tracing::info!(request_id = %id, by = %user.login, "Request deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Files
// ============================================================

pub async fn list_files(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RequestFile>>> {
    user.require(STAFF)?;
    visible_request(&state, &user, id)?;
    Ok(Json(state.db.list_request_files(id)?))
}

pub async fn upload_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UploadFileInput>,
) -> Result<(StatusCode, Json<RequestFile>)> {
    user.require(STAFF)?;
    visible_request(&state, &user, id)?;

    let bytes = super::decode_upload(&input.content_base64)?;

    let stored_path = state
        .media
        .store(&format!("requests/{}", id), &input.file_name, &bytes)?;
    let file = state.db.attach_file(
        id,
        AttachFileInput {
            kind: input.kind,
            file_name: input.file_name,
            stored_path,
            uploaded_by: Some(user.id),
        },
    )?;

    Ok((StatusCode::CREATED, Json(file)))
}

pub async fn download_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<Response> {
    user.require(STAFF)?;
    visible_request(&state, &user, id)?;
    let file = state
        .db
        .get_request_file(id, file_id)?
        .ok_or(Error::NotFound("File"))?;
    super::serve_media(&state.media, &file.stored_path, &file.file_name).await
}
