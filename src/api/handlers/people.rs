use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{CurrentUser, ADMIN_ONLY, DIRECTORS, STAFF};
use crate::error::{Error, Result};
use crate::models::*;

/// Directors manage their own city; only admins may grant the admin role.
fn ensure_manageable(user: &CurrentUser, city_id: Uuid, role: Option<Role>) -> Result<()> {
    if !user.can_access_city(city_id) {
        return Err(Error::Forbidden);
    }
    if role == Some(Role::Admin) {
        user.require(ADMIN_ONLY)?;
    }
    Ok(())
}

// ============================================================
// Users
// ============================================================

pub async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut filter): Query<UserFilter>,
) -> Result<Json<Vec<User>>> {
    user.require(DIRECTORS)?;
    filter.city_id = user.scoped_city(filter.city_id);
    Ok(Json(state.db.list_users(&filter)?))
}

pub async fn list_active_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<User>>> {
    user.require(DIRECTORS)?;
    let filter = UserFilter {
        city_id: user.city_scope(),
        is_active: Some(true),
        ..Default::default()
    };
    Ok(Json(state.db.list_users(&filter)?))
}

pub async fn get_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<User>> {
    user.require(DIRECTORS)?;
    state
        .db
        .get_user(id)?
        .filter(|u| user.can_access_city(u.city_id))
        .map(Json)
        .ok_or(Error::NotFound("User"))
}

pub async fn create_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<CreateUserInput>,
) -> Result<(StatusCode, Json<User>)> {
    user.require(DIRECTORS)?;
    ensure_manageable(&user, input.city_id, Some(input.role))?;
    let created = state.db.create_user(input)?;
    tracing::info!(login = %created.login, role = created.role.as_str(), "User created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateUserInput>,
) -> Result<Json<User>> {
    user.require(DIRECTORS)?;
    let existing = state
        .db
        .get_user(id)?
        .filter(|u| user.can_access_city(u.city_id))
        .ok_or(Error::NotFound("User"))?;
    if existing.role == Role::Admin {
        user.require(ADMIN_ONLY)?;
    }
    ensure_manageable(&user, input.city_id.unwrap_or(existing.city_id), input.role)?;

    state
        .db
        .update_user(id, input)?
        .map(Json)
        .ok_or(Error::NotFound("User"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.require(DIRECTORS)?;
    let existing = state
        .db
        .get_user(id)?
        .filter(|u| user.can_access_city(u.city_id))
        .ok_or(Error::NotFound("User"))?;
    if existing.id == user.id {
        return Err(Error::validation("You cannot delete your own account"));
    }
    if existing.role == Role::Admin {
        user.require(ADMIN_ONLY)?;
    }
    state.db.delete_user(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Masters
// ============================================================

pub async fn list_masters(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(mut filter): Query<MasterFilter>,
) -> Result<Json<Vec<Master>>> {
    user.require(STAFF)?;
    filter.city_id = user.scoped_city(filter.city_id);
    Ok(Json(state.db.list_masters(&filter)?))
}

pub async fn list_active_masters(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<Master>>> {
    user.require(STAFF)?;
    let filter = MasterFilter {
        city_id: user.city_scope(),
        is_active: Some(true),
    };
    Ok(Json(state.db.list_masters(&filter)?))
}

pub async fn get_master(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Master>> {
    user.require(STAFF)?;
    state
        .db
        .get_master(id)?
        .filter(|m| user.can_access_city(m.city_id))
        .map(Json)
        .ok_or(Error::NotFound("Master"))
}

pub async fn create_master(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<CreateMasterInput>,
) -> Result<(StatusCode, Json<Master>)> {
    user.require(DIRECTORS)?;
    ensure_manageable(&user, input.city_id, None)?;
    let master = state.db.create_master(input)?;
    tracing::info!(login = %master.login, "Master created");
    Ok((StatusCode::CREATED, Json(master)))
}

pub async fn update_master(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateMasterInput>,
) -> Result<Json<Master>> {
    user.require(DIRECTORS)?;
    let existing = state
        .db
        .get_master(id)?
        .filter(|m| user.can_access_city(m.city_id))
        .ok_or(Error::NotFound("Master"))?;
    ensure_manageable(&user, input.city_id.unwrap_or(existing.city_id), None)?;

    state
        .db
        .update_master(id, input)?
        .map(Json)
        .ok_or(Error::NotFound("Master"))
}

pub async fn delete_master(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.require(DIRECTORS)?;
    state
        .db
        .get_master(id)?
        .filter(|m| user.can_access_city(m.city_id))
        .ok_or(Error::NotFound("Master"))?;
    state.db.delete_master(id)?;
    Ok(StatusCode::NO_CONTENT)
}
