//! Reference data: cities, request types, transaction types, ad channels and
//! city phone lines. Staff may read; directors may write.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{CurrentUser, DIRECTORS, STAFF};
use crate::error::{Error, Result};
use crate::models::*;

/// Handlers for one of the name-only lists, generated per [`ReferenceKind`].
macro_rules! named_reference {
    ($module:ident, $kind:expr) => {
        pub mod $module {
            use super::*;

            pub async fn list(
                State(state): State<AppState>,
                user: CurrentUser,
            ) -> Result<Json<Vec<NamedEntry>>> {
                user.require(STAFF)?;
                Ok(Json(state.db.list_named($kind)?))
            }

            pub async fn get(
                State(state): State<AppState>,
                user: CurrentUser,
                Path(id): Path<Uuid>,
            ) -> Result<Json<NamedEntry>> {
                user.require(STAFF)?;
                state
                    .db
                    .get_named($kind, id)?
                    .map(Json)
                    .ok_or(Error::NotFound($kind.label()))
            }

            pub async fn create(
                State(state): State<AppState>,
                user: CurrentUser,
                Json(input): Json<NamedEntryInput>,
            ) -> Result<(StatusCode, Json<NamedEntry>)> {
                user.require(DIRECTORS)?;
                let entry = state.db.create_named($kind, input)?;
                Ok((StatusCode::CREATED, Json(entry)))
            }

            pub async fn update(
                State(state): State<AppState>,
                user: CurrentUser,
                Path(id): Path<Uuid>,
                Json(input): Json<NamedEntryInput>,
            ) -> Result<Json<NamedEntry>> {
                user.require(DIRECTORS)?;
                state
                    .db
                    .update_named($kind, id, input)?
                    .map(Json)
                    .ok_or(Error::NotFound($kind.label()))
            }

            pub async fn delete(
                State(state): State<AppState>,
                user: CurrentUser,
                Path(id): Path<Uuid>,
            ) -> Result<StatusCode> {
                user.require(DIRECTORS)?;
                if state.db.delete_named($kind, id)? {
                    Ok(StatusCode::NO_CONTENT)
                } else {
                    Err(Error::NotFound($kind.label()))
                }
            }
        }
    };
}

named_reference!(cities, ReferenceKind::City);
named_reference!(request_types, ReferenceKind::RequestType);
named_reference!(transaction_types, ReferenceKind::TransactionType);

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/cities", get(cities::list).post(cities::create))
        .route(
            "/cities/{id}",
            get(cities::get).put(cities::update).delete(cities::delete),
        )
        .route(
            "/request-types",
            get(request_types::list).post(request_types::create),
        )
        .route(
            "/request-types/{id}",
            get(request_types::get)
                .put(request_types::update)
                .delete(request_types::delete),
        )
        .route(
            "/transaction-types",
            get(transaction_types::list).post(transaction_types::create),
        )
        .route(
            "/transaction-types/{id}",
            get(transaction_types::get)
                .put(transaction_types::update)
                .delete(transaction_types::delete),
        )
        .route("/ad-channels", get(list_ad_channels).post(create_ad_channel))
        .route(
            "/ad-channels/{id}",
            get(get_ad_channel)
                .put(update_ad_channel)
                .delete(delete_ad_channel),
        )
        .route("/city-phones", get(list_city_phones).post(create_city_phone))
        .route(
            "/city-phones/{id}",
            axum::routing::put(update_city_phone).delete(delete_city_phone),
        )
}

fn ensure_city(user: &CurrentUser, city_id: Uuid) -> Result<()> {
    if user.can_access_city(city_id) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

// ============================================================
// Ad channels
// ============================================================

pub async fn list_ad_channels(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(filter): Query<CityFilter>,
) -> Result<Json<Vec<AdChannel>>> {
    user.require(STAFF)?;
    let city_id = user.scoped_city(filter.city_id);
    Ok(Json(state.db.list_ad_channels(city_id)?))
}

pub async fn get_ad_channel(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<AdChannel>> {
    user.require(STAFF)?;
    state
        .db
        .get_ad_channel(id)?
        .filter(|c| user.can_access_city(c.city_id))
        .map(Json)
        .ok_or(Error::NotFound("Ad channel"))
}

pub async fn create_ad_channel(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<CreateAdChannelInput>,
) -> Result<(StatusCode, Json<AdChannel>)> {
    user.require(DIRECTORS)?;
    ensure_city(&user, input.city_id)?;
    let channel = state.db.create_ad_channel(input)?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn update_ad_channel(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateAdChannelInput>,
) -> Result<Json<AdChannel>> {
    user.require(DIRECTORS)?;
    let existing = state
        .db
        .get_ad_channel(id)?
        .filter(|c| user.can_access_city(c.city_id))
        .ok_or(Error::NotFound("Ad channel"))?;
    ensure_city(&user, input.city_id.unwrap_or(existing.city_id))?;

    state
        .db
        .update_ad_channel(id, input)?
        .map(Json)
        .ok_or(Error::NotFound("Ad channel"))
}

pub async fn delete_ad_channel(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.require(DIRECTORS)?;
    state
        .db
        .get_ad_channel(id)?
        .filter(|c| user.can_access_city(c.city_id))
        .ok_or(Error::NotFound("Ad channel"))?;
    state.db.delete_ad_channel(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// City phones
// ============================================================

fn owns_city_phone(state: &AppState, user: &CurrentUser, id: Uuid) -> Result<bool> {
    Ok(state
        .db
        .list_city_phones(user.city_scope())?
        .iter()
        .any(|p| p.id == id))
}

pub async fn list_city_phones(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(filter): Query<CityFilter>,
) -> Result<Json<Vec<CityPhone>>> {
    user.require(STAFF)?;
    let city_id = user.scoped_city(filter.city_id);
    Ok(Json(state.db.list_city_phones(city_id)?))
}

pub async fn create_city_phone(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<CityPhoneInput>,
) -> Result<(StatusCode, Json<CityPhone>)> {
    user.require(DIRECTORS)?;
    ensure_city(&user, input.city_id)?;
    let phone = state.db.create_city_phone(input)?;
    Ok((StatusCode::CREATED, Json(phone)))
}

pub async fn update_city_phone(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<CityPhoneInput>,
) -> Result<Json<CityPhone>> {
    user.require(DIRECTORS)?;
    ensure_city(&user, input.city_id)?;
    if !owns_city_phone(&state, &user, id)? {
        return Err(Error::NotFound("City phone"));
    }
    state
        .db
        .update_city_phone(id, input)?
        .map(Json)
        .ok_or(Error::NotFound("City phone"))
}

pub async fn delete_city_phone(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    user.require(DIRECTORS)?;
    if !owns_city_phone(&state, &user, id)? || !state.db.delete_city_phone(id)? {
        return Err(Error::NotFound("City phone"));
    }
    Ok(StatusCode::NO_CONTENT)
}
