// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use reboque_core::dispatch_handlers::{
    self, ApproveDriverInput, LocationUpdate, ProfileInput,
};
use reboque_core::geo::GeoPoint;
use reboque_core::persistence::UserRecord;
use serde::Deserialize;

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

#[derive(Debug, Deserialize)]
pub(super) struct Availability {
    available: bool,
}

pub(super) async fn upsert_profile(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<ProfileInput>, JsonRejection>,
) -> ApiResult<Json<UserRecord>> {
    let Json(input) = body?;
    let user = dispatch_handlers::upsert_profile(&state.dispatch, &actor, input).await?;
    Ok(Json(user))
}

pub(super) async fn update_location(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<GeoPoint>, JsonRejection>,
) -> ApiResult<Json<LocationUpdate>> {
    let Json(point) = body?;
    let update = dispatch_handlers::update_driver_location(&state.dispatch, &actor, point).await?;
    Ok(Json(update))
}

pub(super) async fn set_availability(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<Availability>, JsonRejection>,
) -> ApiResult<Json<UserRecord>> {
    let Json(input) = body?;
    let user =
        dispatch_handlers::set_availability(&state.dispatch, &actor, input.available).await?;
    Ok(Json(user))
}

pub(super) async fn approve_driver(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(driver_id): Path<String>,
    body: Option<Json<ApproveDriverInput>>,
) -> ApiResult<Json<UserRecord>> {
    let input = body.map(|Json(input)| input).unwrap_or_default();
    let user = dispatch_handlers::approve_driver(&state.dispatch, &actor, &driver_id, input).await?;
    Ok(Json(user))
}
