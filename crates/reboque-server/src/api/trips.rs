// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use reboque_core::persistence::{PaymentRecord, RequestEventRecord, RequestRecord};
use reboque_core::trip_handlers::{
    self, AdvanceTrip, CancelInput, CancellationResult, StartPayment, Tracking,
};

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

pub(super) async fn start_payment(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
    body: Result<Json<StartPayment>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PaymentRecord>)> {
    let Json(input) = body?;
    let payment =
        trip_handlers::start_payment(&state.dispatch, &actor, &request_id, input).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub(super) async fn advance_trip(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
    body: Result<Json<AdvanceTrip>, JsonRejection>,
) -> ApiResult<Json<RequestRecord>> {
    let Json(input) = body?;
    let request = trip_handlers::advance_trip(&state.dispatch, &actor, &request_id, input).await?;
    Ok(Json(request))
}

pub(super) async fn cancel_request(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
    body: Option<Json<CancelInput>>,
) -> ApiResult<Json<CancellationResult>> {
    let input = body.map(|Json(input)| input).unwrap_or_default();
    let result =
        trip_handlers::cancel_request(&state.dispatch, &actor, &request_id, input).await?;
    Ok(Json(result))
}

pub(super) async fn get_tracking(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Tracking>> {
    let tracking = trip_handlers::get_tracking(&state.dispatch, &actor, &request_id).await?;
    Ok(Json(tracking))
}

pub(super) async fn list_events(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Vec<RequestEventRecord>>> {
    let events = trip_handlers::list_events(&state.dispatch, &actor, &request_id).await?;
    Ok(Json(events))
}
