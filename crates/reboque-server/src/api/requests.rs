// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use reboque_core::RequestStatus;
use reboque_core::dispatch_handlers::{
    self, CreateTowRequest, CreatedRequest, RequestListing, SubmitProposal,
};
use reboque_core::persistence::{ProposalRecord, RequestRecord};
use serde::Deserialize;

use super::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListQuery {
    #[serde(default)]
    status: Option<RequestStatus>,
}

pub(super) async fn create_request(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    body: Result<Json<CreateTowRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreatedRequest>)> {
    let Json(input) = body?;
    let created = dispatch_handlers::create_request(&state.dispatch, &actor, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(super) async fn list_requests(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<RequestListing>>> {
    let Query(query) = query?;
    let listing = dispatch_handlers::list_requests(&state.dispatch, &actor, query.status).await?;
    Ok(Json(listing))
}

pub(super) async fn get_request(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<RequestRecord>> {
    let request = dispatch_handlers::get_request(&state.dispatch, &actor, &request_id).await?;
    Ok(Json(request))
}

pub(super) async fn submit_proposal(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
    body: Result<Json<SubmitProposal>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProposalRecord>)> {
    let Json(input) = body?;
    let proposal =
        dispatch_handlers::submit_proposal(&state.dispatch, &actor, &request_id, input).await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

pub(super) async fn list_proposals(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(request_id): Path<String>,
) -> ApiResult<Json<Vec<ProposalRecord>>> {
    let proposals =
        dispatch_handlers::list_proposals(&state.dispatch, &actor, &request_id).await?;
    Ok(Json(proposals))
}

pub(super) async fn accept_proposal(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path((request_id, proposal_id)): Path<(String, String)>,
) -> ApiResult<Json<RequestRecord>> {
    let request =
        dispatch_handlers::accept_proposal(&state.dispatch, &actor, &request_id, &proposal_id)
            .await?;
    Ok(Json(request))
}

pub(super) async fn withdraw_proposal(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(proposal_id): Path<String>,
) -> ApiResult<Json<ProposalRecord>> {
    let proposal =
        dispatch_handlers::withdraw_proposal(&state.dispatch, &actor, &proposal_id).await?;
    Ok(Json(proposal))
}
