// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes.
//!
//! All `/api` routes require a bearer token; `/health` and the payment
//! webhook do not. Handlers are thin: they extract the caller and body and
//! delegate to the dispatch handlers in `reboque-core`.

mod accounts;
mod health;
mod requests;
mod trips;
mod webhooks;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{get, post, put};
use reboque_core::dispatch_handlers::DispatchState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::JwtKeys;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Dispatch state shared with the expiry sweeper.
    pub dispatch: Arc<DispatchState>,
    /// Bearer token keys.
    pub jwt: Arc<JwtKeys>,
    /// HMAC secret for payment webhooks.
    pub webhook_secret: Arc<str>,
    /// Process start, reported by `/health`.
    pub started_at: Instant,
}

impl AppState {
    /// Create the HTTP state.
    pub fn new(dispatch: Arc<DispatchState>, jwt: JwtKeys, webhook_secret: &str) -> Self {
        Self {
            dispatch,
            jwt: Arc::new(jwt),
            webhook_secret: Arc::from(webhook_secret),
            started_at: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/me", put(accounts::upsert_profile))
        .route("/drivers/me/location", post(accounts::update_location))
        .route("/drivers/me/availability", post(accounts::set_availability))
        .route(
            "/admin/drivers/{driver_id}/approve",
            post(accounts::approve_driver),
        )
        .route(
            "/requests",
            post(requests::create_request).get(requests::list_requests),
        )
        .route("/requests/{request_id}", get(requests::get_request))
        .route(
            "/requests/{request_id}/proposals",
            post(requests::submit_proposal).get(requests::list_proposals),
        )
        .route(
            "/requests/{request_id}/proposals/{proposal_id}/accept",
            post(requests::accept_proposal),
        )
        .route(
            "/proposals/{proposal_id}/withdraw",
            post(requests::withdraw_proposal),
        )
        .route("/requests/{request_id}/payment", post(trips::start_payment))
        .route("/requests/{request_id}/trip", post(trips::advance_trip))
        .route("/requests/{request_id}/cancel", post(trips::cancel_request))
        .route("/requests/{request_id}/tracking", get(trips::get_tracking))
        .route("/requests/{request_id}/events", get(trips::list_events));

    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
