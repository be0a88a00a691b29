// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use tracing::warn;

use super::AppState;

#[derive(Debug, Serialize)]
pub(super) struct Health {
    status: &'static str,
    database: bool,
    version: &'static str,
    uptime_secs: u64,
}

/// Liveness plus database reachability.
pub(super) async fn health(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let database = match state.dispatch.persistence.health_check().await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            false
        }
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Health {
        status: if database { "ok" } else { "degraded" },
        database,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    };
    (status, Json(body))
}
