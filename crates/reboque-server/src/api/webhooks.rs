// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use reboque_core::payment::PaymentWebhook;
use reboque_core::persistence::PaymentRecord;
use reboque_core::trip_handlers;
use tracing::warn;

use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::webhook;

/// Gateway callback. Authenticated by body signature, not by bearer token.
pub(super) async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<PaymentRecord>> {
    let signature = headers
        .get(webhook::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !webhook::verify(state.webhook_secret.as_bytes(), &body, signature) {
        warn!("Rejected payment webhook with bad signature");
        return Err(ApiError::InvalidSignature);
    }

    let event: PaymentWebhook = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook body: {e}")))?;
    let payment = trip_handlers::handle_payment_webhook(&state.dispatch, event).await?;
    Ok(Json(payment))
}
