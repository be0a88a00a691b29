// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP adapters for the payment gateway and the WhatsApp provider.

pub mod gateway;
pub mod whatsapp;

use std::time::Duration;

use reboque_core::CoreError;

pub use gateway::{DisabledGateway, HttpPaymentGateway};
pub use whatsapp::WhatsAppNotifier;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

fn upstream(service: &'static str, details: impl std::fmt::Display) -> CoreError {
    CoreError::UpstreamError {
        service,
        details: details.to_string(),
    }
}

/// Turn a non-2xx response into an upstream error carrying the body.
async fn check(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(upstream(service, format!("HTTP {}: {}", status.as_u16(), body)))
}
