// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WhatsApp alerts.
//!
//! Delivery is best effort: [`notify`] logs failures instead of returning
//! them, so a messaging outage never blocks the dispatch flow.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::status::RequestStatus;

/// Outbound messaging provider.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a text message to a phone number in E.164 format.
    async fn send(&self, phone: &str, message: &str) -> Result<()>;
}

/// Notifier that only logs; used when no provider is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<()> {
        debug!(phone, message, "Notification (log only)");
        Ok(())
    }
}

/// Send a message, swallowing and logging any delivery error.
pub async fn notify(notifier: &dyn Notifier, phone: Option<&str>, message: String) {
    let Some(phone) = phone.filter(|p| !p.is_empty()) else {
        debug!("Recipient has no phone number, skipping notification");
        return;
    };
    if let Err(e) = notifier.send(phone, &message).await {
        warn!(phone, error = %e, "Failed to deliver notification");
    }
}

fn money(cents: i64) -> String {
    format!("R$ {},{:02}", cents / 100, (cents % 100).abs())
}

/// Alert for drivers near a new request.
pub fn new_request_message(request_id: &str, distance_km: f64, vehicle: &str) -> String {
    format!(
        "New tow request {:.1} km from you ({}). Send your proposal: request {}",
        distance_km, vehicle, request_id
    )
}

/// Tell the customer a driver made an offer.
pub fn new_proposal_message(price_cents: i64, eta_minutes: i32) -> String {
    format!(
        "You received a proposal: {} with arrival in {} min. Open the app to accept.",
        money(price_cents),
        eta_minutes
    )
}

/// Tell the driver their offer won.
pub fn proposal_accepted_message(request_id: &str, price_cents: i64) -> String {
    format!(
        "Your proposal of {} for request {} was accepted. Waiting for payment.",
        money(price_cents),
        request_id
    )
}

/// Tell the driver the customer paid.
pub fn payment_confirmed_message(request_id: &str, driver_cents: i64) -> String {
    format!(
        "Payment confirmed for request {}. Your payout: {}. You can start the trip.",
        request_id,
        money(driver_cents)
    )
}

/// Tell the customer about trip progress.
pub fn trip_status_message(status: RequestStatus) -> String {
    match status {
        RequestStatus::EnRoute => "Your tow truck is on the way.".to_string(),
        RequestStatus::Arrived => "Your tow truck has arrived.".to_string(),
        RequestStatus::InService => "Your vehicle is being towed.".to_string(),
        RequestStatus::Completed => "Trip completed. Thank you!".to_string(),
        other => format!("Your request is now {}.", other),
    }
}

/// Tell the other party the request was cancelled.
pub fn cancelled_message(request_id: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) if !reason.is_empty() => {
            format!("Request {} was cancelled: {}", request_id, reason)
        }
        _ => format!("Request {} was cancelled.", request_id),
    }
}

/// Tell the customer nobody picked up their request in time.
pub fn expired_message(request_id: &str) -> String {
    format!(
        "Request {} expired without an accepted proposal. You can open a new one.",
        request_id
    )
}
