// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payment split and the payment gateway seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::penalty::apply_bps;

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Credit/debit card checkout.
    Card,
    /// Pix instant transfer (copy-paste payload / QR code).
    Pix,
}

impl PaymentMethod {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Pix => "pix",
        }
    }

    /// Parse a method from its database representation.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "card" => Ok(Self::Card),
            "pix" => Ok(Self::Pix),
            other => Err(CoreError::validation(
                "method",
                format!("unknown payment method '{}'", other),
            )),
        }
    }
}

/// Division of a charge between the platform and the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentSplit {
    /// Total charged.
    pub amount_cents: i64,
    /// Platform commission.
    pub platform_cents: i64,
    /// Driver payout.
    pub driver_cents: i64,
}

impl PaymentSplit {
    /// Split `amount_cents`, giving the platform `platform_fee_bps` rounded half up.
    ///
    /// The driver receives the remainder, so the shares always add up.
    pub fn compute(amount_cents: i64, platform_fee_bps: u32) -> Self {
        let amount_cents = amount_cents.max(0);
        let platform_cents = apply_bps(amount_cents, platform_fee_bps).min(amount_cents);
        Self {
            amount_cents,
            platform_cents,
            driver_cents: amount_cents - platform_cents,
        }
    }
}

/// What the gateway needs to open a charge.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    /// Our payment ID, echoed back by the gateway as external reference.
    pub payment_id: String,
    /// Tow request being paid.
    pub request_id: String,
    /// Card or Pix.
    pub method: PaymentMethod,
    /// Split to apply at settlement.
    pub split: PaymentSplit,
    /// Driver's payout account at the gateway, when registered.
    pub driver_wallet_id: Option<String>,
    /// Human-readable description on the customer's statement.
    pub description: String,
}

/// A charge opened at the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    /// Gateway's identifier, used by webhooks and refunds.
    pub provider_ref: String,
    /// Pix copy-paste payload.
    pub pix_payload: Option<String>,
    /// Hosted card checkout URL.
    pub checkout_url: Option<String>,
}

/// External payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a charge for the customer to pay.
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge>;

    /// Return `amount_cents` of a confirmed charge to the customer.
    async fn refund(&self, provider_ref: &str, amount_cents: i64) -> Result<()>;

    /// Withdraw an unpaid charge so its Pix payload or checkout link stops
    /// accepting payment.
    async fn cancel_charge(&self, provider_ref: &str) -> Result<()>;
}

/// Outcome reported by the gateway webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEvent {
    /// Funds captured.
    Confirmed,
    /// Charge failed or was declined.
    Failed,
}

/// Webhook body sent by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentWebhook {
    /// Gateway charge reference.
    pub provider_ref: String,
    /// What happened.
    pub event: PaymentEvent,
}
