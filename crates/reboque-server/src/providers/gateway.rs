// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payment gateway over HTTP.

use async_trait::async_trait;
use reboque_core::payment::{Charge, ChargeRequest, PaymentGateway, PaymentMethod};
use reboque_core::{CoreError, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{check, client, upstream};
use crate::config::ProviderConfig;

const SERVICE: &str = "payments";

#[derive(Serialize)]
struct ChargeBody<'a> {
    external_reference: &'a str,
    method: PaymentMethod,
    amount_cents: i64,
    description: &'a str,
    split: SplitBody<'a>,
    metadata: Metadata<'a>,
}

#[derive(Serialize)]
struct SplitBody<'a> {
    platform_cents: i64,
    recipient_cents: i64,
    recipient_wallet_id: Option<&'a str>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    request_id: &'a str,
}

#[derive(Deserialize)]
struct ChargeResponse {
    id: String,
    #[serde(default)]
    pix_copy_paste: Option<String>,
    #[serde(default)]
    checkout_url: Option<String>,
}

#[derive(Serialize)]
struct RefundBody {
    amount_cents: i64,
}

/// Gateway client speaking the provider's JSON API with a bearer key.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    /// Build a client for the configured provider.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: client(),
            base_url: config.base_url.clone(),
            api_key: config.token.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(
        skip(self, request),
        fields(payment_id = %request.payment_id, request_id = %request.request_id)
    )]
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge> {
        let body = ChargeBody {
            external_reference: &request.payment_id,
            method: request.method,
            amount_cents: request.split.amount_cents,
            description: &request.description,
            split: SplitBody {
                platform_cents: request.split.platform_cents,
                recipient_cents: request.split.driver_cents,
                recipient_wallet_id: request.driver_wallet_id.as_deref(),
            },
            metadata: Metadata {
                request_id: &request.request_id,
            },
        };

        let response = self
            .client
            .post(format!("{}/charges", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream(SERVICE, e))?;
        let charge: ChargeResponse = check(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| upstream(SERVICE, format!("malformed charge response: {e}")))?;

        info!(provider_ref = %charge.id, "Charge created");
        Ok(Charge {
            provider_ref: charge.id,
            pix_payload: charge.pix_copy_paste,
            checkout_url: charge.checkout_url,
        })
    }

    #[instrument(skip(self))]
    async fn refund(&self, provider_ref: &str, amount_cents: i64) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/charges/{}/refunds", self.base_url, provider_ref))
            .bearer_auth(&self.api_key)
            .json(&RefundBody { amount_cents })
            .send()
            .await
            .map_err(|e| upstream(SERVICE, e))?;
        check(SERVICE, response).await?;
        info!("Refund requested");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel_charge(&self, provider_ref: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/charges/{}/cancel", self.base_url, provider_ref))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| upstream(SERVICE, e))?;
        check(SERVICE, response).await?;
        info!("Charge cancelled");
        Ok(())
    }
}

/// Gateway used when no provider is configured; every call fails.
#[derive(Debug, Default, Clone)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_charge(&self, _request: &ChargeRequest) -> Result<Charge> {
        Err(not_configured())
    }

    async fn refund(&self, _provider_ref: &str, _amount_cents: i64) -> Result<()> {
        Err(not_configured())
    }

    async fn cancel_charge(&self, _provider_ref: &str) -> Result<()> {
        Err(not_configured())
    }
}

fn not_configured() -> CoreError {
    upstream(SERVICE, "payment gateway not configured")
}
