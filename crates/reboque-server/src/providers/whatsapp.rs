// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WhatsApp text messages through the provider's HTTP API.

use async_trait::async_trait;
use reboque_core::Result;
use reboque_core::notify::Notifier;
use serde::Serialize;
use tracing::debug;

use super::{check, client, upstream};
use crate::config::ProviderConfig;

const SERVICE: &str = "whatsapp";

#[derive(Serialize)]
struct MessageBody<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: Text<'a>,
}

#[derive(Serialize)]
struct Text<'a> {
    body: &'a str,
}

/// Notifier that delivers text messages over WhatsApp.
#[derive(Clone)]
pub struct WhatsAppNotifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl WhatsAppNotifier {
    /// Build a client for the configured provider.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: client(),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<()> {
        let body = MessageBody {
            messaging_product: "whatsapp",
            to: phone.trim_start_matches('+'),
            kind: "text",
            text: Text { body: message },
        };
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream(SERVICE, e))?;
        check(SERVICE, response).await?;
        debug!(phone, "WhatsApp message sent");
        Ok(())
    }
}
