// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reboque Server - HTTP API
//!
//! Exposes the dispatch operations of [`reboque_core`] over JSON/HTTP:
//!
//! - bearer JWT authentication ([`auth`])
//! - error responses with stable codes ([`error`])
//! - signed payment gateway webhooks ([`webhook`])
//! - HTTP adapters for the payment gateway and WhatsApp ([`providers`])
//! - environment configuration ([`config`])
//!
//! The binary wires these together, runs migrations and starts the
//! expiry sweeper next to the HTTP server.

#![deny(missing_docs)]

/// Routes and shared HTTP state.
pub mod api;

/// Bearer token verification.
pub mod auth;

/// Environment configuration.
pub mod config;

/// HTTP error mapping.
pub mod error;

/// Outbound provider adapters.
pub mod providers;

/// Webhook signature verification.
pub mod webhook;

pub use api::{AppState, build_router};
pub use config::Config;
pub use error::ApiError;
