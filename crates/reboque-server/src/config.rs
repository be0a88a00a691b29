// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use reboque_core::dispatch_handlers::DispatchPolicy;

/// Credentials for an outbound HTTP provider.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Bearer token.
    pub token: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Reboque server configuration
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    /// HMAC secret shared with the payment gateway
    pub webhook_secret: String,
    /// Dispatch tunables
    pub policy: DispatchPolicy,
    /// How often the expiry sweeper runs
    pub sweep_interval: Duration,
    /// Payment gateway, if configured
    pub payment: Option<ProviderConfig>,
    /// WhatsApp provider, if configured
    pub whatsapp: Option<ProviderConfig>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("http_addr", &self.http_addr)
            .field("policy", &self.policy)
            .field("sweep_interval", &self.sweep_interval)
            .field("payment", &self.payment)
            .field("whatsapp", &self.whatsapp)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `REBOQUE_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `REBOQUE_JWT_SECRET`: secret used to verify bearer tokens
    /// - `REBOQUE_WEBHOOK_SECRET`: secret used to verify payment webhooks
    ///
    /// Optional (with defaults):
    /// - `REBOQUE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `REBOQUE_PLATFORM_FEE_BPS`: platform commission (default: 1500)
    /// - `REBOQUE_REQUEST_TTL_SECS`: request lifetime (default: 900)
    /// - `REBOQUE_PAYMENT_WINDOW_SECS`: time to pay after acceptance (default: 900)
    /// - `REBOQUE_ALERT_RADIUS_KM`: driver alert radius (default: 30)
    /// - `REBOQUE_SWEEP_INTERVAL_SECS`: expiry sweep period (default: 30)
    /// - `REBOQUE_PAYMENT_API_URL` + `REBOQUE_PAYMENT_API_KEY`: payment gateway
    /// - `REBOQUE_WHATSAPP_API_URL` + `REBOQUE_WHATSAPP_TOKEN`: WhatsApp provider
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("REBOQUE_DATABASE_URL")?;
        if !database_url.starts_with("postgres") && !database_url.starts_with("sqlite:") {
            return Err(ConfigError::Invalid(
                "REBOQUE_DATABASE_URL",
                "must be a postgres:// or sqlite: URL",
            ));
        }
        let jwt_secret = required("REBOQUE_JWT_SECRET")?;
        let webhook_secret = required("REBOQUE_WEBHOOK_SECRET")?;

        let http_port: u16 = parsed("REBOQUE_HTTP_PORT", "8080", "must be a valid port number")?;

        let platform_fee_bps: u32 = parsed(
            "REBOQUE_PLATFORM_FEE_BPS",
            "1500",
            "must be an integer between 0 and 10000",
        )?;
        if platform_fee_bps > 10_000 {
            return Err(ConfigError::Invalid(
                "REBOQUE_PLATFORM_FEE_BPS",
                "must be an integer between 0 and 10000",
            ));
        }

        let request_ttl = seconds("REBOQUE_REQUEST_TTL_SECS", "900")?;
        let payment_window = seconds("REBOQUE_PAYMENT_WINDOW_SECS", "900")?;
        let sweep_interval = seconds("REBOQUE_SWEEP_INTERVAL_SECS", "30")?;

        let alert_radius_km: f64 =
            parsed("REBOQUE_ALERT_RADIUS_KM", "30", "must be a positive number")?;
        if !alert_radius_km.is_finite() || alert_radius_km <= 0.0 {
            return Err(ConfigError::Invalid(
                "REBOQUE_ALERT_RADIUS_KM",
                "must be a positive number",
            ));
        }

        let policy = DispatchPolicy {
            request_ttl,
            payment_window,
            alert_radius_km,
            platform_fee_bps,
            ..DispatchPolicy::default()
        };

        Ok(Self {
            database_url,
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            jwt_secret,
            webhook_secret,
            policy,
            sweep_interval,
            payment: provider("REBOQUE_PAYMENT_API_URL", "REBOQUE_PAYMENT_API_KEY")?,
            whatsapp: provider("REBOQUE_WHATSAPP_API_URL", "REBOQUE_WHATSAPP_TOKEN")?,
        })
    }

    /// Whether the database URL points at SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.database_url.starts_with("sqlite:")
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn parsed<T: std::str::FromStr>(
    key: &'static str,
    default: &str,
    hint: &'static str,
) -> Result<T, ConfigError> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(key, hint))
}

fn seconds(key: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parsed(key, default, "must be a positive number of seconds")?;
    if secs == 0 {
        return Err(ConfigError::Invalid(
            key,
            "must be a positive number of seconds",
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn provider(
    url_key: &'static str,
    token_key: &'static str,
) -> Result<Option<ProviderConfig>, ConfigError> {
    let url = std::env::var(url_key).ok().filter(|v| !v.trim().is_empty());
    let token = std::env::var(token_key).ok().filter(|v| !v.trim().is_empty());
    match (url, token) {
        (Some(base_url), Some(token)) => Ok(Some(ProviderConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Missing(token_key)),
        (None, Some(_)) => Err(ConfigError::Missing(url_key)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
