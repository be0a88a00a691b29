// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reboque Server
//!
//! Runs the HTTP API and the expiry sweeper over a shared dispatch state.

use std::sync::Arc;

use anyhow::Result;
use reboque_core::dispatch_handlers::DispatchState;
use reboque_core::expiry::{ExpirySweeper, ExpirySweeperConfig};
use reboque_core::migrations;
use reboque_core::notify::{LogNotifier, Notifier};
use reboque_core::payment::PaymentGateway;
use reboque_core::persistence::{Persistence, PostgresPersistence, SqlitePersistence};
use reboque_server::auth::JwtKeys;
use reboque_server::providers::{DisabledGateway, HttpPaymentGateway, WhatsAppNotifier};
use reboque_server::{AppState, Config, build_router};
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Reboque server");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        platform_fee_bps = config.policy.platform_fee_bps,
        alert_radius_km = config.policy.alert_radius_km,
        request_ttl_secs = config.policy.request_ttl.as_secs(),
        payment_window_secs = config.policy.payment_window.as_secs(),
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let persistence = connect(&config).await?;
    info!("Database ready");

    let gateway: Arc<dyn PaymentGateway> = match &config.payment {
        Some(provider) => Arc::new(HttpPaymentGateway::new(provider)),
        None => {
            warn!("REBOQUE_PAYMENT_API_URL not set, payments are disabled");
            Arc::new(DisabledGateway)
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.whatsapp {
        Some(provider) => Arc::new(WhatsAppNotifier::new(provider)),
        None => {
            warn!("REBOQUE_WHATSAPP_API_URL not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };

    let dispatch = Arc::new(DispatchState::new(
        persistence,
        gateway,
        notifier,
        config.policy.clone(),
    ));

    let sweeper = ExpirySweeper::new(
        dispatch.clone(),
        ExpirySweeperConfig {
            poll_interval: config.sweep_interval,
            ..ExpirySweeperConfig::default()
        },
    );
    let sweeper_shutdown = sweeper.shutdown_handle();
    let sweeper_handle = tokio::spawn(sweeper.run());

    let state = AppState::new(
        dispatch,
        JwtKeys::new(&config.jwt_secret),
        &config.webhook_secret,
    );
    let app = build_router(state);

    let listener = TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    sweeper_shutdown.notify_one();
    if let Err(e) = sweeper_handle.await {
        error!("Expiry sweeper task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("reboque_server=info,reboque_core=info,tower_http=info")
    });
    let json = std::env::var("REBOQUE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect(config: &Config) -> Result<Arc<dyn Persistence>> {
    if config.is_sqlite() {
        let options: SqliteConnectOptions = config.database_url.parse()?;
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.create_if_missing(true))
            .await?;
        info!("Running SQLite migrations...");
        migrations::run_sqlite(&pool).await?;
        Ok(Arc::new(SqlitePersistence::new(pool)))
    } else {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;
        info!("Running PostgreSQL migrations...");
        migrations::run_postgres(&pool).await?;
        Ok(Arc::new(PostgresPersistence::new(pool)))
    }
}
