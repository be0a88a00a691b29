// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Expiry sweeper.
//!
//! Periodically closes requests whose time ran out:
//! 1. open requests past `expires_at` become `expired`;
//! 2. accepted requests left unpaid beyond the payment window are cancelled
//!    by the system with reason `payment_timeout` and no fee.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::dispatch_handlers::{DispatchState, phone_of, record_event, to_chrono};
use crate::error::{CoreError, Result};
use crate::notify;
use crate::penalty::CancelledBy;
use crate::status::RequestStatus;
use crate::trip_handlers::cancel_as;

/// Reason stored on requests cancelled for lack of payment.
pub const PAYMENT_TIMEOUT_REASON: &str = "payment_timeout";

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct ExpirySweeperConfig {
    /// How often to sweep.
    pub poll_interval: Duration,
    /// Maximum requests of each kind handled per sweep.
    pub batch_size: i64,
}

impl Default for ExpirySweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Open requests moved to `expired`.
    pub expired: usize,
    /// Accepted requests cancelled for lack of payment.
    pub payment_timeouts: usize,
}

/// Expiry sweeper that runs as a background task.
pub struct ExpirySweeper {
    state: Arc<DispatchState>,
    config: ExpirySweeperConfig,
    shutdown: Arc<Notify>,
}

impl ExpirySweeper {
    /// Create a new sweeper over the shared dispatch state.
    pub fn new(state: Arc<DispatchState>, config: ExpirySweeperConfig) -> Self {
        Self {
            state,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "Expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Expiry sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.sweep_once().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(
                                expired = report.expired,
                                payment_timeouts = report.payment_timeouts,
                                "Sweep finished"
                            );
                        }
                        Ok(_) => debug!("Nothing to sweep"),
                        Err(e) => error!(error = %e, "Expiry sweep failed"),
                    }
                }
            }
        }
    }

    /// Run one sweep at the state's current time.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        Ok(SweepReport {
            expired: self.expire_open_requests().await?,
            payment_timeouts: self.cancel_unpaid_requests().await?,
        })
    }

    async fn expire_open_requests(&self) -> Result<usize> {
        let state = self.state.as_ref();
        let now = state.now();
        let due = state
            .persistence
            .list_expired_open_requests(now, self.config.batch_size)
            .await?;

        let mut expired = 0;
        for request in due {
            let from = request.status()?;
            let moved = state
                .persistence
                .transition_request(&request.request_id, from, RequestStatus::Expired, now)
                .await?;
            if !moved {
                // A proposal or acceptance got there first.
                debug!(request_id = %request.request_id, "Request changed before expiry");
                continue;
            }

            let rejected = state
                .persistence
                .reject_pending_proposals(&request.request_id, None, now)
                .await?;
            record_event(
                state,
                &request.request_id,
                Some(from),
                RequestStatus::Expired,
                None,
                Some("ttl elapsed".to_string()),
                now,
            )
            .await?;
            info!(request_id = %request.request_id, rejected, "Request expired");

            notify::notify(
                state.notifier.as_ref(),
                phone_of(state, &request.customer_id).await.as_deref(),
                notify::expired_message(&request.request_id),
            )
            .await;
            expired += 1;
        }

        Ok(expired)
    }

    async fn cancel_unpaid_requests(&self) -> Result<usize> {
        let state = self.state.as_ref();
        let cutoff = state.now() - to_chrono(state.policy.payment_window);
        let due = state
            .persistence
            .list_unpaid_accepted_requests(cutoff, self.config.batch_size)
            .await?;

        let mut cancelled = 0;
        for request in due {
            let request_id = request.request_id.clone();
            let result = cancel_as(
                state,
                request,
                CancelledBy::System,
                None,
                Some(PAYMENT_TIMEOUT_REASON.to_string()),
            )
            .await;

            let result = match result {
                Ok(result) => result,
                Err(CoreError::InvalidRequestState { .. }) => {
                    debug!(request_id = %request_id, "Request changed before payment timeout");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let message =
                notify::cancelled_message(&request_id, Some("payment not received in time"));
            let parties = std::iter::once(result.request.customer_id.as_str())
                .chain(result.request.driver_id.as_deref());
            for user_id in parties {
                notify::notify(
                    state.notifier.as_ref(),
                    phone_of(state, user_id).await.as_deref(),
                    message.clone(),
                )
                .await;
            }
            cancelled += 1;
        }

        Ok(cancelled)
    }
}
