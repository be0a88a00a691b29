// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cancellation fee computation.
//!
//! Customer fees ramp up per minute after a grace period following acceptance,
//! are clamped to a maximum, and decay back to zero once the driver is overdue
//! on the quoted ETA. Fees are only ever taken out of money that was actually
//! captured, so the outcome never asks the customer for more than they paid.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::status::RequestStatus;

/// Basis points in 100%.
pub const BPS_SCALE: i64 = 10_000;

/// Tunables for cancellation fees, in basis points.
#[derive(Debug, Clone, PartialEq)]
pub struct CancellationPolicy {
    /// Free cancellation window after acceptance.
    pub grace_period: Duration,
    /// Fee right after the grace period.
    pub base_bps: u32,
    /// Added for every whole minute past the grace period.
    pub per_minute_bps: u32,
    /// Ceiling for the ramp.
    pub max_bps: u32,
    /// Flat fee once the driver is at the pickup point or towing.
    pub on_site_bps: u32,
    /// How long after the quoted ETA the fee takes to decay to zero.
    pub late_tolerance: Duration,
    /// Penalty recorded against a driver who abandons an accepted job.
    pub driver_penalty_bps: u32,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(120),
            base_bps: 1_000,
            per_minute_bps: 200,
            max_bps: 5_000,
            on_site_bps: 5_000,
            late_tolerance: Duration::from_secs(600),
            driver_penalty_bps: 1_000,
        }
    }
}

/// Who asked for the cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    /// The requesting customer.
    Customer,
    /// The assigned driver.
    Driver,
    /// A platform admin.
    Admin,
    /// The expiry sweeper (payment timeout).
    System,
}

impl CancelledBy {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Driver => "driver",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }
}

/// Facts about the request at the moment of cancellation.
#[derive(Debug, Clone)]
pub struct CancellationContext {
    /// Status before cancelling.
    pub status: RequestStatus,
    /// Who cancels.
    pub cancelled_by: CancelledBy,
    /// Agreed price, if a proposal was accepted.
    pub price_cents: Option<i64>,
    /// Amount captured by the gateway (0 if nothing was confirmed).
    pub paid_cents: i64,
    /// When the proposal was accepted.
    pub accepted_at: Option<DateTime<Utc>>,
    /// ETA quoted in the accepted proposal.
    pub eta_minutes: Option<i32>,
    /// Evaluation time.
    pub now: DateTime<Utc>,
}

/// Money movements resulting from a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CancellationOutcome {
    /// Retained from the customer's payment.
    pub customer_fee_cents: i64,
    /// Owed by the driver to the platform.
    pub driver_penalty_cents: i64,
    /// Returned to the customer.
    pub refund_cents: i64,
}

/// Apply `bps` to `amount_cents`, rounding half up. Saturates at `i64::MAX`.
pub fn apply_bps(amount_cents: i64, bps: u32) -> i64 {
    if amount_cents <= 0 {
        return 0;
    }
    let scale = i128::from(BPS_SCALE);
    let scaled = (i128::from(amount_cents) * i128::from(bps) + scale / 2) / scale;
    i64::try_from(scaled).unwrap_or(i64::MAX)
}

/// Fee rate the customer owes, before it is capped by the captured amount.
pub fn customer_fee_bps(policy: &CancellationPolicy, ctx: &CancellationContext) -> u32 {
    match ctx.status {
        RequestStatus::Accepted | RequestStatus::Paid | RequestStatus::EnRoute => {
            ramp_bps(policy, ctx)
        }
        RequestStatus::Arrived | RequestStatus::InService => policy.on_site_bps,
        _ => 0,
    }
}

fn ramp_bps(policy: &CancellationPolicy, ctx: &CancellationContext) -> u32 {
    let Some(accepted_at) = ctx.accepted_at else {
        return 0;
    };

    let elapsed = (ctx.now - accepted_at).num_seconds().max(0);
    let grace = policy.grace_period.as_secs() as i64;
    if elapsed <= grace {
        return 0;
    }

    let minutes_past = (elapsed - grace) / 60;
    let ceiling = i64::from(policy.max_bps.max(policy.base_bps));
    let bps = (i64::from(policy.base_bps) + i64::from(policy.per_minute_bps) * minutes_past)
        .min(ceiling);

    let decayed = match ctx.eta_minutes {
        Some(eta) => {
            let due = accepted_at + chrono::Duration::minutes(i64::from(eta.max(0)));
            let overdue = (ctx.now - due).num_seconds();
            let tolerance = policy.late_tolerance.as_secs() as i64;
            if overdue <= 0 {
                bps
            } else if overdue >= tolerance {
                0
            } else {
                bps * (tolerance - overdue) / tolerance
            }
        }
        None => bps,
    };

    decayed.clamp(0, ceiling) as u32
}

/// Work out fees and refund for a cancellation.
pub fn compute_cancellation(
    policy: &CancellationPolicy,
    ctx: &CancellationContext,
) -> CancellationOutcome {
    let price = ctx.price_cents.unwrap_or(0).max(0);
    let paid = ctx.paid_cents.max(0);

    let (customer_fee, driver_penalty) = match ctx.cancelled_by {
        CancelledBy::Customer => {
            let fee = apply_bps(price, customer_fee_bps(policy, ctx)).min(price);
            (fee.min(paid), 0)
        }
        CancelledBy::Driver
            if ctx.status.is_trip_active() || ctx.status == RequestStatus::Accepted =>
        {
            (0, apply_bps(price, policy.driver_penalty_bps).min(price))
        }
        CancelledBy::Driver | CancelledBy::Admin | CancelledBy::System => (0, 0),
    };

    CancellationOutcome {
        customer_fee_cents: customer_fee,
        driver_penalty_cents: driver_penalty,
        refund_cents: (paid - customer_fee).max(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn ctx(
        status: RequestStatus,
        by: CancelledBy,
        minutes_after_accept: i64,
    ) -> CancellationContext {
        CancellationContext {
            status,
            cancelled_by: by,
            price_cents: Some(20_000),
            paid_cents: 20_000,
            accepted_at: Some(t0()),
            eta_minutes: Some(40),
            now: t0() + chrono::Duration::minutes(minutes_after_accept),
        }
    }

    #[test]
    fn test_apply_bps_rounds_half_up() {
        assert_eq!(apply_bps(20_000, 1_000), 2_000);
        assert_eq!(apply_bps(5, 1_000), 1); // 0.5 rounds up
        assert_eq!(apply_bps(4, 1_000), 0);
        assert_eq!(apply_bps(0, 1_000), 0);
        assert_eq!(apply_bps(-100, 1_000), 0);
    }

    #[test]
    fn test_apply_bps_does_not_overflow() {
        assert_eq!(apply_bps(i64::MAX / 2, 5_000), i64::MAX / 4 + 1);
        assert_eq!(apply_bps(i64::MAX, u32::MAX), i64::MAX);
    }

    #[test]
    fn test_open_request_cancels_free() {
        let policy = CancellationPolicy::default();
        let mut c = ctx(RequestStatus::Proposed, CancelledBy::Customer, 30);
        c.price_cents = None;
        c.paid_cents = 0;
        c.accepted_at = None;
        let out = compute_cancellation(&policy, &c);
        assert_eq!(out, CancellationOutcome::default());
    }

    #[test]
    fn test_grace_period_is_free() {
        let policy = CancellationPolicy::default();
        let out = compute_cancellation(
            &policy,
            &ctx(RequestStatus::Paid, CancelledBy::Customer, 2),
        );
        assert_eq!(out.customer_fee_cents, 0);
        assert_eq!(out.refund_cents, 20_000);
    }

    #[test]
    fn test_fee_ramps_per_minute() {
        let policy = CancellationPolicy::default();
        // 2 min grace, then 10% + 2%/min: at 7 min -> 5 whole minutes past grace -> 20%
        let out = compute_cancellation(
            &policy,
            &ctx(RequestStatus::Paid, CancelledBy::Customer, 7),
        );
        assert_eq!(out.customer_fee_cents, 4_000);
        assert_eq!(out.refund_cents, 16_000);
    }

    #[test]
    fn test_fee_is_clamped_to_max() {
        let policy = CancellationPolicy::default();
        // 39 min: 10% + 2% * 37 = 84% -> clamped to 50%, still before the 40 min ETA
        let out =
            compute_cancellation(&policy, &ctx(RequestStatus::EnRoute, CancelledBy::Customer, 39));
        assert_eq!(out.customer_fee_cents, 10_000);
    }

    #[test]
    fn test_fee_decays_when_driver_is_late() {
        let policy = CancellationPolicy::default();
        // ETA 40 min, tolerance 10 min: at 45 min the 50% fee is halved
        let half =
            compute_cancellation(&policy, &ctx(RequestStatus::EnRoute, CancelledBy::Customer, 45));
        assert_eq!(half.customer_fee_cents, 5_000);

        let gone =
            compute_cancellation(&policy, &ctx(RequestStatus::EnRoute, CancelledBy::Customer, 50));
        assert_eq!(gone.customer_fee_cents, 0);
        assert_eq!(gone.refund_cents, 20_000);
    }

    #[test]
    fn test_on_site_fee_is_flat_and_ignores_lateness() {
        let policy = CancellationPolicy::default();
        let out =
            compute_cancellation(&policy, &ctx(RequestStatus::Arrived, CancelledBy::Customer, 90));
        assert_eq!(out.customer_fee_cents, 10_000);
        assert_eq!(out.refund_cents, 10_000);
    }

    #[test]
    fn test_unpaid_fee_is_not_collected() {
        let policy = CancellationPolicy::default();
        let mut c = ctx(RequestStatus::Accepted, CancelledBy::Customer, 10);
        c.paid_cents = 0;
        let out = compute_cancellation(&policy, &c);
        assert_eq!(out.customer_fee_cents, 0);
        assert_eq!(out.refund_cents, 0);
    }

    #[test]
    fn test_driver_cancellation_penalises_driver_and_refunds_all() {
        let policy = CancellationPolicy::default();
        let out =
            compute_cancellation(&policy, &ctx(RequestStatus::EnRoute, CancelledBy::Driver, 20));
        assert_eq!(out.customer_fee_cents, 0);
        assert_eq!(out.driver_penalty_cents, 2_000);
        assert_eq!(out.refund_cents, 20_000);
    }

    #[test]
    fn test_admin_and_system_cancel_without_fees() {
        let policy = CancellationPolicy::default();
        for by in [CancelledBy::Admin, CancelledBy::System] {
            let out = compute_cancellation(&policy, &ctx(RequestStatus::InService, by, 60));
            assert_eq!(out.customer_fee_cents, 0);
            assert_eq!(out.driver_penalty_cents, 0);
            assert_eq!(out.refund_cents, 20_000);
        }
    }

    #[test]
    fn test_misconfigured_max_below_base_uses_base() {
        let policy = CancellationPolicy {
            base_bps: 3_000,
            max_bps: 1_000,
            ..CancellationPolicy::default()
        };
        let out = compute_cancellation(
            &policy,
            &ctx(RequestStatus::Paid, CancelledBy::Customer, 20),
        );
        assert_eq!(out.customer_fee_cents, 6_000);
    }
}
