// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trip handlers: payment, trip progress, cancellation and tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::dispatch_handlers::{
    DispatchState, invalid_state, load_request, lost_race, phone_of, record_event,
};
use crate::error::{CoreError, Result};
use crate::notify;
use crate::payment::{ChargeRequest, PaymentEvent, PaymentMethod, PaymentSplit, PaymentWebhook};
use crate::penalty::{CancellationContext, CancellationOutcome, CancelledBy, compute_cancellation};
use crate::persistence::{
    CancellationRecord, NewPayment, PaymentRecord, RequestEventRecord, RequestRecord,
    TripLocationRecord,
};
use crate::status::{Actor, PaymentStatus, RequestStatus, TripStep};

/// Number of trip fixes returned by [`get_tracking`].
pub const TRACK_LIMIT: i64 = 200;

/// Customer's choice of payment method.
#[derive(Debug, Clone, Deserialize)]
pub struct StartPayment {
    /// Card or Pix.
    pub method: PaymentMethod,
}

/// Driver-reported trip progress.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceTrip {
    /// Next step.
    pub step: TripStep,
}

/// Why the caller is cancelling.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelInput {
    /// Free-form reason, shown to the other party.
    #[serde(default)]
    pub reason: Option<String>,
}

/// A cancelled request with the money movements it caused.
#[derive(Debug, Clone, Serialize)]
pub struct CancellationResult {
    /// The request after cancelling.
    pub request: RequestRecord,
    /// Fee, penalty and refund.
    pub outcome: CancellationOutcome,
    /// The refund was computed but the gateway refused it; it needs manual
    /// follow-up.
    pub refund_failed: bool,
}

/// Live position and recent track of a trip.
#[derive(Debug, Clone, Serialize)]
pub struct Tracking {
    /// Request.
    pub request_id: String,
    /// Current lifecycle status.
    pub status: String,
    /// Most recent driver fix.
    pub driver_location: Option<TripLocationRecord>,
    /// Recent fixes, newest first.
    pub track: Vec<TripLocationRecord>,
}

fn authorize_party(actor: &Actor, request: &RequestRecord) -> Result<()> {
    if actor.is_admin()
        || request.customer_id == actor.user_id
        || request.is_assigned_to(&actor.user_id)
    {
        return Ok(());
    }
    Err(CoreError::forbidden("not a party to this request"))
}

// ============================================================================
// Payment
// ============================================================================

/// Open a charge for an accepted request.
///
/// Only one live (pending or confirmed) payment may exist per request. Asking
/// again while a charge is pending returns that charge.
#[instrument(skip(state, input), fields(request_id = %request_id, customer_id = %actor.user_id))]
pub async fn start_payment(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
    input: StartPayment,
) -> Result<PaymentRecord> {
    let request = load_request(state, request_id).await?;
    if request.customer_id != actor.user_id {
        return Err(CoreError::forbidden("only the requesting customer can pay"));
    }
    let status = request.status()?;
    if status != RequestStatus::Accepted {
        return Err(invalid_state(&request, "accepted", status));
    }

    if let Some(live) = state.persistence.get_live_payment(request_id).await? {
        if live.status()? == PaymentStatus::Pending && live.provider_ref.is_some() {
            info!(payment_id = %live.payment_id, "Returning pending charge");
            return Ok(live);
        }
        return Err(CoreError::Conflict {
            message: format!("payment {} is already {}", live.payment_id, live.status),
        });
    }

    let price = request.price_cents.ok_or_else(|| CoreError::DatabaseError {
        operation: "start_payment".to_string(),
        details: format!("accepted request {} has no price", request_id),
    })?;
    let split = PaymentSplit::compute(price, state.policy.platform_fee_bps);

    let driver_wallet_id = match request.driver_id.as_deref() {
        Some(driver_id) => state
            .persistence
            .get_user(driver_id)
            .await?
            .and_then(|d| d.payout_wallet_id),
        None => None,
    };

    let now = state.now();
    let payment_id = Uuid::new_v4().to_string();
    state
        .persistence
        .insert_payment(&NewPayment {
            payment_id: payment_id.clone(),
            request_id: request_id.to_string(),
            method: input.method,
            amount_cents: split.amount_cents,
            platform_cents: split.platform_cents,
            driver_cents: split.driver_cents,
            created_at: now,
        })
        .await?;

    let charge = state
        .gateway
        .create_charge(&ChargeRequest {
            payment_id: payment_id.clone(),
            request_id: request_id.to_string(),
            method: input.method,
            split,
            driver_wallet_id,
            description: format!("Tow service {}", request_id),
        })
        .await;

    let charge = match charge {
        Ok(charge) => charge,
        Err(e) => {
            warn!(payment_id = %payment_id, error = %e, "Charge creation failed");
            state
                .persistence
                .set_payment_status(&payment_id, PaymentStatus::Pending, PaymentStatus::Failed, now)
                .await?;
            return Err(e);
        }
    };

    state.persistence.attach_charge(&payment_id, &charge).await?;

    info!(
        payment_id = %payment_id,
        provider_ref = %charge.provider_ref,
        method = input.method.as_str(),
        amount_cents = split.amount_cents,
        platform_cents = split.platform_cents,
        "Charge opened"
    );

    state
        .persistence
        .get_live_payment(request_id)
        .await?
        .ok_or_else(|| CoreError::not_found("payment", payment_id))
}

/// Apply a gateway notification.
///
/// Confirmation moves the request `accepted -> paid`. A charge captured after
/// its request was cancelled or expired, or after we voided it, is refunded in
/// full. If that refund fails the error is returned so the gateway redelivers
/// the notification, and the next delivery retries the refund. Repeated
/// notifications are otherwise idempotent.
#[instrument(
    skip(state, webhook),
    fields(provider_ref = %webhook.provider_ref, event = ?webhook.event)
)]
pub async fn handle_payment_webhook(
    state: &DispatchState,
    webhook: PaymentWebhook,
) -> Result<PaymentRecord> {
    let payment = state
        .persistence
        .get_payment_by_provider_ref(&webhook.provider_ref)
        .await?
        .ok_or_else(|| CoreError::not_found("payment", webhook.provider_ref.as_str()))?;
    let now = state.now();
    let current = payment.status()?;

    match webhook.event {
        PaymentEvent::Confirmed => {
            let voided = match current {
                PaymentStatus::Refunded => return Ok(payment),
                PaymentStatus::Confirmed => false,
                PaymentStatus::Pending | PaymentStatus::Failed => {
                    let captured = state
                        .persistence
                        .set_payment_status(
                            &payment.payment_id,
                            current,
                            PaymentStatus::Confirmed,
                            now,
                        )
                        .await?;
                    if !captured {
                        return Err(CoreError::Conflict {
                            message: format!(
                                "payment {} changed while being confirmed",
                                payment.payment_id
                            ),
                        });
                    }
                    current == PaymentStatus::Failed
                }
            };

            let request = load_request(state, &payment.request_id).await?;
            let settled = !voided
                && (request.paid_at.is_some()
                    || mark_paid(state, &payment, &request, now).await?);
            if !settled {
                refund_late_capture(state, &webhook.provider_ref, &payment).await?;
            }
        }
        PaymentEvent::Failed => {
            if current == PaymentStatus::Failed {
                return Ok(payment);
            }
            let failed = state
                .persistence
                .set_payment_status(
                    &payment.payment_id,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                    now,
                )
                .await?;
            if !failed {
                return Err(CoreError::Conflict {
                    message: format!("payment {} is {}", payment.payment_id, payment.status),
                });
            }
            info!(payment_id = %payment.payment_id, "Payment failed");
        }
    }

    state
        .persistence
        .get_payment_by_provider_ref(&webhook.provider_ref)
        .await?
        .ok_or_else(|| CoreError::not_found("payment", webhook.provider_ref.as_str()))
}

/// Move the request `accepted -> paid` for a confirmed payment. Returns false
/// when the request is no longer waiting for payment.
async fn mark_paid(
    state: &DispatchState,
    payment: &PaymentRecord,
    request: &RequestRecord,
    now: DateTime<Utc>,
) -> Result<bool> {
    let paid = state
        .persistence
        .transition_request(
            &payment.request_id,
            RequestStatus::Accepted,
            RequestStatus::Paid,
            now,
        )
        .await?;
    if !paid {
        return Ok(false);
    }

    record_event(
        state,
        &payment.request_id,
        Some(RequestStatus::Accepted),
        RequestStatus::Paid,
        None,
        Some(format!("payment {}", payment.payment_id)),
        now,
    )
    .await?;
    info!(
        payment_id = %payment.payment_id,
        request_id = %payment.request_id,
        "Payment confirmed"
    );

    if let Some(driver_id) = request.driver_id.as_deref() {
        notify::notify(
            state.notifier.as_ref(),
            phone_of(state, driver_id).await.as_deref(),
            notify::payment_confirmed_message(&payment.request_id, payment.driver_cents),
        )
        .await;
    }
    Ok(true)
}

/// Return a captured amount that no request will use.
async fn refund_late_capture(
    state: &DispatchState,
    provider_ref: &str,
    payment: &PaymentRecord,
) -> Result<()> {
    warn!(
        payment_id = %payment.payment_id,
        request_id = %payment.request_id,
        amount_cents = payment.amount_cents,
        "Payment captured for a request that is no longer awaiting payment, refunding"
    );
    if let Err(e) = state.gateway.refund(provider_ref, payment.amount_cents).await {
        error!(
            payment_id = %payment.payment_id,
            error = %e,
            "Refund failed, waiting for the gateway to redeliver"
        );
        return Err(e);
    }
    state
        .persistence
        .record_refund(&payment.payment_id, payment.amount_cents)
        .await?;
    Ok(())
}

// ============================================================================
// Trip progress
// ============================================================================

/// Move a paid trip one step forward. Steps cannot be skipped.
#[instrument(
    skip(state, input),
    fields(request_id = %request_id, driver_id = %actor.user_id, step = ?input.step)
)]
pub async fn advance_trip(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
    input: AdvanceTrip,
) -> Result<RequestRecord> {
    let request = load_request(state, request_id).await?;
    if !request.is_assigned_to(&actor.user_id) {
        return Err(CoreError::forbidden("only the assigned driver can update the trip"));
    }

    let from = input.step.required_from();
    let to = input.step.target();
    let status = request.status()?;
    if status != from {
        return Err(invalid_state(&request, from.as_str(), status));
    }

    let now = state.now();
    let moved = state
        .persistence
        .transition_request(request_id, from, to, now)
        .await?;
    if !moved {
        return Err(lost_race(state, request_id, from).await);
    }
    record_event(
        state,
        request_id,
        Some(from),
        to,
        Some(&actor.user_id),
        None,
        now,
    )
    .await?;

    info!(from = %from, to = %to, "Trip advanced");

    notify::notify(
        state.notifier.as_ref(),
        phone_of(state, &request.customer_id).await.as_deref(),
        notify::trip_status_message(to),
    )
    .await;

    load_request(state, request_id).await
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cancel a request on behalf of its customer, its driver or an admin.
///
/// The fee is computed from the lifecycle position and elapsed time; any
/// captured amount minus the fee is refunded through the gateway.
#[instrument(skip(state, input), fields(request_id = %request_id, user_id = %actor.user_id))]
pub async fn cancel_request(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
    input: CancelInput,
) -> Result<CancellationResult> {
    let request = load_request(state, request_id).await?;
    let cancelled_by = if request.customer_id == actor.user_id {
        CancelledBy::Customer
    } else if request.is_assigned_to(&actor.user_id) {
        CancelledBy::Driver
    } else if actor.is_admin() {
        CancelledBy::Admin
    } else {
        return Err(CoreError::forbidden("not a party to this request"));
    };

    let reason = input
        .reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let result = cancel_as(state, request, cancelled_by, Some(&actor.user_id), reason).await?;

    // Tell whoever did not cancel.
    let request = &result.request;
    let mut recipients = Vec::new();
    if cancelled_by != CancelledBy::Customer {
        recipients.push(request.customer_id.clone());
    }
    if cancelled_by != CancelledBy::Driver
        && let Some(driver_id) = request.driver_id.clone()
    {
        recipients.push(driver_id);
    }
    for user_id in recipients {
        notify::notify(
            state.notifier.as_ref(),
            phone_of(state, &user_id).await.as_deref(),
            notify::cancelled_message(request_id, request.cancel_reason.as_deref()),
        )
        .await;
    }

    Ok(result)
}

/// Cancel `request`, settle money and log the event. Shared with the expiry
/// sweeper, which cancels unpaid requests as [`CancelledBy::System`].
pub(crate) async fn cancel_as(
    state: &DispatchState,
    request: RequestRecord,
    cancelled_by: CancelledBy,
    actor_id: Option<&str>,
    reason: Option<String>,
) -> Result<CancellationResult> {
    let request_id = request.request_id.clone();
    let from = request.status()?;
    if from.is_terminal() {
        return Err(invalid_state(&request, "not terminal", from));
    }

    let now = state.now();
    let live = state.persistence.get_live_payment(&request_id).await?;
    let confirmed = match live.as_ref() {
        Some(p) => (p.status()? == PaymentStatus::Confirmed).then_some(p),
        None => None,
    };

    let outcome = compute_cancellation(
        &state.policy.cancellation,
        &CancellationContext {
            status: from,
            cancelled_by,
            price_cents: request.price_cents,
            paid_cents: confirmed.map_or(0, |p| p.amount_cents),
            accepted_at: request.accepted_at,
            eta_minutes: request.eta_minutes,
            now,
        },
    );

    let cancelled = state
        .persistence
        .cancel_request(
            &request_id,
            from,
            &CancellationRecord {
                cancelled_by: cancelled_by.as_str().to_string(),
                reason: reason.clone(),
                customer_fee_cents: outcome.customer_fee_cents,
                driver_penalty_cents: outcome.driver_penalty_cents,
            },
            now,
        )
        .await?;
    if !cancelled {
        return Err(lost_race(state, &request_id, from).await);
    }

    state
        .persistence
        .reject_pending_proposals(&request_id, None, now)
        .await?;

    let mut refund_failed = false;
    match (live.as_ref(), confirmed) {
        (_, Some(payment)) if outcome.refund_cents > 0 => {
            let provider_ref = payment.provider_ref.as_deref().unwrap_or_default();
            match state.gateway.refund(provider_ref, outcome.refund_cents).await {
                Ok(()) => {
                    state
                        .persistence
                        .record_refund(&payment.payment_id, outcome.refund_cents)
                        .await?;
                }
                Err(e) => {
                    error!(
                        payment_id = %payment.payment_id,
                        refund_cents = outcome.refund_cents,
                        error = %e,
                        "Refund failed, needs manual follow-up"
                    );
                    refund_failed = true;
                }
            }
        }
        (Some(pending), None) => {
            state
                .persistence
                .set_payment_status(
                    &pending.payment_id,
                    PaymentStatus::Pending,
                    PaymentStatus::Failed,
                    now,
                )
                .await?;
            // A capture that slips through is refunded by the webhook.
            if let Some(provider_ref) = pending.provider_ref.as_deref()
                && let Err(e) = state.gateway.cancel_charge(provider_ref).await
            {
                warn!(
                    payment_id = %pending.payment_id,
                    error = %e,
                    "Could not withdraw the pending charge"
                );
            }
        }
        _ => {}
    }

    record_event(
        state,
        &request_id,
        Some(from),
        RequestStatus::Cancelled,
        actor_id,
        Some(match reason {
            Some(reason) => format!("{}: {}", cancelled_by.as_str(), reason),
            None => cancelled_by.as_str().to_string(),
        }),
        now,
    )
    .await?;

    info!(
        request_id = %request_id,
        from = %from,
        cancelled_by = cancelled_by.as_str(),
        customer_fee_cents = outcome.customer_fee_cents,
        driver_penalty_cents = outcome.driver_penalty_cents,
        refund_cents = outcome.refund_cents,
        "Request cancelled"
    );

    Ok(CancellationResult {
        request: load_request(state, &request_id).await?,
        outcome,
        refund_failed,
    })
}

// ============================================================================
// Tracking and audit
// ============================================================================

/// Latest driver position and recent track for a request.
#[instrument(skip(state), fields(user_id = %actor.user_id))]
pub async fn get_tracking(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
) -> Result<Tracking> {
    let request = load_request(state, request_id).await?;
    authorize_party(actor, &request)?;

    let track = state
        .persistence
        .list_trip_locations(request_id, TRACK_LIMIT)
        .await?;

    Ok(Tracking {
        request_id: request.request_id,
        status: request.status,
        driver_location: track.first().cloned(),
        track,
    })
}

/// Status history of a request, oldest first.
#[instrument(skip(state), fields(user_id = %actor.user_id))]
pub async fn list_events(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
) -> Result<Vec<RequestEventRecord>> {
    let request = load_request(state, request_id).await?;
    authorize_party(actor, &request)?;
    state.persistence.list_events(request_id).await
}
