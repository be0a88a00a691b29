// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dispatch handlers: profiles, drivers, requests and proposals.
//!
//! Every handler takes the shared [`DispatchState`], the authenticated
//! [`Actor`] and a typed input, and returns a [`CoreError`] that the HTTP
//! layer maps to a status code. Status changes go through compare-and-set
//! persistence calls and append a row to the request event log.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::geo::{BoundingBox, GeoPoint, haversine_km, rank_within};
use crate::notify::{self, Notifier};
use crate::payment::PaymentGateway;
use crate::penalty::CancellationPolicy;
use crate::persistence::{
    NewProposal, NewRequest, NewRequestEvent, Persistence, ProposalRecord, RequestRecord,
    UserRecord,
};
use crate::status::{Actor, ProposalStatus, RequestStatus, Role};

/// Longest ETA a driver may quote, in minutes.
pub const MAX_ETA_MINUTES: i32 = 240;

/// Highest price a driver may quote (R$ 100.000,00).
pub const MAX_PRICE_CENTS: i64 = 10_000_000;

/// Business tunables for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPolicy {
    /// How long a request stays open for proposals.
    pub request_ttl: Duration,
    /// How long an accepted request may stay unpaid.
    pub payment_window: Duration,
    /// Drivers within this distance of the pickup are alerted and may propose.
    pub alert_radius_km: f64,
    /// Platform commission on every payment.
    pub platform_fee_bps: u32,
    /// Cancellation fee rules.
    pub cancellation: CancellationPolicy,
    /// Page size for list endpoints.
    pub list_limit: i64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            request_ttl: Duration::from_secs(900),
            payment_window: Duration::from_secs(900),
            alert_radius_km: 30.0,
            platform_fee_bps: 1_500,
            cancellation: CancellationPolicy::default(),
            list_limit: 100,
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Shared state for dispatch handlers.
///
/// Holds the persistence backend and the external collaborators.
pub struct DispatchState {
    /// Persistence implementation.
    pub persistence: Arc<dyn Persistence>,
    /// Payment processor.
    pub gateway: Arc<dyn PaymentGateway>,
    /// Messaging provider.
    pub notifier: Arc<dyn Notifier>,
    /// Business tunables.
    pub policy: DispatchPolicy,
    clock: Clock,
}

impl DispatchState {
    /// Create a new dispatch state using the system clock.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            persistence,
            gateway,
            notifier,
            policy,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock, e.g. to control time in tests.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current time according to the state's clock.
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(d.as_secs()).unwrap_or(i64::MAX / 1_000))
}

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Profile fields the user controls.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileInput {
    /// Display name.
    pub name: String,
    /// WhatsApp number in E.164 format.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Admin approval of a driver.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApproveDriverInput {
    /// Driver's payout account at the payment gateway.
    #[serde(default)]
    pub payout_wallet_id: Option<String>,
}

/// Result of a location report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationUpdate {
    /// Trip the fix was appended to, if the driver is on one.
    pub tracked_request_id: Option<String>,
}

/// A customer's tow request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTowRequest {
    /// Where the vehicle is.
    pub pickup: GeoPoint,
    /// Pickup address as typed by the customer.
    pub pickup_address: String,
    /// Where it should go.
    pub dropoff: GeoPoint,
    /// Drop-off address.
    pub dropoff_address: String,
    /// Make, model and plate.
    pub vehicle: String,
    /// Notes for the driver.
    #[serde(default)]
    pub notes: Option<String>,
}

/// A newly created request and how many drivers were alerted.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedRequest {
    /// Stored request.
    pub request: RequestRecord,
    /// Drivers within the alert radius.
    pub drivers_alerted: usize,
}

/// A request in a listing, with its distance from the caller when relevant.
#[derive(Debug, Clone, Serialize)]
pub struct RequestListing {
    /// The request.
    #[serde(flatten)]
    pub request: RequestRecord,
    /// Distance from the driver to the pickup point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_to_pickup_km: Option<f64>,
}

/// A driver's offer.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitProposal {
    /// Price in cents.
    pub price_cents: i64,
    /// Minutes until the driver reaches the pickup point.
    pub eta_minutes: i32,
    /// Optional note to the customer.
    #[serde(default)]
    pub message: Option<String>,
}

// ============================================================================
// Shared helpers
// ============================================================================

pub(crate) fn invalid_state(
    request: &RequestRecord,
    expected: &str,
    actual: RequestStatus,
) -> CoreError {
    CoreError::InvalidRequestState {
        request_id: request.request_id.clone(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

pub(crate) async fn load_request(state: &DispatchState, request_id: &str) -> Result<RequestRecord> {
    state
        .persistence
        .get_request(request_id)
        .await?
        .ok_or_else(|| CoreError::not_found("request", request_id))
}

/// Re-read a request after a lost compare-and-set and report its real status.
pub(crate) async fn lost_race(
    state: &DispatchState,
    request_id: &str,
    expected: RequestStatus,
) -> CoreError {
    match state.persistence.get_request(request_id).await {
        Ok(Some(current)) => CoreError::InvalidRequestState {
            request_id: request_id.to_string(),
            expected: expected.to_string(),
            actual: current.status,
        },
        Ok(None) => CoreError::not_found("request", request_id),
        Err(e) => e,
    }
}

/// Open requests past their deadline are treated as expired even before the
/// sweeper gets to them.
pub(crate) fn ensure_unexpired(request: &RequestRecord, now: DateTime<Utc>) -> Result<()> {
    if request.status()?.is_open() && now >= request.expires_at {
        return Err(CoreError::RequestExpired {
            request_id: request.request_id.clone(),
        });
    }
    Ok(())
}

pub(crate) async fn record_event(
    state: &DispatchState,
    request_id: &str,
    from: Option<RequestStatus>,
    to: RequestStatus,
    actor_id: Option<&str>,
    note: Option<String>,
    at: DateTime<Utc>,
) -> Result<()> {
    state
        .persistence
        .insert_event(&NewRequestEvent {
            request_id: request_id.to_string(),
            from_status: from,
            to_status: to,
            actor_id: actor_id.map(str::to_string),
            note,
            created_at: at,
        })
        .await
}

pub(crate) async fn phone_of(state: &DispatchState, user_id: &str) -> Option<String> {
    match state.persistence.get_user(user_id).await {
        Ok(user) => user.and_then(|u| u.phone),
        Err(e) => {
            debug!(user_id, error = %e, "Could not load recipient");
            None
        }
    }
}

fn require_role(actor: &Actor, role: Role) -> Result<()> {
    if actor.role != role {
        return Err(CoreError::forbidden(format!(
            "only a {} can do this",
            role.as_str()
        )));
    }
    Ok(())
}

async fn load_profile(state: &DispatchState, actor: &Actor) -> Result<UserRecord> {
    state
        .persistence
        .get_user(&actor.user_id)
        .await?
        .ok_or_else(|| CoreError::forbidden("complete your profile first"))
}

async fn load_approved_driver(state: &DispatchState, actor: &Actor) -> Result<UserRecord> {
    require_role(actor, Role::Driver)?;
    let driver = load_profile(state, actor).await?;
    if !driver.approved {
        return Err(CoreError::forbidden("driver is not approved yet"));
    }
    Ok(driver)
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn validate_phone(phone: &str) -> Result<()> {
    let digits = phone.strip_prefix('+').unwrap_or("");
    if !(8..=15).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::validation(
            "phone",
            "must be in E.164 format, e.g. +5511999990000",
        ));
    }
    Ok(())
}

/// Who may read a request: owner, assigned driver, admin, or any approved
/// driver while it is still open.
async fn authorize_read(
    state: &DispatchState,
    actor: &Actor,
    request: &RequestRecord,
) -> Result<()> {
    if actor.is_admin()
        || request.customer_id == actor.user_id
        || request.is_assigned_to(&actor.user_id)
    {
        return Ok(());
    }
    if actor.role == Role::Driver && request.status()?.is_open() {
        load_approved_driver(state, actor).await?;
        return Ok(());
    }
    Err(CoreError::forbidden("not a party to this request"))
}

// ============================================================================
// Profiles and drivers
// ============================================================================

/// Create or update the caller's profile. The role comes from the token and
/// cannot change once the profile exists.
#[instrument(skip(state, input), fields(user_id = %actor.user_id, role = %actor.role.as_str()))]
pub async fn upsert_profile(
    state: &DispatchState,
    actor: &Actor,
    input: ProfileInput,
) -> Result<UserRecord> {
    let name = required_text("name", &input.name)?;
    let phone = input
        .phone
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());
    if let Some(ref phone) = phone {
        validate_phone(phone)?;
    }

    if let Some(existing) = state.persistence.get_user(&actor.user_id).await?
        && existing.role()? != actor.role
    {
        return Err(CoreError::forbidden(format!(
            "user is registered as {}",
            existing.role
        )));
    }

    let user = state
        .persistence
        .upsert_user(
            &actor.user_id,
            actor.role,
            &name,
            phone.as_deref(),
            state.now(),
        )
        .await?;

    info!("Profile saved");
    Ok(user)
}

/// Approve a driver so they can receive alerts and propose.
#[instrument(skip(state, actor, input), fields(driver_id = %driver_id))]
pub async fn approve_driver(
    state: &DispatchState,
    actor: &Actor,
    driver_id: &str,
    input: ApproveDriverInput,
) -> Result<UserRecord> {
    require_role(actor, Role::Admin)?;

    let approved = state
        .persistence
        .approve_driver(driver_id, input.payout_wallet_id.as_deref())
        .await?;
    if !approved {
        return Err(CoreError::not_found("driver", driver_id));
    }

    info!(admin_id = %actor.user_id, "Driver approved");
    state
        .persistence
        .get_user(driver_id)
        .await?
        .ok_or_else(|| CoreError::not_found("driver", driver_id))
}

/// Toggle whether an approved driver receives new-request alerts.
#[instrument(skip(state), fields(driver_id = %actor.user_id))]
pub async fn set_availability(
    state: &DispatchState,
    actor: &Actor,
    available: bool,
) -> Result<UserRecord> {
    load_approved_driver(state, actor).await?;

    state
        .persistence
        .set_driver_available(&actor.user_id, available)
        .await?;

    info!(available, "Driver availability changed");
    load_profile(state, actor).await
}

/// Store the driver's position, appending it to the track of their active trip.
#[instrument(skip(state, point), fields(driver_id = %actor.user_id))]
pub async fn update_driver_location(
    state: &DispatchState,
    actor: &Actor,
    point: GeoPoint,
) -> Result<LocationUpdate> {
    require_role(actor, Role::Driver)?;
    point.validate("location")?;
    load_profile(state, actor).await?;

    let now = state.now();
    state
        .persistence
        .set_driver_location(&actor.user_id, point, now)
        .await?;

    let assigned = state
        .persistence
        .list_requests_for_driver(&actor.user_id, state.policy.list_limit)
        .await?;
    let mut tracked_request_id = None;
    for request in assigned {
        if request.status()?.is_trip_active() {
            state
                .persistence
                .append_trip_location(&request.request_id, &actor.user_id, point, now)
                .await?;
            debug!(request_id = %request.request_id, "Trip location appended");
            tracked_request_id = Some(request.request_id);
            break;
        }
    }

    Ok(LocationUpdate { tracked_request_id })
}

// ============================================================================
// Requests
// ============================================================================

/// Open a tow request and alert nearby drivers.
#[instrument(skip(state, input), fields(customer_id = %actor.user_id))]
pub async fn create_request(
    state: &DispatchState,
    actor: &Actor,
    input: CreateTowRequest,
) -> Result<CreatedRequest> {
    require_role(actor, Role::Customer)?;
    load_profile(state, actor).await?;

    input.pickup.validate("pickup")?;
    input.dropoff.validate("dropoff")?;
    let pickup_address = required_text("pickup_address", &input.pickup_address)?;
    let dropoff_address = required_text("dropoff_address", &input.dropoff_address)?;
    let vehicle = required_text("vehicle", &input.vehicle)?;
    let notes = input
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let now = state.now();
    let request_id = Uuid::new_v4().to_string();
    let new_request = NewRequest {
        request_id: request_id.clone(),
        customer_id: actor.user_id.clone(),
        pickup: input.pickup,
        pickup_address,
        dropoff: input.dropoff,
        dropoff_address,
        vehicle,
        notes,
        distance_km: haversine_km(input.pickup, input.dropoff),
        created_at: now,
        expires_at: now + to_chrono(state.policy.request_ttl),
    };

    state.persistence.insert_request(&new_request).await?;
    record_event(
        state,
        &request_id,
        None,
        RequestStatus::Pending,
        Some(&actor.user_id),
        None,
        now,
    )
    .await?;

    info!(
        request_id = %request_id,
        distance_km = new_request.distance_km,
        "Tow request created"
    );

    let radius = state.policy.alert_radius_km;
    let candidates = state
        .persistence
        .list_drivers_in_box(&BoundingBox::around(input.pickup, radius))
        .await?;
    let nearby = rank_within(
        input.pickup,
        radius,
        candidates
            .into_iter()
            .filter_map(|driver| driver.location().map(|p| (driver, p))),
    );

    for (driver, distance_km) in &nearby {
        notify::notify(
            state.notifier.as_ref(),
            driver.phone.as_deref(),
            notify::new_request_message(&request_id, *distance_km, &new_request.vehicle),
        )
        .await;
    }
    debug!(drivers_alerted = nearby.len(), "Nearby drivers alerted");

    let request = load_request(state, &request_id).await?;
    Ok(CreatedRequest {
        request,
        drivers_alerted: nearby.len(),
    })
}

/// Fetch a request the caller is allowed to see.
#[instrument(skip(state), fields(user_id = %actor.user_id))]
pub async fn get_request(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
) -> Result<RequestRecord> {
    let request = load_request(state, request_id).await?;
    authorize_read(state, actor, &request).await?;
    Ok(request)
}

/// List requests according to the caller's role.
///
/// - customers see their own requests, newest first;
/// - drivers see open requests within the alert radius of their last
///   location, nearest first, or their assigned jobs when filtering by a
///   non-open status;
/// - admins see everything, optionally filtered by status.
#[instrument(skip(state), fields(user_id = %actor.user_id))]
pub async fn list_requests(
    state: &DispatchState,
    actor: &Actor,
    status: Option<RequestStatus>,
) -> Result<Vec<RequestListing>> {
    let limit = state.policy.list_limit;
    let unranked = |requests: Vec<RequestRecord>| -> Vec<RequestListing> {
        requests
            .into_iter()
            .filter(|r| status.is_none_or(|s| r.status == s.as_str()))
            .map(|request| RequestListing {
                request,
                distance_to_pickup_km: None,
            })
            .collect()
    };

    match actor.role {
        Role::Admin => {
            let requests = state.persistence.list_requests(status, limit).await?;
            Ok(unranked(requests))
        }
        Role::Customer => {
            let requests = state
                .persistence
                .list_requests_for_customer(&actor.user_id, limit)
                .await?;
            Ok(unranked(requests))
        }
        Role::Driver => {
            let driver = load_approved_driver(state, actor).await?;

            if let Some(s) = status
                && !s.is_open()
            {
                let requests = state
                    .persistence
                    .list_requests_for_driver(&actor.user_id, limit)
                    .await?;
                return Ok(unranked(requests));
            }

            let Some(location) = driver.location() else {
                debug!("Driver has no location yet");
                return Ok(Vec::new());
            };

            let radius = state.policy.alert_radius_km;
            let open = state
                .persistence
                .list_open_requests_in_box(&BoundingBox::around(location, radius), state.now())
                .await?;
            let ranked = rank_within(
                location,
                radius,
                open.into_iter().map(|r| {
                    let pickup = r.pickup();
                    (r, pickup)
                }),
            );

            Ok(ranked
                .into_iter()
                .filter(|(r, _)| status.is_none_or(|s| r.status == s.as_str()))
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .map(|(request, distance)| RequestListing {
                    request,
                    distance_to_pickup_km: Some(distance),
                })
                .collect())
        }
    }
}

// ============================================================================
// Proposals
// ============================================================================

/// Submit or revise a driver's offer for an open request.
#[instrument(skip(state, input), fields(request_id = %request_id, driver_id = %actor.user_id))]
pub async fn submit_proposal(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
    input: SubmitProposal,
) -> Result<ProposalRecord> {
    let driver = load_approved_driver(state, actor).await?;
    let request = load_request(state, request_id).await?;
    let now = state.now();

    let status = request.status()?;
    if !status.is_open() {
        return Err(invalid_state(&request, "pending or proposed", status));
    }
    ensure_unexpired(&request, now)?;

    let location = driver
        .location()
        .ok_or_else(|| CoreError::validation("location", "report your location first"))?;
    let distance = haversine_km(location, request.pickup());
    if distance > state.policy.alert_radius_km {
        return Err(CoreError::forbidden(format!(
            "pickup is {:.1} km away, outside the {} km service radius",
            distance, state.policy.alert_radius_km
        )));
    }

    if !(1..=MAX_PRICE_CENTS).contains(&input.price_cents) {
        return Err(CoreError::validation(
            "price_cents",
            format!("must be between 1 and {}", MAX_PRICE_CENTS),
        ));
    }
    if !(1..=MAX_ETA_MINUTES).contains(&input.eta_minutes) {
        return Err(CoreError::validation(
            "eta_minutes",
            format!("must be between 1 and {}", MAX_ETA_MINUTES),
        ));
    }

    let proposal = state
        .persistence
        .upsert_proposal(&NewProposal {
            proposal_id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            driver_id: actor.user_id.clone(),
            price_cents: input.price_cents,
            eta_minutes: input.eta_minutes,
            message: input
                .message
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            at: now,
        })
        .await?;

    if proposal.status()? != ProposalStatus::Pending {
        return Err(CoreError::Conflict {
            message: format!("proposal is already {}", proposal.status),
        });
    }

    if status == RequestStatus::Pending {
        let moved = state
            .persistence
            .transition_request(request_id, RequestStatus::Pending, RequestStatus::Proposed, now)
            .await?;
        if moved {
            record_event(
                state,
                request_id,
                Some(RequestStatus::Pending),
                RequestStatus::Proposed,
                Some(&actor.user_id),
                None,
                now,
            )
            .await?;
        } else {
            // Another driver may have moved it first; anything else is a lost race.
            let current = load_request(state, request_id).await?;
            let current_status = current.status()?;
            if current_status != RequestStatus::Proposed {
                return Err(invalid_state(&current, "pending or proposed", current_status));
            }
        }
    }

    info!(
        proposal_id = %proposal.proposal_id,
        price_cents = proposal.price_cents,
        eta_minutes = proposal.eta_minutes,
        "Proposal submitted"
    );

    notify::notify(
        state.notifier.as_ref(),
        phone_of(state, &request.customer_id).await.as_deref(),
        notify::new_proposal_message(proposal.price_cents, proposal.eta_minutes),
    )
    .await;

    Ok(proposal)
}

/// Proposals for a request. Drivers only see their own.
#[instrument(skip(state), fields(user_id = %actor.user_id))]
pub async fn list_proposals(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
) -> Result<Vec<ProposalRecord>> {
    let request = load_request(state, request_id).await?;
    let proposals = state.persistence.list_proposals(request_id).await?;

    if actor.is_admin() || request.customer_id == actor.user_id {
        return Ok(proposals);
    }
    if actor.role == Role::Driver {
        return Ok(proposals
            .into_iter()
            .filter(|p| p.driver_id == actor.user_id)
            .collect());
    }
    Err(CoreError::forbidden("not a party to this request"))
}

/// Withdraw a pending proposal. The request falls back to `pending` when no
/// other proposal is left.
#[instrument(skip(state), fields(driver_id = %actor.user_id))]
pub async fn withdraw_proposal(
    state: &DispatchState,
    actor: &Actor,
    proposal_id: &str,
) -> Result<ProposalRecord> {
    require_role(actor, Role::Driver)?;
    let proposal = state
        .persistence
        .get_proposal(proposal_id)
        .await?
        .ok_or_else(|| CoreError::not_found("proposal", proposal_id))?;
    if proposal.driver_id != actor.user_id {
        return Err(CoreError::forbidden("not your proposal"));
    }

    let now = state.now();
    let withdrawn = state
        .persistence
        .set_proposal_status(
            proposal_id,
            ProposalStatus::Pending,
            ProposalStatus::Withdrawn,
            now,
        )
        .await?;
    if !withdrawn {
        return Err(CoreError::Conflict {
            message: format!("proposal is {}", proposal.status),
        });
    }
    info!(proposal_id, request_id = %proposal.request_id, "Proposal withdrawn");

    let request_id = proposal.request_id.as_str();
    if state.persistence.count_pending_proposals(request_id).await? == 0 {
        let reopened = state
            .persistence
            .transition_request(request_id, RequestStatus::Proposed, RequestStatus::Pending, now)
            .await?;
        if reopened {
            record_event(
                state,
                request_id,
                Some(RequestStatus::Proposed),
                RequestStatus::Pending,
                Some(&actor.user_id),
                Some("last proposal withdrawn".to_string()),
                now,
            )
            .await?;
        }
    }

    state
        .persistence
        .get_proposal(proposal_id)
        .await?
        .ok_or_else(|| CoreError::not_found("proposal", proposal_id))
}

/// Accept a proposal: assign its driver, price and ETA to the request and
/// reject the competing offers.
#[instrument(skip(state), fields(request_id = %request_id, customer_id = %actor.user_id))]
pub async fn accept_proposal(
    state: &DispatchState,
    actor: &Actor,
    request_id: &str,
    proposal_id: &str,
) -> Result<RequestRecord> {
    let request = load_request(state, request_id).await?;
    if request.customer_id != actor.user_id {
        return Err(CoreError::forbidden("only the requesting customer can accept"));
    }

    let now = state.now();
    let status = request.status()?;
    if status != RequestStatus::Proposed {
        return Err(invalid_state(&request, "proposed", status));
    }
    ensure_unexpired(&request, now)?;

    let proposal = state
        .persistence
        .get_proposal(proposal_id)
        .await?
        .filter(|p| p.request_id == request_id)
        .ok_or_else(|| CoreError::not_found("proposal", proposal_id))?;

    let claimed = state
        .persistence
        .set_proposal_status(
            proposal_id,
            ProposalStatus::Pending,
            ProposalStatus::Accepted,
            now,
        )
        .await?;
    if !claimed {
        return Err(CoreError::Conflict {
            message: format!("proposal is {}", proposal.status),
        });
    }

    let assigned = state
        .persistence
        .assign_proposal(request_id, &proposal, now)
        .await?;
    if !assigned {
        state
            .persistence
            .set_proposal_status(
                proposal_id,
                ProposalStatus::Accepted,
                ProposalStatus::Pending,
                now,
            )
            .await?;
        return Err(lost_race(state, request_id, RequestStatus::Proposed).await);
    }

    let rejected = state
        .persistence
        .reject_pending_proposals(request_id, Some(proposal_id), now)
        .await?;
    record_event(
        state,
        request_id,
        Some(RequestStatus::Proposed),
        RequestStatus::Accepted,
        Some(&actor.user_id),
        Some(format!("proposal {}", proposal_id)),
        now,
    )
    .await?;

    info!(
        proposal_id,
        driver_id = %proposal.driver_id,
        price_cents = proposal.price_cents,
        rejected,
        "Proposal accepted"
    );

    notify::notify(
        state.notifier.as_ref(),
        phone_of(state, &proposal.driver_id).await.as_deref(),
        notify::proposal_accepted_message(request_id, proposal.price_cents),
    )
    .await;

    load_request(state, request_id).await
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory fixtures shared by handler and sweeper tests.

    use super::*;
    use crate::payment::{Charge, ChargeRequest};
    use crate::persistence::SqlitePersistence;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex;

    /// Gateway that records calls and can be told to fail.
    #[derive(Default)]
    pub struct FakeGateway {
        pub charges: Mutex<Vec<ChargeRequest>>,
        pub refunds: Mutex<Vec<(String, i64)>>,
        pub cancelled: Mutex<Vec<String>>,
        pub fail: Mutex<bool>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge> {
            if *self.fail.lock().unwrap() {
                return Err(CoreError::UpstreamError {
                    service: "payments",
                    details: "gateway down".to_string(),
                });
            }
            self.charges.lock().unwrap().push(request.clone());
            Ok(Charge {
                provider_ref: format!("gw_{}", request.payment_id),
                pix_payload: Some("00020126pix".to_string()),
                checkout_url: None,
            })
        }

        async fn refund(&self, provider_ref: &str, amount_cents: i64) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(CoreError::UpstreamError {
                    service: "payments",
                    details: "gateway down".to_string(),
                });
            }
            self.refunds
                .lock()
                .unwrap()
                .push((provider_ref.to_string(), amount_cents));
            Ok(())
        }

        async fn cancel_charge(&self, provider_ref: &str) -> Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(CoreError::UpstreamError {
                    service: "payments",
                    details: "gateway down".to_string(),
                });
            }
            self.cancelled.lock().unwrap().push(provider_ref.to_string());
            Ok(())
        }
    }

    /// Notifier that records every message.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub fn to(&self, phone: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == phone)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, phone: &str, message: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((phone.to_string(), message.to_string()));
            Ok(())
        }
    }

    pub const CUSTOMER_PHONE: &str = "+5511900000001";
    pub const DRIVER_PHONE: &str = "+5511900000002";
    pub const OTHER_DRIVER_PHONE: &str = "+5511900000003";
    pub const PICKUP: GeoPoint = GeoPoint::new(-23.5505, -46.6333);
    pub const DROPOFF: GeoPoint = GeoPoint::new(-23.6000, -46.7000);

    pub struct Harness {
        pub state: Arc<DispatchState>,
        pub gateway: Arc<FakeGateway>,
        pub notifier: Arc<RecordingNotifier>,
        pub clock: Arc<Mutex<DateTime<Utc>>>,
        pub customer: Actor,
        pub driver: Actor,
        pub other_driver: Actor,
        pub admin: Actor,
    }

    impl Harness {
        pub fn advance(&self, by: chrono::Duration) {
            *self.clock.lock().unwrap() += by;
        }
    }

    /// State backed by in-memory SQLite with a customer, two approved and
    /// available drivers near [`PICKUP`], and an admin.
    pub async fn harness() -> Harness {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        crate::migrations::run_sqlite(&pool)
            .await
            .expect("Failed to run migrations");

        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(Mutex::new(Utc::now()));
        let clock_handle = clock.clone();

        let state = DispatchState::new(
            Arc::new(SqlitePersistence::new(pool)),
            gateway.clone(),
            notifier.clone(),
            DispatchPolicy::default(),
        )
        .with_clock(move || *clock_handle.lock().unwrap());

        let customer = Actor::new("cust-1", Role::Customer);
        let driver = Actor::new("drv-1", Role::Driver);
        let other_driver = Actor::new("drv-2", Role::Driver);
        let admin = Actor::new("adm-1", Role::Admin);

        for (actor, phone) in [
            (&customer, Some(CUSTOMER_PHONE)),
            (&driver, Some(DRIVER_PHONE)),
            (&other_driver, Some(OTHER_DRIVER_PHONE)),
            (&admin, None),
        ] {
            upsert_profile(
                &state,
                actor,
                ProfileInput {
                    name: actor.user_id.clone(),
                    phone: phone.map(str::to_string),
                },
            )
            .await
            .unwrap();
        }

        for (d, offset) in [(&driver, 0.02), (&other_driver, 0.05)] {
            approve_driver(
                &state,
                &admin,
                &d.user_id,
                ApproveDriverInput {
                    payout_wallet_id: Some(format!("wal_{}", d.user_id)),
                },
            )
            .await
            .unwrap();
            set_availability(&state, d, true).await.unwrap();
            update_driver_location(&state, d, GeoPoint::new(PICKUP.lat + offset, PICKUP.lng))
                .await
                .unwrap();
        }

        Harness {
            state: Arc::new(state),
            gateway,
            notifier,
            clock,
            customer,
            driver,
            other_driver,
            admin,
        }
    }

    pub fn tow_request() -> CreateTowRequest {
        CreateTowRequest {
            pickup: PICKUP,
            pickup_address: "Av. Paulista, 1578".to_string(),
            dropoff: DROPOFF,
            dropoff_address: "Oficina Central".to_string(),
            vehicle: "VW Gol ABC1D23".to_string(),
            notes: Some("Flat tyre, no spare".to_string()),
        }
    }

    pub fn offer(price_cents: i64, eta_minutes: i32) -> SubmitProposal {
        SubmitProposal {
            price_cents,
            eta_minutes,
            message: None,
        }
    }

    /// A request with one proposal from `driver`, already accepted.
    pub async fn accepted_request(h: &Harness) -> (String, ProposalRecord) {
        let created = create_request(&h.state, &h.customer, tow_request())
            .await
            .unwrap();
        let request_id = created.request.request_id;
        let proposal = submit_proposal(&h.state, &h.driver, &request_id, offer(20_000, 20))
            .await
            .unwrap();
        accept_proposal(&h.state, &h.customer, &request_id, &proposal.proposal_id)
            .await
            .unwrap();
        (request_id, proposal)
    }
}
