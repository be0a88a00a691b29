//! Persistence interfaces and backends for reboque-core.
//!
//! This module defines the persistence abstraction and backend implementations.
//! Every status change goes through a compare-and-set method that returns
//! `false` when the row was no longer in the expected state.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::geo::{BoundingBox, GeoPoint};
use crate::payment::{Charge, PaymentMethod};
use crate::status::{PaymentStatus, ProposalStatus, RequestStatus, Role};

/// User record (customer, driver or admin).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct UserRecord {
    /// Token subject.
    pub user_id: String,
    /// customer, driver or admin.
    pub role: String,
    /// Display name.
    pub name: String,
    /// WhatsApp number in E.164 format.
    pub phone: Option<String>,
    /// Drivers must be approved by an admin before proposing.
    pub approved: bool,
    /// Driver is accepting jobs.
    pub available: bool,
    /// Last reported latitude (drivers).
    pub lat: Option<f64>,
    /// Last reported longitude (drivers).
    pub lng: Option<f64>,
    /// When the location was last reported.
    pub location_updated_at: Option<DateTime<Utc>>,
    /// Driver's payout account at the payment gateway.
    pub payout_wallet_id: Option<String>,
    /// When the user first appeared.
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Parsed role.
    pub fn role(&self) -> Result<Role, CoreError> {
        Role::parse(&self.role).map_err(corrupt)
    }

    /// Last known location, if any.
    pub fn location(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.lat?, self.lng?))
    }
}

/// Tow request record.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RequestRecord {
    /// Unique identifier.
    pub request_id: String,
    /// Requesting customer.
    pub customer_id: String,
    /// Lifecycle status.
    pub status: String,
    /// Pickup latitude.
    pub pickup_lat: f64,
    /// Pickup longitude.
    pub pickup_lng: f64,
    /// Pickup address as typed by the customer.
    pub pickup_address: String,
    /// Drop-off latitude.
    pub dropoff_lat: f64,
    /// Drop-off longitude.
    pub dropoff_lng: f64,
    /// Drop-off address.
    pub dropoff_address: String,
    /// Vehicle description (make, model, plate).
    pub vehicle: String,
    /// Free-form notes for the driver.
    pub notes: Option<String>,
    /// Straight-line pickup to drop-off distance.
    pub distance_km: f64,
    /// Driver of the accepted proposal.
    pub driver_id: Option<String>,
    /// Accepted proposal.
    pub accepted_proposal_id: Option<String>,
    /// Agreed price.
    pub price_cents: Option<i64>,
    /// Agreed ETA.
    pub eta_minutes: Option<i32>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// Open requests expire at this time.
    pub expires_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// When a proposal was accepted.
    pub accepted_at: Option<DateTime<Utc>>,
    /// When payment was confirmed.
    pub paid_at: Option<DateTime<Utc>>,
    /// When the driver set off.
    pub en_route_at: Option<DateTime<Utc>>,
    /// When the driver arrived.
    pub arrived_at: Option<DateTime<Utc>>,
    /// When towing started.
    pub in_service_at: Option<DateTime<Utc>>,
    /// When the trip finished.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the request was cancelled or expired.
    pub closed_at: Option<DateTime<Utc>>,
    /// customer, driver, admin or system.
    pub cancelled_by: Option<String>,
    /// Why it was cancelled.
    pub cancel_reason: Option<String>,
    /// Fee retained from the customer.
    pub customer_fee_cents: i64,
    /// Penalty owed by the driver.
    pub driver_penalty_cents: i64,
}

impl RequestRecord {
    /// Parsed lifecycle status.
    pub fn status(&self) -> Result<RequestStatus, CoreError> {
        RequestStatus::parse(&self.status).map_err(corrupt)
    }

    /// Pickup point.
    pub fn pickup(&self) -> GeoPoint {
        GeoPoint::new(self.pickup_lat, self.pickup_lng)
    }

    /// Drop-off point.
    pub fn dropoff(&self) -> GeoPoint {
        GeoPoint::new(self.dropoff_lat, self.dropoff_lng)
    }

    /// Whether `user_id` is the assigned driver.
    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.driver_id.as_deref() == Some(user_id)
    }
}

/// Fields for a new request.
#[derive(Debug, Clone)]
pub struct NewRequest {
    /// Unique identifier.
    pub request_id: String,
    /// Requesting customer.
    pub customer_id: String,
    /// Pickup point.
    pub pickup: GeoPoint,
    /// Pickup address.
    pub pickup_address: String,
    /// Drop-off point.
    pub dropoff: GeoPoint,
    /// Drop-off address.
    pub dropoff_address: String,
    /// Vehicle description.
    pub vehicle: String,
    /// Notes for the driver.
    pub notes: Option<String>,
    /// Pickup to drop-off distance.
    pub distance_km: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// Cancellation details written together with the status change.
#[derive(Debug, Clone)]
pub struct CancellationRecord {
    /// customer, driver, admin or system.
    pub cancelled_by: String,
    /// Why.
    pub reason: Option<String>,
    /// Fee retained from the customer.
    pub customer_fee_cents: i64,
    /// Penalty owed by the driver.
    pub driver_penalty_cents: i64,
}

/// Driver proposal record.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProposalRecord {
    /// Unique identifier.
    pub proposal_id: String,
    /// Request this proposal is for.
    pub request_id: String,
    /// Proposing driver.
    pub driver_id: String,
    /// Offered price.
    pub price_cents: i64,
    /// Promised arrival time.
    pub eta_minutes: i32,
    /// Optional note to the customer.
    pub message: Option<String>,
    /// pending, accepted, rejected or withdrawn.
    pub status: String,
    /// When first submitted.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl ProposalRecord {
    /// Parsed status.
    pub fn status(&self) -> Result<ProposalStatus, CoreError> {
        ProposalStatus::parse(&self.status).map_err(corrupt)
    }
}

/// Fields for a new or resubmitted proposal.
#[derive(Debug, Clone)]
pub struct NewProposal {
    /// Identifier used when no proposal exists yet for (request, driver).
    pub proposal_id: String,
    /// Request.
    pub request_id: String,
    /// Driver.
    pub driver_id: String,
    /// Offered price.
    pub price_cents: i64,
    /// Promised arrival.
    pub eta_minutes: i32,
    /// Note.
    pub message: Option<String>,
    /// Submission time.
    pub at: DateTime<Utc>,
}

/// Payment record.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PaymentRecord {
    /// Unique identifier.
    pub payment_id: String,
    /// Request being paid.
    pub request_id: String,
    /// card or pix.
    pub method: String,
    /// pending, confirmed, failed or refunded.
    pub status: String,
    /// Total amount.
    pub amount_cents: i64,
    /// Platform commission.
    pub platform_cents: i64,
    /// Driver payout.
    pub driver_cents: i64,
    /// Gateway charge reference.
    pub provider_ref: Option<String>,
    /// Pix copy-paste payload.
    pub pix_payload: Option<String>,
    /// Card checkout URL.
    pub checkout_url: Option<String>,
    /// Amount returned to the customer.
    pub refunded_cents: i64,
    /// When the charge was opened.
    pub created_at: DateTime<Utc>,
    /// When the gateway confirmed it.
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    /// Parsed status.
    pub fn status(&self) -> Result<PaymentStatus, CoreError> {
        PaymentStatus::parse(&self.status).map_err(corrupt)
    }

    /// Parsed method.
    pub fn method(&self) -> Result<PaymentMethod, CoreError> {
        PaymentMethod::parse(&self.method)
    }
}

/// Fields for a new payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    /// Unique identifier.
    pub payment_id: String,
    /// Request.
    pub request_id: String,
    /// card or pix.
    pub method: PaymentMethod,
    /// Total.
    pub amount_cents: i64,
    /// Platform commission.
    pub platform_cents: i64,
    /// Driver payout.
    pub driver_cents: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// One driver position fix during a trip.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TripLocationRecord {
    /// Database primary key.
    pub id: i64,
    /// Trip.
    pub request_id: String,
    /// Reporting driver.
    pub driver_id: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
    /// When the fix was taken.
    pub recorded_at: DateTime<Utc>,
}

/// Audit row for a request status change.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RequestEventRecord {
    /// Database primary key.
    pub id: i64,
    /// Request.
    pub request_id: String,
    /// Previous status (None on creation).
    pub from_status: Option<String>,
    /// New status.
    pub to_status: String,
    /// Who caused it (None for the system).
    pub actor_id: Option<String>,
    /// Extra context.
    pub note: Option<String>,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

/// Fields for a new audit row.
#[derive(Debug, Clone)]
pub struct NewRequestEvent {
    /// Request.
    pub request_id: String,
    /// Previous status.
    pub from_status: Option<RequestStatus>,
    /// New status.
    pub to_status: RequestStatus,
    /// Who caused it.
    pub actor_id: Option<String>,
    /// Extra context.
    pub note: Option<String>,
    /// When.
    pub created_at: DateTime<Utc>,
}

fn corrupt(err: crate::status::ParseStatusError) -> CoreError {
    CoreError::DatabaseError {
        operation: "decode".to_string(),
        details: err.to_string(),
    }
}

/// Persistence interface used by dispatch handlers.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create the user or update name/phone. The role never changes after creation.
    async fn upsert_user(
        &self,
        user_id: &str,
        role: Role,
        name: &str,
        phone: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<UserRecord, CoreError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CoreError>;

    async fn set_driver_location(
        &self,
        user_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    async fn set_driver_available(&self, user_id: &str, available: bool) -> Result<(), CoreError>;

    /// Approve a driver. Returns false if the user is not a driver.
    async fn approve_driver(
        &self,
        user_id: &str,
        payout_wallet_id: Option<&str>,
    ) -> Result<bool, CoreError>;

    /// Approved, available drivers whose last location lies inside the box.
    async fn list_drivers_in_box(&self, bbox: &BoundingBox) -> Result<Vec<UserRecord>, CoreError>;

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    async fn insert_request(&self, request: &NewRequest) -> Result<(), CoreError>;

    async fn get_request(&self, request_id: &str) -> Result<Option<RequestRecord>, CoreError>;

    async fn list_requests_for_customer(
        &self,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError>;

    /// Requests assigned to the driver, newest first.
    async fn list_requests_for_driver(
        &self,
        driver_id: &str,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError>;

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError>;

    /// Open, unexpired requests whose pickup lies inside the box.
    async fn list_open_requests_in_box(
        &self,
        bbox: &BoundingBox,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, CoreError>;

    /// Move `from -> to` if the request is still in `from`, stamping the
    /// timestamp column that belongs to `to`.
    async fn transition_request(
        &self,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// `proposed -> accepted`, copying driver, price and ETA from the proposal.
    async fn assign_proposal(
        &self,
        request_id: &str,
        proposal: &ProposalRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// `from -> cancelled` with fee details.
    async fn cancel_request(
        &self,
        request_id: &str,
        from: RequestStatus,
        cancellation: &CancellationRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Open requests whose `expires_at` is at or before `now`.
    async fn list_expired_open_requests(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError>;

    /// Accepted requests whose acceptance is at or before `accepted_before`.
    async fn list_unpaid_accepted_requests(
        &self,
        accepted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError>;

    // ------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------

    /// Insert, or refresh the driver's existing pending/withdrawn proposal.
    /// Returns the stored row, whatever its status ended up being.
    async fn upsert_proposal(&self, proposal: &NewProposal) -> Result<ProposalRecord, CoreError>;

    async fn get_proposal(&self, proposal_id: &str) -> Result<Option<ProposalRecord>, CoreError>;

    async fn list_proposals(&self, request_id: &str) -> Result<Vec<ProposalRecord>, CoreError>;

    async fn set_proposal_status(
        &self,
        proposal_id: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Reject every pending proposal of the request except `except`.
    async fn reject_pending_proposals(
        &self,
        request_id: &str,
        except: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    async fn count_pending_proposals(&self, request_id: &str) -> Result<i64, CoreError>;

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    async fn insert_payment(&self, payment: &NewPayment) -> Result<(), CoreError>;

    async fn attach_charge(&self, payment_id: &str, charge: &Charge) -> Result<(), CoreError>;

    /// Most recent payment of the request that is pending or confirmed.
    async fn get_live_payment(&self, request_id: &str) -> Result<Option<PaymentRecord>, CoreError>;

    async fn get_payment_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PaymentRecord>, CoreError>;

    /// Compare-and-set on payment status; `confirmed` stamps `confirmed_at`.
    async fn set_payment_status(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Mark a confirmed payment refunded.
    async fn record_refund(&self, payment_id: &str, refunded_cents: i64) -> Result<bool, CoreError>;

    // ------------------------------------------------------------------
    // Tracking and audit
    // ------------------------------------------------------------------

    async fn append_trip_location(
        &self,
        request_id: &str,
        driver_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// Most recent fixes first.
    async fn list_trip_locations(
        &self,
        request_id: &str,
        limit: i64,
    ) -> Result<Vec<TripLocationRecord>, CoreError>;

    async fn insert_event(&self, event: &NewRequestEvent) -> Result<(), CoreError>;

    /// Oldest first.
    async fn list_events(&self, request_id: &str) -> Result<Vec<RequestEventRecord>, CoreError>;

    async fn health_check(&self) -> Result<bool, CoreError>;
}
