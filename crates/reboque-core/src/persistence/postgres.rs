// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for reboque-core.
//!
//! Provides storage access functions for users, requests, proposals, payments,
//! trip tracking and the request audit log.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::CoreError;
use crate::geo::{BoundingBox, GeoPoint};
use crate::payment::Charge;
use crate::status::{PaymentStatus, ProposalStatus, RequestStatus, Role};

use super::{
    CancellationRecord, NewPayment, NewProposal, NewRequest, NewRequestEvent, PaymentRecord,
    Persistence, ProposalRecord, RequestEventRecord, RequestRecord, TripLocationRecord,
    UserRecord,
};

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// User Operations
// ============================================================================

/// Create a user, or refresh name and phone of an existing one.
pub async fn upsert_user(
    pool: &PgPool,
    user_id: &str,
    role: Role,
    name: &str,
    phone: Option<&str>,
    at: DateTime<Utc>,
) -> Result<UserRecord, CoreError> {
    let record = sqlx::query_as::<_, UserRecord>(
        r#"
        INSERT INTO users (user_id, role, name, phone, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id) DO UPDATE
        SET name = EXCLUDED.name,
            phone = EXCLUDED.phone
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(role.as_str())
    .bind(name)
    .bind(phone)
    .bind(at)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Get a user by ID.
pub async fn get_user(pool: &PgPool, user_id: &str) -> Result<Option<UserRecord>, CoreError> {
    let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    Ok(record)
}

/// Store the driver's last known position.
pub async fn set_driver_location(
    pool: &PgPool,
    user_id: &str,
    point: GeoPoint,
    at: DateTime<Utc>,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE users SET lat = $1, lng = $2, location_updated_at = $3 WHERE user_id = $4")
        .bind(point.lat)
        .bind(point.lng)
        .bind(at)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Toggle whether the driver receives alerts.
pub async fn set_driver_available(
    pool: &PgPool,
    user_id: &str,
    available: bool,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE users SET available = $1 WHERE user_id = $2")
        .bind(available)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Approve a driver, optionally registering their payout wallet.
pub async fn approve_driver(
    pool: &PgPool,
    user_id: &str,
    payout_wallet_id: Option<&str>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET approved = TRUE,
            payout_wallet_id = COALESCE($1, payout_wallet_id)
        WHERE user_id = $2 AND role = 'driver'
        "#,
    )
    .bind(payout_wallet_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Approved, available drivers inside the box.
pub async fn list_drivers_in_box(
    pool: &PgPool,
    bbox: &BoundingBox,
) -> Result<Vec<UserRecord>, CoreError> {
    let records = sqlx::query_as::<_, UserRecord>(
        r#"
        SELECT * FROM users
        WHERE role = 'driver' AND approved AND available
          AND lat BETWEEN $1 AND $2
          AND lng BETWEEN $3 AND $4
        "#,
    )
    .bind(bbox.min_lat)
    .bind(bbox.max_lat)
    .bind(bbox.min_lng)
    .bind(bbox.max_lng)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Request Operations
// ============================================================================

/// Insert a new request in `pending`.
pub async fn insert_request(pool: &PgPool, request: &NewRequest) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO tow_requests (
            request_id, customer_id, status,
            pickup_lat, pickup_lng, pickup_address,
            dropoff_lat, dropoff_lng, dropoff_address,
            vehicle, notes, distance_km,
            created_at, expires_at, updated_at
        )
        VALUES ($1, $2, 'pending', $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $12)
        "#,
    )
    .bind(&request.request_id)
    .bind(&request.customer_id)
    .bind(request.pickup.lat)
    .bind(request.pickup.lng)
    .bind(&request.pickup_address)
    .bind(request.dropoff.lat)
    .bind(request.dropoff.lng)
    .bind(&request.dropoff_address)
    .bind(&request.vehicle)
    .bind(&request.notes)
    .bind(request.distance_km)
    .bind(request.created_at)
    .bind(request.expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a request by ID.
pub async fn get_request(
    pool: &PgPool,
    request_id: &str,
) -> Result<Option<RequestRecord>, CoreError> {
    let record =
        sqlx::query_as::<_, RequestRecord>("SELECT * FROM tow_requests WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(pool)
            .await?;

    Ok(record)
}

/// Requests where `column` equals `id`, newest first.
async fn list_requests_by(
    pool: &PgPool,
    column: &'static str,
    id: &str,
    limit: i64,
) -> Result<Vec<RequestRecord>, CoreError> {
    let sql = format!(
        "SELECT * FROM tow_requests WHERE {} = $1 ORDER BY created_at DESC LIMIT $2",
        column
    );
    let records = sqlx::query_as::<_, RequestRecord>(&sql)
        .bind(id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    Ok(records)
}

/// All requests, optionally filtered by status, newest first.
pub async fn list_requests(
    pool: &PgPool,
    status: Option<RequestStatus>,
    limit: i64,
) -> Result<Vec<RequestRecord>, CoreError> {
    let records = sqlx::query_as::<_, RequestRecord>(
        r#"
        SELECT * FROM tow_requests
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Open, unexpired requests with pickup inside the box.
pub async fn list_open_requests_in_box(
    pool: &PgPool,
    bbox: &BoundingBox,
    now: DateTime<Utc>,
) -> Result<Vec<RequestRecord>, CoreError> {
    let records = sqlx::query_as::<_, RequestRecord>(
        r#"
        SELECT * FROM tow_requests
        WHERE status IN ('pending', 'proposed')
          AND expires_at > $1
          AND pickup_lat BETWEEN $2 AND $3
          AND pickup_lng BETWEEN $4 AND $5
        "#,
    )
    .bind(now)
    .bind(bbox.min_lat)
    .bind(bbox.max_lat)
    .bind(bbox.min_lng)
    .bind(bbox.max_lng)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Compare-and-set status change, stamping the column that belongs to `to`.
pub async fn transition_request(
    pool: &PgPool,
    request_id: &str,
    from: RequestStatus,
    to: RequestStatus,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE tow_requests
        SET status = $1,
            updated_at = $2,
            paid_at = CASE WHEN $1 = 'paid' THEN $2 ELSE paid_at END,
            en_route_at = CASE WHEN $1 = 'en_route' THEN $2 ELSE en_route_at END,
            arrived_at = CASE WHEN $1 = 'arrived' THEN $2 ELSE arrived_at END,
            in_service_at = CASE WHEN $1 = 'in_service' THEN $2 ELSE in_service_at END,
            completed_at = CASE WHEN $1 = 'completed' THEN $2 ELSE completed_at END,
            closed_at = CASE WHEN $1 IN ('cancelled', 'expired') THEN $2 ELSE closed_at END
        WHERE request_id = $3
          AND status = $4
        "#,
    )
    .bind(to.as_str())
    .bind(at)
    .bind(request_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// `proposed -> accepted` with the proposal's terms.
pub async fn assign_proposal(
    pool: &PgPool,
    request_id: &str,
    proposal: &ProposalRecord,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE tow_requests
        SET status = 'accepted',
            driver_id = $1,
            accepted_proposal_id = $2,
            price_cents = $3,
            eta_minutes = $4,
            accepted_at = $5,
            updated_at = $5
        WHERE request_id = $6
          AND status = 'proposed'
        "#,
    )
    .bind(&proposal.driver_id)
    .bind(&proposal.proposal_id)
    .bind(proposal.price_cents)
    .bind(proposal.eta_minutes)
    .bind(at)
    .bind(request_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// `from -> cancelled` with fee details.
pub async fn cancel_request(
    pool: &PgPool,
    request_id: &str,
    from: RequestStatus,
    cancellation: &CancellationRecord,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE tow_requests
        SET status = 'cancelled',
            cancelled_by = $1,
            cancel_reason = $2,
            customer_fee_cents = $3,
            driver_penalty_cents = $4,
            closed_at = $5,
            updated_at = $5
        WHERE request_id = $6
          AND status = $7
        "#,
    )
    .bind(&cancellation.cancelled_by)
    .bind(&cancellation.reason)
    .bind(cancellation.customer_fee_cents)
    .bind(cancellation.driver_penalty_cents)
    .bind(at)
    .bind(request_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Open requests past their deadline, oldest deadline first.
pub async fn list_expired_open_requests(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RequestRecord>, CoreError> {
    let records = sqlx::query_as::<_, RequestRecord>(
        r#"
        SELECT * FROM tow_requests
        WHERE status IN ('pending', 'proposed')
          AND expires_at <= $1
        ORDER BY expires_at ASC
        LIMIT $2
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Accepted requests accepted at or before the cutoff.
pub async fn list_unpaid_accepted_requests(
    pool: &PgPool,
    accepted_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RequestRecord>, CoreError> {
    let records = sqlx::query_as::<_, RequestRecord>(
        r#"
        SELECT * FROM tow_requests
        WHERE status = 'accepted'
          AND accepted_at <= $1
        ORDER BY accepted_at ASC
        LIMIT $2
        "#,
    )
    .bind(accepted_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

// ============================================================================
// Proposal Operations
// ============================================================================

/// Insert a proposal or refresh the driver's pending/withdrawn one.
pub async fn upsert_proposal(
    pool: &PgPool,
    proposal: &NewProposal,
) -> Result<ProposalRecord, CoreError> {
    sqlx::query(
        r#"
        INSERT INTO proposals (
            proposal_id, request_id, driver_id, price_cents, eta_minutes,
            message, status, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
        ON CONFLICT (request_id, driver_id) DO UPDATE
        SET price_cents = EXCLUDED.price_cents,
            eta_minutes = EXCLUDED.eta_minutes,
            message = EXCLUDED.message,
            status = 'pending',
            updated_at = EXCLUDED.updated_at
        WHERE proposals.status IN ('pending', 'withdrawn')
        "#,
    )
    .bind(&proposal.proposal_id)
    .bind(&proposal.request_id)
    .bind(&proposal.driver_id)
    .bind(proposal.price_cents)
    .bind(proposal.eta_minutes)
    .bind(&proposal.message)
    .bind(proposal.at)
    .execute(pool)
    .await?;

    let record = sqlx::query_as::<_, ProposalRecord>(
        "SELECT * FROM proposals WHERE request_id = $1 AND driver_id = $2",
    )
    .bind(&proposal.request_id)
    .bind(&proposal.driver_id)
    .fetch_one(pool)
    .await?;

    Ok(record)
}

/// Get a proposal by ID.
pub async fn get_proposal(
    pool: &PgPool,
    proposal_id: &str,
) -> Result<Option<ProposalRecord>, CoreError> {
    let record =
        sqlx::query_as::<_, ProposalRecord>("SELECT * FROM proposals WHERE proposal_id = $1")
            .bind(proposal_id)
            .fetch_optional(pool)
            .await?;

    Ok(record)
}

/// Proposals of a request, cheapest first.
pub async fn list_proposals(
    pool: &PgPool,
    request_id: &str,
) -> Result<Vec<ProposalRecord>, CoreError> {
    let records = sqlx::query_as::<_, ProposalRecord>(
        r#"
        SELECT * FROM proposals
        WHERE request_id = $1
        ORDER BY price_cents ASC, eta_minutes ASC, created_at ASC
        "#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Compare-and-set proposal status.
pub async fn set_proposal_status(
    pool: &PgPool,
    proposal_id: &str,
    from: ProposalStatus,
    to: ProposalStatus,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        "UPDATE proposals SET status = $1, updated_at = $2 WHERE proposal_id = $3 AND status = $4",
    )
    .bind(to.as_str())
    .bind(at)
    .bind(proposal_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Reject pending proposals of a request, sparing `except`.
pub async fn reject_pending_proposals(
    pool: &PgPool,
    request_id: &str,
    except: Option<&str>,
    at: DateTime<Utc>,
) -> Result<u64, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE proposals
        SET status = 'rejected', updated_at = $1
        WHERE request_id = $2
          AND status = 'pending'
          AND ($3::text IS NULL OR proposal_id <> $3)
        "#,
    )
    .bind(at)
    .bind(request_id)
    .bind(except)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Number of pending proposals for a request.
pub async fn count_pending_proposals(pool: &PgPool, request_id: &str) -> Result<i64, CoreError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM proposals WHERE request_id = $1 AND status = 'pending'",
    )
    .bind(request_id)
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

// ============================================================================
// Payment Operations
// ============================================================================

/// Insert a payment in `pending`.
pub async fn insert_payment(pool: &PgPool, payment: &NewPayment) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO payments (
            payment_id, request_id, method, status,
            amount_cents, platform_cents, driver_cents, created_at
        )
        VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7)
        "#,
    )
    .bind(&payment.payment_id)
    .bind(&payment.request_id)
    .bind(payment.method.as_str())
    .bind(payment.amount_cents)
    .bind(payment.platform_cents)
    .bind(payment.driver_cents)
    .bind(payment.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the gateway's charge details on a payment.
pub async fn attach_charge(
    pool: &PgPool,
    payment_id: &str,
    charge: &Charge,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        UPDATE payments
        SET provider_ref = $1, pix_payload = $2, checkout_url = $3
        WHERE payment_id = $4
        "#,
    )
    .bind(&charge.provider_ref)
    .bind(&charge.pix_payload)
    .bind(&charge.checkout_url)
    .bind(payment_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Latest pending or confirmed payment of a request.
pub async fn get_live_payment(
    pool: &PgPool,
    request_id: &str,
) -> Result<Option<PaymentRecord>, CoreError> {
    let record = sqlx::query_as::<_, PaymentRecord>(
        r#"
        SELECT * FROM payments
        WHERE request_id = $1
          AND status IN ('pending', 'confirmed')
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Look up a payment by the gateway's reference.
pub async fn get_payment_by_provider_ref(
    pool: &PgPool,
    provider_ref: &str,
) -> Result<Option<PaymentRecord>, CoreError> {
    let record =
        sqlx::query_as::<_, PaymentRecord>("SELECT * FROM payments WHERE provider_ref = $1")
            .bind(provider_ref)
            .fetch_optional(pool)
            .await?;

    Ok(record)
}

/// Compare-and-set payment status.
pub async fn set_payment_status(
    pool: &PgPool,
    payment_id: &str,
    from: PaymentStatus,
    to: PaymentStatus,
    at: DateTime<Utc>,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = $1,
            confirmed_at = CASE WHEN $1 = 'confirmed' THEN $2 ELSE confirmed_at END
        WHERE payment_id = $3 AND status = $4
        "#,
    )
    .bind(to.as_str())
    .bind(at)
    .bind(payment_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// `confirmed -> refunded`, recording the amount returned.
pub async fn record_refund(
    pool: &PgPool,
    payment_id: &str,
    refunded_cents: i64,
) -> Result<bool, CoreError> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = 'refunded', refunded_cents = $1
        WHERE payment_id = $2 AND status = 'confirmed'
        "#,
    )
    .bind(refunded_cents)
    .bind(payment_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Tracking and Audit Operations
// ============================================================================

/// Append a driver position to a trip track.
pub async fn append_trip_location(
    pool: &PgPool,
    request_id: &str,
    driver_id: &str,
    point: GeoPoint,
    at: DateTime<Utc>,
) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO trip_locations (request_id, driver_id, lat, lng, recorded_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(request_id)
    .bind(driver_id)
    .bind(point.lat)
    .bind(point.lng)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Latest positions of a trip, newest first.
pub async fn list_trip_locations(
    pool: &PgPool,
    request_id: &str,
    limit: i64,
) -> Result<Vec<TripLocationRecord>, CoreError> {
    let records = sqlx::query_as::<_, TripLocationRecord>(
        r#"
        SELECT * FROM trip_locations
        WHERE request_id = $1
        ORDER BY recorded_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(request_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Append an audit row.
pub async fn insert_event(pool: &PgPool, event: &NewRequestEvent) -> Result<(), CoreError> {
    sqlx::query(
        r#"
        INSERT INTO request_events (request_id, from_status, to_status, actor_id, note, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&event.request_id)
    .bind(event.from_status.map(|s| s.as_str()))
    .bind(event.to_status.as_str())
    .bind(&event.actor_id)
    .bind(&event.note)
    .bind(event.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit rows of a request, oldest first.
pub async fn list_events(
    pool: &PgPool,
    request_id: &str,
) -> Result<Vec<RequestEventRecord>, CoreError> {
    let records = sqlx::query_as::<_, RequestEventRecord>(
        "SELECT * FROM request_events WHERE request_id = $1 ORDER BY id ASC",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn upsert_user(
        &self,
        user_id: &str,
        role: Role,
        name: &str,
        phone: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<UserRecord, CoreError> {
        upsert_user(&self.pool, user_id, role, name, phone, at).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CoreError> {
        get_user(&self.pool, user_id).await
    }

    async fn set_driver_location(
        &self,
        user_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        set_driver_location(&self.pool, user_id, point, at).await
    }

    async fn set_driver_available(&self, user_id: &str, available: bool) -> Result<(), CoreError> {
        set_driver_available(&self.pool, user_id, available).await
    }

    async fn approve_driver(
        &self,
        user_id: &str,
        payout_wallet_id: Option<&str>,
    ) -> Result<bool, CoreError> {
        approve_driver(&self.pool, user_id, payout_wallet_id).await
    }

    async fn list_drivers_in_box(&self, bbox: &BoundingBox) -> Result<Vec<UserRecord>, CoreError> {
        list_drivers_in_box(&self.pool, bbox).await
    }

    async fn insert_request(&self, request: &NewRequest) -> Result<(), CoreError> {
        insert_request(&self.pool, request).await
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<RequestRecord>, CoreError> {
        get_request(&self.pool, request_id).await
    }

    async fn list_requests_for_customer(
        &self,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        list_requests_by(&self.pool, "customer_id", customer_id, limit).await
    }

    async fn list_requests_for_driver(
        &self,
        driver_id: &str,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        list_requests_by(&self.pool, "driver_id", driver_id, limit).await
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        list_requests(&self.pool, status, limit).await
    }

    async fn list_open_requests_in_box(
        &self,
        bbox: &BoundingBox,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        list_open_requests_in_box(&self.pool, bbox, now).await
    }

    async fn transition_request(
        &self,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        transition_request(&self.pool, request_id, from, to, at).await
    }

    async fn assign_proposal(
        &self,
        request_id: &str,
        proposal: &ProposalRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        assign_proposal(&self.pool, request_id, proposal, at).await
    }

    async fn cancel_request(
        &self,
        request_id: &str,
        from: RequestStatus,
        cancellation: &CancellationRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        cancel_request(&self.pool, request_id, from, cancellation, at).await
    }

    async fn list_expired_open_requests(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        list_expired_open_requests(&self.pool, now, limit).await
    }

    async fn list_unpaid_accepted_requests(
        &self,
        accepted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        list_unpaid_accepted_requests(&self.pool, accepted_before, limit).await
    }

    async fn upsert_proposal(&self, proposal: &NewProposal) -> Result<ProposalRecord, CoreError> {
        upsert_proposal(&self.pool, proposal).await
    }

    async fn get_proposal(&self, proposal_id: &str) -> Result<Option<ProposalRecord>, CoreError> {
        get_proposal(&self.pool, proposal_id).await
    }

    async fn list_proposals(&self, request_id: &str) -> Result<Vec<ProposalRecord>, CoreError> {
        list_proposals(&self.pool, request_id).await
    }

    async fn set_proposal_status(
        &self,
        proposal_id: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        set_proposal_status(&self.pool, proposal_id, from, to, at).await
    }

    async fn reject_pending_proposals(
        &self,
        request_id: &str,
        except: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        reject_pending_proposals(&self.pool, request_id, except, at).await
    }

    async fn count_pending_proposals(&self, request_id: &str) -> Result<i64, CoreError> {
        count_pending_proposals(&self.pool, request_id).await
    }

    async fn insert_payment(&self, payment: &NewPayment) -> Result<(), CoreError> {
        insert_payment(&self.pool, payment).await
    }

    async fn attach_charge(&self, payment_id: &str, charge: &Charge) -> Result<(), CoreError> {
        attach_charge(&self.pool, payment_id, charge).await
    }

    async fn get_live_payment(&self, request_id: &str) -> Result<Option<PaymentRecord>, CoreError> {
        get_live_payment(&self.pool, request_id).await
    }

    async fn get_payment_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PaymentRecord>, CoreError> {
        get_payment_by_provider_ref(&self.pool, provider_ref).await
    }

    async fn set_payment_status(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        set_payment_status(&self.pool, payment_id, from, to, at).await
    }

    async fn record_refund(
        &self,
        payment_id: &str,
        refunded_cents: i64,
    ) -> Result<bool, CoreError> {
        record_refund(&self.pool, payment_id, refunded_cents).await
    }

    async fn append_trip_location(
        &self,
        request_id: &str,
        driver_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        append_trip_location(&self.pool, request_id, driver_id, point, at).await
    }

    async fn list_trip_locations(
        &self,
        request_id: &str,
        limit: i64,
    ) -> Result<Vec<TripLocationRecord>, CoreError> {
        list_trip_locations(&self.pool, request_id, limit).await
    }

    async fn insert_event(&self, event: &NewRequestEvent) -> Result<(), CoreError> {
        insert_event(&self.pool, event).await
    }

    async fn list_events(&self, request_id: &str) -> Result<Vec<RequestEventRecord>, CoreError> {
        list_events(&self.pool, request_id).await
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
