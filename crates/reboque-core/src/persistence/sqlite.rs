//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::CoreError;
use crate::geo::{BoundingBox, GeoPoint};
use crate::payment::Charge;
use crate::status::{PaymentStatus, ProposalStatus, RequestStatus, Role};

use super::{
    CancellationRecord, NewPayment, NewProposal, NewRequest, NewRequestEvent, PaymentRecord,
    Persistence, ProposalRecord, RequestEventRecord, RequestRecord, TripLocationRecord,
    UserRecord,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let persistence = SqlitePersistence::from_path(".data/reboque.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn upsert_user(
        &self,
        user_id: &str,
        role: Role,
        name: &str,
        phone: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<UserRecord, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, role, name, phone, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (user_id) DO UPDATE
            SET name = excluded.name,
                phone = excluded.phone
            "#,
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(name)
        .bind(phone)
        .bind(at)
        .execute(&self.pool)
        .await?;

        self.get_user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CoreError> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn set_driver_location(
        &self,
        user_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET lat = ?, lng = ?, location_updated_at = ?
            WHERE user_id = ?
            "#,
        )
        .bind(point.lat)
        .bind(point.lng)
        .bind(at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_driver_available(&self, user_id: &str, available: bool) -> Result<(), CoreError> {
        sqlx::query("UPDATE users SET available = ? WHERE user_id = ?")
            .bind(available)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn approve_driver(
        &self,
        user_id: &str,
        payout_wallet_id: Option<&str>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET approved = 1,
                payout_wallet_id = COALESCE(?, payout_wallet_id)
            WHERE user_id = ? AND role = 'driver'
            "#,
        )
        .bind(payout_wallet_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_drivers_in_box(&self, bbox: &BoundingBox) -> Result<Vec<UserRecord>, CoreError> {
        let records = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT * FROM users
            WHERE role = 'driver' AND approved = 1 AND available = 1
              AND lat BETWEEN ? AND ?
              AND lng BETWEEN ? AND ?
            "#,
        )
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_request(&self, request: &NewRequest) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO tow_requests (
                request_id, customer_id, status,
                pickup_lat, pickup_lng, pickup_address,
                dropoff_lat, dropoff_lng, dropoff_address,
                vehicle, notes, distance_km,
                created_at, expires_at, updated_at
            )
            VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?12)
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
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<RequestRecord>, CoreError> {
        let record =
            sqlx::query_as::<_, RequestRecord>("SELECT * FROM tow_requests WHERE request_id = ?")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    async fn list_requests_for_customer(
        &self,
        customer_id: &str,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT * FROM tow_requests
            WHERE customer_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_requests_for_driver(
        &self,
        driver_id: &str,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT * FROM tow_requests
            WHERE driver_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(driver_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT * FROM tow_requests
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_open_requests_in_box(
        &self,
        bbox: &BoundingBox,
        now: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT * FROM tow_requests
            WHERE status IN ('pending', 'proposed')
              AND expires_at > ?
              AND pickup_lat BETWEEN ? AND ?
              AND pickup_lng BETWEEN ? AND ?
            "#,
        )
        .bind(now)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn transition_request(
        &self,
        request_id: &str,
        from: RequestStatus,
        to: RequestStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tow_requests
            SET status = ?1,
                updated_at = ?2,
                paid_at = CASE WHEN ?1 = 'paid' THEN ?2 ELSE paid_at END,
                en_route_at = CASE WHEN ?1 = 'en_route' THEN ?2 ELSE en_route_at END,
                arrived_at = CASE WHEN ?1 = 'arrived' THEN ?2 ELSE arrived_at END,
                in_service_at = CASE WHEN ?1 = 'in_service' THEN ?2 ELSE in_service_at END,
                completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END,
                closed_at = CASE WHEN ?1 IN ('cancelled', 'expired') THEN ?2 ELSE closed_at END
            WHERE request_id = ?3
              AND status = ?4
            "#,
        )
        .bind(to.as_str())
        .bind(at)
        .bind(request_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn assign_proposal(
        &self,
        request_id: &str,
        proposal: &ProposalRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tow_requests
            SET status = 'accepted',
                driver_id = ?1,
                accepted_proposal_id = ?2,
                price_cents = ?3,
                eta_minutes = ?4,
                accepted_at = ?5,
                updated_at = ?5
            WHERE request_id = ?6
              AND status = 'proposed'
            "#,
        )
        .bind(&proposal.driver_id)
        .bind(&proposal.proposal_id)
        .bind(proposal.price_cents)
        .bind(proposal.eta_minutes)
        .bind(at)
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_request(
        &self,
        request_id: &str,
        from: RequestStatus,
        cancellation: &CancellationRecord,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tow_requests
            SET status = 'cancelled',
                cancelled_by = ?1,
                cancel_reason = ?2,
                customer_fee_cents = ?3,
                driver_penalty_cents = ?4,
                closed_at = ?5,
                updated_at = ?5
            WHERE request_id = ?6
              AND status = ?7
            "#,
        )
        .bind(&cancellation.cancelled_by)
        .bind(&cancellation.reason)
        .bind(cancellation.customer_fee_cents)
        .bind(cancellation.driver_penalty_cents)
        .bind(at)
        .bind(request_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_expired_open_requests(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT * FROM tow_requests
            WHERE status IN ('pending', 'proposed')
              AND expires_at <= ?
            ORDER BY expires_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn list_unpaid_accepted_requests(
        &self,
        accepted_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<RequestRecord>, CoreError> {
        let records = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT * FROM tow_requests
            WHERE status = 'accepted'
              AND accepted_at <= ?
            ORDER BY accepted_at ASC
            LIMIT ?
            "#,
        )
        .bind(accepted_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn upsert_proposal(&self, proposal: &NewProposal) -> Result<ProposalRecord, CoreError> {
        sqlx::query(
            r#"
            INSERT INTO proposals (
                proposal_id, request_id, driver_id, price_cents, eta_minutes,
                message, status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7)
            ON CONFLICT (request_id, driver_id) DO UPDATE
            SET price_cents = excluded.price_cents,
                eta_minutes = excluded.eta_minutes,
                message = excluded.message,
                status = 'pending',
                updated_at = excluded.updated_at
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
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, ProposalRecord>(
            "SELECT * FROM proposals WHERE request_id = ? AND driver_id = ?",
        )
        .bind(&proposal.request_id)
        .bind(&proposal.driver_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_proposal(&self, proposal_id: &str) -> Result<Option<ProposalRecord>, CoreError> {
        let record =
            sqlx::query_as::<_, ProposalRecord>("SELECT * FROM proposals WHERE proposal_id = ?")
                .bind(proposal_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    async fn list_proposals(&self, request_id: &str) -> Result<Vec<ProposalRecord>, CoreError> {
        let records = sqlx::query_as::<_, ProposalRecord>(
            r#"
            SELECT * FROM proposals
            WHERE request_id = ?
            ORDER BY price_cents ASC, eta_minutes ASC, created_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn set_proposal_status(
        &self,
        proposal_id: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE proposals
            SET status = ?, updated_at = ?
            WHERE proposal_id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(at)
        .bind(proposal_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reject_pending_proposals(
        &self,
        request_id: &str,
        except: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE proposals
            SET status = 'rejected', updated_at = ?1
            WHERE request_id = ?2
              AND status = 'pending'
              AND (?3 IS NULL OR proposal_id <> ?3)
            "#,
        )
        .bind(at)
        .bind(request_id)
        .bind(except)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_pending_proposals(&self, request_id: &str) -> Result<i64, CoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM proposals WHERE request_id = ? AND status = 'pending'",
        )
        .bind(request_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn insert_payment(&self, payment: &NewPayment) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, request_id, method, status,
                amount_cents, platform_cents, driver_cents, created_at
            )
            VALUES (?, ?, ?, 'pending', ?, ?, ?, ?)
            "#,
        )
        .bind(&payment.payment_id)
        .bind(&payment.request_id)
        .bind(payment.method.as_str())
        .bind(payment.amount_cents)
        .bind(payment.platform_cents)
        .bind(payment.driver_cents)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attach_charge(&self, payment_id: &str, charge: &Charge) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            UPDATE payments
            SET provider_ref = ?, pix_payload = ?, checkout_url = ?
            WHERE payment_id = ?
            "#,
        )
        .bind(&charge.provider_ref)
        .bind(&charge.pix_payload)
        .bind(&charge.checkout_url)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_live_payment(&self, request_id: &str) -> Result<Option<PaymentRecord>, CoreError> {
        let record = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT * FROM payments
            WHERE request_id = ?
              AND status IN ('pending', 'confirmed')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_payment_by_provider_ref(
        &self,
        provider_ref: &str,
    ) -> Result<Option<PaymentRecord>, CoreError> {
        let record =
            sqlx::query_as::<_, PaymentRecord>("SELECT * FROM payments WHERE provider_ref = ?")
                .bind(provider_ref)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    async fn set_payment_status(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = ?1,
                confirmed_at = CASE WHEN ?1 = 'confirmed' THEN ?2 ELSE confirmed_at END
            WHERE payment_id = ?3 AND status = ?4
            "#,
        )
        .bind(to.as_str())
        .bind(at)
        .bind(payment_id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_refund(
        &self,
        payment_id: &str,
        refunded_cents: i64,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'refunded', refunded_cents = ?
            WHERE payment_id = ? AND status = 'confirmed'
            "#,
        )
        .bind(refunded_cents)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn append_trip_location(
        &self,
        request_id: &str,
        driver_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO trip_locations (request_id, driver_id, lat, lng, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id)
        .bind(driver_id)
        .bind(point.lat)
        .bind(point.lng)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_trip_locations(
        &self,
        request_id: &str,
        limit: i64,
    ) -> Result<Vec<TripLocationRecord>, CoreError> {
        let records = sqlx::query_as::<_, TripLocationRecord>(
            r#"
            SELECT * FROM trip_locations
            WHERE request_id = ?
            ORDER BY recorded_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(request_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn insert_event(&self, event: &NewRequestEvent) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO request_events (request_id, from_status, to_status, actor_id, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.request_id)
        .bind(event.from_status.map(|s| s.as_str()))
        .bind(event.to_status.as_str())
        .bind(&event.actor_id)
        .bind(&event.note)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_events(&self, request_id: &str) -> Result<Vec<RequestEventRecord>, CoreError> {
        let records = sqlx::query_as::<_, RequestEventRecord>(
            "SELECT * FROM request_events WHERE request_id = ? ORDER BY id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");

        MIGRATOR.run(&pool).await.expect("Failed to run migrations");

        pool
    }

    async fn seeded() -> SqlitePersistence {
        let persistence = SqlitePersistence::new(test_pool().await);
        let now = Utc::now();
        persistence
            .upsert_user("cust-1", Role::Customer, "Ana", Some("+5511900000001"), now)
            .await
            .unwrap();
        persistence
            .upsert_user("drv-1", Role::Driver, "Bruno", Some("+5511900000002"), now)
            .await
            .unwrap();
        persistence
            .upsert_user("drv-2", Role::Driver, "Carla", None, now)
            .await
            .unwrap();
        persistence
    }

    fn new_request(request_id: &str, created_at: DateTime<Utc>) -> NewRequest {
        NewRequest {
            request_id: request_id.to_string(),
            customer_id: "cust-1".to_string(),
            pickup: GeoPoint::new(-23.55, -46.63),
            pickup_address: "Av. Paulista, 1000".to_string(),
            dropoff: GeoPoint::new(-23.60, -46.70),
            dropoff_address: "Oficina do Zé".to_string(),
            vehicle: "Fiat Uno ABC1D23".to_string(),
            notes: None,
            distance_km: 8.2,
            created_at,
            expires_at: created_at + Duration::minutes(15),
        }
    }

    fn new_proposal(request_id: &str, driver_id: &str, price: i64) -> NewProposal {
        NewProposal {
            proposal_id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            driver_id: driver_id.to_string(),
            price_cents: price,
            eta_minutes: 25,
            message: None,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_user_keeps_role() {
        let persistence = seeded().await;

        let user = persistence
            .upsert_user("cust-1", Role::Admin, "Ana Maria", None, Utc::now())
            .await
            .unwrap();

        assert_eq!(user.role().unwrap(), Role::Customer);
        assert_eq!(user.name, "Ana Maria");
        assert_eq!(user.phone, None);
    }

    #[tokio::test]
    async fn test_list_drivers_in_box_requires_approval_and_availability() {
        let persistence = seeded().await;
        let near = GeoPoint::new(-23.56, -46.64);
        let bbox = BoundingBox::around(GeoPoint::new(-23.55, -46.63), 10.0);

        for driver in ["drv-1", "drv-2"] {
            persistence
                .set_driver_location(driver, near, Utc::now())
                .await
                .unwrap();
        }
        persistence.set_driver_available("drv-1", true).await.unwrap();
        persistence.set_driver_available("drv-2", true).await.unwrap();
        assert!(persistence.approve_driver("drv-1", Some("wal_1")).await.unwrap());

        let drivers = persistence.list_drivers_in_box(&bbox).await.unwrap();
        let ids: Vec<_> = drivers.iter().map(|d| d.user_id.as_str()).collect();
        assert_eq!(ids, vec!["drv-1"]);
        assert_eq!(drivers[0].payout_wallet_id.as_deref(), Some("wal_1"));
        assert_eq!(drivers[0].location(), Some(near));
    }

    #[tokio::test]
    async fn test_approve_driver_rejects_customers() {
        let persistence = seeded().await;
        assert!(!persistence.approve_driver("cust-1", None).await.unwrap());
        assert!(!persistence.approve_driver("ghost", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_and_get_request() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();

        let request = persistence.get_request("req-1").await.unwrap().unwrap();
        assert_eq!(request.status().unwrap(), RequestStatus::Pending);
        assert_eq!(request.customer_id, "cust-1");
        assert_eq!(request.customer_fee_cents, 0);
        assert!(request.driver_id.is_none());
        assert!(persistence.get_request("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();

        let moved = persistence
            .transition_request("req-1", RequestStatus::Pending, RequestStatus::Proposed, now)
            .await
            .unwrap();
        assert!(moved);

        // Second attempt from the stale status loses
        let moved_again = persistence
            .transition_request("req-1", RequestStatus::Pending, RequestStatus::Proposed, now)
            .await
            .unwrap();
        assert!(!moved_again);
    }

    #[tokio::test]
    async fn test_transition_stamps_timestamps() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();
        persistence
            .transition_request("req-1", RequestStatus::Pending, RequestStatus::Expired, now)
            .await
            .unwrap();

        let request = persistence.get_request("req-1").await.unwrap().unwrap();
        assert_eq!(request.status, "expired");
        assert!(request.closed_at.is_some());
        assert!(request.paid_at.is_none());
    }

    #[tokio::test]
    async fn test_assign_proposal_copies_terms() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();
        let proposal = persistence
            .upsert_proposal(&new_proposal("req-1", "drv-1", 18_000))
            .await
            .unwrap();

        // Still pending: assignment requires 'proposed'
        assert!(!persistence.assign_proposal("req-1", &proposal, now).await.unwrap());

        persistence
            .transition_request("req-1", RequestStatus::Pending, RequestStatus::Proposed, now)
            .await
            .unwrap();
        assert!(persistence.assign_proposal("req-1", &proposal, now).await.unwrap());

        let request = persistence.get_request("req-1").await.unwrap().unwrap();
        assert_eq!(request.status().unwrap(), RequestStatus::Accepted);
        assert!(request.is_assigned_to("drv-1"));
        assert_eq!(request.price_cents, Some(18_000));
        assert_eq!(request.eta_minutes, Some(25));
        assert_eq!(request.accepted_proposal_id, Some(proposal.proposal_id));
    }

    #[tokio::test]
    async fn test_cancel_request_records_fees() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();

        let cancellation = CancellationRecord {
            cancelled_by: "customer".to_string(),
            reason: Some("found a ride".to_string()),
            customer_fee_cents: 0,
            driver_penalty_cents: 0,
        };
        assert!(
            !persistence
                .cancel_request("req-1", RequestStatus::Proposed, &cancellation, now)
                .await
                .unwrap()
        );
        assert!(
            persistence
                .cancel_request("req-1", RequestStatus::Pending, &cancellation, now)
                .await
                .unwrap()
        );

        let request = persistence.get_request("req-1").await.unwrap().unwrap();
        assert_eq!(request.status().unwrap(), RequestStatus::Cancelled);
        assert_eq!(request.cancelled_by.as_deref(), Some("customer"));
        assert_eq!(request.cancel_reason.as_deref(), Some("found a ride"));
    }

    #[tokio::test]
    async fn test_list_expired_open_requests() {
        let persistence = seeded().await;
        let old = Utc::now() - Duration::hours(1);
        let fresh = Utc::now();
        persistence.insert_request(&new_request("old", old)).await.unwrap();
        persistence.insert_request(&new_request("fresh", fresh)).await.unwrap();

        let expired = persistence
            .list_expired_open_requests(Utc::now(), 10)
            .await
            .unwrap();
        let ids: Vec<_> = expired.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[tokio::test]
    async fn test_list_open_requests_in_box_skips_expired_and_far() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("near", now)).await.unwrap();
        persistence
            .insert_request(&new_request("stale", now - Duration::hours(1)))
            .await
            .unwrap();
        let mut far = new_request("far", now);
        far.pickup = GeoPoint::new(-22.90, -43.17);
        persistence.insert_request(&far).await.unwrap();

        let bbox = BoundingBox::around(GeoPoint::new(-23.55, -46.63), 20.0);
        let open = persistence.list_open_requests_in_box(&bbox, now).await.unwrap();
        let ids: Vec<_> = open.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["near"]);
    }

    #[tokio::test]
    async fn test_upsert_proposal_refreshes_pending_and_withdrawn() {
        let persistence = seeded().await;
        persistence
            .insert_request(&new_request("req-1", Utc::now()))
            .await
            .unwrap();

        let first = persistence
            .upsert_proposal(&new_proposal("req-1", "drv-1", 20_000))
            .await
            .unwrap();
        let second = persistence
            .upsert_proposal(&new_proposal("req-1", "drv-1", 17_500))
            .await
            .unwrap();
        assert_eq!(first.proposal_id, second.proposal_id);
        assert_eq!(second.price_cents, 17_500);

        persistence
            .set_proposal_status(
                &second.proposal_id,
                ProposalStatus::Pending,
                ProposalStatus::Withdrawn,
                Utc::now(),
            )
            .await
            .unwrap();
        let third = persistence
            .upsert_proposal(&new_proposal("req-1", "drv-1", 16_000))
            .await
            .unwrap();
        assert_eq!(third.status().unwrap(), ProposalStatus::Pending);
        assert_eq!(third.price_cents, 16_000);
    }

    #[tokio::test]
    async fn test_upsert_proposal_does_not_revive_rejected() {
        let persistence = seeded().await;
        persistence
            .insert_request(&new_request("req-1", Utc::now()))
            .await
            .unwrap();
        persistence
            .upsert_proposal(&new_proposal("req-1", "drv-1", 20_000))
            .await
            .unwrap();
        persistence
            .reject_pending_proposals("req-1", None, Utc::now())
            .await
            .unwrap();

        let again = persistence
            .upsert_proposal(&new_proposal("req-1", "drv-1", 10_000))
            .await
            .unwrap();
        assert_eq!(again.status().unwrap(), ProposalStatus::Rejected);
        assert_eq!(again.price_cents, 20_000);
    }

    #[tokio::test]
    async fn test_reject_pending_except_winner() {
        let persistence = seeded().await;
        persistence
            .insert_request(&new_request("req-1", Utc::now()))
            .await
            .unwrap();
        let winner = persistence
            .upsert_proposal(&new_proposal("req-1", "drv-1", 20_000))
            .await
            .unwrap();
        persistence
            .upsert_proposal(&new_proposal("req-1", "drv-2", 22_000))
            .await
            .unwrap();
        assert_eq!(persistence.count_pending_proposals("req-1").await.unwrap(), 2);

        let rejected = persistence
            .reject_pending_proposals("req-1", Some(&winner.proposal_id), Utc::now())
            .await
            .unwrap();
        assert_eq!(rejected, 1);
        assert_eq!(persistence.count_pending_proposals("req-1").await.unwrap(), 1);

        let proposals = persistence.list_proposals("req-1").await.unwrap();
        assert_eq!(proposals[0].proposal_id, winner.proposal_id);
        assert_eq!(proposals[1].status, "rejected");
    }

    #[tokio::test]
    async fn test_payment_lifecycle() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();

        persistence
            .insert_payment(&NewPayment {
                payment_id: "pay-1".to_string(),
                request_id: "req-1".to_string(),
                method: crate::payment::PaymentMethod::Pix,
                amount_cents: 20_000,
                platform_cents: 3_000,
                driver_cents: 17_000,
                created_at: now,
            })
            .await
            .unwrap();
        persistence
            .attach_charge(
                "pay-1",
                &Charge {
                    provider_ref: "gw_123".to_string(),
                    pix_payload: Some("000201...".to_string()),
                    checkout_url: None,
                },
            )
            .await
            .unwrap();

        let live = persistence.get_live_payment("req-1").await.unwrap().unwrap();
        assert_eq!(live.payment_id, "pay-1");
        assert_eq!(live.status().unwrap(), PaymentStatus::Pending);

        let by_ref = persistence
            .get_payment_by_provider_ref("gw_123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.payment_id, "pay-1");

        assert!(
            persistence
                .set_payment_status("pay-1", PaymentStatus::Pending, PaymentStatus::Confirmed, now)
                .await
                .unwrap()
        );
        assert!(
            !persistence
                .set_payment_status("pay-1", PaymentStatus::Pending, PaymentStatus::Confirmed, now)
                .await
                .unwrap()
        );

        assert!(persistence.record_refund("pay-1", 15_000).await.unwrap());
        let refunded = persistence
            .get_payment_by_provider_ref("gw_123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refunded.status().unwrap(), PaymentStatus::Refunded);
        assert_eq!(refunded.refunded_cents, 15_000);
        assert!(refunded.confirmed_at.is_some());
        assert!(persistence.get_live_payment("req-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trip_locations_newest_first() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();

        for i in 0..3 {
            persistence
                .append_trip_location(
                    "req-1",
                    "drv-1",
                    GeoPoint::new(-23.5 - i as f64 * 0.01, -46.6),
                    now + Duration::seconds(i),
                )
                .await
                .unwrap();
        }

        let track = persistence.list_trip_locations("req-1", 2).await.unwrap();
        assert_eq!(track.len(), 2);
        assert!(track[0].recorded_at > track[1].recorded_at);
        assert!((track[0].lat - -23.52).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_events_oldest_first() {
        let persistence = seeded().await;
        let now = Utc::now();
        persistence.insert_request(&new_request("req-1", now)).await.unwrap();

        for (from, to) in [
            (None, RequestStatus::Pending),
            (Some(RequestStatus::Pending), RequestStatus::Proposed),
        ] {
            persistence
                .insert_event(&NewRequestEvent {
                    request_id: "req-1".to_string(),
                    from_status: from,
                    to_status: to,
                    actor_id: Some("cust-1".to_string()),
                    note: None,
                    created_at: now,
                })
                .await
                .unwrap();
        }

        let events = persistence.list_events("req-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].from_status, None);
        assert_eq!(events[1].to_status, "proposed");
    }

    #[tokio::test]
    async fn test_health_check() {
        let persistence = SqlitePersistence::new(test_pool().await);
        assert!(persistence.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_from_path_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("reboque.db");

        let persistence = SqlitePersistence::from_path(&path).await.unwrap();
        assert!(path.exists());
        assert!(persistence.health_check().await.unwrap());
    }
}
