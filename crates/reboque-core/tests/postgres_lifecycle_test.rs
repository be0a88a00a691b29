// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request lifecycle against a real PostgreSQL database.
//!
//! Requires `TEST_DATABASE_URL`; skipped otherwise.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reboque_core::dispatch_handlers::{
    CreateTowRequest, DispatchPolicy, DispatchState, ProfileInput, SubmitProposal,
    accept_proposal, approve_driver, create_request, set_availability, submit_proposal,
    update_driver_location, upsert_profile,
};
use reboque_core::expiry::{ExpirySweeper, ExpirySweeperConfig};
use reboque_core::geo::GeoPoint;
use reboque_core::notify::Notifier;
use reboque_core::payment::{
    Charge, ChargeRequest, PaymentEvent, PaymentGateway, PaymentMethod, PaymentWebhook,
};
use reboque_core::persistence::PostgresPersistence;
use reboque_core::status::TripStep;
use reboque_core::trip_handlers::{
    AdvanceTrip, CancelInput, StartPayment, advance_trip, cancel_request, handle_payment_webhook,
    start_payment,
};
use reboque_core::{Actor, Role};
use sqlx::PgPool;
use uuid::Uuid;

/// Helper macro to skip tests if database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// Get a database pool for testing
async fn get_test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    reboque_core::migrations::run_postgres(&pool).await.ok()?;
    Some(pool)
}

#[derive(Default)]
struct FakeGateway {
    refunds: Mutex<Vec<i64>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> reboque_core::Result<Charge> {
        Ok(Charge {
            provider_ref: format!("ch_{}", request.payment_id),
            pix_payload: None,
            checkout_url: Some("https://pay.example.com/checkout".to_string()),
        })
    }

    async fn refund(&self, _provider_ref: &str, amount_cents: i64) -> reboque_core::Result<()> {
        self.refunds.lock().unwrap().push(amount_cents);
        Ok(())
    }

    async fn cancel_charge(&self, _provider_ref: &str) -> reboque_core::Result<()> {
        Ok(())
    }
}

struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn send(&self, _phone: &str, _message: &str) -> reboque_core::Result<()> {
        Ok(())
    }
}

struct Fixture {
    state: Arc<DispatchState>,
    gateway: Arc<FakeGateway>,
    customer: Actor,
    driver: Actor,
}

/// Fresh users per test so runs do not collide in a shared database.
async fn fixture(pool: PgPool) -> Fixture {
    let gateway = Arc::new(FakeGateway::default());
    let state = Arc::new(DispatchState::new(
        Arc::new(PostgresPersistence::new(pool)),
        gateway.clone(),
        Arc::new(SilentNotifier),
        DispatchPolicy::default(),
    ));

    let suffix = Uuid::new_v4().simple().to_string();
    let customer = Actor::new(format!("cust-{suffix}"), Role::Customer);
    let driver = Actor::new(format!("drv-{suffix}"), Role::Driver);
    let admin = Actor::new(format!("adm-{suffix}"), Role::Admin);

    for actor in [&customer, &driver] {
        upsert_profile(
            &state,
            actor,
            ProfileInput {
                name: actor.user_id.clone(),
                phone: None,
            },
        )
        .await
        .unwrap();
    }
    approve_driver(&state, &admin, &driver.user_id, Default::default())
        .await
        .unwrap();
    update_driver_location(&state, &driver, GeoPoint::new(-23.54, -46.63))
        .await
        .unwrap();
    set_availability(&state, &driver, true).await.unwrap();

    Fixture {
        state,
        gateway,
        customer,
        driver,
    }
}

async fn accepted(f: &Fixture) -> String {
    let created = create_request(
        &f.state,
        &f.customer,
        CreateTowRequest {
            pickup: GeoPoint::new(-23.55, -46.63),
            pickup_address: "Rua A, 1".to_string(),
            dropoff: GeoPoint::new(-23.60, -46.70),
            dropoff_address: "Rua B, 2".to_string(),
            vehicle: "VW Gol".to_string(),
            notes: None,
        },
    )
    .await
    .unwrap();
    let request_id = created.request.request_id;

    let proposal = submit_proposal(
        &f.state,
        &f.driver,
        &request_id,
        SubmitProposal {
            price_cents: 15_000,
            eta_minutes: 25,
            message: None,
        },
    )
    .await
    .unwrap();
    accept_proposal(&f.state, &f.customer, &request_id, &proposal.proposal_id)
        .await
        .unwrap();
    request_id
}

#[tokio::test]
async fn test_paid_trip_runs_to_completion() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: failed to connect to database");
        return;
    };
    let f = fixture(pool).await;
    let request_id = accepted(&f).await;

    let payment = start_payment(
        &f.state,
        &f.customer,
        &request_id,
        StartPayment {
            method: PaymentMethod::Card,
        },
    )
    .await
    .unwrap();
    assert_eq!(payment.platform_cents + payment.driver_cents, 15_000);

    let confirmed = handle_payment_webhook(
        &f.state,
        PaymentWebhook {
            provider_ref: payment.provider_ref.clone().unwrap(),
            event: PaymentEvent::Confirmed,
        },
    )
    .await
    .unwrap();
    assert_eq!(confirmed.status, "confirmed");

    let mut last = None;
    for step in [
        TripStep::EnRoute,
        TripStep::Arrived,
        TripStep::InService,
        TripStep::Completed,
    ] {
        last = Some(
            advance_trip(&f.state, &f.driver, &request_id, AdvanceTrip { step })
                .await
                .unwrap(),
        );
    }
    let done = last.unwrap();
    assert_eq!(done.status, "completed");
    assert!(done.completed_at.is_some());
    assert!(done.paid_at.is_some());
}

#[tokio::test]
async fn test_driver_cancel_refunds_customer() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: failed to connect to database");
        return;
    };
    let f = fixture(pool).await;
    let request_id = accepted(&f).await;

    let payment = start_payment(
        &f.state,
        &f.customer,
        &request_id,
        StartPayment {
            method: PaymentMethod::Pix,
        },
    )
    .await
    .unwrap();
    handle_payment_webhook(
        &f.state,
        PaymentWebhook {
            provider_ref: payment.provider_ref.unwrap(),
            event: PaymentEvent::Confirmed,
        },
    )
    .await
    .unwrap();

    let result = cancel_request(
        &f.state,
        &f.driver,
        &request_id,
        CancelInput {
            reason: Some("truck broke down".to_string()),
        },
    )
    .await
    .unwrap();

    assert_eq!(result.request.status, "cancelled");
    assert_eq!(result.request.cancelled_by.as_deref(), Some("driver"));
    assert_eq!(result.outcome.refund_cents, 15_000);
    assert!(result.outcome.driver_penalty_cents > 0);
    assert_eq!(*f.gateway.refunds.lock().unwrap(), vec![15_000]);
}

#[tokio::test]
async fn test_sweeper_leaves_fresh_requests_alone() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: failed to connect to database");
        return;
    };
    let f = fixture(pool).await;
    let request_id = accepted(&f).await;

    let sweeper = ExpirySweeper::new(f.state.clone(), ExpirySweeperConfig::default());
    sweeper.sweep_once().await.unwrap();

    let request = f
        .state
        .persistence
        .get_request(&request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.status, "accepted");
}

#[tokio::test]
async fn test_capture_after_cancel_is_refunded() {
    skip_if_no_db!();
    let Some(pool) = get_test_pool().await else {
        eprintln!("Skipping test: failed to connect to database");
        return;
    };
    let f = fixture(pool).await;
    let request_id = accepted(&f).await;

    let payment = start_payment(
        &f.state,
        &f.customer,
        &request_id,
        StartPayment {
            method: PaymentMethod::Pix,
        },
    )
    .await
    .unwrap();
    cancel_request(&f.state, &f.customer, &request_id, CancelInput::default())
        .await
        .unwrap();

    let late = handle_payment_webhook(
        &f.state,
        PaymentWebhook {
            provider_ref: payment.provider_ref.unwrap(),
            event: PaymentEvent::Confirmed,
        },
    )
    .await
    .unwrap();

    assert_eq!(late.status, "refunded");
    assert_eq!(late.refunded_cents, 15_000);
    assert_eq!(*f.gateway.refunds.lock().unwrap(), vec![15_000]);
}
