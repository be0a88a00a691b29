// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reboque Core - Tow Dispatch Engine
//!
//! This crate holds the dispatch logic of the reboque tow marketplace:
//! the request lifecycle, proposal matching, payment split, cancellation fees
//! and the background expiry sweep. It persists everything through the
//! [`persistence::Persistence`] trait (SQLite or PostgreSQL) and talks to the
//! outside world through two collaborator traits,
//! [`payment::PaymentGateway`] and [`notify::Notifier`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         reboque-server (axum)                           │
//! │              JWT auth, JSON bodies, webhook signatures                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           reboque-core                                  │
//! │   dispatch_handlers / trip_handlers            ExpirySweeper            │
//! │   status · penalty · geo · payment · notify                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                        │                          │
//!           ▼                        ▼                          ▼
//! ┌───────────────────┐  ┌───────────────────────┐  ┌───────────────────────┐
//! │ SQLite/PostgreSQL │  │    PaymentGateway     │  │       Notifier        │
//! │   (Persistence)   │  │  (card / Pix charges) │  │  (WhatsApp messages)  │
//! └───────────────────┘  └───────────────────────┘  └───────────────────────┘
//! ```
//!
//! # Request Lifecycle
//!
//! ```text
//!            first proposal          customer accepts       payment confirmed
//! pending ─────────────────▶ proposed ─────────────▶ accepted ─────────────▶ paid
//!    ▲  │                      │  │                                          │
//!    │  │ ttl                  │  │ ttl                                      ▼
//!    │  └──────▶ expired ◀─────┘  │                                      en_route
//!    │                            │                                          │
//!    └────────────────────────────┘                                          ▼
//!          last proposal withdrawn                                        arrived
//!                                                                            │
//!                                                                            ▼
//!   any non-terminal status ──────▶ cancelled                            in_service
//!                                                                            │
//!                                                                            ▼
//!                                                                        completed
//! ```
//!
//! Every status change is a compare-and-set against the previous status and
//! appends one row to the request event log. A lost race surfaces as
//! [`CoreError::InvalidRequestState`], never as a double transition.
//!
//! ## Operations
//!
//! | Operation | Caller | Description |
//! |-----------|--------|-------------|
//! | `upsert_profile` | any | Store name and WhatsApp number |
//! | `approve_driver` | admin | Let a driver receive alerts and propose |
//! | `set_availability` | driver | Toggle new-request alerts |
//! | `update_driver_location` | driver | Last position, appended to the active trip track |
//! | `create_request` | customer | Open a request and alert drivers in range |
//! | `submit_proposal` | driver | Offer price and ETA |
//! | `withdraw_proposal` | driver | Take an offer back |
//! | `accept_proposal` | customer | Pick a driver |
//! | `start_payment` | customer | Open a card or Pix charge with the split |
//! | `handle_payment_webhook` | gateway | Confirm or fail a charge |
//! | `advance_trip` | driver | `en_route → arrived → in_service → completed` |
//! | `cancel_request` | customer, driver, admin | Cancel with fee and refund |
//! | `get_tracking` / `list_events` | parties | Live track and audit log |
//!
//! # Cancellation Fees
//!
//! See [`penalty`]. Customers cancel free of charge before acceptance and
//! during a grace period after it; the fee then ramps per minute up to a cap,
//! decays once the driver is late on the quoted ETA, and is flat once the
//! driver is on site. Drivers who abandon an accepted job owe a penalty and the
//! customer is refunded in full.
//!
//! # Modules
//!
//! - [`status`]: lifecycle enums and the transition table
//! - [`penalty`]: cancellation fee computation
//! - [`geo`]: haversine distance and bounding-box prefilter
//! - [`payment`]: payment split and gateway trait
//! - [`notify`]: notifier trait and message texts
//! - [`persistence`]: storage trait with SQLite and PostgreSQL backends
//! - [`dispatch_handlers`] / [`trip_handlers`]: the operations above
//! - [`expiry`]: background sweeper

#![deny(missing_docs)]

/// Dispatch handlers: profiles, drivers, requests and proposals.
pub mod dispatch_handlers;

/// Error types with stable error codes.
pub mod error;

/// Background sweeper for request TTL and payment timeouts.
pub mod expiry;

/// Great-circle distance and nearby search.
pub mod geo;

/// Embedded database migrations.
pub mod migrations;

/// WhatsApp notifications.
pub mod notify;

/// Payment split and gateway trait.
pub mod payment;

/// Cancellation fee computation.
pub mod penalty;

/// Persistence trait and backends.
pub mod persistence;

/// Request lifecycle state machine.
pub mod status;

/// Trip handlers: payment, progress, cancellation and tracking.
pub mod trip_handlers;

pub use error::{CoreError, Result};
pub use status::{Actor, RequestStatus, Role};
