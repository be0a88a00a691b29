// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request lifecycle state machine.
//!
//! Every status change a handler performs goes through [`can_transition`];
//! the persistence layer then applies it as a compare-and-set on the previous
//! status.

use serde::{Deserialize, Serialize};

/// A status string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseStatusError {
    kind: &'static str,
    value: String,
}

impl ParseStatusError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lifecycle status of a tow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created, waiting for the first proposal.
    Pending,
    /// At least one pending proposal exists.
    Proposed,
    /// Customer accepted a proposal, payment not confirmed yet.
    Accepted,
    /// Payment confirmed, driver dispatched.
    Paid,
    /// Driver driving to the pickup point.
    EnRoute,
    /// Driver at the pickup point.
    Arrived,
    /// Vehicle loaded, being towed.
    InService,
    /// Trip finished.
    Completed,
    /// Cancelled by a participant or by the system.
    Cancelled,
    /// Nobody was accepted before the request TTL elapsed.
    Expired,
}

impl RequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [RequestStatus; 10] = [
        Self::Pending,
        Self::Proposed,
        Self::Accepted,
        Self::Paid,
        Self::EnRoute,
        Self::Arrived,
        Self::InService,
        Self::Completed,
        Self::Cancelled,
        Self::Expired,
    ];

    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Proposed => "proposed",
            Self::Accepted => "accepted",
            Self::Paid => "paid",
            Self::EnRoute => "en_route",
            Self::Arrived => "arrived",
            Self::InService => "in_service",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse a status from its database representation.
    pub fn parse(s: &str) -> Result<Self, ParseStatusError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError::new("request status", s))
    }

    /// Completed, cancelled and expired requests never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Open requests accept proposals and are subject to TTL expiry.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Proposed)
    }

    /// A driver is assigned and the trip is being carried out.
    pub fn is_trip_active(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::EnRoute | Self::Arrived | Self::InService
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from -> to` is a legal lifecycle edge.
pub fn can_transition(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;

    if from.is_terminal() {
        return false;
    }

    match (from, to) {
        (Pending, Proposed) | (Proposed, Pending) => true,
        (Proposed, Accepted) => true,
        (Accepted, Paid) => true,
        (Paid, EnRoute) | (EnRoute, Arrived) | (Arrived, InService) | (InService, Completed) => {
            true
        }
        (Pending | Proposed, Expired) => true,
        (_, Cancelled) => true,
        _ => false,
    }
}

/// Driver-reported trip progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStep {
    /// Leaving for the pickup point.
    EnRoute,
    /// At the pickup point.
    Arrived,
    /// Towing.
    InService,
    /// Dropped off.
    Completed,
}

impl TripStep {
    /// The request status this step moves to.
    pub fn target(&self) -> RequestStatus {
        match self {
            Self::EnRoute => RequestStatus::EnRoute,
            Self::Arrived => RequestStatus::Arrived,
            Self::InService => RequestStatus::InService,
            Self::Completed => RequestStatus::Completed,
        }
    }

    /// The only status this step may be applied from.
    pub fn required_from(&self) -> RequestStatus {
        match self {
            Self::EnRoute => RequestStatus::Paid,
            Self::Arrived => RequestStatus::EnRoute,
            Self::InService => RequestStatus::Arrived,
            Self::Completed => RequestStatus::InService,
        }
    }
}

/// Status of a driver's proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Waiting for the customer.
    Pending,
    /// Chosen by the customer.
    Accepted,
    /// Another proposal won, or the request closed.
    Rejected,
    /// Pulled back by the driver.
    Withdrawn,
}

impl ProposalStatus {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Parse a status from its database representation.
    pub fn parse(s: &str) -> Result<Self, ParseStatusError> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(ParseStatusError::new("proposal status", other)),
        }
    }
}

/// Status of a payment charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Charge created, waiting for the gateway.
    Pending,
    /// Gateway confirmed the funds.
    Confirmed,
    /// Gateway reported a failure; the customer may retry.
    Failed,
    /// Money returned (fully or minus the cancellation fee).
    Refunded,
}

impl PaymentStatus {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse a status from its database representation.
    pub fn parse(s: &str) -> Result<Self, ParseStatusError> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(ParseStatusError::new("payment status", other)),
        }
    }
}

/// Account role carried in the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Requests tows.
    Customer,
    /// Partner tow-truck driver.
    Driver,
    /// Platform operator.
    Admin,
}

impl Role {
    /// Returns the string representation stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Driver => "driver",
            Self::Admin => "admin",
        }
    }

    /// Parse a role from its database representation.
    pub fn parse(s: &str) -> Result<Self, ParseStatusError> {
        match s {
            "customer" => Ok(Self::Customer),
            "driver" => Ok(Self::Driver),
            "admin" => Ok(Self::Admin),
            other => Err(ParseStatusError::new("role", other)),
        }
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// User ID (token subject).
    pub user_id: String,
    /// Role from the token.
    pub role: Role,
}

impl Actor {
    /// Build an actor.
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// Whether this actor is a platform admin.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
