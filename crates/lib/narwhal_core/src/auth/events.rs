//! Authentication events.
//!
//! Publishing is fire-and-forget: a publisher must not block and its
//! failures never reach the caller. Delivery is at-most-once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Event emitted by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum AuthEvent {
    #[serde(rename = "user.logged_in")]
    LoggedIn {
        user_id: Uuid,
        session_id: Uuid,
        device: String,
        remote_addr: String,
        at: DateTime<Utc>,
    },
    #[serde(rename = "user.logged_out")]
    LoggedOut {
        user_id: Uuid,
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    #[serde(rename = "user.logged_out_all")]
    LoggedOutAll {
        user_id: Uuid,
        sessions: u64,
        at: DateTime<Utc>,
    },
    #[serde(rename = "user.password_changed")]
    PasswordChanged { user_id: Uuid, at: DateTime<Utc> },
    #[serde(rename = "user.activated")]
    Activated { user_id: Uuid, at: DateTime<Utc> },
    #[serde(rename = "user.deactivated")]
    Deactivated { user_id: Uuid, at: DateTime<Utc> },
    #[serde(rename = "user.created")]
    Created {
        user_id: Uuid,
        username: String,
        at: DateTime<Utc>,
    },
    #[serde(rename = "user.password_reset_requested")]
    PasswordResetRequested { user_id: Uuid, at: DateTime<Utc> },
}

impl AuthEvent {
    /// Dotted event name, e.g. `user.logged_in`.
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::LoggedIn { .. } => "user.logged_in",
            AuthEvent::LoggedOut { .. } => "user.logged_out",
            AuthEvent::LoggedOutAll { .. } => "user.logged_out_all",
            AuthEvent::PasswordChanged { .. } => "user.password_changed",
            AuthEvent::Activated { .. } => "user.activated",
            AuthEvent::Deactivated { .. } => "user.deactivated",
            AuthEvent::Created { .. } => "user.created",
            AuthEvent::PasswordResetRequested { .. } => "user.password_reset_requested",
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            AuthEvent::LoggedIn { user_id, .. }
            | AuthEvent::LoggedOut { user_id, .. }
            | AuthEvent::LoggedOutAll { user_id, .. }
            | AuthEvent::PasswordChanged { user_id, .. }
            | AuthEvent::Activated { user_id, .. }
            | AuthEvent::Deactivated { user_id, .. }
            | AuthEvent::Created { user_id, .. }
            | AuthEvent::PasswordResetRequested { user_id, .. } => *user_id,
        }
    }
}

/// Sink for authentication events.
pub trait EventPublisher: Send + Sync {
    /// Publish without blocking. Failures are swallowed by the publisher.
    fn publish(&self, event: AuthEvent);
}

/// Writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: AuthEvent) {
        info!(event = event.name(), user_id = %event.user_id(), "auth event");
    }
}

/// Fans events out to in-process subscribers over a broadcast channel.
///
/// With no subscribers, or when a subscriber lags, events are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<AuthEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: AuthEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "no event subscribers; dropped");
        }
    }
}
