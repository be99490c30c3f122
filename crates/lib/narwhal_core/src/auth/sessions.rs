//! Session store interface and in-memory adapter.
//!
//! Sessions are looked up by the SHA-256 of their refresh token; the
//! plaintext token only ever exists on the client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::Session;

/// Durable refresh-token → principal bindings.
///
/// Misses are reported as [`AuthError::NotFound`], distinct from
/// infrastructure failures.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session. Refresh-token hashes are unique.
    async fn create(&self, session: Session) -> Result<Session, AuthError>;

    async fn by_refresh(&self, token_hash: &str) -> Result<Session, AuthError>;

    async fn by_id(&self, id: Uuid) -> Result<Session, AuthError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError>;

    /// Record last use.
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Replace the refresh-token hash iff it still equals `old_hash`.
    /// A mismatch (concurrent rotation) is `NotFound`.
    async fn rotate(&self, id: Uuid, old_hash: &str, new_hash: &str) -> Result<(), AuthError>;

    /// Delete one session. Deleting a missing session is not an error.
    async fn delete(&self, id: Uuid) -> Result<(), AuthError>;

    /// Delete all sessions of a principal, returning how many were removed.
    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AuthError>;

    /// Delete all sessions with `expires_at <= now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError>;
}

/// Reject sessions that are already expired at creation.
pub(crate) fn check_new_session(session: &Session) -> Result<(), AuthError> {
    if session.expires_at <= session.created_at {
        return Err(AuthError::BadRequest(
            "session expiry must be in the future".into(),
        ));
    }
    if session.refresh_token_hash.is_empty() {
        return Err(AuthError::BadRequest("refresh token hash is required".into()));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct SessionState {
    sessions: HashMap<Uuid, Session>,
    by_hash: HashMap<String, Uuid>,
}

impl SessionState {
    fn remove(&mut self, id: &Uuid) -> Option<Session> {
        let session = self.sessions.remove(id)?;
        self.by_hash.remove(&session.refresh_token_hash);
        Some(session)
    }

    fn remove_where(&mut self, pred: impl Fn(&Session) -> bool) -> u64 {
        let ids: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| pred(*s))
            .map(|s| s.id)
            .collect();
        for id in &ids {
            self.remove(id);
        }
        ids.len() as u64
    }
}

/// In-memory session store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    state: RwLock<SessionState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rows, expired or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session) -> Result<Session, AuthError> {
        check_new_session(&session)?;
        let mut state = self.state.write().await;
        if state.by_hash.contains_key(&session.refresh_token_hash) {
            return Err(AuthError::Conflict("refresh token already in use".into()));
        }
        if state.sessions.contains_key(&session.id) {
            return Err(AuthError::Conflict(format!("session {} exists", session.id)));
        }
        state
            .by_hash
            .insert(session.refresh_token_hash.clone(), session.id);
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn by_refresh(&self, token_hash: &str) -> Result<Session, AuthError> {
        let state = self.state.read().await;
        state
            .by_hash
            .get(token_hash)
            .and_then(|id| state.sessions.get(id))
            .cloned()
            .ok_or_else(|| AuthError::NotFound("session".into()))
    }

    async fn by_id(&self, id: Uuid) -> Result<Session, AuthError> {
        self.state
            .read()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("session {id}")))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AuthError::NotFound(format!("session {id}")))?;
        session.last_used_at = at;
        Ok(())
    }

    async fn rotate(&self, id: Uuid, old_hash: &str, new_hash: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if state.by_hash.contains_key(new_hash) {
            return Err(AuthError::Conflict("refresh token already in use".into()));
        }
        let session = state
            .sessions
            .get_mut(&id)
            .filter(|s| s.refresh_token_hash == old_hash)
            .ok_or_else(|| AuthError::NotFound(format!("session {id}")))?;
        session.refresh_token_hash = new_hash.to_string();
        state.by_hash.remove(old_hash);
        state.by_hash.insert(new_hash.to_string(), id);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        self.state.write().await.remove(&id);
        Ok(())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AuthError> {
        Ok(self
            .state
            .write()
            .await
            .remove_where(|s| s.user_id == user_id))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        Ok(self.state.write().await.remove_where(|s| s.is_expired_at(now)))
    }
}
