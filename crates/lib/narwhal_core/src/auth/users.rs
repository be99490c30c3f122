//! User store interface and in-memory adapter.
//!
//! Usernames and emails reach the store already normalised (see
//! [`normalize_identifier`](super::normalize_identifier)); uniqueness is
//! enforced on the normalised values.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{NewUser, User};

/// Principal persistence required by the auth core.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a principal. Duplicate username or email is `Conflict`.
    async fn create(&self, user: NewUser) -> Result<User, AuthError>;

    async fn get(&self, id: Uuid) -> Result<User, AuthError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn count(&self) -> Result<i64, AuthError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError>;

    async fn update_profile(
        &self,
        id: Uuid,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, AuthError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AuthError>;

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;

    /// Persist a grant. Granting twice is a no-op.
    async fn grant_role(&self, id: Uuid, role: &str) -> Result<(), AuthError>;

    async fn revoke_role(&self, id: Uuid, role: &str) -> Result<(), AuthError>;

    /// Drop every grant of `role`, returning how many were removed.
    async fn revoke_role_everywhere(&self, role: &str) -> Result<u64, AuthError>;

    /// All `(user, role)` grants, for hydrating the policy engine.
    async fn list_grants(&self) -> Result<Vec<(Uuid, String)>, AuthError>;

    async fn delete(&self, id: Uuid) -> Result<(), AuthError>;
}

#[derive(Debug, Default)]
struct UserState {
    users: HashMap<Uuid, User>,
    by_username: HashMap<String, Uuid>,
    by_email: HashMap<String, Uuid>,
}

impl UserState {
    fn get_mut(&mut self, id: Uuid) -> Result<&mut User, AuthError> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| AuthError::NotFound(format!("user {id}")))
    }

    fn taken(&self, index: &HashMap<String, Uuid>, key: &str, owner: Uuid) -> bool {
        index.get(key).is_some_and(|id| *id != owner)
    }
}

/// In-memory user store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    state: RwLock<UserState>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> Result<User, AuthError> {
        let mut state = self.state.write().await;
        if state.by_username.contains_key(&new.username) {
            return Err(AuthError::Conflict(format!(
                "username '{}' already registered",
                new.username
            )));
        }
        if state.by_email.contains_key(&new.email) {
            return Err(AuthError::Conflict(format!(
                "email '{}' already registered",
                new.email
            )));
        }
        let roles: BTreeSet<String> = new.roles.into_iter().collect();
        let user = User {
            id: new.id,
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            is_active: true,
            is_verified: false,
            last_login_at: None,
            created_at: Utc::now(),
            roles: roles.into_iter().collect(),
        };
        state.by_username.insert(user.username.clone(), user.id);
        state.by_email.insert(user.email.clone(), user.id);
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> Result<User, AuthError> {
        self.state
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("user {id}")))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let state = self.state.read().await;
        Ok(state
            .by_username
            .get(username)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let state = self.state.read().await;
        Ok(state
            .by_email
            .get(email)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn count(&self) -> Result<i64, AuthError> {
        Ok(self.state.read().await.users.len() as i64)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        state.get_mut(id)?.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, AuthError> {
        let mut state = self.state.write().await;
        let current = state.get_mut(id)?.clone();
        if let Some(name) = username
            && state.taken(&state.by_username, name, id)
        {
            return Err(AuthError::Conflict(format!("username '{name}' already registered")));
        }
        if let Some(mail) = email
            && state.taken(&state.by_email, mail, id)
        {
            return Err(AuthError::Conflict(format!("email '{mail}' already registered")));
        }
        if let Some(name) = username {
            state.by_username.remove(&current.username);
            state.by_username.insert(name.to_string(), id);
        }
        if let Some(mail) = email {
            state.by_email.remove(&current.email);
            state.by_email.insert(mail.to_string(), id);
        }
        let user = state.get_mut(id)?;
        if let Some(name) = username {
            user.username = name.to_string();
        }
        if let Some(mail) = email {
            user.email = mail.to_string();
        }
        Ok(user.clone())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        state.get_mut(id)?.is_active = active;
        Ok(())
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        state.get_mut(id)?.last_login_at = Some(at);
        Ok(())
    }

    async fn grant_role(&self, id: Uuid, role: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        let user = state.get_mut(id)?;
        if let Err(pos) = user.roles.binary_search_by(|r| r.as_str().cmp(role)) {
            user.roles.insert(pos, role.to_string());
        }
        Ok(())
    }

    async fn revoke_role(&self, id: Uuid, role: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        state.get_mut(id)?.roles.retain(|r| r != role);
        Ok(())
    }

    async fn revoke_role_everywhere(&self, role: &str) -> Result<u64, AuthError> {
        let mut state = self.state.write().await;
        let mut removed = 0;
        for user in state.users.values_mut() {
            let before = user.roles.len();
            user.roles.retain(|r| r != role);
            removed += (before - user.roles.len()) as u64;
        }
        Ok(removed)
    }

    async fn list_grants(&self) -> Result<Vec<(Uuid, String)>, AuthError> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .flat_map(|u| u.roles.iter().map(move |r| (u.id, r.clone())))
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .remove(&id)
            .ok_or_else(|| AuthError::NotFound(format!("user {id}")))?;
        state.by_username.remove(&user.username);
        state.by_email.remove(&user.email);
        Ok(())
    }
}
