//! Authentication service: login, refresh, logout, token validation, and
//! principal administration.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{AuthEvent, EventPublisher};
use super::jwt::{TokenCodec, generate_refresh_token, hash_refresh_token};
use super::password::PasswordHasher;
use super::sessions::SessionStore;
use super::users::UserStore;
use super::{AuthError, normalize_identifier};
use crate::config::AuthConfig;
use crate::models::auth::{ClientInfo, NewUser, Session, TokenClaims, TokenPair, TokenType, User};
use crate::rbac::{ADMIN_ROLE, PolicyEngine, USER_ROLE};
use crate::uuid::{parse_id, uuidv7};

/// Shortest password accepted for new credentials.
pub const MIN_PASSWORD_LEN: usize = 8;

const BEARER: &str = "Bearer";

/// Orchestrates the password hasher, token codec, stores, and policy engine.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    policy: Arc<PolicyEngine>,
    events: Arc<dyn EventPublisher>,
    codec: TokenCodec,
    hasher: PasswordHasher,
    access_ttl: Duration,
    refresh_ttl: Duration,
    rotate_refresh_tokens: bool,
}

impl AuthService {
    /// Build the service from validated configuration.
    pub fn new(
        config: &AuthConfig,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        policy: Arc<PolicyEngine>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self, AuthError> {
        config
            .validate()
            .map_err(|e| AuthError::BadRequest(e.to_string()))?;
        let codec = TokenCodec::new(
            config.issuer.clone(),
            config.access_secret.as_bytes(),
            config.refresh_secret.as_bytes(),
        )?;
        let hasher = PasswordHasher::new(config.hash_cost)?;
        Ok(Self {
            users,
            sessions,
            policy,
            events,
            codec,
            hasher,
            access_ttl: config.access_ttl_chrono(),
            refresh_ttl: config.refresh_ttl_chrono(),
            rotate_refresh_tokens: config.rotate_refresh_tokens,
        })
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    // ── Login / refresh ───────────────────────────────────────────

    /// Authenticate by username or email and open a new session.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client: ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        let identifier = normalize_identifier(identifier);
        if identifier.is_empty() || password.is_empty() {
            return Err(AuthError::BadRequest(
                "identifier and password are required".into(),
            ));
        }

        let Some(user) = self.find_principal(&identifier).await? else {
            // Pay for one verification so unknown users cost the same as
            // wrong passwords.
            self.hasher.verify_async(password.to_string(), None).await?;
            debug!("Login for unknown principal");
            return Err(AuthError::InvalidCredentials);
        };
        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }
        let matched = self
            .hasher
            .verify_async(password.to_string(), Some(user.password_hash.clone()))
            .await?;
        if !matched {
            debug!(user_id = %user.id, "Login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if self.hasher.needs_rehash(&user.password_hash) {
            self.rehash(&user, password).await;
        }

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.refresh_ttl)
            .ok_or_else(|| AuthError::Internal("session expiry overflows".into()))?;
        let refresh_token = generate_refresh_token();
        let session = self
            .sessions
            .create(Session {
                id: uuidv7(),
                user_id: user.id,
                refresh_token_hash: hash_refresh_token(&refresh_token),
                device: client.device.clone(),
                remote_addr: client.remote_addr.clone(),
                user_agent: client.user_agent,
                expires_at,
                created_at: now,
                last_used_at: now,
            })
            .await?;

        let (access_token, expires_at) = match self.issue_access(&user, session.id, now) {
            Ok(issued) => issued,
            Err(e) => {
                if let Err(rollback) = self.sessions.delete(session.id).await {
                    warn!(session_id = %session.id, error = %rollback, "Session rollback failed");
                }
                return Err(e);
            }
        };

        if let Err(e) = self.users.touch_login(user.id, now).await {
            warn!(user_id = %user.id, error = %e, "Failed to record last login");
        }

        info!(user_id = %user.id, session_id = %session.id, "User logged in");
        self.events.publish(AuthEvent::LoggedIn {
            user_id: user.id,
            session_id: session.id,
            device: client.device,
            remote_addr: client.remote_addr,
            at: now,
        });

        Ok(self.token_pair(access_token, expires_at, refresh_token, &session))
    }

    /// Exchange a refresh token for a new access token on the same session.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::InvalidToken("missing refresh token".into()));
        }
        let token_hash = hash_refresh_token(refresh_token);
        let session = self
            .sessions
            .by_refresh(&token_hash)
            .await
            .map_err(|e| not_found_as_invalid(e, "unknown refresh token"))?;

        let now = Utc::now();
        if session.is_expired_at(now) {
            self.sessions.delete(session.id).await?;
            return Err(AuthError::InvalidToken("session expired".into()));
        }

        let user = match self.users.get(session.user_id).await {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                self.sessions.delete(session.id).await?;
                return Err(AuthError::InvalidToken("principal no longer exists".into()));
            }
            Err(e) => return Err(e),
        };
        if !user.is_active {
            self.sessions.delete(session.id).await?;
            return Err(AuthError::AccountDisabled);
        }

        let refresh_token = if self.rotate_refresh_tokens {
            let next = generate_refresh_token();
            self.sessions
                .rotate(session.id, &token_hash, &hash_refresh_token(&next))
                .await
                .map_err(|e| not_found_as_invalid(e, "refresh token already used"))?;
            next
        } else {
            refresh_token.to_string()
        };

        let (access_token, expires_at) = self.issue_access(&user, session.id, now)?;
        self.sessions
            .touch(session.id, now)
            .await
            .map_err(|e| not_found_as_invalid(e, "session revoked"))?;

        debug!(user_id = %user.id, session_id = %session.id, "Token refreshed");
        Ok(self.token_pair(access_token, expires_at, refresh_token, &session))
    }

    // ── Logout ────────────────────────────────────────────────────

    /// End one session owned by `user_id`.
    pub async fn logout(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AuthError> {
        let session = self.sessions.by_id(session_id).await?;
        if session.user_id != user_id {
            return Err(AuthError::Forbidden("session belongs to another user".into()));
        }
        self.sessions.delete(session_id).await?;
        info!(%user_id, %session_id, "User logged out");
        self.events.publish(AuthEvent::LoggedOut {
            user_id,
            session_id,
            at: Utc::now(),
        });
        Ok(())
    }

    /// End every session of `user_id`. Returns the number removed.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let sessions = self.sessions.delete_for_user(user_id).await?;
        info!(%user_id, sessions, "User logged out everywhere");
        self.events.publish(AuthEvent::LoggedOutAll {
            user_id,
            sessions,
            at: Utc::now(),
        });
        Ok(sessions)
    }

    // ── Validation ────────────────────────────────────────────────

    /// Parse an access token and confirm its session is still live.
    ///
    /// Tokens without a session id are accepted on signature and expiry
    /// alone.
    pub async fn validate_token(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.codec.parse(token, TokenType::Access)?;
        if claims.session_id.is_empty() {
            return Ok(claims);
        }
        let session_id = parse_id(&claims.session_id)
            .ok_or_else(|| AuthError::InvalidToken("malformed session id".into()))?;
        let session = self
            .sessions
            .by_id(session_id)
            .await
            .map_err(|e| not_found_as_invalid(e, "session revoked"))?;
        if session.user_id.to_string() != claims.sub {
            return Err(AuthError::InvalidToken("session owner mismatch".into()));
        }
        if session.is_expired_at(Utc::now()) {
            return Err(AuthError::InvalidToken("session expired".into()));
        }
        Ok(claims)
    }

    // ── Credentials and status ────────────────────────────────────

    /// Replace the password after verifying the current one. Every session
    /// of the principal is ended.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        check_password(new_password)?;
        let user = self.users.get(user_id).await?;
        let matched = self
            .hasher
            .verify_async(old_password.to_string(), Some(user.password_hash))
            .await?;
        if !matched {
            return Err(AuthError::InvalidCredentials);
        }
        let hash = self.hasher.hash_async(new_password.to_string()).await?;
        self.users.update_password(user_id, &hash).await?;
        let ended = self.sessions.delete_for_user(user_id).await?;

        info!(%user_id, sessions = ended, "Password changed");
        self.events.publish(AuthEvent::PasswordChanged {
            user_id,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Activate or deactivate a principal. Deactivation ends every session.
    pub async fn set_active(&self, user_id: Uuid, active: bool) -> Result<(), AuthError> {
        self.users.set_active(user_id, active).await?;
        let at = Utc::now();
        if active {
            info!(%user_id, "User activated");
            self.events.publish(AuthEvent::Activated { user_id, at });
        } else {
            let ended = self.sessions.delete_for_user(user_id).await?;
            info!(%user_id, sessions = ended, "User deactivated");
            self.events.publish(AuthEvent::Deactivated { user_id, at });
        }
        Ok(())
    }

    /// Remove sessions past their expiry. Safe to run concurrently.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, AuthError> {
        let removed = self.sessions.delete_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Expired sessions removed");
        }
        Ok(removed)
    }

    /// Always succeeds so callers cannot discover which accounts exist.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_identifier(email);
        if email.is_empty() {
            return Ok(());
        }
        if let Some(user) = self.users.find_by_email(&email).await?
            && user.is_active
        {
            info!(user_id = %user.id, "Password reset requested");
            self.events.publish(AuthEvent::PasswordResetRequested {
                user_id: user.id,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    // ── Principals ────────────────────────────────────────────────

    /// Register a principal. `roles` defaults to `user` when empty.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        roles: Vec<String>,
    ) -> Result<User, AuthError> {
        let username = normalize_identifier(username);
        let email = normalize_identifier(email);
        check_username(&username)?;
        check_email(&email)?;
        check_password(password)?;

        let mut roles = if roles.is_empty() {
            vec![USER_ROLE.to_string()]
        } else {
            roles
        };
        roles.sort();
        roles.dedup();
        if let Some(missing) = roles.iter().find(|r| self.policy.get_role(r).is_none()) {
            return Err(AuthError::NotFound(format!("role '{missing}'")));
        }

        let password_hash = self.hasher.hash_async(password.to_string()).await?;
        let user = self
            .users
            .create(NewUser {
                id: uuidv7(),
                username,
                email,
                password_hash,
                roles,
            })
            .await?;

        let subject = user.id.to_string();
        for role in &user.roles {
            self.policy.assign(&subject, role)?;
        }

        info!(user_id = %user.id, username = %user.username, "User created");
        self.events.publish(AuthEvent::Created {
            user_id: user.id,
            username: user.username.clone(),
            at: user.created_at,
        });
        Ok(user)
    }

    /// Create an `admin` principal when no principals exist yet. Returns
    /// `None` when the store is already populated.
    pub async fn bootstrap_admin(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        if self.users.count().await? > 0 {
            debug!("Users exist; skipping admin bootstrap");
            return Ok(None);
        }
        let user = self
            .create_user(username, email, password, vec![ADMIN_ROLE.to_string()])
            .await?;
        info!(user_id = %user.id, "Bootstrapped admin user");
        Ok(Some(user))
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.users.get(user_id).await
    }

    /// Change username and/or email. Both are normalised and must stay
    /// unique.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<User, AuthError> {
        let username = username.map(normalize_identifier);
        let email = email.map(normalize_identifier);
        if let Some(username) = &username {
            check_username(username)?;
        }
        if let Some(email) = &email {
            check_email(email)?;
        }
        self.users
            .update_profile(user_id, username.as_deref(), email.as_deref())
            .await
    }

    /// Delete a principal with its sessions and grants.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.users.get(user_id).await?;
        let ended = self.sessions.delete_for_user(user_id).await?;
        self.users.delete(user_id).await?;
        self.policy.revoke_all(&user_id.to_string());
        info!(%user_id, sessions = ended, "User deleted");
        Ok(())
    }

    // ── Sessions ──────────────────────────────────────────────────

    /// Sessions of `user_id`, newest first.
    pub async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        self.sessions.list_for_user(user_id).await
    }

    /// Administrative delete of any session.
    pub async fn revoke_session(&self, session_id: Uuid) -> Result<Session, AuthError> {
        let session = self.sessions.by_id(session_id).await?;
        self.sessions.delete(session_id).await?;
        info!(user_id = %session.user_id, %session_id, "Session revoked");
        self.events.publish(AuthEvent::LoggedOut {
            user_id: session.user_id,
            session_id,
            at: Utc::now(),
        });
        Ok(session)
    }

    // ── Grants ────────────────────────────────────────────────────

    /// Grant a role, persisting it and applying it to the policy engine.
    pub async fn assign_role(&self, user_id: Uuid, role: &str) -> Result<(), AuthError> {
        if self.policy.get_role(role).is_none() {
            return Err(AuthError::NotFound(format!("role '{role}'")));
        }
        self.users.grant_role(user_id, role).await?;
        self.policy.assign(&user_id.to_string(), role)?;
        info!(%user_id, role, "Role assigned");
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: Uuid, role: &str) -> Result<(), AuthError> {
        self.users.revoke_role(user_id, role).await?;
        self.policy.revoke(&user_id.to_string(), role);
        info!(%user_id, role, "Role revoked");
        Ok(())
    }

    /// Delete a role from the policy and every persisted grant of it.
    pub async fn delete_role(&self, role: &str) -> Result<u64, AuthError> {
        self.policy.delete_role(role)?;
        let revoked = self.users.revoke_role_everywhere(role).await?;
        info!(role, revoked, "Role deleted with its grants");
        Ok(revoked)
    }

    /// Copy persisted grants into the policy engine. Run once at startup.
    pub async fn load_grants(&self) -> Result<usize, AuthError> {
        let grants = self.users.list_grants().await?;
        let total = grants.len();
        let loaded = self
            .policy
            .load_grants(grants.into_iter().map(|(id, role)| (id.to_string(), role)));
        info!(loaded, total, "Loaded role grants");
        Ok(loaded)
    }

    // ── Internals ─────────────────────────────────────────────────

    async fn find_principal(&self, identifier: &str) -> Result<Option<User>, AuthError> {
        if let Some(user) = self.users.find_by_username(identifier).await? {
            return Ok(Some(user));
        }
        self.users.find_by_email(identifier).await
    }

    /// Upgrade a hash produced with a lower cost. Failures only cost a log
    /// line; the login already succeeded.
    async fn rehash(&self, user: &User, password: &str) {
        let result = match self.hasher.hash_async(password.to_string()).await {
            Ok(hash) => self.users.update_password(user.id, &hash).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(user_id = %user.id, "Password rehashed"),
            Err(e) => warn!(user_id = %user.id, error = %e, "Password rehash failed"),
        }
    }

    fn issue_access(
        &self,
        user: &User,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let roles = self.policy.effective_roles(&user.roles);
        let claims = self.codec.claims_for(
            user,
            roles,
            Some(session_id),
            TokenType::Access,
            now,
            self.access_ttl,
        )?;
        let token = self.codec.issue(&claims, TokenType::Access)?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AuthError::Internal("access expiry out of range".into()))?;
        Ok((token, expires_at))
    }

    fn token_pair(
        &self,
        access_token: String,
        expires_at: DateTime<Utc>,
        refresh_token: String,
        session: &Session,
    ) -> TokenPair {
        TokenPair {
            access_token,
            refresh_token,
            token_type: BEARER.to_string(),
            expires_in: self.access_ttl.num_seconds(),
            expires_at,
            refresh_expires_at: session.expires_at,
            session_id: session.id,
        }
    }
}

fn not_found_as_invalid(err: AuthError, message: &str) -> AuthError {
    if err.is_not_found() {
        AuthError::InvalidToken(message.to_string())
    } else {
        err
    }
}

fn check_username(username: &str) -> Result<(), AuthError> {
    if username.is_empty() {
        return Err(AuthError::BadRequest("username is required".into()));
    }
    if username.contains(char::is_whitespace) || username.contains('@') {
        return Err(AuthError::BadRequest(
            "username may not contain whitespace or '@'".into(),
        ));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), AuthError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AuthError::BadRequest(format!("'{email}' is not an email address"))),
    }
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.is_empty() {
        return Err(AuthError::BadRequest("password is required".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
