//! Authentication configuration, resolved from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::auth::jwt::persisted_secret;
use crate::auth::password::{DEFAULT_COST, MAX_COST, MIN_COST};

pub const ENV_ACCESS_SECRET: &str = "NARWHAL_ACCESS_SECRET";
pub const ENV_REFRESH_SECRET: &str = "NARWHAL_REFRESH_SECRET";
pub const ENV_ISSUER: &str = "NARWHAL_ISSUER";
pub const ENV_ACCESS_TTL: &str = "NARWHAL_ACCESS_TTL_SECS";
pub const ENV_REFRESH_TTL: &str = "NARWHAL_REFRESH_TTL_SECS";
pub const ENV_HASH_COST: &str = "NARWHAL_HASH_COST";
pub const ENV_ROTATE_REFRESH: &str = "NARWHAL_ROTATE_REFRESH_TOKENS";
pub const ENV_RBAC_BACKEND: &str = "NARWHAL_RBAC_BACKEND";
pub const ENV_POLICY_FILE: &str = "NARWHAL_POLICY_FILE";
pub const ENV_SESSION_SWEEP: &str = "NARWHAL_SESSION_SWEEP_SECS";

/// Secret files used when no secret is supplied through the environment.
const ACCESS_SECRET_FILE: &str = "access-secret";
const REFRESH_SECRET_FILE: &str = "refresh-secret";

pub const DEFAULT_ISSUER: &str = "narwhal";
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_SESSION_SWEEP: Duration = Duration::from_secs(300);
/// Longest accepted token lifetime (ten years).
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Which implementation backs the policy engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RbacBackend {
    /// Built-in admin/user/guest roles held in memory.
    #[default]
    Builtin,
    /// Roles and permissions loaded from a policy file.
    PolicyDsl,
}

impl FromStr for RbacBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "builtin" => Ok(RbacBackend::Builtin),
            "policy-dsl" | "policy_dsl" => Ok(RbacBackend::PolicyDsl),
            other => Err(format!("unknown rbac backend '{other}'")),
        }
    }
}

impl std::fmt::Display for RbacBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RbacBackend::Builtin => "builtin",
            RbacBackend::PolicyDsl => "policy-dsl",
        })
    }
}

/// Settings for the authentication service and policy engine.
#[derive(Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub hash_cost: u32,
    pub rotate_refresh_tokens: bool,
    pub rbac_backend: RbacBackend,
    pub policy_file: Option<PathBuf>,
    pub session_sweep_interval: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("hash_cost", &self.hash_cost)
            .field("rotate_refresh_tokens", &self.rotate_refresh_tokens)
            .field("rbac_backend", &self.rbac_backend)
            .field("policy_file", &self.policy_file)
            .field("session_sweep_interval", &self.session_sweep_interval)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Defaults with explicit secrets. Mostly useful for tests and tools.
    pub fn with_secrets(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            issuer: DEFAULT_ISSUER.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            hash_cost: DEFAULT_COST,
            rotate_refresh_tokens: false,
            rbac_backend: RbacBackend::Builtin,
            policy_file: None,
            session_sweep_interval: DEFAULT_SESSION_SWEEP,
        }
    }

    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Missing secrets fall back to
    /// secrets persisted under the platform data dir. The result is
    /// validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let access_secret = get(ENV_ACCESS_SECRET).unwrap_or_else(|| persisted_secret(ACCESS_SECRET_FILE));
        let refresh_secret =
            get(ENV_REFRESH_SECRET).unwrap_or_else(|| persisted_secret(REFRESH_SECRET_FILE));
        let mut config = Self::with_secrets(access_secret, refresh_secret);

        if let Some(issuer) = get(ENV_ISSUER) {
            config.issuer = issuer;
        }
        if let Some(v) = get(ENV_ACCESS_TTL) {
            config.access_ttl = Duration::from_secs(parse_value(ENV_ACCESS_TTL, &v)?);
        }
        if let Some(v) = get(ENV_REFRESH_TTL) {
            config.refresh_ttl = Duration::from_secs(parse_value(ENV_REFRESH_TTL, &v)?);
        }
        if let Some(v) = get(ENV_HASH_COST) {
            config.hash_cost = parse_value(ENV_HASH_COST, &v)?;
        }
        if let Some(v) = get(ENV_ROTATE_REFRESH) {
            config.rotate_refresh_tokens = parse_bool(ENV_ROTATE_REFRESH, &v)?;
        }
        if let Some(v) = get(ENV_RBAC_BACKEND) {
            config.rbac_backend = v.parse().map_err(|message| ConfigError::InvalidValue {
                key: ENV_RBAC_BACKEND,
                message,
            })?;
        }
        config.policy_file = get(ENV_POLICY_FILE).map(PathBuf::from);
        if let Some(v) = get(ENV_SESSION_SWEEP) {
            config.session_sweep_interval = Duration::from_secs(parse_value(ENV_SESSION_SWEEP, &v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            return Err(ConfigError::ValidationError("signing secrets must not be empty".into()));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::ValidationError(
                "access and refresh secrets must differ".into(),
            ));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::ValidationError("issuer must not be empty".into()));
        }
        if self.access_ttl.is_zero() || self.refresh_ttl.is_zero() {
            return Err(ConfigError::ValidationError("token lifetimes must be positive".into()));
        }
        // Token timestamps have one-second resolution.
        if self.access_ttl.subsec_nanos() != 0 || self.refresh_ttl.subsec_nanos() != 0 {
            return Err(ConfigError::ValidationError(
                "token lifetimes must be whole seconds".into(),
            ));
        }
        if self.access_ttl > MAX_TTL || self.refresh_ttl > MAX_TTL {
            return Err(ConfigError::ValidationError(format!(
                "token lifetimes must not exceed {} seconds",
                MAX_TTL.as_secs()
            )));
        }
        if self.access_ttl > self.refresh_ttl {
            return Err(ConfigError::ValidationError(
                "access token lifetime exceeds refresh token lifetime".into(),
            ));
        }
        if !(MIN_COST..=MAX_COST).contains(&self.hash_cost) {
            return Err(ConfigError::ValidationError(format!(
                "hash cost must be between {MIN_COST} and {MAX_COST}"
            )));
        }
        if self.rbac_backend == RbacBackend::PolicyDsl && self.policy_file.is_none() {
            return Err(ConfigError::ValidationError(format!(
                "{ENV_RBAC_BACKEND}=policy-dsl requires {ENV_POLICY_FILE}"
            )));
        }
        if self.session_sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "session sweep interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Access token lifetime as a signed duration.
    pub fn access_ttl_chrono(&self) -> chrono::Duration {
        to_chrono(self.access_ttl)
    }

    pub fn refresh_ttl_chrono(&self) -> chrono::Duration {
        to_chrono(self.refresh_ttl)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        message: format!("'{raw}': {e}"),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            message: format!("'{raw}' is not a boolean"),
        }),
    }
}
