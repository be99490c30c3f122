//! API server configuration.

use narwhal_core::config::{AuthConfig, ConfigError};

pub const ENV_BIND_ADDR: &str = "NARWHAL_BIND_ADDR";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:50051";

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the listener (e.g. "127.0.0.1:50051").
    pub bind_addr: String,
    /// PostgreSQL connection URL. `None` runs on in-memory stores.
    pub database_url: Option<String>,
    pub auth: AuthConfig,
}

impl ApiConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable             | Default            |
    /// |----------------------|--------------------|
    /// | `NARWHAL_BIND_ADDR`  | `127.0.0.1:50051`  |
    /// | `DATABASE_URL`       | unset (in-memory)  |
    ///
    /// Authentication settings come from [`AuthConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: std::env::var(ENV_BIND_ADDR)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            database_url: std::env::var(ENV_DATABASE_URL)
                .ok()
                .filter(|v| !v.trim().is_empty()),
            auth: AuthConfig::from_env()?,
        })
    }
}
