//! Narwhal auth core server binary.
//!
//! Wires the stores, the policy engine and the authentication service behind
//! the RPC router, sweeps expired sessions periodically, and shuts down
//! gracefully on Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use narwhal_api::AppState;
use narwhal_api::config::ApiConfig;
use narwhal_core::auth::AuthService;
use narwhal_core::auth::events::TracingPublisher;
use narwhal_core::auth::queries::{PgSessionStore, PgUserStore};
use narwhal_core::auth::sessions::{MemorySessionStore, SessionStore};
use narwhal_core::auth::users::{MemoryUserStore, UserStore};
use sqlx::postgres::PgPoolOptions;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments. Unset options fall back to the environment.
#[derive(Parser, Debug)]
#[command(name = "narwhal_server", about = "Narwhal auth core server", version)]
struct Args {
    /// Address to listen on (overrides NARWHAL_BIND_ADDR).
    #[arg(long)]
    bind: Option<String>,

    /// PostgreSQL connection URL (overrides DATABASE_URL).
    #[arg(long)]
    database_url: Option<String>,

    /// Run on in-memory stores even when a database is configured.
    #[arg(long, default_value_t = false)]
    ephemeral: bool,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Username of the admin created when no users exist.
    #[arg(long, env = "NARWHAL_ADMIN_USERNAME", default_value = "admin")]
    admin_username: String,

    #[arg(long, env = "NARWHAL_ADMIN_EMAIL", default_value = "admin@localhost")]
    admin_email: String,

    /// Password for the bootstrap admin. Without it no admin is created.
    #[arg(long, env = "NARWHAL_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,narwhal_api=debug,narwhal_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if args.database_url.is_some() {
        config.database_url = args.database_url;
    }
    if args.ephemeral {
        config.database_url = None;
    }
    info!(
        bind = %config.bind_addr,
        persistent = config.database_url.is_some(),
        "starting narwhal_server"
    );

    let (users, sessions): (Arc<dyn UserStore>, Arc<dyn SessionStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(args.max_connections)
                    .acquire_timeout(Duration::from_secs(30))
                    .connect(url)
                    .await?;
                info!("running database migrations");
                narwhal_core::migrate::migrate(&pool).await?;
                (
                    Arc::new(PgUserStore::new(pool.clone())),
                    Arc::new(PgSessionStore::new(pool)),
                )
            }
            None => {
                warn!("no database configured; users and sessions are kept in memory");
                (
                    Arc::new(MemoryUserStore::new()),
                    Arc::new(MemorySessionStore::new()),
                )
            }
        };

    let policy = narwhal_core::rbac::load_engine(
        config.auth.rbac_backend,
        config.auth.policy_file.as_deref(),
    )?;
    info!(backend = %config.auth.rbac_backend, roles = policy.list_roles().len(), "policy loaded");

    let auth = Arc::new(AuthService::new(
        &config.auth,
        users,
        sessions,
        Arc::new(policy),
        Arc::new(TracingPublisher),
    )?);
    auth.load_grants().await?;

    match args.admin_password {
        Some(password) => {
            auth.bootstrap_admin(&args.admin_username, &args.admin_email, &password)
                .await?;
        }
        None => info!("NARWHAL_ADMIN_PASSWORD not set; skipping admin bootstrap"),
    }

    let ct = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_sessions(
        auth.clone(),
        config.auth.session_sweep_interval,
        ct.clone(),
    ));

    let app = narwhal_api::router(AppState::new(auth));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "RPC listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(ct.clone()))
    .await;

    ct.cancel();
    let _ = sweeper.await;
    result?;

    info!("shut down");
    Ok(())
}

/// Periodically delete expired sessions until cancelled.
async fn sweep_sessions(auth: Arc<AuthService>, every: Duration, ct: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ct.cancelled() => break,
            _ = ticker.tick() => match auth.cleanup_expired_sessions().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "expired sessions swept"),
                Err(e) => warn!(error = %e, "session sweep failed"),
            },
        }
    }
}

async fn shutdown_signal(ct: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown requested");
        }
        _ = ct.cancelled() => {}
    }
}
