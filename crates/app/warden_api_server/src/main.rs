//! Warden API server binary.
//!
//! Serves the `/api/auth/*` endpoints. With a database URL the accounts and
//! login attempts live in PostgreSQL; without one they are kept in memory.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_api::config::ApiConfig;
use warden_core::auth::service::AuthService;
use warden_core::config::AuthConfig;
use warden_core::rate_limit::store::spawn_attempt_purge;
use warden_core::store::memory::{MemoryLoginAttemptStore, MemoryUserStore};
use warden_core::store::postgres::{PgLoginAttemptStore, PgUserStore};
use warden_core::store::{LoginAttemptStore, UserStore};

/// How often stale login attempts are deleted.
const ATTEMPT_PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(600);

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "warden_api_server", about = "Warden authentication API server")]
struct Args {
    /// Port to listen on. Overrides the port in `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL. In-memory stores are used when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,warden_api=debug,warden_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let auth_config = AuthConfig::from_env()?;
    let mut api_config = ApiConfig::from_env();
    if let Some(port) = args.port {
        api_config.bind_addr = format!("127.0.0.1:{port}");
    }

    let (users, attempts): (Arc<dyn UserStore>, Arc<dyn LoginAttemptStore>) =
        match &args.database_url {
            Some(url) => {
                info!(max_connections = args.max_connections, "connecting to database");
                let pool = PgPoolOptions::new()
                    .max_connections(args.max_connections)
                    .acquire_timeout(std::time::Duration::from_secs(30))
                    .connect(url)
                    .await?;

                info!("running database migrations");
                warden_api::migrate(&pool).await?;

                (
                    Arc::new(PgUserStore::new(pool.clone())),
                    Arc::new(PgLoginAttemptStore::new(pool)),
                )
            }
            None => {
                warn!("DATABASE_URL not set; accounts are kept in memory and lost on exit");
                (
                    Arc::new(MemoryUserStore::new()),
                    Arc::new(MemoryLoginAttemptStore::new()),
                )
            }
        };

    let cancel = CancellationToken::new();
    let purge = spawn_attempt_purge(
        attempts.clone(),
        auth_config.rate_limit.window,
        ATTEMPT_PURGE_INTERVAL,
        cancel.clone(),
    );

    let auth = Arc::new(AuthService::new(&auth_config, users, attempts));
    let state = warden_api::AppState::new(auth, api_config.clone());
    let app = warden_api::router(state);

    let listener = tokio::net::TcpListener::bind(&api_config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "REST API listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await;

    cancel.cancel();
    let _ = purge.await;

    result?;

    Ok(())
}
