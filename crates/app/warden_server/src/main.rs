//! Warden API server binary.
//!
//! Serves the access-control API over HTTP, backed by PostgreSQL or, with
//! `--in-memory`, by a throwaway in-process store.

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_api::config::ApiConfig;
use warden_core::{AccessControl, AuthStore, MemoryStore, PgStore};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "warden_server", about = "Warden access-control API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:4000")]
    bind: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/warden"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Keep all state in memory instead of PostgreSQL. State is lost on exit.
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Grant the admin flag to this existing account at startup.
    #[arg(long, env = "WARDEN_ADMIN_EMAIL")]
    admin_email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,warden_api=debug,warden_core=debug"))?,
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env();
    config.bind_addr = args.bind.clone();
    config.pg_connection_url = args.database_url.clone();

    info!(bind = %config.bind_addr, in_memory = args.in_memory, "starting warden_server");

    let store: Arc<dyn AuthStore> = if args.in_memory {
        warn!("using in-memory store; all state is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        info!(max_connections = args.max_connections, "configuring connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&config.pg_connection_url)
            .await?;

        info!("running database migrations");
        warden_api::migrate(&pool).await?;
        Arc::new(PgStore::new(pool))
    };

    let access = AccessControl::new(store, config.auth.clone());

    if let Some(email) = &args.admin_email {
        promote_admin(&access, email).await?;
    }

    let state = warden_api::AppState {
        access,
        config: config.clone(),
    };
    let app = warden_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn promote_admin(access: &AccessControl, email: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    match access.store().user_by_email(email).await? {
        Some(user) if user.is_admin => info!(user_id = %user.id, "admin account already flagged"),
        Some(user) => {
            access.set_admin(user.id, true, &cancel).await?;
        }
        None => warn!(email, "admin account not found; register it first"),
    }
    Ok(())
}
