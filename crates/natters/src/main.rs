#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use natter_common::UserId;
use natters::api::start_api_server;
use natters::auth::{Authenticator, TokenAuthority};
use natters::config::{Args, ServerConfig, StoreKind};
use natters::metrics::{start_metrics_server, HealthState};
use natters::run_with_shutdown;
use natters::server::ServerState;
use natters::store::{FriendStore, MemoryFriendStore, SqliteFriendStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Some(uid) = args.issue_token.as_deref() {
        let Some(secret) = args.token_secret.as_deref() else {
            anyhow::bail!("--issue-token requires --token-secret (or NATTER_TOKEN_SECRET)");
        };
        let authority = TokenAuthority::new(secret.as_bytes(), args.token_ttl)?;
        println!("{}", authority.issue(&UserId::from(uid)));
        return Ok(());
    }

    let authority = match args.token_secret.as_deref() {
        Some(secret) => TokenAuthority::new(secret.as_bytes(), args.token_ttl)?,
        None => {
            warn!("using ephemeral token secret (tokens will not survive a restart)");
            TokenAuthority::ephemeral(args.token_ttl)
        }
    };
    let auth: Arc<dyn Authenticator> = Arc::new(authority);

    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let store: Arc<dyn FriendStore> = match config.store {
        StoreKind::Memory => {
            info!("using in-memory friend store");
            Arc::new(MemoryFriendStore::new())
        }
        StoreKind::Sqlite => {
            info!("using sqlite friend store at {}", config.db_path.display());
            Arc::new(SqliteFriendStore::open(&config.db_path)?)
        }
    };

    let state = Arc::new(ServerState::new(config.clone(), store, auth));

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let health_state = HealthState::new(Arc::clone(&state));

    tokio::spawn({
        let health_state = health_state.clone();
        async move {
            if let Err(e) = start_metrics_server(config.metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = start_api_server(config.api_addr, state).await {
                warn!("api server error: {}", e);
            }
        }
    });

    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        let health_state = health_state.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                health_state.set_ready(false);
                let _ = shutdown_tx.send(());
            }
        }
    });

    if let Err(e) = run_with_shutdown(listener, state, shutdown_tx).await {
        tracing::error!("server error: {}", e);
    }

    Ok(())
}
