//! Rate Sentinel server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

use rate_sentinel::adapters::http::{app_router, QuotaAppState};
use rate_sentinel::adapters::{PostgresQuotaStore, RedisSlidingWindow};
use rate_sentinel::application::{QuotaTracker, RateLimitCoordinator, RequestGate, GATE_SERVICES};
use rate_sentinel::config::{AppConfig, LogFormat, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context(
        "failed to load configuration; check RATE_SENTINEL__* variables and RATE_SENTINEL_CONFIG",
    )?;
    config.validate().context("configuration validation failed")?;

    init_tracing(&config.logging);

    let registry = config
        .rate_limits
        .build_registry()
        .context("failed to build service registry")?;
    registry
        .validate_required(&GATE_SERVICES)
        .context("inbound gate services must be registered")?;
    tracing::info!(services = registry.len(), "service registry loaded");

    let redis = redis::Client::open(config.redis.url.as_str()).context("invalid redis url")?;
    let conn = tokio::time::timeout(
        config.redis.timeout(),
        redis::aio::ConnectionManager::new(redis),
    )
    .await
    .context("timed out connecting to redis")?
    .context("failed to connect to redis")?;

    let pool = config
        .database
        .pool_options()
        .connect(&config.database.url)
        .await
        .context("failed to connect to quota database")?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let coordinator = Arc::new(RateLimitCoordinator::new(
        Arc::new(registry),
        Arc::new(RedisSlidingWindow::new(
            conn,
            config.rate_limits.key_ttl_margin(),
            config.redis.command_timeout(),
        )),
    )
    .with_store_timeout(config.redis.command_timeout() * 2));
    let quota = Arc::new(
        QuotaTracker::new(
            Arc::new(PostgresQuotaStore::new(pool)),
            config.quota.policy(),
        )
        .with_outage_grace(config.quota.outage_grace()),
    );
    let state = QuotaAppState::new(RequestGate::new(coordinator, quota));
    let app = app_router(state, config.server.request_timeout());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "rate-sentinel listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
