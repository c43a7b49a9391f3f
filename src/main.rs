//! Tableside Gateway: real-time event fan-out for restaurant clients.
//!
//! Main entry point that wires all crates together and starts the server.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use tableside_api::AppState;
use tableside_auth::{
    AuthStrategy, CompositeStrategy, JwtStrategy, MemoryRevocationList, RevocationList,
    TableTokenStrategy,
};
use tableside_core::config::{AppConfig, BusConfig, LoggingConfig};
use tableside_core::error::AppError;
use tableside_core::traits::SectorLookup;
use tableside_realtime::bridge::{EventBus, MemoryPubSub, RedisPubSubBridge};
use tableside_realtime::sector::{CachedSectorLookup, RedisSectorLookup, StaticSectorLookup};
use tableside_realtime::{EngineDeps, RealtimeEngine};

/// Revoked token ids remembered at most this long; tokens expire sooner.
const REVOCATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const REVOCATION_CAPACITY: u64 = 100_000;
const SECTOR_CACHE_CAPACITY: u64 = 10_000;

#[tokio::main]
async fn main() {
    let env = std::env::var("TABLESIDE_ENV").unwrap_or_else(|_| "development".to_string());
    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);

    if let Err(e) = run(config, &env).await {
        tracing::error!(error = %e, "Gateway error");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig, env: &str) -> Result<(), AppError> {
    tracing::info!(env, "Starting Tableside gateway v{}", env!("CARGO_PKG_VERSION"));

    let bus = build_bus(&config.bus)?;
    let sector_lookup = build_sector_lookup(&config).await?;

    let revocations: Arc<dyn RevocationList> =
        Arc::new(MemoryRevocationList::new(REVOCATION_CAPACITY, REVOCATION_TTL));
    let staff_auth = build_staff_auth(&config, Arc::clone(&revocations));
    let diner_auth: Arc<dyn AuthStrategy> =
        Arc::new(TableTokenStrategy::new(&config.auth, Arc::clone(&revocations)));

    let engine = Arc::new(RealtimeEngine::new(
        config.realtime.clone(),
        config.bus.clone(),
        EngineDeps {
            bus,
            sector_lookup,
            staff_auth,
            diner_auth,
        },
    ));
    engine.start();

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;

    let state = AppState::new(Arc::new(config), engine);
    tableside_api::serve(listener, state, shutdown_signal()).await
}

fn build_bus(config: &BusConfig) -> Result<Arc<dyn EventBus>, AppError> {
    match config.provider.as_str() {
        "memory" => {
            tracing::info!("Using in-memory event bus (single node)");
            Ok(Arc::new(MemoryPubSub::default()))
        }
        "redis" => {
            tracing::info!("Using Redis event bus");
            Ok(Arc::new(RedisPubSubBridge::new(&config.redis_url)?))
        }
        other => Err(AppError::configuration(format!(
            "Unknown bus provider '{other}' (expected 'memory' or 'redis')"
        ))),
    }
}

async fn build_sector_lookup(config: &AppConfig) -> Result<Arc<dyn SectorLookup>, AppError> {
    let inner: Arc<dyn SectorLookup> = if config.bus.provider == "redis" {
        Arc::new(RedisSectorLookup::connect(&config.bus.redis_url, &config.bus.key_prefix).await?)
    } else {
        tracing::warn!("No sector store configured; waiters receive branch-wide events");
        Arc::new(StaticSectorLookup::new())
    };

    Ok(Arc::new(CachedSectorLookup::new(
        inner,
        SECTOR_CACHE_CAPACITY,
        config.realtime.sector_cache_ttl(),
    )))
}

/// Staff tokens verify against the current secret, then the previous one
/// while a rotation is in progress.
fn build_staff_auth(config: &AppConfig, revocations: Arc<dyn RevocationList>) -> Arc<dyn AuthStrategy> {
    let current: Arc<dyn AuthStrategy> =
        Arc::new(JwtStrategy::new(&config.auth, Arc::clone(&revocations)));
    match config.auth.previous_jwt_secret.as_deref() {
        Some(previous) if !previous.is_empty() => {
            tracing::info!("Accepting staff tokens signed with the previous secret");
            let previous: Arc<dyn AuthStrategy> = Arc::new(JwtStrategy::with_secret(
                previous,
                config.auth.leeway_seconds,
                revocations,
            ));
            Arc::new(CompositeStrategy::new(vec![current, previous]))
        }
        _ => current,
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
