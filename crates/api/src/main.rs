//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::{Config, LogFormat};
use domain::CartCleanupSweeper;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{CartStore, Database, InMemoryCartStore, InMemoryDatabase, PgDatabase, RedisCartStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DB_MAX_CONNECTIONS: u32 = 10;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Starts the cart cleanup sweeper and serves the API until shutdown.
async fn serve<D, C>(config: Config, db: D, cart: C, metrics_handle: PrometheusHandle)
where
    D: Database + Clone,
    C: CartStore + Clone,
{
    let sweeper = CartCleanupSweeper::new(db.clone(), cart.clone())
        .with_interval(config.cart_sweep_interval)
        .with_retention(config.cart_cleanup_retention)
        .spawn();

    let state = Arc::new(AppState::new(db, cart, config.policy()));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, freight = %config.freight, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweeper.abort();
    tracing::info!("server shut down gracefully");
}

async fn connect_db(url: &str) -> PgDatabase {
    let db = PgDatabase::connect(url, DB_MAX_CONNECTIONS)
        .await
        .expect("failed to connect to PostgreSQL");
    db.run_migrations().await.expect("migrations failed");
    db
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env().expect("invalid configuration");
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick backends and run
    let redis_url = config.redis_url.clone();
    match config.database_url.clone() {
        Some(database_url) => {
            let db = connect_db(&database_url).await;
            match redis_url {
                Some(url) => {
                    let cart = RedisCartStore::new(&url)
                        .await
                        .expect("failed to connect to Redis");
                    serve(config, db, cart, metrics_handle).await;
                }
                None => {
                    tracing::warn!("REDIS_URL not set, carts are kept in memory");
                    serve(config, db, InMemoryCartStore::new(), metrics_handle).await;
                }
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            let db = InMemoryDatabase::new();
            match redis_url {
                Some(url) => {
                    let cart = RedisCartStore::new(&url)
                        .await
                        .expect("failed to connect to Redis");
                    serve(config, db, cart, metrics_handle).await;
                }
                None => serve(config, db, InMemoryCartStore::new(), metrics_handle).await,
            }
        }
    }
}
