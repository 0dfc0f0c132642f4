use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analytics_api::auth::api_key::generate_api_key;
use analytics_api::auth::tokens::{issue_token, TOKEN_TTL_SECS};
use analytics_api::config::Config;
use analytics_api::db::memory::MemoryStore;
use analytics_api::db::pg::PgStore;
use analytics_api::db::store::AnalyticsStore;
use analytics_api::realtime::Realtime;
use analytics_api::AppState;
use nexora_common::id::{prefix, prefixed_ulid};

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let schedule = config.schedule();
    if let Err(err) = schedule.validate() {
        panic!("{err}");
    }

    let store: Arc<dyn AnalyticsStore> = match &config.database_url {
        Some(url) => {
            let pool = analytics_api::db::pool::connect(url, config.database_pool_size)
                .expect("failed to build connection pool");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Arc::new(seeded_memory_store(&config.jwt_secret))
        }
    };

    let realtime = Arc::new(Realtime::new(schedule));
    realtime.init();

    let state = AppState {
        store,
        config: Arc::new(config),
        realtime: realtime.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(analytics_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "analytics-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(realtime))
        .await
        .expect("server error");
}

/// Resolves on Ctrl-C. Subscriber streams are closed first so the server can drain.
async fn shutdown_signal(realtime: Arc<Realtime>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    realtime.shutdown();
}

/// A demo organization with one member and one API key, logged for local use.
fn seeded_memory_store(jwt_secret: &str) -> MemoryStore {
    let store = MemoryStore::new();
    let org = store.add_organization("Demo", "demo");
    let user_id = prefixed_ulid(prefix::USER);
    store.add_member(&org.id, &user_id, "owner");

    let raw_key = generate_api_key();
    store.add_api_key(&org.id, "Local", &raw_key, true);

    match issue_token(jwt_secret, &user_id, TOKEN_TTL_SECS) {
        Ok(token) => tracing::info!(org_id = %org.id, api_key = %raw_key, %token, "seeded demo organization"),
        Err(err) => tracing::warn!(?err, "could not issue demo token"),
    }
    store
}
