//! Contest Arena binary entrypoint wiring the HTTP routes, the session socket and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contest_arena::{
    config::AppConfig,
    dao::{
        kv_store::{KvStore, MemoryKvStore},
        storage::StorageError,
    },
    routes,
    services::{
        identity::TokenTable,
        problem_generator::{ProblemSource, UnconfiguredSource},
        renderer::MarkupSanitizer,
        storage_supervisor,
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(
        config,
        problem_source()?,
        Arc::new(MarkupSanitizer),
        Arc::new(TokenTable::from_env()),
    );

    spawn_storage_supervisor(app_state.clone())?;
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Pick the problem source from `PROBLEM_SOURCE_URL`.
fn problem_source() -> anyhow::Result<Arc<dyn ProblemSource>> {
    let Ok(url) = env::var("PROBLEM_SOURCE_URL") else {
        warn!("PROBLEM_SOURCE_URL is not set; every round will come up empty");
        return Ok(Arc::new(UnconfiguredSource));
    };

    http_source(&url)
}

#[cfg(feature = "http-source")]
fn http_source(url: &str) -> anyhow::Result<Arc<dyn ProblemSource>> {
    let source = contest_arena::services::problem_generator::HttpProblemSource::new(url)
        .context("building problem source client")?;
    info!(%url, "fetching problems over HTTP");
    Ok(Arc::new(source))
}

#[cfg(not(feature = "http-source"))]
fn http_source(url: &str) -> anyhow::Result<Arc<dyn ProblemSource>> {
    warn!(%url, "built without http-source; ignoring PROBLEM_SOURCE_URL");
    Ok(Arc::new(UnconfiguredSource))
}

/// Start the storage supervisor for the backend named by `STORE` (`memory` or `couch`).
fn spawn_storage_supervisor(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE").unwrap_or_else(|_| default_backend().into());
    match backend.as_str() {
        "memory" => {
            warn!("using the in-memory store; rooms do not survive a restart");
            let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok::<_, StorageError>(store) }
            }));
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use contest_arena::dao::kv_store::couchdb::{CouchConfig, CouchKvStore};

            let config = CouchConfig::from_env().context("reading CouchDB configuration")?;
            info!(url = %config.base_url, database = %config.database, "using CouchDB store");
            tokio::spawn(storage_supervisor::run(state, move || {
                let config = config.clone();
                async move {
                    let store = CouchKvStore::connect(config).await?;
                    Ok::<Arc<dyn KvStore>, StorageError>(Arc::new(store))
                }
            }));
        }
        other => anyhow::bail!("unknown STORE backend `{other}`"),
    }
    Ok(())
}

fn default_backend() -> &'static str {
    if cfg!(feature = "couch-store") {
        "couch"
    } else {
        "memory"
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
