use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};

mod alias;
mod api;
mod backends;
mod config;
mod dispatch;
mod endpoint;
mod error;
mod filter;
mod inspect;
mod model;
mod registry;
mod route;
mod router;
mod telemetry;
mod translate;

pub use config::Config;
pub use error::OllaError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /internal/health and exit
    // immediately. Avoids needing curl/wget in the container image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "olla=info,tower_http=warn".into()),
        )
        .init();

    let config_path = std::env::var("OLLA_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/olla/config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!(listen_addr = %config.server.listen_addr, endpoints = config.endpoints.len(), "olla starting");

    let config = Arc::new(config);
    let state = Arc::new(router::RouterState::new(Arc::clone(&config), config_path.clone()));

    tokio::spawn(config_watcher(Arc::clone(&state)));
    tokio::spawn(endpoint::health_check_loop(state.catalog.clone(), Duration::from_secs(15)));
    tokio::spawn(registry::refresh_loop(
        state.catalog.clone(),
        Arc::clone(&state.registry),
        state.config_handle(),
        Duration::from_secs(30),
    ));

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = axum::Router::new()
        .merge(api::client::router(Arc::clone(&state)))
        .merge(api::provider::router(Arc::clone(&state)))
        .merge(api::admin::router(Arc::clone(&state)))
        .merge(api::stats::router(Arc::clone(&state)))
        .merge(api::metrics::router(Arc::clone(&state)))
        .route("/internal/health", axum::routing::get(api::health::healthz))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), api::auth::auth_middleware))
        .layer(axum::middleware::from_fn_with_state(Arc::clone(&state), api::rate_limit::rate_limit_middleware))
        .layer(axum::middleware::from_fn(api::request_id::request_id_middleware))
        .layer(trace_layer)
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_millis(config.server.write_timeout_ms)));

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.context("server error")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Lightweight healthcheck: GET /internal/health and exit 0 on 200, 1 otherwise.
/// Invoked via `olla --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let addr = std::env::var("OLLA_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let url = format!("http://{addr}/internal/health");
    let resp = reqwest::get(&url).await?;

    if resp.status().is_success() {
        std::process::exit(0);
    } else {
        std::process::exit(1);
    }
}

/// Background task: polls the config file every 5 seconds and hot-reloads on change.
///
/// Uses filesystem `mtime` for change detection — no inotify/kqueue dependencies.
/// Parse failures are logged and ignored; the running config is unchanged.
async fn config_watcher(state: Arc<router::RouterState>) {
    let path = &state.config_path;

    let mut last_mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();

    // Initial tick fires immediately; skip it so we don't reload on startup.
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.tick().await;

    loop {
        interval.tick().await;

        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if mtime == last_mtime {
            continue;
        }

        match Config::load(path) {
            Ok(new_cfg) => {
                state.replace_config(Arc::new(new_cfg));
                info!(path = %path.display(), "config hot-reloaded");
                last_mtime = mtime;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config reload failed — keeping previous config");
            }
        }
    }
}
