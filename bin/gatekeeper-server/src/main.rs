//! Gatekeeper Server
//!
//! Production entry point wiring together every subsystem: the
//! dispatcher (broker consume loop), the periodic stats aggregator,
//! and the HTTP surface serving the live stats SSE feed plus
//! liveness/readiness probes.
//!
//! ## Configuration
//!
//! Loaded from a TOML file (see `GATEKEEPER_CONFIG` or the standard
//! search paths in `gk_config::ConfigLoader`) with `GATEKEEPER_*`
//! environment variable overrides; see `gk_config::AppConfig` for the
//! full option list. `LOG_FORMAT=json` switches to structured JSON
//! logging; `RUST_LOG` controls the level filter.
//!
//! A `SIGHUP` triggers a live configuration reload: re-parsed and
//! re-validated before being broadcast to every subsystem, rejected
//! (with the prior snapshot kept) if invalid.

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bytes::{Bytes, BytesMut};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use gk_cache::StatsCacheEngine;
use gk_config::ConfigReloader;
use gk_dispatcher::Dispatcher;
use gk_fanout::FanoutHub;
use gk_mailer::SmtpMailer;
use gk_queue::{RabbitMqBroker, RabbitMqConfig};
use gk_rcon::RconClient;
use gk_store::RequestStore;
use gk_token::TokenCodec;

#[tokio::main]
async fn main() -> Result<()> {
    gk_common::logging::init_logging("gatekeeper-server");
    info!("starting gatekeeper server");

    let (reloader, config_handle) = ConfigReloader::load().context("failed to load configuration")?;
    let config = config_handle.current();

    let store = Arc::new(
        RequestStore::connect(&config.store.mongodb_conn, &config.store.database, &config.store.collection)
            .await
            .context("failed to connect to request store")?,
    );

    let (mut cache, hub) = StatsCacheEngine::connect(&config.cache.redis_conn, store.clone(), config.cache.divergence_grace_minutes)
        .await
        .context("failed to connect to stats cache")?;
    cache.sync_all().await.context("initial stats sync failed")?;

    let broker_config = RabbitMqConfig::new(&config.broker.rabbit_mq_conn, &config.broker.task_queue_name);
    let broker = RabbitMqBroker::connect(broker_config)
        .await
        .context("failed to connect to message broker")?;

    let rcon = RconClient::connect(&config.rcon.rcon_server, config.rcon.rcon_port, &config.rcon.rcon_password)
        .await
        .context("failed to connect to remote console")?;

    let mailer = Arc::new(
        SmtpMailer::new(&config.mail.smtp_server, config.mail.smtp_port, &config.mail.smtp_email, &config.mail.smtp_password)
            .context("failed to build mailer")?,
    );

    let token = Arc::new(TokenCodec::new(&config.token.passphrase).context("failed to build token codec")?);

    let ready = Arc::new(AtomicBool::new(true));

    let cancel = CancellationToken::new();

    let dispatcher = Dispatcher::new(broker, cache.clone(), store.clone(), rcon, mailer, token, config_handle.clone());
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher.run(dispatcher_cancel).await {
            error!(error = %e, "dispatcher terminated");
        }
    });

    let aggregator_handle = tokio::spawn(run_aggregator(cache, config_handle.clone(), cancel.clone()));

    let reload_handle = tokio::spawn(run_reload_listener(reloader));

    let app = build_router(hub, ready);
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "stats HTTP surface listening");

    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
        .context("http server error")?;

    cancel.cancel();
    reload_handle.abort();
    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = dispatcher_handle.await;
        let _ = aggregator_handle.await;
    })
    .await;

    info!("gatekeeper server shutdown complete");
    Ok(())
}

/// Fires `cache.update_aggregate()` on a fixed interval, reading the
/// current interval off the live config snapshot on every tick (so a
/// reload takes effect on the next tick without restarting the task).
async fn run_aggregator(mut cache: StatsCacheEngine, config: gk_config::ConfigHandle, cancel: CancellationToken) {
    loop {
        let interval_seconds = config.current().cache.aggregator_interval_seconds;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(interval_seconds)) => {
                if let Err(e) = cache.update_aggregate().await {
                    error!(error = %e, "periodic aggregate update failed");
                }
            }
        }
    }
}

/// Re-reads and re-validates configuration on every `SIGHUP`.
#[cfg(unix)]
async fn run_reload_listener(reloader: ConfigReloader) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler, live reload disabled");
            return;
        }
    };
    loop {
        hangup.recv().await;
        info!("SIGHUP received, reloading configuration");
        reloader.reload();
    }
}

#[cfg(not(unix))]
async fn run_reload_listener(_reloader: ConfigReloader) {
    std::future::pending::<()>().await;
}

#[derive(Clone)]
struct AppState {
    hub: FanoutHub,
    ready: Arc<AtomicBool>,
}

fn build_router(hub: FanoutHub, ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/stats/stream", get(stats_stream))
        .with_state(AppState { hub, ready })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "UP", "version": env!("CARGO_PKG_VERSION") }))
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, Json(serde_json::json!({ "status": "READY" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "status": "NOT_READY" })))
    }
}

/// Subscribes to the fan-out hub and relays every published stats
/// snapshot as one SSE frame per the external-interface contract:
/// `data: <bytes>\n\n`, with headers disabling proxy buffering so the
/// dashboard sees updates immediately.
async fn stats_stream(State(state): State<AppState>) -> Response {
    let Some(subscription) = state.hub.subscribe().await else {
        return (StatusCode::SERVICE_UNAVAILABLE, "stats feed unavailable").into_response();
    };

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        subscription.recv().await.map(|payload| (Ok::<_, Infallible>(frame(payload)), subscription))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .expect("static headers and a streaming body always build a valid response")
}

fn frame(payload: Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    buf.extend_from_slice(b"data: ");
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(b"\n\n");
    buf.freeze()
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
