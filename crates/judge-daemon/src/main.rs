//! judge-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, connects to the
//! Submission Store, builds the shared state, wires middleware, and starts
//! the HTTP server. All route handlers live in `routes.rs`; all shared
//! state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use judge_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let db = judge_db::connect_from_env()
        .await
        .context("judge-daemon: failed to connect to the submission store")?;
    judge_db::migrate(&db).await.context("judge-daemon: migrate failed")?;

    // AppState boots fail-closed (pool disarmed). An explicit
    // POST /v1/pool/arm from the operator is required before the worker
    // pool process is expected to dispatch anything new.
    let shared = Arc::new(state::AppState::new(db.clone()));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    spawn_reclaim_reporter(shared.clone(), db);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("judge-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("JUDGE_DAEMON_ADDR").ok()?.parse().ok()
}

/// Runs the stale-heartbeat reclaim tick (§8 invariant 4) alongside the HTTP
/// server and broadcasts a log line whenever it reclaims anything, so an
/// operator watching `/v1/stream` sees it without tailing the process logs.
fn spawn_reclaim_reporter(shared: Arc<state::AppState>, db: sqlx::PgPool) {
    tokio::spawn(async move {
        let staleness_secs = std::env::var("JUDGE_WORKER_STALENESS_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let mut ticker = tokio::time::interval(Duration::from_secs(15));
        loop {
            ticker.tick().await;
            match judge_reconcile::reclaim_tick(&db, staleness_secs).await {
                Ok(outcome) if !outcome.is_clean() => {
                    let _ = shared.bus.send(state::BusMsg::LogLine {
                        level: "WARN".to_string(),
                        msg: format!(
                            "reclaimed {} stale submission(s)",
                            outcome.reclaimed_submission_ids.len()
                        ),
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = %err, "reclaim tick failed");
                }
            }
        }
    });
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
