//! Axum router and all HTTP handlers for judge-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{
    api_types::{
        EscalatedOutboxResponse, GateRefusedResponse, HealthResponse, PoolGateResponse,
        SubmissionResponse, WorkersResponse,
    },
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/pool/arm", post(pool_arm))
        .route("/v1/pool/disarm", post(pool_disarm))
        .route("/v1/submissions/:id", get(submission_get))
        .route("/v1/workers", get(workers_list))
        .route("/v1/outbox/escalated", get(outbox_escalated))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    snap.pool_armed = st.pool_gate.read().await.state().is_armed();

    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /v1/pool/arm
// ---------------------------------------------------------------------------

pub(crate) async fn pool_arm(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut gate = st.pool_gate.write().await;
        gate.arm();
    }

    let snap = {
        let mut s = st.status.write().await;
        s.pool_armed = true;
        s.daemon_uptime_secs = uptime_secs();
        s.clone()
    };

    info!("pool/arm");
    let _ = st.bus.send(BusMsg::LogLine {
        level: "INFO".to_string(),
        msg: "pool armed".to_string(),
    });
    let _ = st.bus.send(BusMsg::Status(snap));

    (StatusCode::OK, Json(PoolGateResponse { armed: true }))
}

// ---------------------------------------------------------------------------
// POST /v1/pool/disarm
// ---------------------------------------------------------------------------

pub(crate) async fn pool_disarm(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut gate = st.pool_gate.write().await;
        gate.manual_disarm();
    }

    let snap = {
        let mut s = st.status.write().await;
        s.pool_armed = false;
        s.daemon_uptime_secs = uptime_secs();
        s.clone()
    };

    info!("pool/disarm");
    let _ = st.bus.send(BusMsg::LogLine {
        level: "WARN".to_string(),
        msg: "pool DISARMED".to_string(),
    });
    let _ = st.bus.send(BusMsg::Status(snap));

    (StatusCode::OK, Json(PoolGateResponse { armed: false }))
}

// ---------------------------------------------------------------------------
// GET /v1/submissions/:id
// ---------------------------------------------------------------------------

pub(crate) async fn submission_get(
    State(st): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Response {
    match judge_db::fetch_submission(&st.db, id).await {
        Ok(submission) => (StatusCode::OK, Json(SubmissionResponse { submission })).into_response(),
        Err(err) => (
            StatusCode::NOT_FOUND,
            Json(GateRefusedResponse {
                error: format!("submission {id} not found: {err}"),
                gate: "none".to_string(),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/workers
// ---------------------------------------------------------------------------

pub(crate) async fn workers_list(State(st): State<Arc<AppState>>) -> Response {
    match judge_db::list_workers(&st.db).await {
        Ok(workers) => (StatusCode::OK, Json(WorkersResponse { workers })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(GateRefusedResponse {
                error: format!("list_workers failed: {err}"),
                gate: "none".to_string(),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/outbox/escalated
// ---------------------------------------------------------------------------

pub(crate) async fn outbox_escalated(State(st): State<Arc<AppState>>) -> Response {
    match judge_db::list_escalated_outbox(&st.db).await {
        Ok(events) => (StatusCode::OK, Json(EscalatedOutboxResponse { events })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(GateRefusedResponse {
                error: format!("list_escalated_outbox failed: {err}"),
                gate: "none".to_string(),
            }),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
