//! Request and response types for all judge-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use judge_schemas::{JudgeWorker, OutboxEvent, Submission};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Gate refusal (403)
// ---------------------------------------------------------------------------

/// Response body when a daemon route is refused due to a gate check failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRefusedResponse {
    pub error: String,
    /// Which gate failed: always "pool_armed" today, kept as a string so a
    /// future gate can be added without breaking existing clients.
    pub gate: String,
}

// ---------------------------------------------------------------------------
// /v1/pool/arm  /v1/pool/disarm
// ---------------------------------------------------------------------------

/// Response for pool arm / disarm endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolGateResponse {
    /// true = armed (dispatch allowed), false = disarmed (dispatch blocked).
    pub armed: bool,
}

// ---------------------------------------------------------------------------
// /v1/submissions/:id
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub submission: Submission,
}

// ---------------------------------------------------------------------------
// /v1/workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub workers: Vec<JudgeWorker>,
}

// ---------------------------------------------------------------------------
// /v1/outbox/escalated
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalatedOutboxResponse {
    pub events: Vec<OutboxEvent>,
}
