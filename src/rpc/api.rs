//! Node API routes and handlers
//!
//! Every node serves health, metrics, time and mutual-exclusion endpoints.
//! Session, admission, sync and misconduct endpoints belong to the
//! coordinator; results and marks belong to the authority. A node asked for
//! an endpoint its role does not serve answers 404.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::server::{AppState, CoordinatorServices};
use super::types::*;
use crate::authority::{Marksheet, StrikeOutcome};
use crate::config::Role;
use crate::ledger::ResultEvent;

/// Create the router with all API routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // All nodes
        .route("/api/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/rpc/time", get(get_time))
        .route("/rpc/time/adjust", post(adjust_time))
        .route("/rpc/exclusion/request", post(exclusion_request))
        .route("/rpc/exclusion/reply", post(exclusion_reply))
        .route("/rpc/exclusion/state", get(exclusion_state))
        // Coordinator
        .route("/rpc/sessions", post(admit_session))
        .route("/rpc/sessions/{key}/question", get(get_question))
        .route("/rpc/sessions/{key}/answer", post(submit_answer))
        .route("/rpc/sessions/{key}/finalize", post(finalize_session))
        .route("/rpc/admission/stats", get(admission_stats))
        .route("/rpc/admission/backup", post(toggle_backup))
        .route("/rpc/sync", post(run_sync))
        .route("/rpc/misconduct", post(report_misconduct))
        // Authority
        .route("/rpc/results", post(record_result))
        .route("/rpc/marks/warn", post(warn_student))
        .route("/rpc/marks/catch", post(catch_student))
        .route("/rpc/marksheet", get(marksheet))
        .with_state(state)
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn fail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(message))).into_response()
}

fn not_served(state: &AppState, needs: Role) -> Response {
    fail(
        StatusCode::NOT_FOUND,
        format!("Endpoint served by the {needs}, this node is the {}", state.ctx.role),
    )
}

fn coordinator(state: &AppState) -> Result<&CoordinatorServices, Response> {
    state
        .ctx
        .coordinator
        .as_ref()
        .ok_or_else(|| not_served(state, Role::Coordinator))
}

fn authority(state: &AppState) -> Result<&Marksheet, Response> {
    state
        .ctx
        .marksheet
        .as_deref()
        .ok_or_else(|| not_served(state, Role::Authority))
}

// ============================================================================
// All Nodes
// ============================================================================

async fn health_check(State(state): State<AppState>) -> Response {
    ok(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.ctx.node_id.clone(),
        role: state.ctx.role,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics() -> Response {
    match crate::metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_time(State(state): State<AppState>) -> Response {
    let clock = &state.ctx.wall_clock;
    ok(TimeResponse {
        node_id: state.ctx.node_id.clone(),
        time_micros: clock.now_micros(),
        offset_micros: clock.offset_micros(),
    })
}

async fn adjust_time(
    State(state): State<AppState>,
    Json(req): Json<AdjustTimeRequest>,
) -> Response {
    let offset_micros = state.ctx.wall_clock.adjust(req.delta_micros);
    crate::metrics::set_clock_offset(offset_micros);
    tracing::info!(
        node = %state.ctx.node_id,
        delta_micros = req.delta_micros,
        offset_micros,
        "Clock adjusted"
    );
    ok(AdjustTimeResponse { offset_micros })
}

async fn exclusion_request(
    State(state): State<AppState>,
    Json(msg): Json<ExclusionMessage>,
) -> Response {
    let exclusion = &state.ctx.exclusion;
    let decision = exclusion.on_request(&msg.node_id, msg.timestamp).await;
    ok(ExclusionAck {
        node_id: state.ctx.node_id.clone(),
        clock: exclusion.clock().current(),
        decision: Some(decision),
    })
}

async fn exclusion_reply(
    State(state): State<AppState>,
    Json(msg): Json<ExclusionMessage>,
) -> Response {
    let exclusion = &state.ctx.exclusion;
    exclusion.on_reply(&msg.node_id, msg.timestamp).await;
    ok(ExclusionAck {
        node_id: state.ctx.node_id.clone(),
        clock: exclusion.clock().current(),
        decision: None,
    })
}

async fn exclusion_state(State(state): State<AppState>) -> Response {
    ok(state.ctx.exclusion.snapshot().await)
}

// ============================================================================
// Coordinator
// ============================================================================

async fn admit_session(
    State(state): State<AppState>,
    Json(req): Json<AdmitRequest>,
) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };
    ok(services.sessions.admit(&req.session_key).await)
}

async fn get_question(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };
    ok(services.sessions.get_question(&key).await)
}

async fn submit_answer(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<AnswerRequest>,
) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };
    ok(services.sessions.submit_answer(&key, &req.answer).await)
}

async fn finalize_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<FinalizeRequest>,
) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };
    match services.sessions.finalize(&key, req.source).await {
        Ok(outcome) => ok(outcome),
        Err(e) => {
            tracing::error!(session = %key, error = %e, "Finalize failed");
            fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn admission_stats(State(state): State<AppState>) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };
    ok(services.sessions.admission().stats().await)
}

async fn toggle_backup(
    State(state): State<AppState>,
    Json(req): Json<BackupToggleRequest>,
) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };
    let admission = services.sessions.admission();
    admission.set_backup_running(req.running).await;
    ok(admission.stats().await)
}

async fn run_sync(State(state): State<AppState>) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };
    match services.sync.run_sync().await {
        Ok(report) => ok(report),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Count a strike, then have the authority apply the matching penalty.
async fn report_misconduct(
    State(state): State<AppState>,
    Json(req): Json<MisconductRequest>,
) -> Response {
    let services = match coordinator(&state) {
        Ok(s) => s,
        Err(r) => return r,
    };

    let key = req.session_key;
    let outcome = services.strikes.report(&key).await;
    tracing::warn!(student = %key, ?outcome, "Misconduct reported");

    let forwarded = match (outcome, state.ctx.peer(Role::Authority)) {
        (StrikeOutcome::Warned, Some(authority)) => authority.warn_student(&key).await.map(|_| true),
        (StrikeOutcome::Caught, Some(authority)) => {
            authority.catch_student(&key).await.map(|_| true)
        }
        _ => Ok(false),
    };

    let forwarded = forwarded.unwrap_or_else(|e| {
        tracing::warn!(student = %key, error = %e, "Penalty not delivered to authority");
        false
    });

    ok(MisconductResponse {
        session_key: key,
        outcome,
        forwarded,
    })
}

// ============================================================================
// Authority
// ============================================================================

async fn record_result(State(state): State<AppState>, Json(event): Json<ResultEvent>) -> Response {
    let marksheet = match authority(&state) {
        Ok(m) => m,
        Err(r) => return r,
    };
    ok(marksheet.record_result(&event).await)
}

async fn warn_student(
    State(state): State<AppState>,
    Json(req): Json<MisconductRequest>,
) -> Response {
    let marksheet = match authority(&state) {
        Ok(m) => m,
        Err(r) => return r,
    };
    match marksheet.warn(&req.session_key).await {
        Some(standing) => ok(standing),
        None => fail(
            StatusCode::NOT_FOUND,
            format!("Unknown student: {}", req.session_key),
        ),
    }
}

async fn catch_student(
    State(state): State<AppState>,
    Json(req): Json<MisconductRequest>,
) -> Response {
    let marksheet = match authority(&state) {
        Ok(m) => m,
        Err(r) => return r,
    };
    match marksheet.catch(&req.session_key).await {
        Some(standing) => ok(standing),
        None => fail(
            StatusCode::NOT_FOUND,
            format!("Unknown student: {}", req.session_key),
        ),
    }
}

async fn marksheet(State(state): State<AppState>) -> Response {
    match authority(&state) {
        Ok(m) => ok(m.report().await),
        Err(r) => r,
    }
}
