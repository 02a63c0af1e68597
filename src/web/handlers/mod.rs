pub mod config;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::events::SystemEvent;
use crate::gadget::session::SessionState;
use crate::state::AppState;
use crate::trigger::TriggerSource;

/// Reply body for payload staging, kept from the original daemon's page
pub const STAGED_MESSAGE: &str = "Payload staged for next injection.";

// ============================================================================
// Health & Status
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct GadgetStatus {
    pub state: SessionState,
    pub interface_active: bool,
    /// Controller name
    pub bus: Option<String>,
    /// Bound interrupt-IN endpoint
    pub endpoint: Option<String>,
    pub outstanding_transfers: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub build_date: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub gadget: GadgetStatus,
    pub payload: PayloadStatus,
    /// What a read of the control surface returns
    pub diagnostic: String,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let gadget = match state.surface.session() {
        Some(session) => GadgetStatus {
            state: session.state(),
            interface_active: session.interface_active(),
            bus: Some(session.bus_name().to_string()),
            endpoint: session.endpoint().map(|ep| ep.info.name),
            outstanding_transfers: session.outstanding_transfers(),
        },
        None => GadgetStatus {
            state: SessionState::Unbound,
            interface_active: false,
            bus: None,
            endpoint: None,
            outstanding_transfers: 0,
        },
    };

    let mut file = state.surface.open();
    let mut buf = [0u8; 64];
    let n = file.read(&mut buf);
    file.close();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        gadget,
        payload: payload_status(&state),
        diagnostic: String::from_utf8_lossy(&buf[..n]).to_string(),
    })
}

// ============================================================================
// Payload
// ============================================================================

#[derive(Serialize)]
pub struct PayloadStatus {
    pub staged: bool,
    pub length: Option<usize>,
}

fn payload_status(state: &AppState) -> PayloadStatus {
    let length = state.payload.peek_len();
    PayloadStatus {
        staged: length.is_some(),
        length,
    }
}

/// Stage the request body as the next payload, replacing any staged one
pub async fn stage_payload(State(state): State<Arc<AppState>>, body: String) -> Result<String> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Empty payload".to_string()));
    }

    let length = body.len();
    if state.payload.stage(body).is_some() {
        info!("Staged payload replaced ({} bytes)", length);
    } else {
        info!("Payload staged ({} bytes)", length);
    }
    state.events.publish(SystemEvent::PayloadStaged { length });

    Ok(STAGED_MESSAGE.to_string())
}

pub async fn get_payload(State(state): State<Arc<AppState>>) -> Json<PayloadStatus> {
    Json(payload_status(&state))
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: Option<String>,
}

pub async fn clear_payload(State(state): State<Arc<AppState>>) -> Json<ActionResponse> {
    let cleared = state.payload.clear();
    if cleared {
        state.events.publish(SystemEvent::PayloadCleared);
    }
    Json(ActionResponse {
        success: true,
        message: Some(if cleared {
            "Payload cleared".to_string()
        } else {
            "No payload staged".to_string()
        }),
    })
}

// ============================================================================
// Trigger
// ============================================================================

pub async fn fire_trigger(State(state): State<Arc<AppState>>) -> Json<ActionResponse> {
    let accepted = state.fire_trigger(TriggerSource::Manual);
    Json(ActionResponse {
        success: accepted,
        message: Some(if accepted {
            "Trigger fired".to_string()
        } else {
            "Injection already pending".to_string()
        }),
    })
}
