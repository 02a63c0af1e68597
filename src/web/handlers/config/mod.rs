//! Configuration handlers
//!
//! - GET   /api/config        - full configuration
//! - PATCH /api/config/inject - update pacing and batching

mod inject;

pub use inject::{get_inject_config, update_inject_config};

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::state::AppState;

pub async fn get_all_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    Json((*state.config.get()).clone())
}
