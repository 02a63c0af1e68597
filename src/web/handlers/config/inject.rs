use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::info;

use crate::config::{InjectConfig, InjectConfigUpdate};
use crate::error::Result;
use crate::state::AppState;

pub async fn get_inject_config(State(state): State<Arc<AppState>>) -> Json<InjectConfig> {
    Json(state.config.get().inject.clone())
}

/// Update pacing; handles opened afterwards use the new timing
pub async fn update_inject_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InjectConfigUpdate>,
) -> Result<Json<InjectConfig>> {
    req.validate()?;

    let config = state
        .config
        .update(|config| req.apply_to(&mut config.inject))
        .await?;
    let inject = config.inject.clone();

    state.surface.set_pacing(inject.pacing());
    info!(
        "Injection pacing: hold {}ms, gap {}ms, batch {} every {}ms",
        inject.press_delay_ms, inject.release_delay_ms, inject.batch_size, inject.batch_delay_ms
    );

    Ok(Json(inject))
}
