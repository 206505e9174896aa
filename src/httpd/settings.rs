use super::json_error::JsonError;
use crate::app::AppState;
use axum::{extract::State, Json};
use vvm_json::{PatchSettings, Settings};

fn settings_json(state: &AppState) -> Json<Settings> {
    Json(state.instrument().lock().unwrap().settings().clone())
}

pub async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>, JsonError> {
    Ok(settings_json(&state))
}

pub async fn patch_settings(
    State(state): State<AppState>,
    Json(patch): Json<PatchSettings>,
) -> Result<Json<Settings>, JsonError> {
    state
        .instrument()
        .lock()
        .unwrap()
        .set_settings(&patch)
        .map_err(|error| {
            tracing::warn!(?patch, "rejected settings: {error:#}");
            JsonError::client_error(error)
        })?;
    Ok(settings_json(&state))
}
