use super::json_error::JsonError;
use crate::app::AppState;
use axum::{extract::State, Json};

pub fn results_json(state: &AppState) -> vvm_json::Results {
    let mut results = state.results().snapshot();
    results.f_tune = state
        .instrument()
        .lock()
        .unwrap()
        .tuning()
        .map(|t| t.frequency);
    results
}

pub async fn get_results(
    State(state): State<AppState>,
) -> Result<Json<vvm_json::Results>, JsonError> {
    Ok(Json(results_json(&state)))
}
