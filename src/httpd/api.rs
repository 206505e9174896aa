use super::{json_error::JsonError, results::results_json};
use crate::app::AppState;
use axum::{extract::State, Json};

fn api_json(state: &AppState) -> vvm_json::Api {
    let results = results_json(state);
    let instrument = state.instrument().lock().unwrap();
    vvm_json::Api {
        settings: instrument.settings().clone(),
        ddc: instrument.ddc_json(),
        tuning: instrument.tuning_json(),
        results,
    }
}

pub async fn get_api(State(state): State<AppState>) -> Result<Json<vvm_json::Api>, JsonError> {
    Ok(Json(api_json(&state)))
}
