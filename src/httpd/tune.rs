use super::json_error::JsonError;
use crate::app::AppState;
use axum::{extract::State, Json};
use vvm_json::Tuning;

fn tuning_json(state: &AppState) -> Json<Tuning> {
    Json(state.instrument().lock().unwrap().tuning_json())
}

pub async fn get_tune(State(state): State<AppState>) -> Result<Json<Tuning>, JsonError> {
    Ok(tuning_json(&state))
}

/// The body is either `auto` or a frequency in Hz.
pub async fn put_tune(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<Tuning>, JsonError> {
    state
        .instrument()
        .lock()
        .unwrap()
        .tune_request(&body)
        .map_err(JsonError::client_error)?;
    Ok(tuning_json(&state))
}

pub async fn post_phase_reset(State(state): State<AppState>) -> Result<(), JsonError> {
    state
        .instrument()
        .lock()
        .unwrap()
        .phase_reset()
        .map_err(JsonError::server_error)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::test_state;

    #[tokio::test]
    async fn manual_tuning() {
        let state = test_state();
        let Json(tuning) = put_tune(State(state.clone()), "100e6\n".to_string())
            .await
            .unwrap();
        assert!(!tuning.auto);
        assert_eq!(tuning.frequency, Some(100e6));
        assert_eq!(tuning.words.len(), 4);
        // auto tuning needs a reference measurement
        assert!(put_tune(State(state.clone()), "auto".to_string())
            .await
            .is_err());
        state.instrument().lock().unwrap().set_reference(7e6);
        let Json(tuning) = put_tune(State(state.clone()), "auto".to_string())
            .await
            .unwrap();
        assert!(tuning.auto);
        assert!(put_tune(State(state.clone()), "-5".to_string())
            .await
            .is_err());
        let Json(after) = get_tune(State(state)).await.unwrap();
        assert_eq!(after, tuning);
    }

    #[tokio::test]
    async fn phase_reset() {
        let state = test_state();
        post_phase_reset(State(state)).await.unwrap();
    }
}
