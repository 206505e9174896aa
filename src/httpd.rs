//! HTTP server.
//!
//! This module contains the HTTP server of vvm-httpd, which is a web server
//! implemented using [`axum`].

use crate::app::AppState;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

mod api;
mod results;
mod settings;
mod tune;
mod websocket;

/// HTTP server.
///
/// This HTTP server gives access to the settings, the tuning and the results
/// of the instrument, and streams the measurement batches to WebSocket
/// clients.
#[derive(Debug)]
pub struct Server {
    server: axum::serve::Serve<Router, Router>,
}

impl Server {
    /// Creates a new HTTP server.
    ///
    /// The `address` parameter gives the address in which the server will
    /// listen. The `state` gives the server shared access to the instrument
    /// and its results.
    ///
    /// After calling this function, the server needs to be run by calling
    /// [`Server::run`].
    pub async fn new(address: &std::net::SocketAddr, state: AppState) -> Result<Server> {
        let app = Router::new()
            .route("/api", get(api::get_api).with_state(state.clone()))
            .route(
                "/api/settings",
                get(settings::get_settings)
                    .patch(settings::patch_settings)
                    .with_state(state.clone()),
            )
            .route(
                "/api/tune",
                get(tune::get_tune)
                    .put(tune::put_tune)
                    .with_state(state.clone()),
            )
            .route(
                "/api/phase_reset",
                post(tune::post_phase_reset).with_state(state.clone()),
            )
            .route(
                "/api/results",
                get(results::get_results).with_state(state.clone()),
            )
            .route("/measurements", get(websocket::handler).with_state(state));
        tracing::info!(%address, "starting HTTP server");
        let listener = tokio::net::TcpListener::bind(address).await?;
        let server = axum::serve(listener, app.layer(TraceLayer::new_for_http()));
        Ok(Server { server })
    }

    /// Runs the HTTP server.
    ///
    /// This only returns if there is a fatal error.
    pub async fn run(self) -> Result<()> {
        Ok(self.server.await?)
    }
}

mod json_error {
    use anyhow::Error;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use serde::Serialize;

    #[derive(Serialize, Debug, Clone, Eq, PartialEq)]
    pub struct JsonError {
        http_status_code: u16,
        error_description: String,
    }

    impl JsonError {
        pub fn from_error(status_code: StatusCode, error: Error) -> JsonError {
            JsonError {
                http_status_code: status_code.as_u16(),
                error_description: format!("{error:#}"),
            }
        }

        pub fn client_error(error: Error) -> JsonError {
            JsonError::from_error(StatusCode::BAD_REQUEST, error)
        }

        pub fn server_error(error: Error) -> JsonError {
            JsonError::from_error(StatusCode::INTERNAL_SERVER_ERROR, error)
        }
    }

    impl IntoResponse for JsonError {
        fn into_response(self) -> Response {
            let status_code = StatusCode::from_u16(self.http_status_code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            match serde_json::to_string(&self) {
                Ok(json) => (status_code, json).into_response(),
                Err(_) => status_code.into_response(),
            }
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn client_error() {
            let error = JsonError::client_error(anyhow::anyhow!("invalid tuning target"));
            assert_eq!(error.http_status_code, 400);
            assert_eq!(
                serde_json::to_string(&error).unwrap(),
                r#"{"http_status_code":400,"error_description":"invalid tuning target"}"#
            );
            assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }
}
