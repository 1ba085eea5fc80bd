use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleet_types::ActionResponse;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("service not found: {0}")]
    NotFound(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("failed to read logs for {name}: {source}")]
    LogRead {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
            SupervisorError::InvalidPort(_) => StatusCode::BAD_REQUEST,
            SupervisorError::LogRead { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SupervisorError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        if code.is_server_error() {
            tracing::error!(err = %self, "request failed");
        }
        (code, Json(ActionResponse::failed(self.to_string(), None))).into_response()
    }
}
