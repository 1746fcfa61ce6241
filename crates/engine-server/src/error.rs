//! The single `IntoResponse` mapping site from the engine's closed error
//! taxonomy (spec §7) to HTTP status codes. Every handler in `http` returns
//! `Result<_, ApiError>` instead of reaching for `StatusCode` directly, so
//! this is the only place that decision is made.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use engine_core::EngineError;
use engine_orchestrator::TaskServiceError;
use engine_wire::ErrorResponse;

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl From<TaskServiceError> for ApiError {
    fn from(err: TaskServiceError) -> Self {
        match err {
            TaskServiceError::Engine(e) => Self(e),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(EngineError::Fatal(err.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            // Lineage-safety violations are reported as 400 (spec §6), not
            // 409: the request itself is the thing that's invalid, there is
            // no competing write to conflict with.
            EngineError::AutoTask(_) => StatusCode::BAD_REQUEST,
            EngineError::ProviderTransport(_) => StatusCode::BAD_GATEWAY,
            EngineError::TaskTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::WorkerExecution(_)
            | EngineError::SupervisorParse(_)
            | EngineError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}
