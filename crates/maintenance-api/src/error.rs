//! Maps [`EngineError`] onto HTTP status codes: not-found becomes 404, a bad request body
//! or builder rejection becomes 400, a lifecycle conflict (wrong state for the requested
//! action) becomes 409, a provider failure becomes 502, and a store failure or missing
//! worker becomes 500 (logged, since those indicate an internal fault rather than caller
//! error).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use maintenance_engine::EngineError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) | EngineError::Builder(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidState { .. } => StatusCode::CONFLICT,
            EngineError::Provider(_) => StatusCode::BAD_GATEWAY,
            EngineError::Store(_) | EngineError::WorkerGone(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
