use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::engine::EngineError;

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    UnknownCollection(String),
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::Validation(_) | EngineError::LimitExceeded(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Engine(EngineError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Engine(EngineError::WalError(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UnknownCollection(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Engine(e) => write!(f, "{e}"),
            ApiError::UnknownCollection(path) => write!(f, "unknown collection: {path}"),
            ApiError::BadRequest(msg) => write!(f, "bad request: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let body = match &self {
            ApiError::Engine(EngineError::Conflict(id)) => json!({
                "error": self.to_string(),
                "conflicting_id": id.to_string(),
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::validation("x"), StatusCode::BAD_REQUEST),
            (EngineError::LimitExceeded("x"), StatusCode::BAD_REQUEST),
            (EngineError::NotFound(Ulid::new()), StatusCode::NOT_FOUND),
            (EngineError::Conflict(Ulid::new()), StatusCode::CONFLICT),
            (EngineError::WalError("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::UnknownCollection("pools".into()).status(), StatusCode::NOT_FOUND);
    }
}
