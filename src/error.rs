use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::SessionType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("You must be logged in to do that.")]
    NotAuthenticated,

    #[error("Admin access required.")]
    Forbidden,

    #[error("Unknown session type: {0}")]
    InvalidSessionType(String),

    #[error("{0} predictions are locked.")]
    SessionLocked(SessionType),

    #[error("{0} not found.")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::InvalidSessionType(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::SessionLocked(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Storage(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_storage_error_renders_verbatim_as_bad_gateway() {
        let resp = AppError::Storage("relation \"predictions_race\" does not exist".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "relation \"predictions_race\" does not exist");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::NotAuthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::SessionLocked(SessionType::Race).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::InvalidSessionType("fp2".to_string()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("Race 4".to_string()).status(), StatusCode::NOT_FOUND);
    }
}
