use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use wsm_core::WorkspaceError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Workspace(err) => match err {
                WorkspaceError::ComponentNotFound(_) => StatusCode::NOT_FOUND,
                WorkspaceError::InvalidOperation(_) | WorkspaceError::Config(_) => {
                    StatusCode::BAD_REQUEST
                }
                WorkspaceError::Timeout(_) | WorkspaceError::ComponentFailed { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(target: "wsm::api", status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use wsm_core::ConfigError;

    #[test]
    fn test_workspace_errors_map_to_status_codes() {
        let cases = [
            (WorkspaceError::ComponentNotFound("x".into()), StatusCode::NOT_FOUND),
            (WorkspaceError::InvalidOperation("x".into()), StatusCode::BAD_REQUEST),
            (
                WorkspaceError::Config(ConfigError::ValidationError("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (WorkspaceError::Timeout("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (
                WorkspaceError::ComponentFailed {
                    component: "watcher".into(),
                    reason: "x".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (WorkspaceError::Parse("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }
}
