use std::any::Any;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use heroes_core::CrudError;
use heroes_infra::QueueError;

const CLIENT_ERROR: &str = "Client Error";
const INTERNAL_ERROR: &str = "Internal Server Error";
const INTERNAL_MESSAGE: &str = "An unexpected error occurred.";

/// Error returned by every handler.
///
/// Client errors carry their own status and message; everything else is
/// logged server-side and rendered as an opaque 500.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Client { status: StatusCode, message: String },

    #[error(transparent)]
    Crud(#[from] CrudError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn client(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Client {
            status,
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::client(StatusCode::UNPROCESSABLE_ENTITY, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Client { status, message } => json_error(status, CLIENT_ERROR, message),
            Self::Crud(err) => match &err {
                CrudError::NotFound { .. } | CrudError::Unsupported { .. } => {
                    json_error(StatusCode::NOT_FOUND, CLIENT_ERROR, err.to_string())
                }
                CrudError::Validation(msg) => {
                    json_error(StatusCode::UNPROCESSABLE_ENTITY, CLIENT_ERROR, msg.clone())
                }
                _ => internal_error(&err),
            },
            Self::Queue(err) => internal_error(&err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn internal_error(err: &(dyn std::error::Error + 'static)) -> Response {
    error!(error = %err, detail = ?err, "unhandled error");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, INTERNAL_MESSAGE)
}

/// Response for a handler that panicked (used with `CatchPanicLayer`).
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = detail, "handler panicked");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, INTERNAL_MESSAGE)
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use heroes_core::EntityId;

    use super::*;

    async fn body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn not_found_and_unsupported_are_404_client_errors() {
        let response = ApiError::from(CrudError::not_found("Hero", EntityId::new())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body(response).await["error"], "Client Error");

        let response = ApiError::from(CrudError::unsupported("Gadget", "restore")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn internal_errors_are_opaque() {
        let response = ApiError::from(CrudError::storage("relation \"heroes\" does not exist")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body(response).await;
        assert_eq!(json["error"], "Internal Server Error");
        assert_eq!(json["message"], "An unexpected error occurred.");

        let response = ApiError::from(QueueError::NotInitialized).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn validation_is_422() {
        let response = ApiError::from(CrudError::validation("name must not be blank")).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body(response).await["message"], "name must not be blank");
    }
}
