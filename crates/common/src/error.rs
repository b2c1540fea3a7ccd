use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Error taxonomy from the design notes (§7): each variant carries its own
/// fixed HTTP/exit-code fate, so callers never have to re-derive it.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("not found")]
    NotFound,

    #[error("store error: {0}")]
    StoreTransient(#[source] sqlx::Error),

    #[error("fatal store error: {0}")]
    StoreFatal(#[source] sqlx::Error),

    #[error("broker error: {0}")]
    BrokerTransient(#[source] lapin::Error),

    #[error("fatal broker error: {0}")]
    BrokerFatal(#[source] lapin::Error),

    #[error("worker '{0}' is already online")]
    DuplicateWorker(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound,
            other => CoreError::StoreTransient(other),
        }
    }
}

impl From<lapin::Error> for CoreError {
    fn from(err: lapin::Error) -> Self {
        CoreError::BrokerTransient(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps the taxonomy onto the HTTP surfaces of §4.1/§4.3. Error responses are
/// plain-text-flavored JSON bodies, matching the teacher's `ErrorResponse`.
impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
            CoreError::NotFound => StatusCode::NOT_FOUND,
            CoreError::StoreTransient(_) | CoreError::BrokerTransient(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CoreError::StoreFatal(_) | CoreError::BrokerFatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CoreError::DuplicateWorker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Malformed(_) => StatusCode::BAD_REQUEST,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
