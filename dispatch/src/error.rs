//! HTTP error type and its `{success: false, message}` response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::contacts::ContactError;
use crate::dispatcher::DispatchError;
use crate::recordings::RecordingError;
use crate::types::MessageResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, "Request failed: {self}");
        }
        (status, Json(MessageResponse::failed(self.to_string()))).into_response()
    }
}

impl From<ContactError> for ApiError {
    fn from(err: ContactError) -> Self {
        match err {
            ContactError::Validation(msg) => Self::BadRequest(msg),
            ContactError::NotFound(_) => Self::NotFound(err.to_string()),
            ContactError::Storage(_) => Self::ServiceUnavailable(err.to_string()),
        }
    }
}

impl From<RecordingError> for ApiError {
    fn from(err: RecordingError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        tracing::error!("Dispatch failed: {err}");
        Self::Internal("Something went wrong!".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_errors_map_to_status() {
        let e: ApiError = ContactError::Validation("Name and phone required".into()).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.to_string(), "Name and phone required");

        let e: ApiError = ContactError::NotFound("x".into()).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
        assert_eq!(e.to_string(), "Contact not found");
    }

    #[test]
    fn test_dispatch_error_hides_detail() {
        let e: ApiError =
            DispatchError::Contacts(ContactError::Storage("db down".into())).into();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.to_string(), "Something went wrong!");
    }
}
