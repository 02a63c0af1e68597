use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Session has no active interrupt-IN interface
    #[error("Gadget not ready: no active HID interface")]
    NotReady,

    #[error("Invalid descriptor index: {0}")]
    InvalidIndex(u8),

    #[error("Unsupported control request: bmRequestType={request_type:#04x} bRequest={request:#04x}")]
    NotSupported { request_type: u8, request: u8 },

    #[error("Transfer allocation failed")]
    AllocationFailure,

    #[error("Endpoint bind failed: {0}")]
    BindFailure(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bus error: {0}")]
    Bus(String),
}

impl AppError {
    /// True for errors that stall the control pipe rather than tear anything down
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidIndex(_) | Self::NotSupported { .. }
        )
    }

    fn status_code(&self) -> StatusCode {
        // Always return 200 OK - success/failure is indicated by the success field
        StatusCode::OK
    }
}

impl From<nix::Error> for AppError {
    fn from(err: nix::Error) -> Self {
        Self::Io(std::io::Error::from(err))
    }
}

/// Error response body (unified success format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::error!(
            error_type = std::any::type_name_of_val(&self),
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors() {
        assert!(AppError::InvalidIndex(9).is_protocol_error());
        assert!(AppError::NotSupported {
            request_type: 0x80,
            request: 0x00
        }
        .is_protocol_error());
        assert!(!AppError::NotReady.is_protocol_error());
        assert!(!AppError::AllocationFailure.is_protocol_error());
    }

    #[test]
    fn test_not_supported_message() {
        let err = AppError::NotSupported {
            request_type: 0x21,
            request: 0x01,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported control request: bmRequestType=0x21 bRequest=0x01"
        );
    }
}
