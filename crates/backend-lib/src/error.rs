// crates/backend-lib/src/error.rs

//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    UniquenessConflict(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Authentication rate limit exceeded")]
    AuthRateLimited,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidToken(_) | AppError::Unauthorized | AppError::InvalidPassword => {
                StatusCode::UNAUTHORIZED
            },
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UniquenessConflict(_) => StatusCode::CONFLICT,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::AuthRateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CFG_001",
            AppError::ProviderUnavailable(_) => "PROVIDER_001",
            AppError::InvalidToken(_) => "AUTH_001",
            AppError::InvalidPassword => "AUTH_002",
            AppError::AuthRateLimited => "AUTH_003",
            AppError::Unauthorized => "AUTH_004",
            AppError::NotFound(_) => "NF_001",
            AppError::UniquenessConflict(_) => "DUP_001",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Internal(_) => "INT_001",
            AppError::Io(_) => "IO_001",
            AppError::Json(_) => "JSON_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::InvalidToken(_) | AppError::InvalidPassword | AppError::Unauthorized => {
                "Authentication failed".to_string()
            },
            AppError::AuthRateLimited => {
                "Too many authentication attempts, please try again later".to_string()
            },
            AppError::ProviderUnavailable(_) => {
                "The identity provider is unavailable, please try again later".to_string()
            },
            AppError::NotFound(_) => "Resource not found".to_string(),
            // Field-level detail is what the client needs to fix its request
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::UniquenessConflict(msg) => format!("{msg} is already taken"),
            AppError::Json(_) => "Invalid request format".to_string(),
            AppError::Configuration(_) | AppError::Internal(_) | AppError::Io(_) => {
                "An internal server error occurred".to_string()
            },
        }
    }

    /// Whether the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::UniquenessConflict(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %self, "request failed");
        } else {
            tracing::debug!(code = error_code, error = %self, "request rejected");
        }

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::ProviderUnavailable("profile request timed out".to_string())
        } else {
            AppError::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AppError::InvalidToken("token expired".to_string()),
            ErrorKind::InvalidSignature => AppError::InvalidToken("signature mismatch".to_string()),
            _ => AppError::InvalidToken(err.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_app_error_display() {
        let token_error = AppError::InvalidToken("signature mismatch".to_string());
        assert_eq!(token_error.to_string(), "Invalid token: signature mismatch");

        let io_error = AppError::Io(IoError::new(ErrorKind::NotFound, "File not found"));
        assert!(io_error.to_string().contains("IO error"));

        assert_eq!(
            AppError::AuthRateLimited.to_string(),
            "Authentication rate limit exceeded"
        );
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::InvalidToken("x".to_string()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Configuration("x".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::NotFound("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::UniquenessConflict("username".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::ProviderUnavailable("down".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::AuthRateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_app_error_error_codes() {
        assert_eq!(AppError::InvalidToken("x".to_string()).error_code(), "AUTH_001");
        assert_eq!(AppError::Internal("x".to_string()).error_code(), "INT_001");
        assert_eq!(AppError::NotFound("x".to_string()).error_code(), "NF_001");
        assert_eq!(
            AppError::ProviderUnavailable("x".to_string()).error_code(),
            "PROVIDER_001"
        );

        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        assert_eq!(AppError::Json(json_err).error_code(), "JSON_001");
    }

    #[test]
    fn test_provider_message_is_generic() {
        let err = AppError::ProviderUnavailable("connect error: 10.0.0.1:443".to_string());
        assert!(!err.sanitized_message().contains("10.0.0.1"));
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(AppError::UniquenessConflict("username".to_string()).is_retryable());
        assert!(!AppError::NotFound("user".to_string()).is_retryable());
    }

    #[test]
    fn test_error_from_impls() {
        let io_err = IoError::new(ErrorKind::PermissionDenied, "Permission denied");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));

        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let app_err: AppError = json_err.into();
        assert!(matches!(app_err, AppError::Json(_)));

        let app_err: AppError = "Str error".into();
        assert!(matches!(app_err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_error_serialization() {
        let response = AppError::NotFound("passport".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("application/json"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "NF_001");
    }
}
