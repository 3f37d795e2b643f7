use crate::services::{resolver::ResolveError, symbol_store::StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error returned from handlers; rendered as a small JSON document.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 502 Bad Gateway (upstream registry failed)
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Registry(errors) => AppError::bad_gateway(errors.to_string()),
            ResolveError::Storage(err) => err.into(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::internal(format!("symbol storage failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry_client::{RegistryError, RegistryErrors};
    use reqwest::Url;
    use std::io;

    #[test]
    fn registry_failures_are_bad_gateway_listing_every_error() {
        let url = Url::parse("http://registry.invalid/api/v4/groups").unwrap();
        let err = ResolveError::Registry(RegistryErrors(vec![
            RegistryError::HttpStatus {
                url: url.clone(),
                status: StatusCode::UNAUTHORIZED,
            },
            RegistryError::HttpStatus {
                url,
                status: StatusCode::SERVICE_UNAVAILABLE,
            },
        ]));
        let app: AppError = err.into();
        assert_eq!(app.status, StatusCode::BAD_GATEWAY);
        assert!(app.message.starts_with("2 registry request(s) failed"));
        assert!(app.message.contains("401"));
        assert!(app.message.contains("503"));
    }

    #[test]
    fn storage_failures_are_internal() {
        let err = ResolveError::Storage(StorageError::Io(io::Error::other("disk full")));
        let app: AppError = err.into();
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(app.message.contains("disk full"));
    }

    #[test]
    fn response_carries_status() {
        let response = AppError::bad_gateway("upstream down").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
