/**
 * KERNEL ERRORS - Error taxonomy shared by every kernel component
 *
 * ROLE:
 * Validation and not-found errors are terminal and go back to the caller.
 * Persistence and serialization errors are caught at the component boundary
 * that triggered them, logged, and surfaced as a generic 500.
 */

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;

/// One rejected input field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Field-level validation failures collected over a whole payload.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Ok(value) when nothing was rejected, otherwise the collected errors.
    pub fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, KernelError> {
        if self.is_empty() {
            Ok(value())
        } else {
            Err(KernelError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", fields.join(", "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KernelError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        KernelError::NotFound { kind, id: id.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            KernelError::Validation(_) => StatusCode::BAD_REQUEST,
            KernelError::NotFound { .. } => StatusCode::NOT_FOUND,
            KernelError::Persistence(_) | KernelError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for KernelError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            KernelError::Validation(errors) => serde_json::json!({ "errors": errors.errors }),
            KernelError::NotFound { kind, id } => {
                serde_json::json!({ "error": format!("{kind} not found"), "id": id })
            }
            other => {
                tracing::error!(error = %other, "request failed");
                serde_json::json!({ "error": "internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}
