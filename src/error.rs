use axum::http::StatusCode;

/// Domain error taxonomy. Every variant maps to a structured RPC fault
/// (`name` / `code` / `message`) plus an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CatalogError {
    /// RPC fault name, a stable string clients can match on.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::Unauthorized => "Unauthorized",
            Self::NotFound(_) => "NotFound",
            Self::Conflict(_) => "Conflict",
            Self::InvalidState(_) => "InvalidState",
            Self::InvalidParams(_) => "ValidationError",
            Self::MethodNotFound(_) => "MethodNotFound",
            Self::Internal(_) => "InternalError",
        }
    }

    /// RPC fault code. Standard JSON-RPC codes for envelope problems,
    /// server-range codes for domain failures.
    pub fn code(&self) -> i64 {
        match self {
            Self::PermissionDenied(_) => -32001,
            Self::Unauthorized => -32002,
            Self::NotFound(_) => -32003,
            Self::Conflict(_) => -32004,
            Self::InvalidState(_) => -32005,
            Self::InvalidParams(_) => -32602,
            Self::MethodNotFound(_) => -32601,
            Self::Internal(_) => -32500,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) | Self::MethodNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fault object embedded in the RPC error envelope.
    pub fn to_fault(&self) -> serde_json::Value {
        if let Self::Internal(err) = self {
            tracing::error!(error = %err, "internal server error");
            return serde_json::json!({
                "name": self.name(),
                "code": self.code(),
                "message": "internal server error",
            });
        }
        serde_json::json!({
            "name": self.name(),
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

/// Errors raised before RPC dispatch (extractor rejections) still answer
/// with the RPC error envelope; no request id is known at that point.
impl axum::response::IntoResponse for CatalogError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.to_fault(),
            "id": serde_json::Value::Null,
        });
        (self.status(), axum::Json(body)).into_response()
    }
}
