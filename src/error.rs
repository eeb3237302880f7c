//! Gateway-facing error taxonomy.
//!
//! Internal plumbing below the Gateway uses `anyhow::Result` with `.context()`
//! throughout, exactly as the rest of this codebase does. `RagError` exists only
//! at the boundary where a stable, matchable error category is required: the
//! HTTP surface (`server.rs`) and the MCP surface (`mcp.rs`), both of which must
//! map failures onto specific status codes / tool error payloads.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error taxonomy from the design: client error, ingest-processing error,
/// retrieval-degradation (not an error — see [`crate::retrieval::Answer::warnings`]),
/// transient infrastructure error, conflict, and fatal.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("{0}")]
    BadRequest(String),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("unprocessable request: {0}")]
    Unprocessable(String),

    #[error("registry conflict: {0}")]
    Conflict(String),

    #[error("upstream service unavailable after retries: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let status = match &self {
            RagError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RagError::Conflict(_) => StatusCode::CONFLICT,
            RagError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self {
            // Internal errors are logged with full context but never echoed to
            // the client verbatim.
            RagError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, axum::Json(ErrorBody { detail })).into_response()
    }
}

pub type RagResult<T> = Result<T, RagError>;
