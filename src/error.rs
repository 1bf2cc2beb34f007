use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::warn;

#[derive(Debug, ThisError)]
pub enum VpnmuxError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} is in use by {dependent}")]
    InUse {
        kind: &'static str,
        id: String,
        dependent: String,
    },

    #[error("all routing table IDs in [{first},{last}] are in use")]
    AllocationExhausted { first: u32, last: u32 },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("failed to spawn `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from `{command}`: {output:?}")]
    UnexpectedOutput { command: String, output: String },

    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<VpnmuxError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Ractor error: {0}")]
    RactorError(String),
}

impl VpnmuxError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        VpnmuxError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VpnmuxError::NotFound { .. })
    }

    /// Collapse the errors of a best-effort multi-step operation.
    pub fn collect(mut errors: Vec<VpnmuxError>) -> Result<(), VpnmuxError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(VpnmuxError::Multiple(errors)),
        }
    }
}

fn join_errors(errors: &[VpnmuxError]) -> String {
    let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("{} errors occurred: {}", errors.len(), parts.join("; "))
}

impl IntoResponse for VpnmuxError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_body) = match &self {
            VpnmuxError::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                ApiErrorBody {
                    code: "NOT_FOUND".to_string(),
                    message: "Resource not found".to_string(),
                },
            ),
            VpnmuxError::Invalid(reason) => (
                StatusCode::BAD_REQUEST,
                ApiErrorBody {
                    code: "BAD_REQUEST".to_string(),
                    message: reason.clone(),
                },
            ),
            _ => {
                warn!(error = %self, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorBody {
                        code: "INTERNAL_ERROR".to_string(),
                        message: "An internal server error occurred.".to_string(),
                    },
                )
            }
        };
        (status, Json(ApiErrorResponse { error: error_body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_keeps_single_error_unwrapped() {
        let err = VpnmuxError::collect(vec![VpnmuxError::not_found("network", "n1")])
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn collect_aggregates_every_error() {
        let err = VpnmuxError::collect(vec![
            VpnmuxError::Consistency("first".into()),
            VpnmuxError::Consistency("second".into()),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("2 errors occurred"));
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }

    #[test]
    fn not_found_maps_to_404_and_the_rest_to_500() {
        let resp = VpnmuxError::not_found("client", "c1").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = VpnmuxError::AllocationExhausted { first: 1, last: 252 }.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = VpnmuxError::Invalid("bad address".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
