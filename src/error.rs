//! # Error Handling
//!
//! Error taxonomy for the orchestrator. `OrchestratorError` covers the
//! lifecycle manager and its collaborators; `ExecutionError` describes how a
//! job's own execution failed and feeds the retry policy.
//!
//! Blocked dependencies, broker outages and checkpoint store outages are not
//! raised here. They surface as `DispatchOutcome` values, degraded monitor
//! statuses, `BrokerError` and `CheckpointStoreError`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

/// Errors raised by orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad submission or argument; fails fast and is never retried.
    #[error("invalid parameters: {message}")]
    InvalidParameters {
        message: String,
        field: Option<String>,
    },
    #[error("job {id} not found")]
    JobNotFound { id: Uuid },
    /// Lost race or duplicate callback. Logged and absorbed by the lifecycle
    /// manager, never returned from its public operations.
    #[error("illegal transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
    /// A read-modify-write kept losing to concurrent writers.
    #[error("job {id} changed concurrently {attempts} times; giving up")]
    ConcurrentUpdate { id: Uuid, attempts: usize },
    #[error("job store error: {0}")]
    Store(#[from] sea_orm::DbErr),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameters {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::InvalidParameters {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Error code for programmatic handling by API collaborators
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidParameters { .. } => "INVALID_PARAMETERS",
            OrchestratorError::JobNotFound { .. } => "NOT_FOUND",
            OrchestratorError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            OrchestratorError::ConcurrentUpdate { .. } => "CONCURRENT_UPDATE",
            OrchestratorError::Store(_) => "STORE_ERROR",
            OrchestratorError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// How an execution error was classified for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Timeouts, connection failures, rate limiting, 5xx/429 responses
    Transient,
    /// Not found, auth failures, malformed input, other 4xx responses
    Permanent,
    /// Not yet classified; the retry policy inspects category and message
    Unclassified,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionErrorKind::Transient => "transient",
            ExecutionErrorKind::Permanent => "permanent",
            ExecutionErrorKind::Unclassified => "unclassified",
        }
    }
}

/// Failure reported by a job's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
    /// Free-form error category, e.g. `timeout` or `not_found`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Upstream HTTP status, when the failure came from a platform API
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ExecutionError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self {
            kind: ExecutionErrorKind::Transient,
            message: message.into(),
            category: None,
            status_code: None,
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self {
            kind: ExecutionErrorKind::Permanent,
            message: message.into(),
            category: None,
            status_code: None,
        }
    }

    /// An error the retry policy classifies from its category and message.
    pub fn unclassified<S: Into<String>>(message: S) -> Self {
        Self {
            kind: ExecutionErrorKind::Unclassified,
            message: message.into(),
            category: None,
            status_code: None,
        }
    }

    pub fn with_category<S: Into<String>>(mut self, category: S) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error", self.kind.as_str())?;
        if let Some(category) = &self.category {
            write!(f, " [{}]", category)?;
        }
        if let Some(status) = self.status_code {
            write!(f, " (status {})", status)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for ExecutionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_screaming_snake_case() {
        let err = OrchestratorError::invalid_field("priority", "out of range");
        assert_eq!(err.code(), "INVALID_PARAMETERS");

        let err = OrchestratorError::ConcurrentUpdate {
            id: Uuid::nil(),
            attempts: 8,
        };
        assert_eq!(err.code(), "CONCURRENT_UPDATE");
        assert!(err.to_string().contains("8 times"));
    }

    #[test]
    fn execution_error_display_includes_context() {
        let err = ExecutionError::transient("upstream hiccup")
            .with_category("server_error")
            .with_status(503);
        assert_eq!(
            err.to_string(),
            "transient error [server_error] (status 503): upstream hiccup"
        );
    }

    #[test]
    fn execution_error_serializes_kind_snake_case() {
        let value = serde_json::to_value(ExecutionError::permanent("gone")).unwrap();
        assert_eq!(value["kind"], "permanent");
        assert!(value.get("category").is_none());
    }
}
