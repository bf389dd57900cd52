//! Error types for the ferroctl control-plane client.
//!
//! This module provides the error hierarchy for all operations in the client:
//! configuration, remote API access, reconciliation, operation waiting and
//! asynchronous image builds.

use std::path::PathBuf;
use thiserror::Error;

use crate::api::ResourceKind;

/// The main error type for the ferroctl client.
#[derive(Debug, Error)]
pub enum FerroError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Control-plane API errors.
    #[error("Control-plane API error: {0}")]
    Api(#[from] ApiError),

    /// Errors raised while waiting for a remote operation.
    #[error("Wait error: {0}")]
    Wait(#[from] WaitError),

    /// Asynchronous build protocol errors.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// These fail fast and are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A resource file was not found.
    #[error("Resource file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// A resource file could not be parsed.
    #[error("Failed to parse resource file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A declared resource is structurally invalid.
    #[error("Invalid resource declaration: {message}")]
    InvalidResource {
        /// Description of the problem.
        message: String,
    },

    /// The resource kind is not one of the supported kinds.
    #[error("Unknown resource kind: {kind}")]
    UnknownResourceKind {
        /// The unrecognized kind string.
        kind: String,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A wait configuration carries a non-positive timeout or interval.
    #[error("Invalid wait configuration: {message}")]
    InvalidWaitConfig {
        /// Description of the violation.
        message: String,
    },
}

/// Control-plane API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error("Control-plane authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The server answered with a non-success status code.
    #[error("Control-plane request failed: {status} - {message}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the server.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with the control plane: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from the control plane: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Errors raised by the operation waiter.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The remote operation reached a failed terminal state.
    ///
    /// This is raised once and never retried.
    #[error("Operation '{operation}' failed: {message}")]
    OperationFailed {
        /// Name of the operation that failed.
        operation: String,
        /// Failure description reported by the server.
        message: String,
    },

    /// The operation did not reach a terminal state within the bound.
    ///
    /// Distinct from [`WaitError::OperationFailed`] so callers can tell
    /// "never finished" from "finished badly".
    #[error("Timed out after {timeout_secs}s waiting for operation '{operation}'")]
    Timeout {
        /// Name of the operation that was awaited.
        operation: String,
        /// The configured bound in seconds.
        timeout_secs: u64,
    },
}

/// Asynchronous build protocol errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The remote build finished with an error.
    #[error("Build {build_id} failed: {message}")]
    BuildFailed {
        /// Idempotency key of the failed build.
        build_id: String,
        /// Error text reported by the builder.
        message: String,
    },

    /// The polling budget was exhausted before the build finished.
    ///
    /// Distinct from [`BuildError::BuildFailed`]: the build may still be
    /// running on the server.
    #[error("Failed to obtain result of build {build_id} after {attempts} attempts")]
    ResultUnavailable {
        /// Idempotency key of the build.
        build_id: String,
        /// Number of poll attempts made.
        attempts: u32,
    },
}

/// A reconciliation failure for a single resource.
///
/// Unlike the other error types these are collected as data inside an
/// [`crate::reconciler::ApplyResult`] and never abort the batch.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// No client is registered for the resource kind.
    #[error("No client available for {kind} '{name}'")]
    ClientUnavailable {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Name of the resource.
        name: String,
    },

    /// The existence check failed with something other than "not found".
    #[error("Can not get status of {kind} '{name}': {reason}")]
    StatusCheckFailed {
        /// Kind of the resource.
        kind: ResourceKind,
        /// Name of the resource.
        name: String,
        /// Underlying failure description.
        reason: String,
    },

    /// A create/edit/delete call failed.
    #[error("Can not {operation} {kind} '{name}': {reason}")]
    MutationFailed {
        /// The attempted operation (create, edit or delete).
        operation: String,
        /// Kind of the resource.
        kind: ResourceKind,
        /// Name of the resource.
        name: String,
        /// Underlying failure description.
        reason: String,
    },
}

/// Result type alias for ferroctl operations.
pub type Result<T> = std::result::Result<T, FerroError>;

impl FerroError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is a "resource not found" response.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Api(ApiError::RequestFailed { status: 404, .. })
        )
    }

    /// Returns true if this error is retryable.
    ///
    /// Transient transport failures and server-side 5xx responses are the
    /// retryable class; everything else propagates.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Api(
                ApiError::NetworkError { .. }
                    | ApiError::RequestFailed {
                        status: 500..=599,
                        ..
                    }
            )
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Api(ApiError::NetworkError { .. }) => Some(5),
            Self::Api(ApiError::RequestFailed {
                status: 500..=599, ..
            }) => Some(2),
            _ => None,
        }
    }
}

impl ApiError {
    /// Creates a request error from a status code and server message.
    #[must_use]
    pub fn request_failed(status: u16, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl ConfigError {
    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }

    /// Creates an invalid-resource error.
    #[must_use]
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }
}

impl ApplyError {
    /// Identity of the resource this error is about.
    #[must_use]
    pub fn identity(&self) -> (ResourceKind, &str) {
        match self {
            Self::ClientUnavailable { kind, name }
            | Self::StatusCheckFailed { kind, name, .. }
            | Self::MutationFailed { kind, name, .. } => (*kind, name.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let err = FerroError::Api(ApiError::request_failed(404, "no such resource"));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        let err = FerroError::Api(ApiError::request_failed(409, "conflict"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FerroError::Api(ApiError::network("connection reset")).is_retryable());
        assert!(FerroError::Api(ApiError::request_failed(500, "boom")).is_retryable());
        assert!(!FerroError::Api(ApiError::request_failed(400, "bad request")).is_retryable());
        assert!(!FerroError::Wait(WaitError::Timeout {
            operation: String::from("mt"),
            timeout_secs: 5,
        })
        .is_retryable());
    }
}
