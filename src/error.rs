//! Application error types for xsoar-ctl
//!
//! This module defines the error types shared by the HTTP client, the
//! resource handlers and the tenant sync. All error types use `thiserror`.

use thiserror::Error;

/// Errors raised by the XSOAR HTTP client
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ClientError {
    /// Request did not complete within the client timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// TCP connection could not be established
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// TLS handshake or certificate validation failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Server rejected the API key or credentials
    #[error("Unauthorized: HTTP {0}")]
    Unauthorized(u16),

    /// Requested resource does not exist
    #[error("Resource not found")]
    NotFound,

    /// Server rejected the request payload (bad field, conflicting resource)
    #[error("Rejected by server (HTTP {status}): {message}")]
    Validation {
        /// HTTP status code
        status: u16,
        /// Message extracted from the error body
        message: String,
    },

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Response body could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Client could not be built from the connection settings
    #[error("Invalid client configuration: {0}")]
    Configuration(String),

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// Errors raised while reconciling a single resource
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Desired state is inconsistent (missing or conflicting parameters)
    #[error("Invalid parameters for {kind} '{name}': {reason}")]
    InvalidParameters {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
        /// Human readable reason
        reason: String,
    },

    /// More than one remote record carries the requested name
    #[error("{kind} '{name}' is ambiguous: {count} records share this name")]
    AmbiguousResource {
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
        /// Number of matching records
        count: usize,
    },

    /// An API call failed
    #[error("Failed to {action} {kind} '{name}': {source}")]
    Api {
        /// Operation that failed (lookup, create, update, delete)
        action: &'static str,
        /// Resource kind
        kind: &'static str,
        /// Resource name
        name: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },
}

impl ModuleError {
    /// Build an `InvalidParameters` error
    pub fn invalid(kind: &'static str, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the tenant content sync
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Neither or both of `accounts`/`all_accounts` were given
    #[error("Invalid sync request: {0}")]
    InvalidRequest(String),

    /// The account list could not be read from the master
    #[error("Failed to enumerate accounts: {0}")]
    AccountList(#[source] ClientError),

    /// The server-side sync of all accounts failed
    #[error("Failed to sync all accounts: {0}")]
    SyncAll(#[source] ClientError),

    /// At least one account failed and the run was configured to fail
    #[error("{failed} of {total} accounts failed to sync")]
    AccountsFailed {
        /// Accounts that failed or timed out
        failed: usize,
        /// Accounts processed
        total: usize,
    },
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::NetworkTimeout => true,
            ClientError::ConnectionRefused(_) => true,
            ClientError::ServerError(code) if *code >= 500 => true,
            ClientError::Network(_) => true,

            ClientError::Tls(_) => false,
            ClientError::Unauthorized(_) => false,
            ClientError::NotFound => false,
            ClientError::Validation { .. } => false,
            ClientError::ServerError(_) => false,
            ClientError::InvalidData(_) => false,
            ClientError::Configuration(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_messages() {
        assert_eq!(ClientError::NetworkTimeout.to_string(), "Network timeout");
        assert_eq!(
            ClientError::Unauthorized(401).to_string(),
            "Unauthorized: HTTP 401"
        );
        assert_eq!(
            ClientError::Validation {
                status: 400,
                message: "name already exists".to_string()
            }
            .to_string(),
            "Rejected by server (HTTP 400): name already exists"
        );
        assert_eq!(
            ClientError::ServerError(503).to_string(),
            "Server error: HTTP 503"
        );
    }

    #[test]
    fn test_client_error_retryable() {
        assert!(ClientError::NetworkTimeout.is_retryable());
        assert!(ClientError::ConnectionRefused("refused".to_string()).is_retryable());
        assert!(ClientError::ServerError(502).is_retryable());
        assert!(ClientError::Network("reset".to_string()).is_retryable());

        assert!(!ClientError::Unauthorized(403).is_retryable());
        assert!(!ClientError::NotFound.is_retryable());
        assert!(!ClientError::Tls("bad certificate".to_string()).is_retryable());
        assert!(!ClientError::Validation {
            status: 400,
            message: "bad".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_module_error_display_includes_context() {
        let err = ModuleError::Api {
            action: "create",
            kind: "List",
            name: "Configuration".to_string(),
            source: ClientError::Unauthorized(401),
        };
        assert_eq!(
            err.to_string(),
            "Failed to create List 'Configuration': Unauthorized: HTTP 401"
        );

        let err = ModuleError::invalid("Job", "nightly", "cron is required");
        assert_eq!(
            err.to_string(),
            "Invalid parameters for Job 'nightly': cron is required"
        );
    }

    #[test]
    fn test_module_error_source_chain() {
        use std::error::Error as _;

        let err = ModuleError::Api {
            action: "delete",
            kind: "Credential",
            name: "svc".to_string(),
            source: ClientError::ServerError(500),
        };
        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "Server error: HTTP 500");
    }

    #[test]
    fn test_sync_error_messages() {
        assert_eq!(
            SyncError::AccountsFailed {
                failed: 1,
                total: 3
            }
            .to_string(),
            "1 of 3 accounts failed to sync"
        );
        assert_eq!(
            SyncError::AccountList(ClientError::NetworkTimeout).to_string(),
            "Failed to enumerate accounts: Network timeout"
        );
    }
}
