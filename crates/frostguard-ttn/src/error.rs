//! Error types for the TTN client layer.
//!
//! HTTP-level failures (4xx/5xx) are never surfaced as errors here; they come
//! back inside [`crate::client::TtnResponse`] so callers can run them through
//! the classifier. Only network-level and configuration failures are errors.

use thiserror::Error;

use crate::cluster::{ClusterConfigError, ClusterViolation};

/// Errors raised by the TTN client.
#[derive(Debug, Error)]
pub enum TtnError {
    /// The request targeted a host outside the approved cluster.
    #[error(transparent)]
    Cluster(#[from] ClusterViolation),

    /// The cluster configuration is invalid.
    #[error(transparent)]
    ClusterConfig(#[from] ClusterConfigError),

    /// Transport-level failure: DNS, TLS, connect, timeout.
    ///
    /// Callers classify this as `NETWORK_ERROR` (retryable).
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The HTTP client could not be constructed.
    #[error("invalid client configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Credential encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed { message: String },

    /// Credential decryption failed.
    #[error("decryption failed: {message}")]
    DecryptionFailed { message: String },

    /// A response body could not be decoded into the expected shape.
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TtnError {
    /// Create a network error without a source.
    pub fn network(message: impl Into<String>) -> Self {
        TtnError::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error from a reqwest transport failure.
    pub fn network_with_source(message: impl Into<String>, source: reqwest::Error) -> Self {
        TtnError::Network {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Result type for TTN client operations.
pub type TtnResult<T> = Result<T, TtnError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{assert_single_cluster, ClusterConfig};

    #[test]
    fn test_cluster_violation_converts() {
        let config = ClusterConfig::new("https://nam1.cloud.thethings.network").unwrap();
        let violation =
            assert_single_cluster(&config, "https://eu1.cloud.thethings.network/x").unwrap_err();
        let err: TtnError = violation.into();
        assert!(matches!(err, TtnError::Cluster(_)));
    }

    #[test]
    fn test_network_error_display() {
        let err = TtnError::network("connection refused");
        assert_eq!(err.to_string(), "network error: connection refused");
    }
}
