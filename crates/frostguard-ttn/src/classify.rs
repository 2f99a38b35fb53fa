//! Error classification for TTN control-plane responses.
//!
//! Maps an HTTP status plus response body to a fixed taxonomy with a
//! retry/block decision. The orchestrators never look at raw statuses; every
//! failure goes through [`classify`] (or [`classify_network`] for transport
//! failures) before any job status transition.

use serde_json::Value;

/// Fixed error taxonomy for control-plane failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// 403: the credential lacks rights. Permanent, blocks the job.
    RightsError,
    /// 404: the resource does not exist. For delete/purge this is
    /// success-equivalent (idempotent deletion).
    NotFound,
    /// 429: throttled by the control plane. Retryable.
    RateLimit,
    /// The resource lives on a cluster this credential cannot reach.
    /// Permanent, blocks the job.
    OtherCluster,
    /// Transport failure. Retryable.
    NetworkError,
    /// Anything else. Retryable, logged verbosely for investigation.
    Unknown,
}

impl ErrorCode {
    /// Stable string code, persisted on jobs and audit records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RightsError => "RIGHTS_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::OtherCluster => "OTHER_CLUSTER",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified control-plane failure.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Taxonomy code.
    pub code: ErrorCode,
    /// Human-readable message extracted from the response body.
    pub message: String,
    /// Whether the operation should be retried automatically.
    pub retry: bool,
    /// Whether the job must be blocked pending operator action.
    pub block: bool,
}

impl Classification {
    /// Build a classification; retry/block follow the taxonomy table.
    #[must_use]
    pub fn new(code: ErrorCode, message: String) -> Self {
        let (retry, block) = match code {
            ErrorCode::RightsError => (false, true),
            ErrorCode::NotFound => (false, false),
            ErrorCode::RateLimit => (true, false),
            ErrorCode::OtherCluster => (false, true),
            ErrorCode::NetworkError => (true, false),
            ErrorCode::Unknown => (true, false),
        };
        Self {
            code,
            message,
            retry,
            block,
        }
    }

    /// Whether this outcome counts as success for delete/purge operations.
    ///
    /// "Already gone" is not an error when tearing resources down.
    #[must_use]
    pub fn is_idempotent_delete_success(&self) -> bool {
        self.code == ErrorCode::NotFound
    }
}

/// Extract a human-readable message from a TTN error body.
///
/// TTN error payloads carry `message`, sometimes nested under `error` or
/// inside `details`. Falls back to the raw body.
fn extract_message(body: &Value) -> String {
    body.get("message")
        .or_else(|| body.get("error").and_then(|e| e.get("message")))
        .or_else(|| {
            body.get("details")
                .and_then(|d| d.as_array())
                .and_then(|a| a.first())
                .and_then(|d| d.get("message_format"))
        })
        .and_then(Value::as_str)
        .map_or_else(|| body.to_string(), ToString::to_string)
}

/// Whether an error message indicates the resource lives on another cluster.
fn mentions_other_cluster(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("cluster")
        || lower.contains("server_address")
        || lower.contains("server-address")
        || lower.contains("not found on tenant")
}

/// Classify an HTTP status and response body.
pub fn classify(status: u16, body: &Value) -> Classification {
    let message = extract_message(body);
    match status {
        403 => Classification::new(ErrorCode::RightsError, message),
        404 => Classification::new(ErrorCode::NotFound, message),
        429 => Classification::new(ErrorCode::RateLimit, message),
        _ if mentions_other_cluster(&message) => {
            Classification::new(ErrorCode::OtherCluster, message)
        }
        _ => Classification::new(ErrorCode::Unknown, message),
    }
}

/// Classify a transport-level failure (no HTTP status available).
pub fn classify_network(message: impl Into<String>) -> Classification {
    Classification::new(ErrorCode::NetworkError, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rights_error() {
        let c = classify(403, &json!({"message": "no rights"}));
        assert_eq!(c.code, ErrorCode::RightsError);
        assert!(!c.retry);
        assert!(c.block);
    }

    #[test]
    fn test_not_found_is_idempotent_delete_success() {
        let c = classify(404, &json!({"message": "entity not found"}));
        assert_eq!(c.code, ErrorCode::NotFound);
        assert!(!c.retry);
        assert!(!c.block);
        assert!(c.is_idempotent_delete_success());
    }

    #[test]
    fn test_rate_limit_retries() {
        let c = classify(429, &json!({"message": "rate limit exceeded"}));
        assert_eq!(c.code, ErrorCode::RateLimit);
        assert!(c.retry);
        assert!(!c.block);
    }

    #[test]
    fn test_other_cluster_blocks() {
        let c = classify(
            500,
            &json!({"message": "device registered on another cluster"}),
        );
        assert_eq!(c.code, ErrorCode::OtherCluster);
        assert!(!c.retry);
        assert!(c.block);

        let c = classify(400, &json!({"message": "invalid network_server_address"}));
        assert_eq!(c.code, ErrorCode::OtherCluster);

        let c = classify(422, &json!({"message": "end device not found on tenant"}));
        assert_eq!(c.code, ErrorCode::OtherCluster);
    }

    #[test]
    fn test_unknown_retries() {
        let c = classify(500, &json!({"message": "internal error"}));
        assert_eq!(c.code, ErrorCode::Unknown);
        assert!(c.retry);
        assert!(!c.block);
        assert!(!c.is_idempotent_delete_success());
    }

    #[test]
    fn test_network_classification() {
        let c = classify_network("connection reset by peer");
        assert_eq!(c.code, ErrorCode::NetworkError);
        assert!(c.retry);
        assert!(!c.block);
    }

    #[test]
    fn test_message_extraction_nested() {
        let c = classify(500, &json!({"error": {"message": "boom"}}));
        assert_eq!(c.message, "boom");

        let c = classify(
            500,
            &json!({"details": [{"message_format": "from details"}]}),
        );
        assert_eq!(c.message, "from details");
    }

    #[test]
    fn test_message_extraction_fallback_is_raw_body() {
        let c = classify(500, &json!({"weird": true}));
        assert!(c.message.contains("weird"));
    }
}
