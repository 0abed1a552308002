//! Error Classifier (C4).
//!
//! Maps a raw HTTP status + message from a per-endpoint client call onto the
//! taxonomy the cluster client retries and health registry updates on. The
//! matching cascade is deliberately ordered: more specific textual signals are
//! checked before the generic transient fallback, same shape as a
//! from-raw-error classifier keyed on lowercased substrings.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ClassifiedError {
    #[error("authentication failed (endpoint: {endpoint})")]
    Auth { endpoint: String },

    #[error("not implemented by endpoint (endpoint: {endpoint})")]
    NotImplemented { endpoint: String },

    #[error("rate limited (endpoint: {endpoint})")]
    RateLimited { endpoint: String },

    #[error("node-specific error ({reason}): {message} (endpoint: {endpoint})")]
    NodeSpecific {
        endpoint: String,
        reason: NodeSpecificReason,
        message: String,
    },

    #[error("transient error: {message} (endpoint: {endpoint})")]
    Transient { endpoint: String, message: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSpecificReason {
    GuestAgent,
    Routing,
    Permissions,
    TicketRouting,
    Malformed,
}

impl std::fmt::Display for NodeSpecificReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeSpecificReason::GuestAgent => "guest-agent",
            NodeSpecificReason::Routing => "routing",
            NodeSpecificReason::Permissions => "permissions",
            NodeSpecificReason::TicketRouting => "ticket-routing",
            NodeSpecificReason::Malformed => "malformed-response",
        };
        write!(f, "{s}")
    }
}

impl ClassifiedError {
    /// `true` if the cluster client should retry (on the same or a different
    /// endpoint, depending on variant).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifiedError::RateLimited { .. } | ClassifiedError::Transient { .. })
    }

    /// `true` if this classification should mark the offending endpoint unhealthy.
    pub fn marks_unhealthy(&self) -> bool {
        matches!(self, ClassifiedError::Transient { .. })
    }
}

/// Classify a raw HTTP status (if any) and response/error message into the
/// spec's error taxonomy. Message matching is case-insensitive.
pub fn classify(endpoint: &str, status: Option<u16>, message: &str) -> ClassifiedError {
    let lower = message.to_ascii_lowercase();

    if status == Some(401) {
        return ClassifiedError::Auth {
            endpoint: endpoint.to_string(),
        };
    }
    if status == Some(403) && !lower.contains("storage") && !lower.contains("datastore") {
        return ClassifiedError::Auth {
            endpoint: endpoint.to_string(),
        };
    }
    if lower.contains("authentication") {
        return ClassifiedError::Auth {
            endpoint: endpoint.to_string(),
        };
    }

    if status == Some(501) || lower.contains("not implemented") {
        return ClassifiedError::NotImplemented {
            endpoint: endpoint.to_string(),
        };
    }

    if matches!(status, Some(408) | Some(425) | Some(429) | Some(502) | Some(503) | Some(504))
        || lower.contains("rate limit")
        || lower.contains("too many requests")
    {
        return ClassifiedError::RateLimited {
            endpoint: endpoint.to_string(),
        };
    }

    if lower.contains("guest agent") || lower.contains("no qemu guest agent") || lower.contains("agent is not running")
    {
        return ClassifiedError::NodeSpecific {
            endpoint: endpoint.to_string(),
            reason: NodeSpecificReason::GuestAgent,
            message: message.to_string(),
        };
    }

    if status == Some(500) && (lower.contains("hostname lookup") || lower.contains("name or service not known")) {
        return ClassifiedError::NodeSpecific {
            endpoint: endpoint.to_string(),
            reason: NodeSpecificReason::Routing,
            message: message.to_string(),
        };
    }

    if status == Some(403) && (lower.contains("storage") || lower.contains("datastore")) {
        return ClassifiedError::NodeSpecific {
            endpoint: endpoint.to_string(),
            reason: NodeSpecificReason::Permissions,
            message: message.to_string(),
        };
    }

    if status == Some(595) || lower.contains("595") {
        return ClassifiedError::NodeSpecific {
            endpoint: endpoint.to_string(),
            reason: NodeSpecificReason::TicketRouting,
            message: message.to_string(),
        };
    }

    if lower.contains("unexpected response format") || lower.contains("json") {
        return ClassifiedError::NodeSpecific {
            endpoint: endpoint.to_string(),
            reason: NodeSpecificReason::Malformed,
            message: message.to_string(),
        };
    }

    ClassifiedError::Transient {
        endpoint: endpoint.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_failures() {
        assert!(matches!(
            classify("ep1", Some(401), "unauthorized"),
            ClassifiedError::Auth { .. }
        ));
        assert!(matches!(
            classify("ep1", None, "authentication failed"),
            ClassifiedError::Auth { .. }
        ));
    }

    #[test]
    fn not_implemented_stays_healthy_classification() {
        let err = classify("ep1", Some(501), "");
        assert!(matches!(err, ClassifiedError::NotImplemented { .. }));
        assert!(!err.marks_unhealthy());
        assert!(!err.is_retryable());
    }

    #[test]
    fn rate_limit_text_is_retryable_without_marking_unhealthy() {
        let err = classify("ep1", None, "429 too many requests");
        assert!(matches!(err, ClassifiedError::RateLimited { .. }));
        assert!(err.is_retryable());
        assert!(!err.marks_unhealthy());
    }

    #[test]
    fn guest_agent_noise_is_node_specific_not_transient() {
        let err = classify("ep1", Some(500), "No QEMU guest agent configured");
        assert!(matches!(
            err,
            ClassifiedError::NodeSpecific {
                reason: NodeSpecificReason::GuestAgent,
                ..
            }
        ));
        assert!(!err.marks_unhealthy());
        assert!(!err.is_retryable());
    }

    #[test]
    fn unclassified_failure_is_transient_and_marks_unhealthy() {
        let err = classify("ep1", None, "connection refused");
        assert!(matches!(err, ClassifiedError::Transient { .. }));
        assert!(err.marks_unhealthy());
        assert!(err.is_retryable());
    }

    #[test]
    fn storage_text_on_401_is_still_auth() {
        let err = classify("ep1", Some(401), "401 Unauthorized: cannot read storage");
        assert!(matches!(err, ClassifiedError::Auth { .. }));
        assert!(!err.is_retryable());
        assert!(!err.marks_unhealthy());
    }

    #[test]
    fn storage_permission_403_is_node_specific_not_auth() {
        let err = classify("ep1", Some(403), "permission denied on datastore");
        assert!(matches!(
            err,
            ClassifiedError::NodeSpecific {
                reason: NodeSpecificReason::Permissions,
                ..
            }
        ));
    }
}
