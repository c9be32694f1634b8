//! Retry classification.
//!
//! # Responsibilities
//! - Decide whether a failed attempt is worth retrying
//!
//! # Design Decisions
//! - Classification is by error message only; error types are not inspected
//! - Match is a case-insensitive substring search against a fixed vocabulary
//! - Anything not recognised as transient is surfaced on first occurrence

/// Message fragments that mark a failure as transient.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "connection reset",
    "econnrefused",
    "connection refused",
    "socket hang up",
    "network",
    "temporary failure",
    "429",
    "too many requests",
    "502",
    "bad gateway",
    "503",
    "service unavailable",
    "enotfound",
    "getaddrinfo",
];

/// Returns true if an error with this message should be retried.
pub fn is_retryable(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(is_retryable("timeout"));
        assert!(is_retryable("Request Timeout after 500 ms"));
        assert!(is_retryable("read ECONNRESET"));
        assert!(is_retryable("connect ECONNREFUSED 127.0.0.1:11434"));
        assert!(is_retryable("socket hang up"));
        assert!(is_retryable("Network is unreachable"));
        assert!(is_retryable("Temporary failure in name resolution"));
        assert!(is_retryable("HTTP 429"));
        assert!(is_retryable("upstream returned 502"));
        assert!(is_retryable("503 Service Unavailable"));
        assert!(is_retryable("getaddrinfo ENOTFOUND api.example.com"));
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!is_retryable("Invalid input"));
        assert!(!is_retryable("HTTP 401 Unauthorized"));
        assert!(!is_retryable("model not found"));
        assert!(!is_retryable(""));
    }
}
