//! Default transient-error classification.

/// Phrases that mark an error as worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "connection reset",
    "econnrefused",
    "connection refused",
    "rate limit",
    "ratelimit",
    "rate_limit",
    "too many requests",
    "unavailable",
    "temporarily",
    "overloaded",
];

/// Whether an error message looks like a transient failure.
///
/// Matches known phrases case-insensitively, plus HTTP 429 and any 5xx status
/// that appears as a standalone three digit number.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) || has_retryable_status(&lower)
}

fn has_retryable_status(message: &str) -> bool {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .any(|code| code == "429" || code.starts_with('5'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_phrases() {
        assert!(is_transient("Request Timeout after 30s"));
        assert!(is_transient("read ECONNRESET"));
        assert!(is_transient("Connection refused (os error 111)"));
        assert!(is_transient("Rate limit reached for requests"));
        assert!(is_transient("Service Unavailable"));
        assert!(is_transient("the server is temporarily busy"));
    }

    #[test]
    fn test_status_codes() {
        assert!(is_transient("upstream returned 503"));
        assert!(is_transient("HTTP 502: bad gateway"));
        assert!(is_transient("status=429"));
        assert!(!is_transient("HTTP 404: not found"));
        assert!(!is_transient("invalid api key (401)"));
    }

    #[test]
    fn test_numbers_inside_longer_digits_are_ignored() {
        assert!(!is_transient("order 15003 rejected"));
        assert!(!is_transient("validation failed: field `name` is required"));
    }
}
