//! Keyword fallback classification for untyped failures

use crate::domain::{ErrorCategory, ErrorSeverity};
use crate::error::NetpulseError;

/// Category keyword table, checked in order; first match wins
const CATEGORY_KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::NetworkTool,
        &[
            "command not found",
            "enoent",
            "spawn",
            "no such file",
            "permission denied",
            "eacces",
            "operation not permitted",
        ],
    ),
    (
        ErrorCategory::DnsServer,
        &[
            "dns",
            "servfail",
            "nxdomain",
            "name server",
            "nameserver",
            "resolution",
            "resolve",
            "lookup",
        ],
    ),
    (
        ErrorCategory::TemporaryFailure,
        &[
            "timeout",
            "timed out",
            "etimedout",
            "econnreset",
            "connection reset",
            "temporar",
            "try again",
            "unreachable",
        ],
    ),
    (
        ErrorCategory::SystemResource,
        &[
            "out of memory",
            "enomem",
            "emfile",
            "too many open files",
            "enospc",
            "no space left",
            "resource",
        ],
    ),
    (
        ErrorCategory::Configuration,
        &["config", "invalid", "missing", "not configured", "malformed"],
    ),
];

const SEVERITY_KEYWORDS: &[(ErrorSeverity, &[&str])] = &[
    (
        ErrorSeverity::Critical,
        &["critical", "fatal", "panic", "out of memory", "enomem", "crash"],
    ),
    (
        ErrorSeverity::High,
        &[
            "unavailable",
            "unreachable",
            "refused",
            "permission denied",
            "command not found",
            "no space left",
        ],
    ),
    (
        ErrorSeverity::Medium,
        &["timeout", "timed out", "failed", "failure", "error", "slow", "retry"],
    ),
];

/// Category by keyword, defaulting to `TEMPORARY_FAILURE`
pub fn classify_category(message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| message.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::TemporaryFailure)
}

/// Severity by keyword, defaulting to `LOW`
pub fn classify_severity(message: &str) -> ErrorSeverity {
    let message = message.to_lowercase();
    SEVERITY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| message.contains(k)))
        .map(|(severity, _)| *severity)
        .unwrap_or(ErrorSeverity::Low)
}

/// Typed classification first, keywords on the rendered message otherwise
pub fn classify_error(err: &NetpulseError) -> (ErrorCategory, ErrorSeverity) {
    let message = err.to_string();
    (
        err.category().unwrap_or_else(|| classify_category(&message)),
        err.severity().unwrap_or_else(|| classify_severity(&message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_keywords() {
        assert_eq!(
            classify_category("spawn ping ENOENT"),
            ErrorCategory::NetworkTool
        );
        assert_eq!(
            classify_category("query returned SERVFAIL"),
            ErrorCategory::DnsServer
        );
        assert_eq!(
            classify_category("Request timed out"),
            ErrorCategory::TemporaryFailure
        );
        assert_eq!(
            classify_category("EMFILE: too many open files"),
            ErrorCategory::SystemResource
        );
        assert_eq!(
            classify_category("invalid target address"),
            ErrorCategory::Configuration
        );
        assert_eq!(
            classify_category("something odd happened"),
            ErrorCategory::TemporaryFailure
        );
    }

    #[test]
    fn test_severity_keywords() {
        assert_eq!(classify_severity("FATAL: cannot continue"), ErrorSeverity::Critical);
        assert_eq!(classify_severity("host unreachable"), ErrorSeverity::High);
        assert_eq!(classify_severity("probe failed"), ErrorSeverity::Medium);
        assert_eq!(classify_severity("odd output"), ErrorSeverity::Low);
    }

    #[test]
    fn test_typed_error_wins_over_keywords() {
        // Message mentions "config" but the variant says resource exhaustion
        let err = NetpulseError::ResourceExhausted("config reload buffers".to_string());
        assert_eq!(
            classify_error(&err),
            (ErrorCategory::SystemResource, ErrorSeverity::Critical)
        );

        let err = NetpulseError::Internal("lookup failed for example.com".to_string());
        assert_eq!(
            classify_error(&err),
            (ErrorCategory::DnsServer, ErrorSeverity::Medium)
        );
    }
}
