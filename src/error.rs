use crate::domain::{ErrorCategory, ErrorSeverity};
use thiserror::Error;

/// Main error type for the monitor
#[derive(Error, Debug)]
pub enum NetpulseError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    // Probe errors
    #[error("Probe timed out for {target} after {timeout_ms}ms")]
    ProbeTimeout { target: String, timeout_ms: u64 },

    #[error("Network tool error: {0}")]
    ProbeTool(String),

    #[error("DNS resolution failed for {domain} via {server}: {reason}")]
    DnsResolution {
        server: String,
        domain: String,
        reason: String,
    },

    #[error("System resource exhausted: {0}")]
    ResourceExhausted(String),

    // Alert errors
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    // Recovery errors
    #[error("Recovery action not found: {0}")]
    RecoveryActionNotFound(String),

    #[error("Recovery action {action} failed: {reason}")]
    RecoveryFailed { action: String, reason: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for NetpulseError
pub type Result<T> = std::result::Result<T, NetpulseError>;

impl NetpulseError {
    /// Failure category when the variant already tells us what went wrong.
    ///
    /// `None` leaves classification to the keyword fallback.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            NetpulseError::Config(_) | NetpulseError::InvalidTarget(_) => {
                Some(ErrorCategory::Configuration)
            }
            NetpulseError::ProbeTimeout { .. } => Some(ErrorCategory::TemporaryFailure),
            NetpulseError::ProbeTool(_) => Some(ErrorCategory::NetworkTool),
            NetpulseError::DnsResolution { .. } => Some(ErrorCategory::DnsServer),
            NetpulseError::ResourceExhausted(_) => Some(ErrorCategory::SystemResource),
            NetpulseError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    Some(ErrorCategory::NetworkTool)
                }
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::Interrupted => Some(ErrorCategory::TemporaryFailure),
                std::io::ErrorKind::OutOfMemory => Some(ErrorCategory::SystemResource),
                _ => None,
            },
            _ => None,
        }
    }

    /// Severity for variants whose impact is known up front
    pub fn severity(&self) -> Option<ErrorSeverity> {
        match self {
            NetpulseError::Config(_) | NetpulseError::InvalidTarget(_) => {
                Some(ErrorSeverity::High)
            }
            NetpulseError::ProbeTimeout { .. } => Some(ErrorSeverity::Medium),
            NetpulseError::ProbeTool(_) => Some(ErrorSeverity::High),
            NetpulseError::DnsResolution { .. } => Some(ErrorSeverity::Medium),
            NetpulseError::ResourceExhausted(_) => Some(ErrorSeverity::Critical),
            _ => None,
        }
    }
}
