//! Supervisor Layer for Failure Handling and Recovery
//!
//! This module provides the resilience side of the monitor:
//! - Keyword classifier for untyped failures
//! - Error handler for component and system health
//! - Recovery manager running remediation callbacks with cooldowns

pub mod classifier;
pub mod error_handler;
pub mod recovery;

pub use classifier::{classify_category, classify_error, classify_severity};
pub use error_handler::{
    ErrorHandler, ErrorHandlerConfig, ErrorHandlerEvent, ErrorReport, ErrorStatistics,
};
pub use recovery::{
    action_key, RecoveryAction, RecoveryAttempt, RecoveryEvent, RecoveryManager,
    RecoveryManagerConfig, RecoveryOutcome, RecoveryStatistics, SkipReason,
};
