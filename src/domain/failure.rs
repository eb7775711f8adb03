use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    NetworkTool,
    DnsServer,
    Configuration,
    SystemResource,
    TemporaryFailure,
    PermanentFailure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NetworkTool => "NETWORK_TOOL",
            ErrorCategory::DnsServer => "DNS_SERVER",
            ErrorCategory::Configuration => "CONFIGURATION",
            ErrorCategory::SystemResource => "SYSTEM_RESOURCE",
            ErrorCategory::TemporaryFailure => "TEMPORARY_FAILURE",
            ErrorCategory::PermanentFailure => "PERMANENT_FAILURE",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A handled failure as recorded by the error handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkError {
    pub id: String,
    /// Time of the latest occurrence
    pub timestamp: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub component: String,
    pub target: Option<String>,
    pub message: String,
    pub details: serde_json::Value,
    /// Occurrences after the first one
    pub retry_count: u32,
    pub max_retries: u32,
    pub recovery_attempted: bool,
    pub recovery_successful: Option<bool>,
    /// Earliest time another recovery may run (backoff)
    pub next_recovery_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl NetworkError {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Identity used to fold repeated occurrences into one record
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.component, self.category, self.target.as_deref())
    }
}

pub(crate) fn fingerprint(component: &str, category: ErrorCategory, target: Option<&str>) -> String {
    format!("{}|{}|{}", component, category, target.unwrap_or("-"))
}

/// Health of one named subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Failed,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentStatus::Healthy => write!(f, "healthy"),
            ComponentStatus::Degraded => write!(f, "degraded"),
            ComponentStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: ComponentStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_errors: u64,
}

impl ComponentHealth {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            status: ComponentStatus::Healthy,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            total_errors: 0,
        }
    }
}

/// Process-wide health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Critical,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverallStatus::Healthy => write!(f, "healthy"),
            OverallStatus::Degraded => write!(f, "degraded"),
            OverallStatus::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall_status: OverallStatus,
    pub components: Vec<ComponentHealth>,
    pub active_errors: usize,
    pub critical_errors: usize,
    pub high_errors: usize,
    pub failed_components: usize,
    pub last_check: DateTime<Utc>,
}
