use super::target::ProbeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational, e.g. a target came back
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Get emoji prefix for alert level
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "\u{2139}\u{fe0f}",    // info icon
            AlertSeverity::Warning => "\u{26a0}\u{fe0f}", // warning icon
            AlertSeverity::Error => "\u{274c}",           // red X
            AlertSeverity::Critical => "\u{1f6a8}",       // police light
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Connectivity,
    Dns,
    Performance,
    Recovery,
}

/// Metric a rule looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    ResponseTime,
    PacketLoss,
    /// 1 when the probe succeeded, 0 otherwise
    Availability,
    SuccessRate,
}

impl AlertMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertMetric::ResponseTime => "response_time",
            AlertMetric::PacketLoss => "packet_loss",
            AlertMetric::Availability => "availability",
            AlertMetric::SuccessRate => "success_rate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::LessThan => value < threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
            Comparison::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
            Comparison::Equal => "=",
            Comparison::NotEqual => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertCondition {
    pub metric: AlertMetric,
    pub operator: Comparison,
    pub threshold: f64,
}

/// Threshold rule evaluated against each probe result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub target_type: ProbeType,
    pub condition: AlertCondition,
    /// Consecutive failures the target must show before firing (<= 1 means no requirement)
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default = "default_rule_enabled")]
    pub enabled: bool,
}

fn default_rule_enabled() -> bool {
    true
}

impl AlertRule {
    pub fn new(
        id: &str,
        name: &str,
        target_type: ProbeType,
        metric: AlertMetric,
        operator: Comparison,
        threshold: f64,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            target_type,
            condition: AlertCondition {
                metric,
                operator,
                threshold,
            },
            consecutive_failures: 0,
            enabled: true,
        }
    }

    pub fn requiring_failures(mut self, count: u32) -> Self {
        self.consecutive_failures = count;
        self
    }

    /// Alert type raised when this rule fires
    pub fn alert_type(&self) -> AlertType {
        match (self.condition.metric, self.target_type) {
            (AlertMetric::ResponseTime | AlertMetric::PacketLoss, _) => AlertType::Performance,
            (_, ProbeType::Ping) => AlertType::Connectivity,
            (_, ProbeType::Dns) => AlertType::Dns,
        }
    }
}

/// Built-in rule set
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "ping_connectivity_failure",
            "Ping connectivity failure",
            ProbeType::Ping,
            AlertMetric::Availability,
            Comparison::Equal,
            0.0,
        )
        .requiring_failures(3),
        AlertRule::new(
            "ping_high_latency",
            "Ping high latency",
            ProbeType::Ping,
            AlertMetric::ResponseTime,
            Comparison::GreaterThan,
            1000.0,
        ),
        AlertRule::new(
            "ping_packet_loss",
            "Ping packet loss",
            ProbeType::Ping,
            AlertMetric::PacketLoss,
            Comparison::GreaterThan,
            50.0,
        ),
        AlertRule::new(
            "dns_resolution_failure",
            "DNS resolution failure",
            ProbeType::Dns,
            AlertMetric::Availability,
            Comparison::Equal,
            0.0,
        )
        .requiring_failures(3),
        AlertRule::new(
            "dns_slow_response",
            "DNS slow response",
            ProbeType::Dns,
            AlertMetric::ResponseTime,
            Comparison::GreaterThan,
            2000.0,
        ),
    ]
}

/// Alert raised by the alert engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub id: String,
    /// Rule that fired; `None` for synthesized recovery notices
    pub rule_id: Option<String>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub target_name: String,
    pub target_type: ProbeType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ActiveAlert {
    /// One-line rendering for log and chat sinks
    pub fn format_line(&self) -> String {
        format!(
            "{} [{}] {}:{} {}",
            self.severity.emoji(),
            self.severity,
            self.target_type,
            self.target_name,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_severity_ordering() {
        assert!(AlertSeverity::Info < AlertSeverity::Warning);
        assert!(AlertSeverity::Warning < AlertSeverity::Error);
        assert!(AlertSeverity::Error < AlertSeverity::Critical);
    }

    #[test]
    fn test_comparison_operators() {
        assert!(Comparison::GreaterThan.holds(1500.0, 1000.0));
        assert!(!Comparison::GreaterThan.holds(1000.0, 1000.0));
        assert!(Comparison::LessThan.holds(0.5, 1.0));
        assert!(Comparison::Equal.holds(0.0, 0.0));
        assert!(Comparison::NotEqual.holds(1.0, 0.0));
    }

    #[test]
    fn test_rule_deserialize_operator_symbols() {
        let rule: AlertRule = serde_json::from_str(
            r#"{
                "id": "custom",
                "name": "Custom",
                "target_type": "dns",
                "condition": {"metric": "success_rate", "operator": "<", "threshold": 80.0}
            }"#,
        )
        .unwrap();
        assert_eq!(rule.condition.operator, Comparison::LessThan);
        assert!(rule.enabled);
        assert_eq!(rule.alert_type(), AlertType::Dns);
    }
}
