use super::target::ProbeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health level of a target, independent of probe type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Healthy,
    Degraded,
    Failed,
}

impl StatusLevel {
    pub fn is_failure(&self) -> bool {
        matches!(self, StatusLevel::Failed)
    }

    /// Label shown for a given probe type
    ///
    /// ping: online / degraded / offline, dns: available / slow / unavailable
    pub fn label(&self, probe_type: ProbeType) -> &'static str {
        match (probe_type, self) {
            (ProbeType::Ping, StatusLevel::Healthy) => "online",
            (ProbeType::Ping, StatusLevel::Degraded) => "degraded",
            (ProbeType::Ping, StatusLevel::Failed) => "offline",
            (ProbeType::Dns, StatusLevel::Healthy) => "available",
            (ProbeType::Dns, StatusLevel::Degraded) => "slow",
            (ProbeType::Dns, StatusLevel::Failed) => "unavailable",
        }
    }
}

/// Latest measurements for a target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub response_time_ms: Option<f64>,
    pub packet_loss_percent: Option<f64>,
    /// Rolling success rate in percent (DNS targets)
    pub success_rate: Option<f64>,
}

/// Current status of a monitored target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStatus {
    pub target_name: String,
    pub probe_type: ProbeType,
    pub level: StatusLevel,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub metrics: MetricSnapshot,
    pub updated_at: DateTime<Utc>,
}

impl TargetStatus {
    /// Fresh record, healthy until proven otherwise
    pub fn new(target_name: &str, probe_type: ProbeType, now: DateTime<Utc>) -> Self {
        Self {
            target_name: target_name.to_string(),
            probe_type,
            level: StatusLevel::Healthy,
            last_success: None,
            consecutive_failures: 0,
            metrics: MetricSnapshot::default(),
            updated_at: now,
        }
    }

    pub fn label(&self) -> &'static str {
        self.level.label(self.probe_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_per_probe_type() {
        assert_eq!(StatusLevel::Failed.label(ProbeType::Ping), "offline");
        assert_eq!(StatusLevel::Degraded.label(ProbeType::Dns), "slow");
        assert_eq!(StatusLevel::Healthy.label(ProbeType::Dns), "available");
    }
}
