use super::target::{ProbeType, TargetKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one connectivity probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub target_name: String,
    pub address: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Mean round-trip time, absent when nothing answered
    pub response_time_ms: Option<f64>,
    pub packet_loss_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PingResult {
    pub fn success(target_name: &str, response_time_ms: f64, packet_loss_percent: f64) -> Self {
        Self {
            target_name: target_name.to_string(),
            address: String::new(),
            timestamp: Utc::now(),
            success: true,
            response_time_ms: Some(response_time_ms),
            packet_loss_percent,
            error: None,
        }
    }

    pub fn failure(target_name: &str, error: &str) -> Self {
        Self {
            target_name: target_name.to_string(),
            address: String::new(),
            timestamp: Utc::now(),
            success: false,
            response_time_ms: None,
            packet_loss_percent: 100.0,
            error: Some(error.to_string()),
        }
    }
}

/// Outcome of one domain lookup against a DNS server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsResult {
    pub target_name: String,
    pub server_ip: String,
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub response_time_ms: Option<f64>,
    #[serde(default)]
    pub resolved_addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DnsResult {
    pub fn success(target_name: &str, domain: &str, response_time_ms: f64) -> Self {
        Self {
            target_name: target_name.to_string(),
            server_ip: String::new(),
            domain: domain.to_string(),
            timestamp: Utc::now(),
            success: true,
            response_time_ms: Some(response_time_ms),
            resolved_addresses: Vec::new(),
            error: None,
        }
    }

    pub fn failure(target_name: &str, domain: &str, error: &str) -> Self {
        Self {
            target_name: target_name.to_string(),
            server_ip: String::new(),
            domain: domain.to_string(),
            timestamp: Utc::now(),
            success: false,
            response_time_ms: None,
            resolved_addresses: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Result of either probe type, tagged at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeResult {
    Ping(PingResult),
    Dns(DnsResult),
}

impl ProbeResult {
    pub fn probe_type(&self) -> ProbeType {
        match self {
            ProbeResult::Ping(_) => ProbeType::Ping,
            ProbeResult::Dns(_) => ProbeType::Dns,
        }
    }

    pub fn target_name(&self) -> &str {
        match self {
            ProbeResult::Ping(r) => &r.target_name,
            ProbeResult::Dns(r) => &r.target_name,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.probe_type(), self.target_name())
    }

    pub fn is_success(&self) -> bool {
        match self {
            ProbeResult::Ping(r) => r.success,
            ProbeResult::Dns(r) => r.success,
        }
    }

    pub fn response_time_ms(&self) -> Option<f64> {
        match self {
            ProbeResult::Ping(r) => r.response_time_ms,
            ProbeResult::Dns(r) => r.response_time_ms,
        }
    }

    /// Packet loss; only connectivity probes measure it
    pub fn packet_loss_percent(&self) -> Option<f64> {
        match self {
            ProbeResult::Ping(r) => Some(r.packet_loss_percent),
            ProbeResult::Dns(_) => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ProbeResult::Ping(r) => r.timestamp,
            ProbeResult::Dns(r) => r.timestamp,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeResult::Ping(r) => r.error.as_deref(),
            ProbeResult::Dns(r) => r.error.as_deref(),
        }
    }
}

impl From<PingResult> for ProbeResult {
    fn from(r: PingResult) -> Self {
        ProbeResult::Ping(r)
    }
}

impl From<DnsResult> for ProbeResult {
    fn from(r: DnsResult) -> Self {
        ProbeResult::Dns(r)
    }
}
