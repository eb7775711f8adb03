use crate::error::{NetpulseError, Result};
use serde::{Deserialize, Serialize};

/// Shortest allowed probe interval in seconds
pub const MIN_INTERVAL_SECS: u64 = 1;
/// Longest allowed probe interval in seconds
pub const MAX_INTERVAL_SECS: u64 = 600;

/// Kind of reachability check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    Ping,
    Dns,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Ping => "ping",
            ProbeType::Dns => "dns",
        }
    }

    /// Component name used for error and recovery bookkeeping
    pub fn component(&self) -> &'static str {
        match self {
            ProbeType::Ping => crate::domain::components::PING_MONITOR,
            ProbeType::Dns => crate::domain::components::DNS_MONITOR,
        }
    }
}

impl std::fmt::Display for ProbeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

/// Host checked for connectivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingTarget {
    pub name: String,
    pub address: String,
    /// Probe interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PingTarget {
    pub fn new(name: &str, address: &str, interval: u64) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            interval,
            enabled: true,
        }
    }
}

/// DNS server checked by resolving a set of domains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsTarget {
    pub name: String,
    pub server_ip: String,
    #[serde(default)]
    pub domains: Vec<String>,
    /// Probe interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DnsTarget {
    pub fn new(name: &str, server_ip: &str, domains: &[&str], interval: u64) -> Self {
        Self {
            name: name.to_string(),
            server_ip: server_ip.to_string(),
            domains: domains.iter().map(|d| d.to_string()).collect(),
            interval,
            enabled: true,
        }
    }
}

/// A monitored target of either probe type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    Ping(PingTarget),
    Dns(DnsTarget),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Ping(t) => &t.name,
            Target::Dns(t) => &t.name,
        }
    }

    pub fn probe_type(&self) -> ProbeType {
        match self {
            Target::Ping(_) => ProbeType::Ping,
            Target::Dns(_) => ProbeType::Dns,
        }
    }

    pub fn interval_secs(&self) -> u64 {
        match self {
            Target::Ping(t) => t.interval,
            Target::Dns(t) => t.interval,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Target::Ping(t) => t.enabled,
            Target::Dns(t) => t.enabled,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.probe_type(), self.name())
    }

    /// Check name and interval bounds
    pub fn validate(&self) -> Result<()> {
        if self.name().trim().is_empty() {
            return Err(NetpulseError::InvalidTarget(
                "target name must not be empty".to_string(),
            ));
        }

        let interval = self.interval_secs();
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval) {
            return Err(NetpulseError::InvalidTarget(format!(
                "{} interval {}s outside [{}, {}]",
                self.name(),
                interval,
                MIN_INTERVAL_SECS,
                MAX_INTERVAL_SECS
            )));
        }

        match self {
            Target::Ping(t) if t.address.trim().is_empty() => Err(NetpulseError::InvalidTarget(
                format!("{} has no address", t.name),
            )),
            Target::Dns(t) if t.server_ip.trim().is_empty() => Err(
                NetpulseError::InvalidTarget(format!("{} has no server_ip", t.name)),
            ),
            _ => Ok(()),
        }
    }
}

impl From<PingTarget> for Target {
    fn from(t: PingTarget) -> Self {
        Target::Ping(t)
    }
}

impl From<DnsTarget> for Target {
    fn from(t: DnsTarget) -> Self {
        Target::Dns(t)
    }
}

/// Identity of a target across components: (probe type, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub probe_type: ProbeType,
    pub name: String,
}

impl TargetKey {
    pub fn new(probe_type: ProbeType, name: &str) -> Self {
        Self {
            probe_type,
            name: name.to_string(),
        }
    }

    /// Scheduler task id, e.g. `ping:gateway`
    pub fn task_id(&self) -> String {
        format!("{}:{}", self.probe_type, self.name)
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.probe_type, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_bounds() {
        assert!(Target::from(PingTarget::new("gw", "192.168.1.1", 1)).validate().is_ok());
        assert!(Target::from(PingTarget::new("gw", "192.168.1.1", 600)).validate().is_ok());
        assert!(Target::from(PingTarget::new("gw", "192.168.1.1", 0)).validate().is_err());
        assert!(Target::from(PingTarget::new("gw", "192.168.1.1", 601)).validate().is_err());
    }

    #[test]
    fn test_task_id_is_namespaced() {
        let target = Target::from(DnsTarget::new("cloudflare", "1.1.1.1", &["example.com"], 30));
        assert_eq!(target.key().task_id(), "dns:cloudflare");
        assert_eq!(target.probe_type(), ProbeType::Dns);
    }

    #[test]
    fn test_target_deserialize_defaults() {
        let target: PingTarget =
            serde_json::from_str(r#"{"name":"gw","address":"10.0.0.1"}"#).unwrap();
        assert!(target.enabled);
        assert_eq!(target.interval, 60);
    }
}
