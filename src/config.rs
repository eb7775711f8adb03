use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::coordination::SchedulerConfig;
use crate::domain::{DnsTarget, PingTarget, ProbeType, Target};
use crate::services::{AlertEngineConfig, StateTrackerConfig};
use crate::supervisor::{ErrorHandlerConfig, RecoveryManagerConfig};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulersConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub errors: ErrorsConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub targets: TargetsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerLimits {
    pub max_concurrent_tasks: usize,
    /// Minimum spacing between two firings of one scheduler
    pub min_task_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulersConfig {
    #[serde(default = "default_ping_limits")]
    pub ping: SchedulerLimits,
    #[serde(default = "default_dns_limits")]
    pub dns: SchedulerLimits,
}

fn default_ping_limits() -> SchedulerLimits {
    SchedulerLimits {
        max_concurrent_tasks: 5,
        min_task_interval_ms: 100,
    }
}

fn default_dns_limits() -> SchedulerLimits {
    SchedulerLimits {
        max_concurrent_tasks: 3,
        min_task_interval_ms: 200,
    }
}

impl Default for SchedulersConfig {
    fn default() -> Self {
        Self {
            ping: default_ping_limits(),
            dns: default_dns_limits(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Consecutive failures before a target is reported down
    pub failure_threshold: u32,
    pub ping_degraded_latency_ms: f64,
    pub ping_degraded_packet_loss: f64,
    pub dns_slow_response_ms: f64,
    pub success_window: usize,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        let d = StateTrackerConfig::default();
        Self {
            failure_threshold: d.failure_threshold,
            ping_degraded_latency_ms: d.ping_degraded_latency_ms,
            ping_degraded_packet_loss: d.ping_degraded_packet_loss,
            dns_slow_response_ms: d.dns_slow_response_ms,
            success_window: d.success_window,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub debounce_secs: i64,
    pub history_limit: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 300,
            history_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    pub max_retries: u32,
    pub degraded_after: u32,
    pub failed_after: u32,
    pub health_check_interval_secs: u64,
    pub retention_hours: i64,
    pub max_errors: usize,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            degraded_after: 2,
            failed_after: 5,
            health_check_interval_secs: 60,
            retention_hours: 24,
            max_errors: 1000,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub cooldown_secs: u64,
    pub max_attempts: u32,
    pub action_timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            max_attempts: 3,
            action_timeout_secs: 30,
        }
    }
}

/// Settings of the built-in TCP/resolver probe executor
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Connect attempts per reachability probe
    pub attempts: u32,
    /// Port used when a ping address has none
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            port: 80,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TargetsConfig {
    #[serde(default)]
    pub ping: Vec<PingTarget>,
    #[serde(default)]
    pub dns: Vec<DnsTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level for dependencies (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log level for netpulse itself
    #[serde(default = "default_crate_log_level")]
    pub crate_level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            crate_level: default_crate_log_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> String {
        format!("{},netpulse={}", self.level, self.crate_level)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_crate_log_level() -> String {
    "debug".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.crate_level", "debug")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("NETPULSE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (NETPULSE_ALERTS__DEBOUNCE_SECS, etc.)
            .add_source(
                Environment::with_prefix("NETPULSE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn scheduler_config(&self, probe_type: ProbeType) -> SchedulerConfig {
        let limits = match probe_type {
            ProbeType::Ping => &self.scheduler.ping,
            ProbeType::Dns => &self.scheduler.dns,
        };
        SchedulerConfig {
            probe_type,
            max_concurrent_tasks: limits.max_concurrent_tasks,
            min_task_interval_ms: limits.min_task_interval_ms,
        }
    }

    pub fn state_tracker_config(&self) -> StateTrackerConfig {
        StateTrackerConfig {
            failure_threshold: self.monitoring.failure_threshold,
            ping_degraded_latency_ms: self.monitoring.ping_degraded_latency_ms,
            ping_degraded_packet_loss: self.monitoring.ping_degraded_packet_loss,
            dns_slow_response_ms: self.monitoring.dns_slow_response_ms,
            success_window: self.monitoring.success_window,
        }
    }

    pub fn alert_engine_config(&self) -> AlertEngineConfig {
        AlertEngineConfig {
            debounce_secs: self.alerts.debounce_secs,
            failure_threshold: self.monitoring.failure_threshold,
            history_limit: self.alerts.history_limit,
        }
    }

    pub fn error_handler_config(&self) -> ErrorHandlerConfig {
        ErrorHandlerConfig {
            max_retries: self.errors.max_retries,
            degraded_after: self.errors.degraded_after,
            failed_after: self.errors.failed_after,
            health_check_interval_secs: self.errors.health_check_interval_secs,
            retention_secs: self.errors.retention_hours * 3600,
            max_errors: self.errors.max_errors,
            backoff_base_secs: self.errors.backoff_base_secs,
            backoff_max_secs: self.errors.backoff_max_secs,
            ..Default::default()
        }
    }

    pub fn recovery_manager_config(&self) -> RecoveryManagerConfig {
        RecoveryManagerConfig {
            action_timeout_secs: self.recovery.action_timeout_secs,
            ..Default::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Scheduler limits
        for (name, limits) in [("ping", &self.scheduler.ping), ("dns", &self.scheduler.dns)] {
            if limits.max_concurrent_tasks == 0 {
                errors.push(format!("scheduler.{}.max_concurrent_tasks must be at least 1", name));
            }
        }

        // Thresholds
        if self.monitoring.failure_threshold == 0 {
            errors.push("monitoring.failure_threshold must be at least 1".to_string());
        }
        if self.monitoring.success_window == 0 {
            errors.push("monitoring.success_window must be at least 1".to_string());
        }
        if self.alerts.debounce_secs < 0 {
            errors.push("alerts.debounce_secs must not be negative".to_string());
        }
        if self.errors.degraded_after >= self.errors.failed_after {
            errors.push("errors.degraded_after should be less than errors.failed_after".to_string());
        }
        if self.errors.backoff_base_secs > self.errors.backoff_max_secs {
            errors.push("errors.backoff_base_secs exceeds errors.backoff_max_secs".to_string());
        }
        if self.errors.retention_hours <= 0 {
            errors.push("errors.retention_hours must be positive".to_string());
        }
        if self.recovery.max_attempts == 0 {
            errors.push("recovery.max_attempts must be at least 1".to_string());
        }
        if self.recovery.action_timeout_secs == 0 {
            errors.push("recovery.action_timeout_secs must be at least 1".to_string());
        }
        if self.probe.attempts == 0 {
            errors.push("probe.attempts must be at least 1".to_string());
        }

        // Targets
        let targets = self
            .targets
            .ping
            .iter()
            .cloned()
            .map(Target::Ping)
            .chain(self.targets.dns.iter().cloned().map(Target::Dns));
        let mut seen = HashSet::new();
        for target in targets {
            if let Err(e) = target.validate() {
                errors.push(e.to_string());
            }
            if !seen.insert(target.key()) {
                errors.push(format!(
                    "duplicate {} target name '{}'",
                    target.probe_type(),
                    target.name()
                ));
            }
        }

        for target in self.targets.dns.iter().filter(|t| t.domains.is_empty()) {
            errors.push(format!("dns target '{}' has no domains", target.name));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
