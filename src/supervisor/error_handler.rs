//! Error Handler
//!
//! Records every operational failure as a [`NetworkError`], keeps per-component
//! and process-wide health, and decides whether a failure may be handed to the
//! recovery manager. Nothing in here returns an error to the caller.

use super::classifier::{classify_category, classify_error, classify_severity};
use crate::clock::SharedClock;
use crate::domain::{
    failure::fingerprint, ComponentHealth, ComponentStatus, ErrorCategory, ErrorSeverity,
    NetworkError, OverallStatus, SystemHealth,
};
use crate::error::NetpulseError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the error handler
#[derive(Debug, Clone)]
pub struct ErrorHandlerConfig {
    /// Occurrences of one error after which recovery is no longer attempted (default: 3)
    pub max_retries: u32,
    /// Component becomes degraded once failures exceed this (default: 2)
    pub degraded_after: u32,
    /// Component becomes failed once failures exceed this (default: 5)
    pub failed_after: u32,
    /// Interval of the maintenance tick (default: 60s)
    pub health_check_interval_secs: u64,
    /// Resolved errors older than this are evicted (default: 24h)
    pub retention_secs: i64,
    /// Upper bound on retained error records (default: 1000)
    pub max_errors: usize,
    /// Recovery backoff base (default: 5s)
    pub backoff_base_secs: u64,
    /// Recovery backoff cap (default: 300s)
    pub backoff_max_secs: u64,
    /// Random jitter added to the backoff, as a fraction (default: 0.1)
    pub backoff_jitter: f64,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            degraded_after: 2,
            failed_after: 5,
            health_check_interval_secs: 60,
            retention_secs: 24 * 60 * 60,
            max_errors: 1000,
            backoff_base_secs: 5,
            backoff_max_secs: 300,
            backoff_jitter: 0.1,
        }
    }
}

/// A failure as reported by a component, before classification
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub component: String,
    pub message: String,
    pub category: Option<ErrorCategory>,
    pub severity: Option<ErrorSeverity>,
    pub target: Option<String>,
    pub details: serde_json::Value,
}

impl ErrorReport {
    pub fn new(component: &str, message: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            message: message.into(),
            category: None,
            severity: None,
            target: None,
            details: serde_json::Value::Null,
        }
    }

    /// Report carrying whatever the typed error already knows about itself
    pub fn from_error(component: &str, err: &NetpulseError) -> Self {
        let (category, severity) = classify_error(err);
        Self {
            category: Some(category),
            severity: Some(severity),
            ..Self::new(component, err.to_string())
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Event emitted by the error handler
#[derive(Debug, Clone)]
pub enum ErrorHandlerEvent {
    /// A failure was recorded
    Error {
        error: NetworkError,
        /// Whether the recovery manager should act on it
        recovery_requested: bool,
    },
    /// System health turned critical
    CriticalError {
        error: NetworkError,
        health: SystemHealth,
    },
    ErrorRecovered { error: NetworkError },
    HealthCheck(SystemHealth),
}

impl ErrorHandlerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorHandlerEvent::Error { .. } => "error",
            ErrorHandlerEvent::CriticalError { .. } => "critical_error",
            ErrorHandlerEvent::ErrorRecovered { .. } => "error_recovered",
            ErrorHandlerEvent::HealthCheck(_) => "health_check",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: usize,
    pub active_errors: usize,
    pub resolved_errors: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_component: BTreeMap<String, usize>,
    pub recovery_attempted: usize,
    pub recovery_successful: usize,
    /// Successful recoveries over attempted ones, in percent
    pub recovery_rate: Option<f64>,
}

pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    clock: SharedClock,
    errors: Arc<RwLock<HashMap<String, NetworkError>>>,
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    last_overall: Mutex<OverallStatus>,
    event_tx: broadcast::Sender<ErrorHandlerEvent>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig, clock: SharedClock) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            clock,
            errors: Arc::new(RwLock::new(HashMap::new())),
            components: Arc::new(RwLock::new(HashMap::new())),
            last_overall: Mutex::new(OverallStatus::Healthy),
            event_tx,
            maintenance: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ErrorHandlerEvent> {
        self.event_tx.subscribe()
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Classify and record a failure
    pub async fn handle(&self, report: ErrorReport) -> NetworkError {
        let now = self.clock.now();
        let category = report
            .category
            .unwrap_or_else(|| classify_category(&report.message));
        let severity = report
            .severity
            .unwrap_or_else(|| classify_severity(&report.message));

        let error = self.record(report, category, severity, now).await;
        self.update_component_on_error(&error, now).await;

        match error.severity {
            ErrorSeverity::Critical => error!(
                "[{}] {} {}: {} (occurrence {})",
                error.component, error.severity, error.category, error.message, error.retry_count + 1
            ),
            ErrorSeverity::High => warn!(
                "[{}] {} {}: {} (occurrence {})",
                error.component, error.severity, error.category, error.message, error.retry_count + 1
            ),
            _ => info!(
                "[{}] {} {}: {} (occurrence {})",
                error.component, error.severity, error.category, error.message, error.retry_count + 1
            ),
        }

        let recovery_requested =
            self.should_attempt_recovery(&error) && error.category != ErrorCategory::Configuration;
        let _ = self.event_tx.send(ErrorHandlerEvent::Error {
            error: error.clone(),
            recovery_requested,
        });

        let health = self.system_health().await;
        if self.transition_overall(health.overall_status) == Some(OverallStatus::Critical) {
            error!(
                "System health critical: {} active errors, {} critical, {} failed components",
                health.active_errors, health.critical_errors, health.failed_components
            );
            let _ = self.event_tx.send(ErrorHandlerEvent::CriticalError {
                error: error.clone(),
                health,
            });
        }

        error
    }

    /// Record a typed crate error raised by `component`
    pub async fn handle_error(
        &self,
        component: &str,
        err: &NetpulseError,
        target: Option<&str>,
    ) -> NetworkError {
        let mut report = ErrorReport::from_error(component, err);
        report.target = target.map(str::to_string);
        self.handle(report).await
    }

    /// Insert a new record or fold the occurrence into a matching unresolved one
    async fn record(
        &self,
        report: ErrorReport,
        category: ErrorCategory,
        severity: ErrorSeverity,
        now: DateTime<Utc>,
    ) -> NetworkError {
        let key = fingerprint(&report.component, category, report.target.as_deref());
        let mut errors = self.errors.write().await;

        if let Some(existing) = errors
            .values_mut()
            .find(|e| e.is_active() && e.fingerprint() == key)
        {
            existing.retry_count += 1;
            existing.timestamp = now;
            existing.message = report.message;
            existing.severity = existing.severity.max(severity);
            existing.recovery_attempted = false;
            if !report.details.is_null() {
                existing.details = report.details;
            }
            debug!("Folded occurrence {} into error {}", existing.retry_count, existing.id);
            return existing.clone();
        }

        let error = NetworkError {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            first_seen: now,
            category,
            severity,
            component: report.component,
            target: report.target,
            message: report.message,
            details: report.details,
            retry_count: 0,
            max_retries: self.config.max_retries,
            recovery_attempted: false,
            recovery_successful: None,
            next_recovery_at: None,
            resolved_at: None,
        };
        errors.insert(error.id.clone(), error.clone());
        self.enforce_capacity(&mut errors);
        error
    }

    fn enforce_capacity(&self, errors: &mut HashMap<String, NetworkError>) {
        let cap = self.config.max_errors.max(1);
        while errors.len() > cap {
            let victim = errors
                .values()
                .filter(|e| !e.is_active())
                .min_by_key(|e| e.timestamp)
                .or_else(|| errors.values().min_by_key(|e| e.timestamp))
                .map(|e| e.id.clone());
            match victim {
                Some(id) => {
                    debug!("Evicting error {} (store full)", id);
                    errors.remove(&id);
                }
                None => break,
            }
        }
    }

    async fn update_component_on_error(&self, error: &NetworkError, now: DateTime<Utc>) {
        let mut components = self.components.write().await;
        let health = components
            .entry(error.component.clone())
            .or_insert_with(|| ComponentHealth::new(&error.component));

        health.consecutive_failures += 1;
        health.total_errors += 1;
        health.last_failure = Some(now);

        let next = if error.severity == ErrorSeverity::Critical
            || health.consecutive_failures > self.config.failed_after
        {
            ComponentStatus::Failed
        } else if error.severity == ErrorSeverity::High
            || health.consecutive_failures > self.config.degraded_after
        {
            ComponentStatus::Degraded
        } else {
            health.status
        };

        // A degraded-level error never lifts a failed component
        let next = if health.status == ComponentStatus::Failed {
            ComponentStatus::Failed
        } else {
            next
        };

        if next != health.status {
            warn!(
                "Component {} {} -> {} after {} failures",
                health.component, health.status, next, health.consecutive_failures
            );
            health.status = next;
        }
    }

    /// Remember the overall status; returns the new one if it changed
    fn transition_overall(&self, overall: OverallStatus) -> Option<OverallStatus> {
        let mut last = self.last_overall.lock().unwrap_or_else(|e| e.into_inner());
        if *last == overall {
            return None;
        }
        info!("System health {} -> {}", *last, overall);
        *last = overall;
        Some(overall)
    }

    /// Whether the recovery manager may act on this error now
    pub fn should_attempt_recovery(&self, error: &NetworkError) -> bool {
        error.is_active()
            && error.retry_count < error.max_retries
            && error.severity != ErrorSeverity::Critical
            && !error.recovery_attempted
            && error
                .next_recovery_at
                .map_or(true, |at| self.clock.now() >= at)
    }

    pub async fn mark_recovery_attempted(&self, error_id: &str) -> bool {
        let mut errors = self.errors.write().await;
        match errors.get_mut(error_id) {
            Some(error) => {
                error.recovery_attempted = true;
                true
            }
            None => false,
        }
    }

    /// Resolve an error after a successful recovery and restore its component
    pub async fn mark_error_recovered(&self, error_id: &str) -> Option<NetworkError> {
        let now = self.clock.now();
        let error = {
            let mut errors = self.errors.write().await;
            let error = errors.get_mut(error_id)?;
            error.recovery_attempted = true;
            error.recovery_successful = Some(true);
            error.next_recovery_at = None;
            error.resolved_at = Some(now);
            error.clone()
        };

        {
            let mut components = self.components.write().await;
            let health = components
                .entry(error.component.clone())
                .or_insert_with(|| ComponentHealth::new(&error.component));
            health.consecutive_failures = 0;
            health.last_success = Some(now);
            health.status = ComponentStatus::Healthy;
        }

        info!("Error {} recovered ({})", error.id, error.component);
        let health = self.system_health().await;
        self.transition_overall(health.overall_status);

        let _ = self.event_tx.send(ErrorHandlerEvent::ErrorRecovered {
            error: error.clone(),
        });
        Some(error)
    }

    /// Record a failed recovery and push the next attempt out with backoff
    pub async fn mark_recovery_failed(&self, error_id: &str) -> Option<NetworkError> {
        let now = self.clock.now();
        let mut errors = self.errors.write().await;
        let error = errors.get_mut(error_id)?;

        let delay = self.backoff_delay(error.retry_count);
        error.recovery_attempted = true;
        error.recovery_successful = Some(false);
        error.next_recovery_at = Some(now + delay);

        warn!(
            "Recovery for error {} failed, next attempt not before {}s",
            error.id,
            delay.num_seconds()
        );
        Some(error.clone())
    }

    fn backoff_delay(&self, retry_count: u32) -> chrono::Duration {
        let base = self.config.backoff_base_secs as f64;
        let capped = (base * 2f64.powi(retry_count.min(16) as i32))
            .min(self.config.backoff_max_secs as f64);
        let jitter_max = capped * self.config.backoff_jitter.max(0.0);
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_max);
        chrono::Duration::milliseconds(((capped + jitter) * 1000.0) as i64)
    }

    /// Clear failures of a component after it worked again.
    ///
    /// With a target only that target's errors are resolved. Returns how many
    /// errors were resolved.
    pub async fn record_success(&self, component: &str, target: Option<&str>) -> usize {
        let now = self.clock.now();
        let (resolved, remaining) = {
            let mut errors = self.errors.write().await;
            let mut resolved = 0;
            for error in errors.values_mut().filter(|e| {
                e.is_active()
                    && e.component == component
                    && (target.is_none() || e.target.as_deref() == target)
            }) {
                error.resolved_at = Some(now);
                resolved += 1;
            }
            let remaining = errors
                .values()
                .filter(|e| e.is_active() && e.component == component)
                .count();
            (resolved, remaining)
        };

        {
            let mut components = self.components.write().await;
            if let Some(health) = components.get_mut(component) {
                health.last_success = Some(now);
                if remaining == 0 && health.status != ComponentStatus::Healthy {
                    info!("Component {} healthy again", component);
                }
                if remaining == 0 {
                    health.consecutive_failures = 0;
                    health.status = ComponentStatus::Healthy;
                }
            }
        }

        if resolved > 0 {
            debug!("{} errors of {} cleared by success", resolved, component);
            let health = self.system_health().await;
            self.transition_overall(health.overall_status);
        }
        resolved
    }

    pub async fn system_health(&self) -> SystemHealth {
        let (active_errors, critical_errors, high_errors) = {
            let errors = self.errors.read().await;
            let active: Vec<&NetworkError> = errors.values().filter(|e| e.is_active()).collect();
            (
                active.len(),
                active
                    .iter()
                    .filter(|e| e.severity == ErrorSeverity::Critical)
                    .count(),
                active
                    .iter()
                    .filter(|e| e.severity == ErrorSeverity::High)
                    .count(),
            )
        };

        let mut components: Vec<ComponentHealth> =
            self.components.read().await.values().cloned().collect();
        components.sort_by(|a, b| a.component.cmp(&b.component));
        let failed_components = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Failed)
            .count();

        let overall_status =
            if critical_errors > 0 || (!components.is_empty() && failed_components * 2 > components.len()) {
                OverallStatus::Critical
            } else if high_errors > 0 || active_errors > 0 {
                OverallStatus::Degraded
            } else {
                OverallStatus::Healthy
            };

        SystemHealth {
            overall_status,
            components,
            active_errors,
            critical_errors,
            high_errors,
            failed_components,
            last_check: self.clock.now(),
        }
    }

    pub async fn component_health(&self, component: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(component).cloned()
    }

    pub async fn error(&self, error_id: &str) -> Option<NetworkError> {
        self.errors.read().await.get(error_id).cloned()
    }

    /// Unresolved errors, oldest first
    pub async fn active_errors(&self) -> Vec<NetworkError> {
        let errors = self.errors.read().await;
        let mut active: Vec<NetworkError> = errors.values().filter(|e| e.is_active()).cloned().collect();
        active.sort_by_key(|e| e.first_seen);
        active
    }

    pub async fn statistics(&self) -> ErrorStatistics {
        let errors = self.errors.read().await;
        let mut stats = ErrorStatistics {
            total_errors: errors.len(),
            ..Default::default()
        };

        for error in errors.values() {
            if error.is_active() {
                stats.active_errors += 1;
            } else {
                stats.resolved_errors += 1;
            }
            *stats.by_category.entry(error.category.to_string()).or_default() += 1;
            *stats.by_severity.entry(error.severity.to_string()).or_default() += 1;
            *stats.by_component.entry(error.component.clone()).or_default() += 1;
            if error.recovery_attempted {
                stats.recovery_attempted += 1;
            }
            if error.recovery_successful == Some(true) {
                stats.recovery_successful += 1;
            }
        }

        if stats.recovery_attempted > 0 {
            stats.recovery_rate =
                Some(stats.recovery_successful as f64 * 100.0 / stats.recovery_attempted as f64);
        }
        stats
    }

    /// Evict old resolved errors and publish a health check
    pub async fn run_maintenance(&self) -> SystemHealth {
        let cutoff = self.clock.now() - chrono::Duration::seconds(self.config.retention_secs);
        let evicted = {
            let mut errors = self.errors.write().await;
            let before = errors.len();
            errors.retain(|_, e| e.resolved_at.map_or(true, |at| at >= cutoff));
            before - errors.len()
        };
        if evicted > 0 {
            debug!("Evicted {} resolved errors past retention", evicted);
        }

        let health = self.system_health().await;
        self.transition_overall(health.overall_status);
        debug!(
            "Health check: {} ({} active errors)",
            health.overall_status, health.active_errors
        );
        let _ = self.event_tx.send(ErrorHandlerEvent::HealthCheck(health.clone()));
        health
    }

    /// Start the periodic maintenance tick
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut slot = self.maintenance.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let handler = Arc::clone(self);
        let period = Duration::from_secs(self.config.health_check_interval_secs.max(1));
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                handler.run_maintenance().await;
            }
        }));
        info!("Error handler maintenance started ({}s)", period.as_secs());
    }

    pub fn stop_maintenance(&self) {
        let mut slot = self.maintenance.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
            info!("Error handler maintenance stopped");
        }
    }
}

impl Drop for ErrorHandler {
    fn drop(&mut self) {
        self.stop_maintenance();
    }
}
