//! Recovery Manager
//!
//! Maps classified errors to registered remediation callbacks and runs them
//! one at a time, subject to per-action cooldowns and per-error attempt caps.
//! When system health turns critical an emergency sequence runs regardless of
//! either limit.

use super::error_handler::{ErrorHandler, ErrorHandlerEvent};
use crate::clock::SharedClock;
use crate::domain::{components, ErrorCategory, ErrorSeverity, NetworkError};
use crate::error::{NetpulseError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const RESTART_PING_MONITORING: &str = "restart_ping_monitoring";
pub const RESTART_DNS_MONITORING: &str = "restart_dns_monitoring";
pub const RESET_NETWORK_TOOLS: &str = "reset_network_tools";
pub const THROTTLE_MONITORING: &str = "throttle_monitoring";

/// Actions run by [`RecoveryManager::emergency_recovery`], in order
const EMERGENCY_SEQUENCE: &[(&str, &str)] = &[
    (components::PING_MONITOR, RESTART_PING_MONITORING),
    (components::DNS_MONITOR, RESTART_DNS_MONITORING),
    (components::NETWORK_TOOL, RESET_NETWORK_TOOLS),
];

pub fn action_key(component: &str, name: &str) -> String {
    format!("{}:{}", component, name)
}

pub type RecoveryCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A remediation callback owned by another component
#[derive(Clone)]
pub struct RecoveryAction {
    pub component: String,
    pub name: String,
    pub cooldown: Duration,
    /// Attempts allowed per error
    pub max_attempts: u32,
    callback: RecoveryCallback,
}

impl RecoveryAction {
    pub fn new<F, Fut>(component: &str, name: &str, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            component: component.to_string(),
            name: name.to_string(),
            cooldown: Duration::from_secs(60),
            max_attempts: 3,
            callback: Arc::new(move || callback().boxed()),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn key(&self) -> String {
        action_key(&self.component, &self.name)
    }
}

impl std::fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryAction")
            .field("component", &self.component)
            .field("name", &self.name)
            .field("cooldown", &self.cooldown)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub id: String,
    pub error_id: Option<String>,
    pub action_key: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Ran outside cooldown and attempt limits
    pub forced: bool,
}

/// Why a recovery request did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Category or severity is never auto-recovered
    NotRecoverable,
    NoAction,
    CoolingDown { until: DateTime<Utc> },
    AttemptsExhausted { attempts: u32 },
    /// Another recovery holds the gate
    Busy,
}

#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    Recovered(RecoveryAttempt),
    Failed(RecoveryAttempt),
    Skipped(SkipReason),
}

impl RecoveryOutcome {
    pub fn attempt(&self) -> Option<&RecoveryAttempt> {
        match self {
            RecoveryOutcome::Recovered(a) | RecoveryOutcome::Failed(a) => Some(a),
            RecoveryOutcome::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecoveryEvent {
    Attempt(RecoveryAttempt),
}

/// Configuration for the recovery manager
#[derive(Debug, Clone)]
pub struct RecoveryManagerConfig {
    /// Upper bound on a single callback run (default: 30s)
    pub action_timeout_secs: u64,
    /// Attempts kept per error in the log (default: 20)
    pub attempt_log_limit: usize,
}

impl Default for RecoveryManagerConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 30,
            attempt_log_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionStatistics {
    pub attempts: u64,
    pub successes: u64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub cooling_down_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryStatistics {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub emergency_runs: u64,
    pub success_rate: Option<f64>,
    pub in_progress: bool,
    pub registered_actions: Vec<String>,
    pub by_action: BTreeMap<String, ActionStatistics>,
}

#[derive(Debug, Default)]
struct Counters {
    successful: u64,
    failed: u64,
    skipped: u64,
    emergency_runs: u64,
    by_action: BTreeMap<String, ActionStatistics>,
}

pub struct RecoveryManager {
    config: RecoveryManagerConfig,
    clock: SharedClock,
    error_handler: Arc<ErrorHandler>,
    actions: RwLock<HashMap<String, RecoveryAction>>,
    /// Cooldown expiry per action key
    cooldowns: RwLock<HashMap<String, DateTime<Utc>>>,
    /// Attempt log keyed by error id
    attempts: RwLock<HashMap<String, Vec<RecoveryAttempt>>>,
    counters: Mutex<Counters>,
    gate: Semaphore,
    event_tx: broadcast::Sender<RecoveryEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryManager {
    pub fn new(
        config: RecoveryManagerConfig,
        clock: SharedClock,
        error_handler: Arc<ErrorHandler>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(128);
        Self {
            config,
            clock,
            error_handler,
            actions: RwLock::new(HashMap::new()),
            cooldowns: RwLock::new(HashMap::new()),
            attempts: RwLock::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            gate: Semaphore::new(1),
            event_tx,
            listener: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.event_tx.subscribe()
    }

    pub async fn register_action(&self, action: RecoveryAction) {
        let key = action.key();
        debug!("Registered recovery action {}", key);
        self.actions.write().await.insert(key, action);
    }

    pub async fn unregister_action(&self, component: &str, name: &str) -> Option<RecoveryAction> {
        self.actions
            .write()
            .await
            .remove(&action_key(component, name))
    }

    /// Remediation action responsible for an error, if any
    pub fn action_key_for(error: &NetworkError) -> Option<String> {
        let (component, name) = match error.category {
            ErrorCategory::NetworkTool => (components::NETWORK_TOOL, RESET_NETWORK_TOOLS),
            ErrorCategory::DnsServer => (components::DNS_MONITOR, RESTART_DNS_MONITORING),
            ErrorCategory::TemporaryFailure if error.component == components::DNS_MONITOR => {
                (components::DNS_MONITOR, RESTART_DNS_MONITORING)
            }
            ErrorCategory::TemporaryFailure if error.component == components::PING_MONITOR => {
                (components::PING_MONITOR, RESTART_PING_MONITORING)
            }
            ErrorCategory::SystemResource => (components::SYSTEM, THROTTLE_MONITORING),
            _ => return None,
        };
        Some(action_key(component, name))
    }

    /// Run the action mapped to `error` if cooldown and attempt cap allow it.
    ///
    /// Dropped rather than queued while another recovery is running; the next
    /// occurrence of the error asks again.
    pub async fn attempt_recovery(&self, error: &NetworkError) -> RecoveryOutcome {
        match self.try_attempt(error).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                debug!("Recovery for error {} skipped: {:?}", error.id, reason);
                self.lock_counters().skipped += 1;
                RecoveryOutcome::Skipped(reason)
            }
        }
    }

    async fn try_attempt(&self, error: &NetworkError) -> std::result::Result<RecoveryOutcome, SkipReason> {
        if matches!(
            error.category,
            ErrorCategory::Configuration | ErrorCategory::PermanentFailure
        ) || error.severity == ErrorSeverity::Critical
        {
            return Err(SkipReason::NotRecoverable);
        }

        let key = Self::action_key_for(error).ok_or(SkipReason::NoAction)?;
        let action = self
            .actions
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(SkipReason::NoAction)?;

        let _permit = self.gate.try_acquire().map_err(|_| SkipReason::Busy)?;

        if let Some(until) = self.cooldown_until(&key).await {
            return Err(SkipReason::CoolingDown { until });
        }

        let attempts = self.gated_attempts(&error.id).await;
        if attempts >= action.max_attempts {
            return Err(SkipReason::AttemptsExhausted { attempts });
        }

        self.error_handler.mark_recovery_attempted(&error.id).await;
        info!(
            "Attempting recovery {} for error {} ({}/{})",
            key,
            error.id,
            attempts + 1,
            action.max_attempts
        );

        let attempt = self.execute(&action, Some(&error.id), false).await;
        if attempt.success {
            self.start_cooldown(&action).await;
            self.error_handler.mark_error_recovered(&error.id).await;
            Ok(RecoveryOutcome::Recovered(attempt))
        } else {
            self.error_handler.mark_recovery_failed(&error.id).await;
            Ok(RecoveryOutcome::Failed(attempt))
        }
    }

    /// Run an action now, ignoring cooldown and attempt cap.
    ///
    /// Waits for a running recovery to finish instead of being dropped.
    pub async fn force_recovery(&self, component: &str, name: &str) -> Result<RecoveryAttempt> {
        let key = action_key(component, name);
        let action = self
            .actions
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| NetpulseError::RecoveryActionNotFound(key.clone()))?;

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| NetpulseError::Internal(format!("recovery gate closed: {}", e)))?;

        info!("Forcing recovery {}", key);
        let attempt = self.execute(&action, None, true).await;
        if attempt.success {
            self.start_cooldown(&action).await;
        }
        Ok(attempt)
    }

    /// Restart ping, restart DNS and reset network tools, each isolated from the others
    pub async fn emergency_recovery(&self, trigger: Option<&NetworkError>) -> Vec<RecoveryAttempt> {
        error!(
            "Emergency recovery triggered{}",
            trigger
                .map(|e| format!(" by {} error {}", e.component, e.id))
                .unwrap_or_default()
        );
        self.lock_counters().emergency_runs += 1;

        let mut results = Vec::with_capacity(EMERGENCY_SEQUENCE.len());
        for (component, name) in EMERGENCY_SEQUENCE {
            let key = action_key(component, name);
            let action = match self.actions.read().await.get(&key).cloned() {
                Some(action) => action,
                None => {
                    warn!("Emergency action {} not registered", key);
                    continue;
                }
            };

            let Ok(_permit) = self.gate.acquire().await else {
                break;
            };
            let attempt = self
                .execute(&action, trigger.map(|e| e.id.as_str()), true)
                .await;
            results.push(attempt);
        }

        let succeeded = results.iter().filter(|a| a.success).count();
        info!(
            "Emergency recovery finished: {}/{} actions succeeded",
            succeeded,
            results.len()
        );
        results
    }

    /// Run one callback under timeout and panic isolation, then record it
    async fn execute(
        &self,
        action: &RecoveryAction,
        error_id: Option<&str>,
        forced: bool,
    ) -> RecoveryAttempt {
        let key = action.key();
        let timestamp = self.clock.now();
        let started = tokio::time::Instant::now();
        let timeout = Duration::from_secs(self.config.action_timeout_secs);

        let callback = Arc::clone(&action.callback);
        let run = AssertUnwindSafe(async move { callback().await }).catch_unwind();

        let result = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(_)) => Err("recovery action panicked".to_string()),
            Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
        };

        let attempt = RecoveryAttempt {
            id: Uuid::new_v4().to_string(),
            error_id: error_id.map(str::to_string),
            action_key: key.clone(),
            timestamp,
            success: result.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: result.err(),
            forced,
        };

        match &attempt.error {
            None => info!("Recovery {} succeeded in {}ms", key, attempt.duration_ms),
            Some(reason) => warn!("Recovery {} failed: {}", key, reason),
        }

        self.record_attempt(&attempt).await;
        let _ = self.event_tx.send(RecoveryEvent::Attempt(attempt.clone()));
        attempt
    }

    async fn record_attempt(&self, attempt: &RecoveryAttempt) {
        if let Some(error_id) = &attempt.error_id {
            let mut log = self.attempts.write().await;
            let entries = log.entry(error_id.clone()).or_default();
            entries.push(attempt.clone());
            let limit = self.config.attempt_log_limit.max(1);
            if entries.len() > limit {
                let excess = entries.len() - limit;
                entries.drain(..excess);
            }
        }

        let mut counters = self.lock_counters();
        if attempt.success {
            counters.successful += 1;
        } else {
            counters.failed += 1;
        }
        let stats = counters
            .by_action
            .entry(attempt.action_key.clone())
            .or_default();
        stats.attempts += 1;
        if attempt.success {
            stats.successes += 1;
        }
        stats.last_attempt = Some(attempt.timestamp);
    }

    async fn start_cooldown(&self, action: &RecoveryAction) {
        let cooldown = chrono::Duration::from_std(action.cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let until = self.clock.now() + cooldown;
        self.cooldowns.write().await.insert(action.key(), until);
    }

    async fn cooldown_until(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.cooldowns
            .read()
            .await
            .get(key)
            .copied()
            .filter(|until| *until > now)
    }

    /// Non-forced attempts logged for an error
    async fn gated_attempts(&self, error_id: &str) -> u32 {
        self.attempts
            .read()
            .await
            .get(error_id)
            .map_or(0, |log| log.iter().filter(|a| !a.forced).count() as u32)
    }

    pub async fn attempts_for(&self, error_id: &str) -> Vec<RecoveryAttempt> {
        self.attempts
            .read()
            .await
            .get(error_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn statistics(&self) -> RecoveryStatistics {
        let mut registered_actions: Vec<String> = self.actions.read().await.keys().cloned().collect();
        registered_actions.sort();

        let now = self.clock.now();
        let cooldowns: HashMap<String, DateTime<Utc>> = self
            .cooldowns
            .read()
            .await
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let counters = self.lock_counters();
        let mut by_action = counters.by_action.clone();
        for (key, until) in cooldowns {
            by_action.entry(key).or_default().cooling_down_until = Some(until);
        }

        let total_attempts = counters.successful + counters.failed;
        RecoveryStatistics {
            total_attempts,
            successful: counters.successful,
            failed: counters.failed,
            skipped: counters.skipped,
            emergency_runs: counters.emergency_runs,
            success_rate: (total_attempts > 0)
                .then(|| counters.successful as f64 * 100.0 / total_attempts as f64),
            in_progress: self.gate.available_permits() == 0,
            registered_actions,
            by_action,
        }
    }

    fn lock_counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Follow the error handler's events and react to them
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let mut rx = self.error_handler.subscribe();
        let manager: Weak<Self> = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Recovery listener lagged, dropped {} error events", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(manager) = manager.upgrade() else {
                    break;
                };

                match event {
                    ErrorHandlerEvent::Error {
                        error,
                        recovery_requested: true,
                    } => {
                        tokio::spawn(async move {
                            manager.attempt_recovery(&error).await;
                        });
                    }
                    ErrorHandlerEvent::CriticalError { error, .. } => {
                        tokio::spawn(async move {
                            manager.emergency_recovery(Some(&error)).await;
                        });
                    }
                    _ => {}
                }
            }
            debug!("Recovery listener exited");
        }));
        info!("Recovery manager listening for errors");
    }

    pub fn stop(&self) {
        let mut slot = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.take() {
            handle.abort();
            info!("Recovery manager stopped");
        }
    }
}

impl Drop for RecoveryManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::ComponentStatus;
    use crate::supervisor::error_handler::{ErrorHandlerConfig, ErrorReport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        clock: Arc<ManualClock>,
        handler: Arc<ErrorHandler>,
        manager: Arc<RecoveryManager>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let handler = Arc::new(ErrorHandler::new(ErrorHandlerConfig::default(), clock.clone()));
        let manager = Arc::new(RecoveryManager::new(
            RecoveryManagerConfig::default(),
            clock.clone(),
            handler.clone(),
        ));
        Fixture {
            clock,
            handler,
            manager,
        }
    }

    fn counting(component: &str, name: &str, calls: Arc<AtomicUsize>) -> RecoveryAction {
        RecoveryAction::new(component, name, move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    async fn dns_error(handler: &ErrorHandler) -> NetworkError {
        handler
            .handle(
                ErrorReport::new(components::DNS_MONITOR, "SERVFAIL from 1.1.1.1")
                    .with_category(ErrorCategory::DnsServer)
                    .with_severity(ErrorSeverity::High)
                    .with_target("cf"),
            )
            .await
    }

    #[test]
    fn test_action_mapping() {
        let mut error = NetworkError {
            id: "e".to_string(),
            timestamp: Utc::now(),
            first_seen: Utc::now(),
            category: ErrorCategory::TemporaryFailure,
            severity: ErrorSeverity::Medium,
            component: components::DNS_MONITOR.to_string(),
            target: None,
            message: "timeout".to_string(),
            details: serde_json::Value::Null,
            retry_count: 0,
            max_retries: 3,
            recovery_attempted: false,
            recovery_successful: None,
            next_recovery_at: None,
            resolved_at: None,
        };
        assert_eq!(
            RecoveryManager::action_key_for(&error).as_deref(),
            Some("DNSMonitor:restart_dns_monitoring")
        );

        error.component = "Other".to_string();
        assert_eq!(RecoveryManager::action_key_for(&error), None);

        error.category = ErrorCategory::NetworkTool;
        assert_eq!(
            RecoveryManager::action_key_for(&error).as_deref(),
            Some("NetworkTool:reset_network_tools")
        );
        error.category = ErrorCategory::SystemResource;
        assert_eq!(
            RecoveryManager::action_key_for(&error).as_deref(),
            Some("System:throttle_monitoring")
        );
        error.category = ErrorCategory::Configuration;
        assert_eq!(RecoveryManager::action_key_for(&error), None);
    }

    #[tokio::test]
    async fn test_dns_error_restarts_dns_and_restores_component() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        f.manager
            .register_action(counting(components::DNS_MONITOR, RESTART_DNS_MONITORING, calls.clone()))
            .await;

        let error = dns_error(&f.handler).await;
        let outcome = f.manager.attempt_recovery(&error).await;

        assert!(matches!(outcome, RecoveryOutcome::Recovered(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let health = f.handler.component_health(components::DNS_MONITOR).await.unwrap();
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(!f.handler.error(&error.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_run() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        f.manager
            .register_action(counting(components::DNS_MONITOR, RESTART_DNS_MONITORING, calls.clone()))
            .await;

        let first = dns_error(&f.handler).await;
        f.manager.attempt_recovery(&first).await;

        let second = dns_error(&f.handler).await;
        assert!(matches!(
            f.manager.attempt_recovery(&second).await,
            RecoveryOutcome::Skipped(SkipReason::CoolingDown { .. })
        ));

        f.clock.advance(chrono::Duration::seconds(61));
        assert!(matches!(
            f.manager.attempt_recovery(&second).await,
            RecoveryOutcome::Recovered(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_attempt_cap_per_error() {
        let f = fixture();
        f.manager
            .register_action(
                RecoveryAction::new(components::DNS_MONITOR, RESTART_DNS_MONITORING, || async {
                    Err(NetpulseError::Internal("still broken".to_string()))
                })
                .with_max_attempts(2),
            )
            .await;

        let error = dns_error(&f.handler).await;
        for _ in 0..2 {
            let outcome = f.manager.attempt_recovery(&error).await;
            assert!(matches!(outcome, RecoveryOutcome::Failed(_)));
        }
        assert!(matches!(
            f.manager.attempt_recovery(&error).await,
            RecoveryOutcome::Skipped(SkipReason::AttemptsExhausted { attempts: 2 })
        ));

        let attempts = f.manager.attempts_for(&error.id).await;
        assert_eq!(attempts.len(), 2);
        assert!(attempts.iter().all(|a| !a.success));
        let stored = f.handler.error(&error.id).await.unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.recovery_successful, Some(false));
    }

    #[tokio::test]
    async fn test_excluded_categories_never_run() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        f.manager
            .register_action(counting(components::SYSTEM, THROTTLE_MONITORING, calls.clone()))
            .await;

        let config = f
            .handler
            .handle(
                ErrorReport::new(components::SYSTEM, "bad config")
                    .with_category(ErrorCategory::Configuration),
            )
            .await;
        let critical = f
            .handler
            .handle(
                ErrorReport::new(components::SYSTEM, "out of memory")
                    .with_category(ErrorCategory::SystemResource)
                    .with_severity(ErrorSeverity::Critical),
            )
            .await;

        for error in [config, critical.clone()] {
            assert!(matches!(
                f.manager.attempt_recovery(&error).await,
                RecoveryOutcome::Skipped(SkipReason::NotRecoverable)
            ));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!f.handler.error(&critical.id).await.unwrap().recovery_attempted);
    }

    #[tokio::test]
    async fn test_concurrent_request_is_dropped() {
        let f = fixture();
        let release = Arc::new(tokio::sync::Notify::new());
        let started = Arc::new(tokio::sync::Notify::new());
        {
            let release = release.clone();
            let started = started.clone();
            f.manager
                .register_action(RecoveryAction::new(
                    components::DNS_MONITOR,
                    RESTART_DNS_MONITORING,
                    move || {
                        let release = release.clone();
                        let started = started.clone();
                        async move {
                            started.notify_one();
                            release.notified().await;
                            Ok(())
                        }
                    },
                ))
                .await;
        }
        let calls = Arc::new(AtomicUsize::new(0));
        f.manager
            .register_action(counting(components::NETWORK_TOOL, RESET_NETWORK_TOOLS, calls.clone()))
            .await;

        let dns = dns_error(&f.handler).await;
        let tool = f
            .handler
            .handle(ErrorReport::new(components::NETWORK_TOOL, "spawn ping ENOENT"))
            .await;

        let manager = f.manager.clone();
        let running = tokio::spawn(async move { manager.attempt_recovery(&dns).await });
        started.notified().await;

        assert!(matches!(
            f.manager.attempt_recovery(&tool).await,
            RecoveryOutcome::Skipped(SkipReason::Busy)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release.notify_one();
        assert!(matches!(running.await.unwrap(), RecoveryOutcome::Recovered(_)));
        assert!(matches!(
            f.manager.attempt_recovery(&tool).await,
            RecoveryOutcome::Recovered(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_or_panicking_action_counts_as_failure() {
        let f = fixture();
        f.manager
            .register_action(RecoveryAction::new(
                components::DNS_MONITOR,
                RESTART_DNS_MONITORING,
                || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                },
            ))
            .await;
        f.manager
            .register_action(RecoveryAction::new(
                components::NETWORK_TOOL,
                RESET_NETWORK_TOOLS,
                || async {
                    if std::hint::black_box(true) {
                        panic!("tool reset blew up");
                    }
                    Ok(())
                },
            ))
            .await;

        let hung = f
            .manager
            .force_recovery(components::DNS_MONITOR, RESTART_DNS_MONITORING)
            .await
            .unwrap();
        assert!(!hung.success);
        assert!(hung.error.as_deref().unwrap_or_default().contains("timed out"));

        let panicked = f
            .manager
            .force_recovery(components::NETWORK_TOOL, RESET_NETWORK_TOOLS)
            .await
            .unwrap();
        assert!(!panicked.success);

        assert!(matches!(
            f.manager.force_recovery("Nope", "nothing").await,
            Err(NetpulseError::RecoveryActionNotFound(_))
        ));
        assert_eq!(f.manager.statistics().await.failed, 2);
    }

    #[tokio::test]
    async fn test_emergency_runs_sequence_ignoring_cooldown() {
        let f = fixture();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (component, name) in EMERGENCY_SEQUENCE {
            let order = order.clone();
            let key = action_key(component, name);
            let failing = *name == RESTART_PING_MONITORING;
            f.manager
                .register_action(RecoveryAction::new(component, name, move || {
                    let order = order.clone();
                    let key = key.clone();
                    async move {
                        order.lock().unwrap().push(key);
                        if failing {
                            Err(NetpulseError::Internal("ping restart failed".to_string()))
                        } else {
                            Ok(())
                        }
                    }
                }))
                .await;
        }

        f.manager
            .force_recovery(components::DNS_MONITOR, RESTART_DNS_MONITORING)
            .await
            .unwrap();
        order.lock().unwrap().clear();

        let attempts = f.manager.emergency_recovery(None).await;
        assert_eq!(attempts.len(), 3);
        assert!(!attempts[0].success);
        assert!(attempts[1].success && attempts[2].success);
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "PingMonitor:restart_ping_monitoring",
                "DNSMonitor:restart_dns_monitoring",
                "NetworkTool:reset_network_tools",
            ]
        );
        assert_eq!(f.manager.statistics().await.emergency_runs, 1);
    }

    #[tokio::test]
    async fn test_listener_reacts_to_handler_events() {
        let f = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        f.manager
            .register_action(counting(components::DNS_MONITOR, RESTART_DNS_MONITORING, calls.clone()))
            .await;
        let mut attempts = f.manager.subscribe();
        f.manager.start();

        let error = dns_error(&f.handler).await;
        let RecoveryEvent::Attempt(attempt) =
            tokio::time::timeout(Duration::from_secs(5), attempts.recv())
                .await
                .unwrap()
                .unwrap();

        assert!(attempt.success);
        assert_eq!(attempt.error_id.as_deref(), Some(error.id.as_str()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        f.manager.stop();
    }
}
