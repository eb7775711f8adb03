//! Threshold Alert Engine
//!
//! Evaluates alert rules against each probe result, suppresses repeats of the
//! same (rule, target) pair inside the debounce window, and synthesizes a
//! recovery notice when a failing target succeeds again.

use crate::clock::SharedClock;
use crate::domain::{
    default_rules, ActiveAlert, AlertMetric, AlertRule, AlertSeverity, AlertType, ProbeResult,
    ProbeType, TargetKey, TargetStatus,
};
use crate::error::{NetpulseError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the alert engine
#[derive(Debug, Clone)]
pub struct AlertEngineConfig {
    /// Minimum interval between alerts for the same rule and target (default: 300s)
    pub debounce_secs: i64,
    /// Consecutive failures at which a firing rule is raised to `error` (default: 3)
    pub failure_threshold: u32,
    /// Alerts kept in history (default: 500)
    pub history_limit: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 300,
            failure_threshold: 3,
            history_limit: 500,
        }
    }
}

/// Event emitted by the alert engine
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Generated(ActiveAlert),
    Acknowledged(ActiveAlert),
    Resolved(ActiveAlert),
}

impl AlertEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AlertEvent::Generated(_) => "alert_generated",
            AlertEvent::Acknowledged(_) => "alert_acknowledged",
            AlertEvent::Resolved(_) => "alert_resolved",
        }
    }

    pub fn alert(&self) -> &ActiveAlert {
        match self {
            AlertEvent::Generated(a) | AlertEvent::Acknowledged(a) | AlertEvent::Resolved(a) => a,
        }
    }
}

/// Debounce state for a (rule, target) pair
#[derive(Debug)]
struct DebounceState {
    last_fired: DateTime<Utc>,
    suppressed_count: u32,
}

pub struct AlertEngine {
    config: AlertEngineConfig,
    clock: SharedClock,
    rules: Arc<RwLock<BTreeMap<String, AlertRule>>>,
    active: Arc<RwLock<HashMap<String, ActiveAlert>>>,
    history: Arc<RwLock<VecDeque<ActiveAlert>>>,
    debounce: Arc<RwLock<HashMap<(String, String), DebounceState>>>,
    last_failures: Arc<RwLock<HashMap<TargetKey, u32>>>,
    event_tx: broadcast::Sender<AlertEvent>,
}

impl AlertEngine {
    /// Create an engine loaded with the built-in rules
    pub fn new(config: AlertEngineConfig, clock: SharedClock) -> Self {
        Self::with_rules(config, clock, default_rules())
    }

    pub fn with_rules(config: AlertEngineConfig, clock: SharedClock, rules: Vec<AlertRule>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let rules = rules.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            config,
            clock,
            rules: Arc::new(RwLock::new(rules)),
            active: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            debounce: Arc::new(RwLock::new(HashMap::new())),
            last_failures: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Subscribe to alert events
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.event_tx.subscribe()
    }

    /// Evaluate a result against the rule set.
    ///
    /// `status` must already reflect `result`. Returns the alerts generated,
    /// including a synthesized recovery notice.
    pub async fn on_result(&self, result: &ProbeResult, status: &TargetStatus) -> Vec<ActiveAlert> {
        let key = result.key();
        let mut generated = Vec::new();

        let previous_failures = self
            .last_failures
            .write()
            .await
            .insert(key.clone(), status.consecutive_failures)
            .unwrap_or(0);

        if result.is_success() && previous_failures > 0 && status.consecutive_failures == 0 {
            generated.push(self.recover_target(&key, previous_failures).await);
        }

        let rules: Vec<AlertRule> = {
            let rules = self.rules.read().await;
            rules
                .values()
                .filter(|r| r.enabled && r.target_type == key.probe_type)
                .cloned()
                .collect()
        };

        for rule in rules {
            let Some(value) = metric_value(rule.condition.metric, result, status) else {
                continue;
            };
            if !rule.condition.operator.holds(value, rule.condition.threshold) {
                continue;
            }
            if rule.consecutive_failures > 1 && status.consecutive_failures < rule.consecutive_failures {
                debug!(
                    "Rule {} holds for {} but only {}/{} consecutive failures",
                    rule.id, key, status.consecutive_failures, rule.consecutive_failures
                );
                continue;
            }
            if self.is_debounced(&rule.id, &key.name).await {
                continue;
            }

            let alert = ActiveAlert {
                id: Uuid::new_v4().to_string(),
                rule_id: Some(rule.id.clone()),
                alert_type: rule.alert_type(),
                severity: self.severity_for(&rule, status),
                target_name: key.name.clone(),
                target_type: key.probe_type,
                message: format!(
                    "{} for {}: {} {} {} (observed {:.1})",
                    rule.name,
                    key.name,
                    rule.condition.metric.as_str(),
                    rule.condition.operator.symbol(),
                    rule.condition.threshold,
                    value
                ),
                timestamp: self.clock.now(),
                acknowledged: false,
                resolved: false,
                resolved_at: None,
            };

            self.active
                .write()
                .await
                .insert(alert.id.clone(), alert.clone());
            self.publish(alert.clone()).await;
            generated.push(alert);
        }

        generated
    }

    /// Resolve open alerts of a target that came back and emit a recovery notice
    async fn recover_target(&self, key: &TargetKey, previous_failures: u32) -> ActiveAlert {
        let resolved = self.resolve_target_alerts(&key.name, key.probe_type).await;
        let now = self.clock.now();

        let alert = ActiveAlert {
            id: Uuid::new_v4().to_string(),
            rule_id: None,
            alert_type: AlertType::Recovery,
            severity: AlertSeverity::Info,
            target_name: key.name.clone(),
            target_type: key.probe_type,
            message: format!(
                "{} recovered after {} consecutive failures ({} alerts resolved)",
                key.name,
                previous_failures,
                resolved.len()
            ),
            timestamp: now,
            acknowledged: false,
            resolved: true,
            resolved_at: Some(now),
        };

        self.publish(alert.clone()).await;
        alert
    }

    async fn publish(&self, alert: ActiveAlert) {
        match alert.severity {
            AlertSeverity::Info => info!("{}", alert.format_line()),
            AlertSeverity::Warning => warn!("{}", alert.format_line()),
            AlertSeverity::Error | AlertSeverity::Critical => error!("{}", alert.format_line()),
        }

        {
            let mut history = self.history.write().await;
            history.push_back(alert.clone());
            while history.len() > self.config.history_limit.max(1) {
                history.pop_front();
            }
        }

        let _ = self.event_tx.send(AlertEvent::Generated(alert));
    }

    /// Check and record the debounce window for a (rule, target) pair
    async fn is_debounced(&self, rule_id: &str, target_name: &str) -> bool {
        let key = (rule_id.to_string(), target_name.to_string());
        let now = self.clock.now();

        let mut debounce = self.debounce.write().await;

        if let Some(state) = debounce.get_mut(&key) {
            let elapsed = now.signed_duration_since(state.last_fired).num_seconds();
            if elapsed < self.config.debounce_secs {
                state.suppressed_count += 1;
                debug!(
                    "Debouncing alert {} for {} ({} suppressed)",
                    rule_id, target_name, state.suppressed_count
                );
                return true;
            }

            state.last_fired = now;
            state.suppressed_count = 0;
        } else {
            debounce.insert(
                key,
                DebounceState {
                    last_fired: now,
                    suppressed_count: 0,
                },
            );
        }

        false
    }

    fn severity_for(&self, rule: &AlertRule, status: &TargetStatus) -> AlertSeverity {
        let condition = &rule.condition;
        if condition.metric == AlertMetric::Availability && condition.threshold == 0.0 {
            AlertSeverity::Critical
        } else if status.consecutive_failures >= self.config.failure_threshold {
            AlertSeverity::Error
        } else {
            AlertSeverity::Warning
        }
    }

    pub async fn acknowledge(&self, alert_id: &str) -> Result<ActiveAlert> {
        let alert = {
            let mut active = self.active.write().await;
            let alert = active
                .get_mut(alert_id)
                .ok_or_else(|| NetpulseError::AlertNotFound(alert_id.to_string()))?;
            alert.acknowledged = true;
            alert.clone()
        };
        self.update_history(&alert).await;

        info!("Alert {} acknowledged", alert_id);
        let _ = self.event_tx.send(AlertEvent::Acknowledged(alert.clone()));
        Ok(alert)
    }

    /// Resolve an alert and drop it from the active set
    pub async fn resolve(&self, alert_id: &str) -> Result<ActiveAlert> {
        let mut alert = self
            .active
            .write()
            .await
            .remove(alert_id)
            .ok_or_else(|| NetpulseError::AlertNotFound(alert_id.to_string()))?;

        alert.resolved = true;
        alert.resolved_at = Some(self.clock.now());
        self.update_history(&alert).await;

        info!("Alert {} resolved", alert_id);
        let _ = self.event_tx.send(AlertEvent::Resolved(alert.clone()));
        Ok(alert)
    }

    /// Resolve every active alert of one target
    pub async fn resolve_target_alerts(&self, target_name: &str, target_type: ProbeType) -> Vec<ActiveAlert> {
        let ids: Vec<String> = {
            let active = self.active.read().await;
            active
                .values()
                .filter(|a| a.target_name == target_name && a.target_type == target_type)
                .map(|a| a.id.clone())
                .collect()
        };

        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            // Another caller may have resolved it in between
            if let Ok(alert) = self.resolve(&id).await {
                resolved.push(alert);
            }
        }
        resolved
    }

    async fn update_history(&self, alert: &ActiveAlert) {
        let mut history = self.history.write().await;
        if let Some(entry) = history.iter_mut().rev().find(|a| a.id == alert.id) {
            *entry = alert.clone();
        }
    }

    /// Active alerts, oldest first
    pub async fn active_alerts(&self) -> Vec<ActiveAlert> {
        let active = self.active.read().await;
        let mut alerts: Vec<ActiveAlert> = active.values().cloned().collect();
        alerts.sort_by_key(|a| a.timestamp);
        alerts
    }

    /// Most recent alerts first
    pub async fn alert_history(&self, limit: usize) -> Vec<ActiveAlert> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    pub async fn add_rule(&self, rule: AlertRule) {
        debug!("Adding alert rule {}", rule.id);
        self.rules.write().await.insert(rule.id.clone(), rule);
    }

    pub async fn remove_rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.rules.write().await.remove(rule_id)
    }

    pub async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        match self.rules.write().await.get_mut(rule_id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub async fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().await.values().cloned().collect()
    }

    /// Suppressed alert counts keyed by `rule:target`
    pub async fn suppressed_counts(&self) -> HashMap<String, u32> {
        let debounce = self.debounce.read().await;
        debounce
            .iter()
            .filter(|(_, state)| state.suppressed_count > 0)
            .map(|((rule, target), state)| (format!("{}:{}", rule, target), state.suppressed_count))
            .collect()
    }
}

fn metric_value(metric: AlertMetric, result: &ProbeResult, status: &TargetStatus) -> Option<f64> {
    match metric {
        AlertMetric::ResponseTime => result.response_time_ms(),
        AlertMetric::PacketLoss => result.packet_loss_percent(),
        AlertMetric::Availability => Some(if result.is_success() { 1.0 } else { 0.0 }),
        AlertMetric::SuccessRate => status.metrics.success_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{Comparison, DnsResult, PingResult, StatusLevel};

    fn status_with(name: &str, failures: u32) -> TargetStatus {
        let mut status = TargetStatus::new(name, ProbeType::Ping, Utc::now());
        status.consecutive_failures = failures;
        if failures >= 3 {
            status.level = StatusLevel::Failed;
        }
        status
    }

    #[tokio::test]
    async fn test_connectivity_rule_waits_for_consecutive_failures() {
        let engine = AlertEngine::new(AlertEngineConfig::default(), ManualClock::starting_now());
        let result: ProbeResult = PingResult::failure("X", "timeout").into();

        assert!(engine.on_result(&result, &status_with("X", 1)).await.is_empty());
        assert!(engine.on_result(&result, &status_with("X", 2)).await.is_empty());

        let alerts = engine.on_result(&result, &status_with("X", 3)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id.as_deref(), Some("ping_connectivity_failure"));
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].alert_type, AlertType::Connectivity);
    }

    #[tokio::test]
    async fn test_same_rule_and_target_debounced_for_window() {
        let clock = ManualClock::starting_now();
        let engine = AlertEngine::new(AlertEngineConfig::default(), clock.clone());
        let result: ProbeResult = PingResult::failure("X", "timeout").into();

        assert_eq!(engine.on_result(&result, &status_with("X", 3)).await.len(), 1);
        clock.advance(chrono::Duration::seconds(299));
        assert!(engine.on_result(&result, &status_with("X", 4)).await.is_empty());
        assert_eq!(engine.suppressed_counts().await.get("ping_connectivity_failure:X"), Some(&1));

        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(engine.on_result(&result, &status_with("X", 5)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_debounce_is_per_target() {
        let engine = AlertEngine::new(AlertEngineConfig::default(), ManualClock::starting_now());
        let x: ProbeResult = PingResult::failure("X", "timeout").into();
        let y: ProbeResult = PingResult::failure("Y", "timeout").into();

        assert_eq!(engine.on_result(&x, &status_with("X", 3)).await.len(), 1);
        assert_eq!(engine.on_result(&y, &status_with("Y", 3)).await.len(), 1);
        assert_eq!(engine.active_alerts().await.len(), 2);
    }

    #[tokio::test]
    async fn test_latency_rule_is_warning_performance() {
        let engine = AlertEngine::new(AlertEngineConfig::default(), ManualClock::starting_now());
        let result: ProbeResult = PingResult::success("X", 1500.0, 0.0).into();

        let alerts = engine.on_result(&result, &status_with("X", 0)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].rule_id.as_deref(), Some("ping_high_latency"));
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].alert_type, AlertType::Performance);
    }

    #[tokio::test]
    async fn test_failures_over_threshold_raise_error_severity() {
        let rule = AlertRule::new(
            "loss",
            "Loss",
            ProbeType::Ping,
            AlertMetric::PacketLoss,
            Comparison::GreaterThan,
            50.0,
        );
        let engine = AlertEngine::with_rules(
            AlertEngineConfig::default(),
            ManualClock::starting_now(),
            vec![rule],
        );
        let result: ProbeResult = PingResult::failure("X", "timeout").into();

        let alerts = engine.on_result(&result, &status_with("X", 4)).await;
        assert_eq!(alerts[0].severity, AlertSeverity::Error);
    }

    #[tokio::test]
    async fn test_recovery_resolves_open_alerts() {
        let engine = AlertEngine::new(AlertEngineConfig::default(), ManualClock::starting_now());
        let mut events = engine.subscribe();
        let failure: ProbeResult = PingResult::failure("X", "timeout").into();
        engine.on_result(&failure, &status_with("X", 3)).await;
        assert_eq!(engine.active_alerts().await.len(), 1);

        let success: ProbeResult = PingResult::success("X", 10.0, 0.0).into();
        let alerts = engine.on_result(&success, &status_with("X", 0)).await;

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::Recovery);
        assert!(engine.active_alerts().await.is_empty());

        let names: Vec<&'static str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["alert_generated", "alert_resolved", "alert_generated"]);
    }

    #[tokio::test]
    async fn test_acknowledge_and_resolve() {
        let engine = AlertEngine::new(AlertEngineConfig::default(), ManualClock::starting_now());
        let failure: ProbeResult = PingResult::failure("X", "timeout").into();
        let alert = engine.on_result(&failure, &status_with("X", 3)).await.remove(0);

        let acked = engine.acknowledge(&alert.id).await.unwrap();
        assert!(acked.acknowledged);
        let resolved = engine.resolve(&alert.id).await.unwrap();
        assert!(resolved.resolved);
        assert!(engine.active_alerts().await.is_empty());
        assert!(matches!(
            engine.resolve(&alert.id).await,
            Err(NetpulseError::AlertNotFound(_))
        ));

        let history = engine.alert_history(10).await;
        assert!(history[0].resolved && history[0].acknowledged);
    }

    #[tokio::test]
    async fn test_disabled_rules_and_type_filtering() {
        let engine = AlertEngine::new(AlertEngineConfig::default(), ManualClock::starting_now());
        assert!(engine.set_rule_enabled("dns_slow_response", false).await);

        let slow: ProbeResult = DnsResult::success("cf", "example.com", 5000.0).into();
        let mut status = TargetStatus::new("cf", ProbeType::Dns, Utc::now());
        status.consecutive_failures = 0;
        assert!(engine.on_result(&slow, &status).await.is_empty());

        assert!(engine.remove_rule("dns_slow_response").await.is_some());
        assert!(!engine.set_rule_enabled("dns_slow_response", true).await);
    }
}
