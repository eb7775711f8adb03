//! Target status tracking with failure hysteresis
//!
//! A target degrades to its failure status only after `failure_threshold`
//! consecutive failures; a single success restores it immediately.

use crate::clock::SharedClock;
use crate::domain::{MetricSnapshot, ProbeResult, ProbeType, StatusLevel, TargetKey, TargetStatus};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the state tracker
#[derive(Debug, Clone)]
pub struct StateTrackerConfig {
    /// Consecutive failures before a target is marked failed (default: 3)
    pub failure_threshold: u32,
    /// Ping latency above which a success counts as degraded (default: 500ms)
    pub ping_degraded_latency_ms: f64,
    /// Ping packet loss above which a success counts as degraded (default: 10%)
    pub ping_degraded_packet_loss: f64,
    /// DNS response time above which a success counts as slow (default: 1000ms)
    pub dns_slow_response_ms: f64,
    /// Outcomes kept per DNS target for the success rate (default: 10)
    pub success_window: usize,
}

impl Default for StateTrackerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            ping_degraded_latency_ms: 500.0,
            ping_degraded_packet_loss: 10.0,
            dns_slow_response_ms: 1000.0,
            success_window: 10,
        }
    }
}

/// Event emitted by the state tracker
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    StatusChanged {
        target_name: String,
        probe_type: ProbeType,
        from: StatusLevel,
        to: StatusLevel,
        status: TargetStatus,
    },
    /// Target left its failure status
    Recovery {
        target_name: String,
        probe_type: ProbeType,
        status: TargetStatus,
    },
}

struct TrackedTarget {
    status: TargetStatus,
    outcomes: VecDeque<bool>,
}

pub struct StateTracker {
    config: StateTrackerConfig,
    clock: SharedClock,
    targets: Arc<RwLock<HashMap<TargetKey, TrackedTarget>>>,
    event_tx: broadcast::Sender<StatusEvent>,
}

impl StateTracker {
    pub fn new(config: StateTrackerConfig, clock: SharedClock) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            clock,
            targets: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.event_tx.subscribe()
    }

    pub fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }

    /// Apply one probe result and return the updated status
    pub async fn process_result(&self, result: &ProbeResult) -> TargetStatus {
        let now = self.clock.now();
        let key = result.key();

        let (previous, status) = {
            let mut targets = self.targets.write().await;
            let tracked = targets.entry(key.clone()).or_insert_with(|| TrackedTarget {
                status: TargetStatus::new(&key.name, key.probe_type, now),
                outcomes: VecDeque::with_capacity(self.config.success_window),
            });

            let previous = tracked.status.level;
            self.apply(tracked, result, now);
            (previous, tracked.status.clone())
        };

        if previous != status.level {
            info!(
                "{} {} -> {} ({} consecutive failures)",
                key,
                previous.label(key.probe_type),
                status.label(),
                status.consecutive_failures
            );
            let _ = self.event_tx.send(StatusEvent::StatusChanged {
                target_name: key.name.clone(),
                probe_type: key.probe_type,
                from: previous,
                to: status.level,
                status: status.clone(),
            });

            if previous.is_failure() && status.level == StatusLevel::Healthy {
                let _ = self.event_tx.send(StatusEvent::Recovery {
                    target_name: key.name.clone(),
                    probe_type: key.probe_type,
                    status: status.clone(),
                });
            }
        }

        status
    }

    fn apply(&self, tracked: &mut TrackedTarget, result: &ProbeResult, now: chrono::DateTime<chrono::Utc>) {
        let success = result.is_success();

        if result.probe_type() == ProbeType::Dns {
            if tracked.outcomes.len() >= self.config.success_window.max(1) {
                tracked.outcomes.pop_front();
            }
            tracked.outcomes.push_back(success);
        }

        let status = &mut tracked.status;
        status.updated_at = now;
        status.metrics = MetricSnapshot {
            response_time_ms: result.response_time_ms(),
            packet_loss_percent: result.packet_loss_percent(),
            success_rate: success_rate(&tracked.outcomes),
        };

        if success {
            status.consecutive_failures = 0;
            status.last_success = Some(now);
            status.level = if self.is_degraded(result) {
                StatusLevel::Degraded
            } else {
                StatusLevel::Healthy
            };
            return;
        }

        status.consecutive_failures += 1;
        if status.consecutive_failures >= self.config.failure_threshold {
            if status.level != StatusLevel::Failed {
                warn!(
                    "{}:{} reached {} consecutive failures",
                    status.probe_type, status.target_name, status.consecutive_failures
                );
            }
            status.level = StatusLevel::Failed;
        } else {
            debug!(
                "{}:{} failure {}/{} below threshold, status kept",
                status.probe_type,
                status.target_name,
                status.consecutive_failures,
                self.config.failure_threshold
            );
        }
    }

    fn is_degraded(&self, result: &ProbeResult) -> bool {
        match result {
            ProbeResult::Ping(r) => {
                r.response_time_ms
                    .is_some_and(|ms| ms > self.config.ping_degraded_latency_ms)
                    || r.packet_loss_percent > self.config.ping_degraded_packet_loss
            }
            ProbeResult::Dns(r) => r
                .response_time_ms
                .is_some_and(|ms| ms > self.config.dns_slow_response_ms),
        }
    }

    pub async fn status(&self, probe_type: ProbeType, name: &str) -> Option<TargetStatus> {
        let targets = self.targets.read().await;
        targets
            .get(&TargetKey::new(probe_type, name))
            .map(|t| t.status.clone())
    }

    /// All statuses, ordered by probe type then name
    pub async fn statuses(&self) -> Vec<TargetStatus> {
        let targets = self.targets.read().await;
        let mut statuses: Vec<TargetStatus> = targets.values().map(|t| t.status.clone()).collect();
        statuses.sort_by(|a, b| {
            (a.probe_type, &a.target_name).cmp(&(b.probe_type, &b.target_name))
        });
        statuses
    }

    /// Forget a target that is no longer monitored
    pub async fn remove_target(&self, probe_type: ProbeType, name: &str) -> bool {
        let mut targets = self.targets.write().await;
        targets.remove(&TargetKey::new(probe_type, name)).is_some()
    }
}

fn success_rate(outcomes: &VecDeque<bool>) -> Option<f64> {
    if outcomes.is_empty() {
        return None;
    }
    let ok = outcomes.iter().filter(|s| **s).count();
    Some(ok as f64 * 100.0 / outcomes.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::{DnsResult, PingResult};

    fn tracker() -> StateTracker {
        StateTracker::new(StateTrackerConfig::default(), ManualClock::starting_now())
    }

    fn fail(name: &str) -> ProbeResult {
        PingResult::failure(name, "100% packet loss").into()
    }

    fn ok(name: &str, ms: f64) -> ProbeResult {
        PingResult::success(name, ms, 0.0).into()
    }

    #[tokio::test]
    async fn test_failures_below_threshold_keep_status() {
        let tracker = tracker();
        let mut events = tracker.subscribe();

        let s1 = tracker.process_result(&fail("X")).await;
        let s2 = tracker.process_result(&fail("X")).await;
        assert_eq!(s1.level, StatusLevel::Healthy);
        assert_eq!(s2.level, StatusLevel::Healthy);
        assert_eq!(s2.consecutive_failures, 2);
        assert!(events.try_recv().is_err());

        let s3 = tracker.process_result(&fail("X")).await;
        assert_eq!(s3.level, StatusLevel::Failed);
        assert_eq!(s3.label(), "offline");
        assert!(matches!(
            events.try_recv(),
            Ok(StatusEvent::StatusChanged {
                from: StatusLevel::Healthy,
                to: StatusLevel::Failed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_single_success_recovers_immediately() {
        let tracker = tracker();
        for _ in 0..4 {
            tracker.process_result(&fail("X")).await;
        }
        let mut events = tracker.subscribe();

        let status = tracker.process_result(&ok("X", 12.0)).await;
        assert_eq!(status.level, StatusLevel::Healthy);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_success.is_some());

        assert!(matches!(events.try_recv(), Ok(StatusEvent::StatusChanged { .. })));
        assert!(matches!(events.try_recv(), Ok(StatusEvent::Recovery { .. })));
    }

    #[tokio::test]
    async fn test_slow_success_after_outage_is_not_a_recovery() {
        let tracker = tracker();
        for _ in 0..3 {
            tracker.process_result(&fail("X")).await;
        }
        let mut events = tracker.subscribe();

        let status = tracker.process_result(&ok("X", 800.0)).await;
        assert_eq!(status.level, StatusLevel::Degraded);
        assert_eq!(status.consecutive_failures, 0);
        assert!(matches!(
            events.try_recv(),
            Ok(StatusEvent::StatusChanged {
                from: StatusLevel::Failed,
                to: StatusLevel::Degraded,
                ..
            })
        ));
        assert!(events.try_recv().is_err());

        // Degraded is not a failure status, so reaching healthy from it is a plain change
        tracker.process_result(&ok("X", 12.0)).await;
        assert!(matches!(
            events.try_recv(),
            Ok(StatusEvent::StatusChanged {
                to: StatusLevel::Healthy,
                ..
            })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_success_is_degraded_not_failed() {
        let tracker = tracker();
        let status = tracker.process_result(&ok("X", 800.0)).await;
        assert_eq!(status.level, StatusLevel::Degraded);
        assert_eq!(status.label(), "degraded");

        let lossy: ProbeResult = PingResult::success("X", 20.0, 25.0).into();
        let status = tracker.process_result(&lossy).await;
        assert_eq!(status.level, StatusLevel::Degraded);
    }

    #[tokio::test]
    async fn test_isolated_failure_between_successes_never_downgrades() {
        let tracker = tracker();
        for i in 0..10 {
            let result = if i % 2 == 0 { fail("X") } else { ok("X", 10.0) };
            let status = tracker.process_result(&result).await;
            assert_ne!(status.level, StatusLevel::Failed);
        }
    }

    #[tokio::test]
    async fn test_dns_success_rate_window() {
        let tracker = tracker();
        let results: Vec<ProbeResult> = vec![
            DnsResult::success("cf", "a.com", 20.0).into(),
            DnsResult::failure("cf", "b.com", "SERVFAIL").into(),
            DnsResult::success("cf", "c.com", 20.0).into(),
            DnsResult::success("cf", "d.com", 1500.0).into(),
        ];
        let mut last = None;
        for r in &results {
            last = Some(tracker.process_result(r).await);
        }
        let status = last.unwrap();
        assert_eq!(status.metrics.success_rate, Some(75.0));
        assert_eq!(status.label(), "slow");
    }

    #[tokio::test]
    async fn test_targets_are_keyed_by_type_and_name() {
        let tracker = tracker();
        tracker.process_result(&fail("X")).await;
        tracker
            .process_result(&DnsResult::success("X", "a.com", 5.0).into())
            .await;

        assert_eq!(tracker.statuses().await.len(), 2);
        assert!(tracker.remove_target(ProbeType::Ping, "X").await);
        assert!(tracker.status(ProbeType::Ping, "X").await.is_none());
        assert!(tracker.status(ProbeType::Dns, "X").await.is_some());
    }
}
