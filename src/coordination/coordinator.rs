//! Monitor Coordinator
//!
//! Composes the ping and DNS schedulers and re-publishes their events under
//! `ping:*` / `dns:*` channels. Holds no scheduling logic of its own.

use super::scheduler::{SchedulerEvent, SchedulerStatus, TaskScheduler};
use crate::domain::{DnsTarget, PingTarget, ProbeType, Target};
use crate::error::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scheduler event tagged with the probe type it came from
#[derive(Debug, Clone)]
pub struct CoordinatorEvent {
    pub probe_type: ProbeType,
    pub event: SchedulerEvent,
}

impl CoordinatorEvent {
    /// Namespaced channel name, e.g. `ping:execute`
    pub fn channel(&self) -> String {
        format!("{}:{}", self.probe_type, self.event.name())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub running: bool,
    pub ping: SchedulerStatus,
    pub dns: SchedulerStatus,
}

pub struct MonitorCoordinator {
    ping: Arc<TaskScheduler>,
    dns: Arc<TaskScheduler>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitorCoordinator {
    pub fn new(ping: Arc<TaskScheduler>, dns: Arc<TaskScheduler>) -> Self {
        let (event_tx, _) = broadcast::channel(512);
        Self {
            ping,
            dns,
            event_tx,
            forwarders: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to namespaced events of both schedulers
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_tx.subscribe()
    }

    pub fn scheduler(&self, probe_type: ProbeType) -> &Arc<TaskScheduler> {
        match probe_type {
            ProbeType::Ping => &self.ping,
            ProbeType::Dns => &self.dns,
        }
    }

    pub fn update_ping_targets(&self, targets: Vec<PingTarget>) -> Result<usize> {
        self.ping
            .update_targets(targets.into_iter().map(Target::Ping).collect())
    }

    pub fn update_dns_targets(&self, targets: Vec<DnsTarget>) -> Result<usize> {
        self.dns
            .update_targets(targets.into_iter().map(Target::Dns).collect())
    }

    pub fn is_running(&self) -> bool {
        self.ping.is_running() || self.dns.is_running()
    }

    pub fn start(&self) {
        {
            let mut forwarders = self.forwarders.lock().unwrap_or_else(|e| e.into_inner());
            if forwarders.is_empty() {
                forwarders.push(self.forward(ProbeType::Ping));
                forwarders.push(self.forward(ProbeType::Dns));
            }
        }
        self.ping.start();
        self.dns.start();
        info!("Monitor coordinator started");
    }

    pub fn stop(&self) {
        self.ping.stop();
        self.dns.stop();
        let mut forwarders = self.forwarders.lock().unwrap_or_else(|e| e.into_inner());
        for handle in forwarders.drain(..) {
            handle.abort();
        }
        info!("Monitor coordinator stopped");
    }

    /// Restart one scheduler, keeping its tasks
    pub fn restart(&self, probe_type: ProbeType) {
        self.scheduler(probe_type).restart();
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            running: self.is_running(),
            ping: self.ping.status(),
            dns: self.dns.status(),
        }
    }

    fn forward(&self, probe_type: ProbeType) -> JoinHandle<()> {
        let mut rx = self.scheduler(probe_type).subscribe();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(CoordinatorEvent { probe_type, event });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} event forwarder lagged, dropped {} events", probe_type, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("{} scheduler event channel closed", probe_type);
                        break;
                    }
                }
            }
        })
    }
}

impl Drop for MonitorCoordinator {
    fn drop(&mut self) {
        let mut forwarders = self.forwarders.lock().unwrap_or_else(|e| e.into_inner());
        for handle in forwarders.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::coordination::scheduler::{SchedulerConfig, TaskContext, TaskHandler};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
            Ok(())
        }
    }

    struct RefusingHandler;

    #[async_trait]
    impl TaskHandler for RefusingHandler {
        async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
            Err(crate::error::NetpulseError::ProbeTool(
                "ping: permission denied".to_string(),
            ))
        }
    }

    fn coordinator() -> MonitorCoordinator {
        let clock = SystemClock::shared();
        let handler: Arc<dyn TaskHandler> = Arc::new(NoopHandler);
        MonitorCoordinator::new(
            Arc::new(TaskScheduler::new(
                SchedulerConfig::ping(),
                clock.clone(),
                handler.clone(),
            )),
            Arc::new(TaskScheduler::new(SchedulerConfig::dns(), clock, handler)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_namespaced() {
        let coordinator = coordinator();
        let mut events = coordinator.subscribe();
        coordinator
            .update_ping_targets(vec![PingTarget::new("gw", "10.0.0.1", 5)])
            .unwrap();
        coordinator
            .update_dns_targets(vec![DnsTarget::new("cf", "1.1.1.1", &["example.com"], 5)])
            .unwrap();
        coordinator.start();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let mut channels = Vec::new();
        while let Ok(event) = events.try_recv() {
            channels.push(event.channel());
        }
        channels.sort();
        assert_eq!(channels, vec!["dns:execute", "ping:execute"]);

        coordinator.stop();
        assert!(!coordinator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_errors_are_namespaced() {
        let clock = SystemClock::shared();
        let coordinator = MonitorCoordinator::new(
            Arc::new(TaskScheduler::new(
                SchedulerConfig::ping(),
                clock.clone(),
                Arc::new(RefusingHandler),
            )),
            Arc::new(TaskScheduler::new(SchedulerConfig::dns(), clock, Arc::new(NoopHandler))),
        );
        let mut events = coordinator.subscribe();
        coordinator
            .update_ping_targets(vec![PingTarget::new("gw", "10.0.0.1", 5)])
            .unwrap();
        coordinator
            .update_dns_targets(vec![DnsTarget::new("cf", "1.1.1.1", &["example.com"], 5)])
            .unwrap();
        coordinator.start();

        tokio::time::sleep(Duration::from_secs(6)).await;

        let mut channels = Vec::new();
        while let Ok(event) = events.try_recv() {
            channels.push(event.channel());
        }
        channels.sort();
        assert_eq!(channels, vec!["dns:execute", "ping:error", "ping:execute"]);
        assert_eq!(coordinator.status().ping.errors, 1);
        assert_eq!(coordinator.status().dns.errors, 0);

        coordinator.stop();
    }

    #[tokio::test]
    async fn test_schedulers_are_independent() {
        let coordinator = coordinator();
        coordinator
            .update_ping_targets(vec![PingTarget::new("gw", "10.0.0.1", 5)])
            .unwrap();

        let status = coordinator.status();
        assert_eq!(status.ping.total_tasks, 1);
        assert_eq!(status.dns.total_tasks, 0);
        assert_eq!(status.ping.max_concurrent_tasks, 5);
        assert_eq!(status.dns.max_concurrent_tasks, 3);
    }
}
