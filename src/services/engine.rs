//! Monitoring Engine
//!
//! Owns every component and wires them together:
//!
//! ```text
//! scheduler -> ProbePipeline -> executor -> StateTracker -> AlertEngine
//!                                  |
//!                                  +-- error --> ErrorHandler -> RecoveryManager
//! ```
//!
//! Recovered errors resolve the alerts of their target.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::alert_engine::{AlertEngine, AlertEvent};
use super::state_tracker::StateTracker;
use crate::adapters::ProbeExecutor;
use crate::clock::SharedClock;
use crate::config::AppConfig;
use crate::coordination::{
    CoordinatorStatus, MonitorCoordinator, TaskContext, TaskHandler, TaskScheduler,
};
use crate::domain::{
    components, ActiveAlert, DnsResult, DnsTarget, PingResult, PingTarget, ProbeResult, ProbeType,
    SystemHealth, Target, TargetStatus,
};
use crate::error::{NetpulseError, Result};
use crate::supervisor::recovery::{
    RESET_NETWORK_TOOLS, RESTART_DNS_MONITORING, RESTART_PING_MONITORING, THROTTLE_MONITORING,
};
use crate::supervisor::{
    ErrorHandler, ErrorHandlerEvent, ErrorStatistics, RecoveryAction, RecoveryManager,
    RecoveryStatistics,
};

fn probe_type_for(component: &str) -> Option<ProbeType> {
    match component {
        components::PING_MONITOR => Some(ProbeType::Ping),
        components::DNS_MONITOR => Some(ProbeType::Dns),
        _ => None,
    }
}

/// Runs one probe and feeds its outcome through tracker, alerts and error handling
struct ProbePipeline {
    executor: Arc<dyn ProbeExecutor>,
    tracker: Arc<StateTracker>,
    alerts: Arc<AlertEngine>,
    errors: Arc<ErrorHandler>,
}

impl ProbePipeline {
    async fn run(&self, target: &Target, is_live: &(dyn Fn() -> bool + Send + Sync)) -> Result<()> {
        let outcome: Result<Vec<ProbeResult>> = match target {
            Target::Ping(t) => self.executor.execute_ping(t).await.map(|r| vec![r.into()]),
            Target::Dns(t) => self
                .executor
                .execute_dns(t)
                .await
                .map(|rs| rs.into_iter().map(ProbeResult::from).collect()),
        };

        if !is_live() {
            debug!("Discarding result for {} from a stopped scheduler", target.key());
            return Ok(());
        }

        match outcome {
            Ok(results) => {
                for result in results {
                    self.process(result).await;
                }
                Ok(())
            }
            Err(e) => {
                let component = target.probe_type().component();
                self.errors
                    .handle_error(component, &e, Some(target.name()))
                    .await;

                // The target is unavailable whenever its probe cannot run
                for result in failed_results(target, &e) {
                    self.process(result).await;
                }
                Err(e)
            }
        }
    }

    async fn process(&self, result: ProbeResult) {
        let status = self.tracker.process_result(&result).await;
        self.alerts.on_result(&result, &status).await;
        if result.is_success() {
            self.errors
                .record_success(result.probe_type().component(), Some(result.target_name()))
                .await;
        }
    }
}

fn failed_results(target: &Target, err: &NetpulseError) -> Vec<ProbeResult> {
    let reason = err.to_string();
    match target {
        Target::Ping(t) => {
            let mut result = PingResult::failure(&t.name, &reason);
            result.address = t.address.clone();
            vec![result.into()]
        }
        Target::Dns(t) if t.domains.is_empty() => {
            vec![DnsResult::failure(&t.name, "", &reason).into()]
        }
        Target::Dns(t) => t
            .domains
            .iter()
            .map(|d| {
                let mut result = DnsResult::failure(&t.name, d, &reason);
                result.server_ip = t.server_ip.clone();
                result.into()
            })
            .collect(),
    }
}

#[async_trait]
impl TaskHandler for ProbePipeline {
    async fn execute(&self, ctx: &TaskContext) -> Result<()> {
        self.run(&ctx.target, &|| ctx.is_live()).await
    }
}

pub struct MonitoringEngine {
    coordinator: Arc<MonitorCoordinator>,
    pipeline: Arc<ProbePipeline>,
    recovery: Arc<RecoveryManager>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl MonitoringEngine {
    /// Build all components and register the built-in recovery actions
    pub async fn new(
        config: &AppConfig,
        executor: Arc<dyn ProbeExecutor>,
        clock: SharedClock,
    ) -> Arc<Self> {
        let tracker = Arc::new(StateTracker::new(config.state_tracker_config(), clock.clone()));
        let alerts = Arc::new(AlertEngine::new(config.alert_engine_config(), clock.clone()));
        let errors = Arc::new(ErrorHandler::new(config.error_handler_config(), clock.clone()));
        let recovery = Arc::new(RecoveryManager::new(
            config.recovery_manager_config(),
            clock.clone(),
            errors.clone(),
        ));

        let pipeline = Arc::new(ProbePipeline {
            executor: executor.clone(),
            tracker,
            alerts,
            errors,
        });
        let handler: Arc<dyn TaskHandler> = pipeline.clone();
        let coordinator = Arc::new(MonitorCoordinator::new(
            Arc::new(TaskScheduler::new(
                config.scheduler_config(ProbeType::Ping),
                clock.clone(),
                handler.clone(),
            )),
            Arc::new(TaskScheduler::new(
                config.scheduler_config(ProbeType::Dns),
                clock,
                handler,
            )),
        ));

        let engine = Arc::new(Self {
            coordinator,
            pipeline,
            recovery,
            listeners: Mutex::new(Vec::new()),
        });
        engine.register_recovery_actions(config, executor).await;
        engine
    }

    async fn register_recovery_actions(&self, config: &AppConfig, executor: Arc<dyn ProbeExecutor>) {
        let cooldown = Duration::from_secs(config.recovery.cooldown_secs);
        let max_attempts = config.recovery.max_attempts;

        for (component, name, probe_type) in [
            (components::PING_MONITOR, RESTART_PING_MONITORING, ProbeType::Ping),
            (components::DNS_MONITOR, RESTART_DNS_MONITORING, ProbeType::Dns),
        ] {
            let coordinator = self.coordinator.clone();
            let action = RecoveryAction::new(component, name, move || {
                let coordinator = coordinator.clone();
                async move {
                    let scheduler = coordinator.scheduler(probe_type);
                    if scheduler.is_running() {
                        scheduler.restart();
                    } else {
                        debug!("{} scheduler not running, nothing to restart", probe_type);
                    }
                    Ok(())
                }
            });
            self.recovery
                .register_action(action.with_cooldown(cooldown).with_max_attempts(max_attempts))
                .await;
        }

        let reset = RecoveryAction::new(components::NETWORK_TOOL, RESET_NETWORK_TOOLS, move || {
            let executor = executor.clone();
            async move { executor.reset().await }
        });
        self.recovery
            .register_action(reset.with_cooldown(cooldown).with_max_attempts(max_attempts))
            .await;

        let coordinator = self.coordinator.clone();
        let throttle = RecoveryAction::new(components::SYSTEM, THROTTLE_MONITORING, move || {
            let coordinator = coordinator.clone();
            async move {
                for probe_type in [ProbeType::Ping, ProbeType::Dns] {
                    let scheduler = coordinator.scheduler(probe_type);
                    let current = scheduler.max_concurrent_tasks();
                    scheduler.set_max_concurrent_tasks((current / 2).max(1));
                }
                Ok(())
            }
        });
        self.recovery
            .register_action(throttle.with_cooldown(cooldown).with_max_attempts(max_attempts))
            .await;
    }

    pub fn start(self: &Arc<Self>) {
        {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            if listeners.is_empty() {
                listeners.push(self.spawn_recovered_listener());
            }
        }
        self.recovery.start();
        self.pipeline.errors.start_maintenance();
        self.coordinator.start();
        info!("Monitoring engine started");
    }

    pub fn stop(&self) {
        self.coordinator.stop();
        self.recovery.stop();
        self.pipeline.errors.stop_maintenance();
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for handle in listeners.drain(..) {
            handle.abort();
        }
        info!("Monitoring engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.coordinator.is_running()
    }

    /// Resolve a target's alerts once an error raised for it is recovered
    fn spawn_recovered_listener(&self) -> JoinHandle<()> {
        let mut rx = self.pipeline.errors.subscribe();
        let alerts = self.pipeline.alerts.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ErrorHandlerEvent::ErrorRecovered { error }) => {
                        let (Some(target), Some(probe_type)) =
                            (error.target.as_deref(), probe_type_for(&error.component))
                        else {
                            continue;
                        };
                        let resolved = alerts.resolve_target_alerts(target, probe_type).await;
                        if !resolved.is_empty() {
                            info!(
                                "Resolved {} alerts for {}:{} after recovery",
                                resolved.len(),
                                probe_type,
                                target
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Engine error listener lagged, dropped {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn update_ping_targets(&self, targets: Vec<PingTarget>) -> Result<usize> {
        let keep: HashSet<String> = targets.iter().map(|t| t.name.clone()).collect();
        let count = self.coordinator.update_ping_targets(targets)?;
        self.forget_missing(ProbeType::Ping, &keep).await;
        Ok(count)
    }

    pub async fn update_dns_targets(&self, targets: Vec<DnsTarget>) -> Result<usize> {
        let keep: HashSet<String> = targets.iter().map(|t| t.name.clone()).collect();
        let count = self.coordinator.update_dns_targets(targets)?;
        self.forget_missing(ProbeType::Dns, &keep).await;
        Ok(count)
    }

    /// Stop monitoring one target and drop its status
    pub async fn remove_target(&self, probe_type: ProbeType, name: &str) -> bool {
        let removed = self.coordinator.scheduler(probe_type).remove_target(name);
        self.pipeline.tracker.remove_target(probe_type, name).await;
        removed
    }

    async fn forget_missing(&self, probe_type: ProbeType, keep: &HashSet<String>) {
        for status in self.pipeline.tracker.statuses().await {
            if status.probe_type == probe_type && !keep.contains(&status.target_name) {
                self.pipeline
                    .tracker
                    .remove_target(probe_type, &status.target_name)
                    .await;
            }
        }
    }

    /// Probe a target immediately, outside its schedule
    pub async fn probe_now(&self, target: &Target) -> Result<()> {
        self.pipeline.run(target, &|| true).await
    }

    pub fn scheduler_status(&self) -> CoordinatorStatus {
        self.coordinator.status()
    }

    pub async fn system_health(&self) -> SystemHealth {
        self.pipeline.errors.system_health().await
    }

    pub async fn error_statistics(&self) -> ErrorStatistics {
        self.pipeline.errors.statistics().await
    }

    pub async fn recovery_statistics(&self) -> RecoveryStatistics {
        self.recovery.statistics().await
    }

    pub async fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.pipeline.alerts.active_alerts().await
    }

    pub async fn target_statuses(&self) -> Vec<TargetStatus> {
        self.pipeline.tracker.statuses().await
    }

    pub async fn acknowledge_alert(&self, alert_id: &str) -> Result<ActiveAlert> {
        self.pipeline.alerts.acknowledge(alert_id).await
    }

    pub async fn resolve_alert(&self, alert_id: &str) -> Result<ActiveAlert> {
        self.pipeline.alerts.resolve(alert_id).await
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.pipeline.alerts.subscribe()
    }

    pub fn coordinator(&self) -> &Arc<MonitorCoordinator> {
        &self.coordinator
    }

    pub fn state_tracker(&self) -> &Arc<StateTracker> {
        &self.pipeline.tracker
    }

    pub fn alert_engine(&self) -> &Arc<AlertEngine> {
        &self.pipeline.alerts
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.pipeline.errors
    }

    pub fn recovery_manager(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }
}

impl Drop for MonitoringEngine {
    fn drop(&mut self) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for handle in listeners.drain(..) {
            handle.abort();
        }
    }
}
