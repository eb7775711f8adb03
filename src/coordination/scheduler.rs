//! Periodic Probe Scheduler
//!
//! Runs one free-running timer per enabled target. Firings are spaced by a
//! minimum interval per scheduler and bounded by a concurrency cap; a task
//! that comes due while the cap is reached skips that cycle and waits for its
//! next interval.

use crate::clock::SharedClock;
use crate::domain::{ProbeType, Target};
use crate::error::{NetpulseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for one scheduler instance
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub probe_type: ProbeType,
    /// Maximum in-flight executions (default: 5 ping, 3 dns)
    pub max_concurrent_tasks: usize,
    /// Minimum spacing between two firings (default: 100ms ping, 200ms dns)
    pub min_task_interval_ms: u64,
}

impl SchedulerConfig {
    pub fn ping() -> Self {
        Self {
            probe_type: ProbeType::Ping,
            max_concurrent_tasks: 5,
            min_task_interval_ms: 100,
        }
    }

    pub fn dns() -> Self {
        Self {
            probe_type: ProbeType::Dns,
            max_concurrent_tasks: 3,
            min_task_interval_ms: 200,
        }
    }
}

/// A periodic probe for one target
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub id: String,
    pub probe_type: ProbeType,
    pub target: Target,
    pub next_execution: DateTime<Utc>,
    pub interval_secs: u64,
    pub enabled: bool,
    pub last_execution: Option<DateTime<Utc>>,
}

/// Event emitted by a scheduler
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A task fired and its handler is running
    Execute { task_id: String, target: Target },
    /// The handler failed or panicked
    Error {
        task_id: String,
        target: Target,
        error: String,
    },
    /// The task came due while the concurrency cap was reached
    Skipped {
        task_id: String,
        target: Target,
        active_tasks: usize,
    },
}

impl SchedulerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerEvent::Execute { .. } => "execute",
            SchedulerEvent::Error { .. } => "error",
            SchedulerEvent::Skipped { .. } => "skipped",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            SchedulerEvent::Execute { task_id, .. }
            | SchedulerEvent::Error { task_id, .. }
            | SchedulerEvent::Skipped { task_id, .. } => task_id,
        }
    }
}

/// Work performed when a task fires
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, ctx: &TaskContext) -> Result<()>;
}

/// Handed to the [`TaskHandler`] for one execution
pub struct TaskContext {
    pub task_id: String,
    pub target: Target,
    generation: u64,
    inner: Arc<SchedulerInner>,
}

impl TaskContext {
    /// False once the scheduler was stopped (or restarted) after this
    /// execution began; results should then be discarded.
    pub fn is_live(&self) -> bool {
        self.inner.is_current(self.generation)
    }
}

/// Snapshot returned by [`TaskScheduler::status`]
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub probe_type: ProbeType,
    pub running: bool,
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub active_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub min_task_interval_ms: u64,
    pub executions: u64,
    pub skipped: u64,
    pub errors: u64,
    pub tasks: Vec<ScheduledTask>,
}

struct TaskEntry {
    task: ScheduledTask,
    timer: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    probe_type: ProbeType,
    min_task_interval: Duration,
    max_concurrent: AtomicUsize,
    clock: SharedClock,
    handler: Arc<dyn TaskHandler>,
    tasks: Mutex<HashMap<String, TaskEntry>>,
    active: Mutex<HashSet<String>>,
    last_fired: Mutex<Option<Instant>>,
    running: AtomicBool,
    generation: AtomicU64,
    executions: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SchedulerInner {
    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Reserve the next firing slot; returns the extra delay needed to keep
    /// `min_task_interval` between firings.
    fn reserve_slot(&self) -> Duration {
        let now = Instant::now();
        let mut last = lock(&self.last_fired);
        let extra = match *last {
            Some(prev) => (prev + self.min_task_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        };
        *last = Some(now + extra);
        extra
    }

    fn fire(self: &Arc<Self>, task_id: &str, generation: u64) {
        if !self.is_current(generation) {
            return;
        }
        let now = self.clock.now();
        let target = {
            let mut tasks = lock(&self.tasks);
            let Some(entry) = tasks.get_mut(task_id) else {
                return;
            };
            if !entry.task.enabled {
                return;
            }
            entry.task.last_execution = Some(now);
            entry.task.next_execution =
                now + chrono::Duration::seconds(entry.task.interval_secs as i64);
            entry.task.target.clone()
        };

        {
            let mut active = lock(&self.active);
            // stop() may have run since the timer woke; it clears `active` under this lock
            if !self.is_current(generation) {
                debug!("Dropping stale firing of {}", task_id);
                return;
            }
            let max = self.max_concurrent.load(Ordering::SeqCst);
            if active.len() >= max || active.contains(task_id) {
                let active_tasks = active.len();
                drop(active);
                self.skipped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Skipping {} this cycle ({} of {} executions in flight)",
                    task_id, active_tasks, max
                );
                let _ = self.event_tx.send(SchedulerEvent::Skipped {
                    task_id: task_id.to_string(),
                    target,
                    active_tasks,
                });
                return;
            }
            active.insert(task_id.to_string());
        }

        self.executions.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_tx.send(SchedulerEvent::Execute {
            task_id: task_id.to_string(),
            target: target.clone(),
        });

        let inner = self.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let _guard = ActiveGuard {
                inner: inner.clone(),
                task_id: task_id.clone(),
                generation,
            };
            let ctx = TaskContext {
                task_id: task_id.clone(),
                target: target.clone(),
                generation,
                inner: inner.clone(),
            };

            let outcome = AssertUnwindSafe(inner.handler.execute(&ctx))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(())) => {
                    debug!("Task {} completed", task_id);
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "task handler panicked".to_string(),
            };

            if !inner.is_current(generation) {
                debug!("Discarding error from stale execution of {}: {}", task_id, error);
                return;
            }

            inner.errors.fetch_add(1, Ordering::Relaxed);
            warn!("Task {} failed: {}", task_id, error);
            let _ = inner.event_tx.send(SchedulerEvent::Error {
                task_id,
                target,
                error,
            });
        });
    }

    fn spawn_timer(self: &Arc<Self>, task_id: String, interval_secs: u64, generation: u64) -> JoinHandle<()> {
        let inner = self.clone();
        let interval = Duration::from_secs(interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !inner.is_current(generation) {
                    break;
                }

                let extra = inner.reserve_slot();
                if !extra.is_zero() {
                    debug!("Delaying {} by {:?} for resource coordination", task_id, extra);
                    tokio::time::sleep(extra).await;
                    if !inner.is_current(generation) {
                        break;
                    }
                }

                inner.fire(&task_id, generation);
            }
        })
    }
}

/// Removes a task from the active set when its execution ends
struct ActiveGuard {
    inner: Arc<SchedulerInner>,
    task_id: String,
    generation: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        // stop() already cleared the set for older generations
        if self.inner.generation.load(Ordering::SeqCst) == self.generation {
            lock(&self.inner.active).remove(&self.task_id);
        }
    }
}

/// Scheduler for one probe type
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, clock: SharedClock, handler: Arc<dyn TaskHandler>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(SchedulerInner {
                probe_type: config.probe_type,
                min_task_interval: Duration::from_millis(config.min_task_interval_ms),
                max_concurrent: AtomicUsize::new(config.max_concurrent_tasks.max(1)),
                clock,
                handler,
                tasks: Mutex::new(HashMap::new()),
                active: Mutex::new(HashSet::new()),
                last_fired: Mutex::new(None),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                executions: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                event_tx,
            }),
        }
    }

    pub fn probe_type(&self) -> ProbeType {
        self.inner.probe_type
    }

    /// Subscribe to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Replace every task of this scheduler's probe type.
    ///
    /// The whole list is validated first; on error the existing tasks are
    /// left untouched.
    pub fn update_targets(&self, targets: Vec<Target>) -> Result<usize> {
        let mut seen = HashSet::new();
        for target in &targets {
            if target.probe_type() != self.inner.probe_type {
                return Err(NetpulseError::InvalidTarget(format!(
                    "{} is a {} target, scheduler handles {}",
                    target.name(),
                    target.probe_type(),
                    self.inner.probe_type
                )));
            }
            target.validate()?;
            if !seen.insert(target.name().to_string()) {
                return Err(NetpulseError::InvalidTarget(format!(
                    "duplicate {} target name: {}",
                    self.inner.probe_type,
                    target.name()
                )));
            }
        }

        let now = self.inner.clock.now();
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let running = self.is_running();

        let mut tasks = lock(&self.inner.tasks);
        for (_, entry) in tasks.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }

        for target in targets {
            let id = target.key().task_id();
            let interval_secs = target.interval_secs();
            let enabled = target.enabled();
            let timer = (running && enabled)
                .then(|| self.inner.spawn_timer(id.clone(), interval_secs, generation));

            tasks.insert(
                id.clone(),
                TaskEntry {
                    task: ScheduledTask {
                        id,
                        probe_type: self.inner.probe_type,
                        target,
                        next_execution: now + chrono::Duration::seconds(interval_secs as i64),
                        interval_secs,
                        enabled,
                        last_execution: None,
                    },
                    timer,
                },
            );
        }

        let count = tasks.len();
        info!("{} scheduler now has {} tasks", self.inner.probe_type, count);
        Ok(count)
    }

    /// Remove the task for one target
    pub fn remove_target(&self, name: &str) -> bool {
        let id = format!("{}:{}", self.inner.probe_type, name);
        let removed = lock(&self.inner.tasks).remove(&id);
        match removed {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                debug!("Removed task {}", id);
                true
            }
            None => false,
        }
    }

    /// Start timers for every enabled task
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("{} scheduler already running", self.inner.probe_type);
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.inner.clock.now();

        let mut tasks = lock(&self.inner.tasks);
        for (id, entry) in tasks.iter_mut() {
            if !entry.task.enabled {
                continue;
            }
            entry.task.next_execution =
                now + chrono::Duration::seconds(entry.task.interval_secs as i64);
            entry.timer = Some(
                self.inner
                    .spawn_timer(id.clone(), entry.task.interval_secs, generation),
            );
        }

        info!(
            "{} scheduler started ({} tasks, max {} concurrent)",
            self.inner.probe_type,
            tasks.len(),
            self.inner.max_concurrent.load(Ordering::SeqCst)
        );
    }

    /// Cancel all timers and forget in-flight executions.
    ///
    /// Handlers already running are not interrupted; their contexts report
    /// `is_live() == false`.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        for entry in lock(&self.inner.tasks).values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
        lock(&self.inner.active).clear();
        *lock(&self.inner.last_fired) = None;

        info!("{} scheduler stopped", self.inner.probe_type);
    }

    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Change the concurrency cap; returns the previous value
    pub fn set_max_concurrent_tasks(&self, max: usize) -> usize {
        let previous = self.inner.max_concurrent.swap(max.max(1), Ordering::SeqCst);
        info!(
            "{} scheduler concurrency cap {} -> {}",
            self.inner.probe_type,
            previous,
            max.max(1)
        );
        previous
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.inner.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn tasks(&self) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = lock(&self.inner.tasks)
            .values()
            .map(|e| e.task.clone())
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    pub fn task(&self, task_id: &str) -> Option<ScheduledTask> {
        lock(&self.inner.tasks).get(task_id).map(|e| e.task.clone())
    }

    pub fn active_tasks(&self) -> usize {
        lock(&self.inner.active).len()
    }

    pub fn status(&self) -> SchedulerStatus {
        let tasks = self.tasks();
        SchedulerStatus {
            probe_type: self.inner.probe_type,
            running: self.is_running(),
            total_tasks: tasks.len(),
            enabled_tasks: tasks.iter().filter(|t| t.enabled).count(),
            active_tasks: self.active_tasks(),
            max_concurrent_tasks: self.max_concurrent_tasks(),
            min_task_interval_ms: self.inner.min_task_interval.as_millis() as u64,
            executions: self.inner.executions.load(Ordering::Relaxed),
            skipped: self.inner.skipped.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            tasks,
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
