//! Concurrency cap behavior of the task scheduler under paused time.

use async_trait::async_trait;
use netpulse::clock::{Clock, ManualClock};
use netpulse::coordination::{
    SchedulerConfig, SchedulerEvent, TaskContext, TaskHandler, TaskScheduler,
};
use netpulse::domain::{PingTarget, ProbeType, Target};
use netpulse::error::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct SlowHandler {
    calls: AtomicUsize,
    busy_for: Duration,
}

#[async_trait]
impl TaskHandler for SlowHandler {
    async fn execute(&self, _ctx: &TaskContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.busy_for).await;
        Ok(())
    }
}

fn ping(name: &str, interval: u64) -> Target {
    Target::Ping(PingTarget::new(name, "10.0.0.1", interval))
}

#[tokio::test(start_paused = true)]
async fn second_due_task_is_skipped_not_queued() {
    let clock = ManualClock::starting_now();
    let handler = Arc::new(SlowHandler {
        calls: AtomicUsize::new(0),
        busy_for: Duration::from_secs(5),
    });
    let scheduler = TaskScheduler::new(
        SchedulerConfig {
            probe_type: ProbeType::Ping,
            max_concurrent_tasks: 1,
            min_task_interval_ms: 0,
        },
        clock.clone(),
        handler.clone(),
    );
    let mut events = scheduler.subscribe();

    scheduler
        .update_targets(vec![ping("a", 60), ping("b", 60)])
        .unwrap();
    scheduler.start();

    // Both timers come due together at t=60s
    clock.advance(chrono::Duration::seconds(60));
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    let mut executed = Vec::new();
    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SchedulerEvent::Execute { task_id, .. } => executed.push(task_id),
            SchedulerEvent::Skipped { task_id, active_tasks, .. } => {
                assert_eq!(active_tasks, 1);
                skipped.push(task_id)
            }
            SchedulerEvent::Error { error, .. } => panic!("unexpected error: {}", error),
        }
    }
    assert_eq!(executed.len(), 1);
    assert_eq!(skipped.len(), 1);
    assert_ne!(executed[0], skipped[0]);

    // The skipped task waits a full interval instead of retrying right away
    let skipped_task = scheduler.task(&skipped[0]).unwrap();
    let now = clock.now();
    assert_eq!(skipped_task.next_execution, now + chrono::Duration::seconds(60));
    assert_eq!(skipped_task.last_execution, Some(now));

    // Well before the next cycle nothing else has run
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

    let status = scheduler.status();
    assert_eq!(status.executions, 1);
    assert_eq!(status.skipped, 1);
    assert_eq!(status.active_tasks, 0);
}

#[tokio::test(start_paused = true)]
async fn raised_cap_lets_both_tasks_run() {
    let handler = Arc::new(SlowHandler {
        calls: AtomicUsize::new(0),
        busy_for: Duration::from_secs(5),
    });
    let scheduler = TaskScheduler::new(
        SchedulerConfig {
            probe_type: ProbeType::Ping,
            max_concurrent_tasks: 1,
            min_task_interval_ms: 0,
        },
        ManualClock::starting_now(),
        handler.clone(),
    );
    scheduler
        .update_targets(vec![ping("a", 60), ping("b", 60)])
        .unwrap();
    assert_eq!(scheduler.set_max_concurrent_tasks(2), 1);
    scheduler.start();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.status().skipped, 0);
}
