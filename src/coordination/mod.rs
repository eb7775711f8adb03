//! Coordination Layer for Probe Scheduling
//!
//! - Per-probe-type task schedulers with concurrency caps and firing spacing
//! - Coordinator composing the ping and DNS schedulers

pub mod coordinator;
pub mod scheduler;

pub use coordinator::{CoordinatorEvent, CoordinatorStatus, MonitorCoordinator};
pub use scheduler::{
    ScheduledTask, SchedulerConfig, SchedulerEvent, SchedulerStatus, TaskContext, TaskHandler,
    TaskScheduler,
};
