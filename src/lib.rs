pub mod adapters;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod services;
pub mod supervisor;

pub use adapters::{ProbeExecutor, SystemProbeExecutor};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::AppConfig;
pub use coordination::{MonitorCoordinator, TaskScheduler};
pub use error::{NetpulseError, Result};
pub use services::{AlertEngine, MonitoringEngine, StateTracker};
pub use supervisor::{ErrorHandler, RecoveryManager};
