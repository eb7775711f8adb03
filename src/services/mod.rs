pub mod alert_engine;
pub mod engine;
pub mod state_tracker;

pub use alert_engine::{AlertEngine, AlertEngineConfig, AlertEvent};
pub use engine::MonitoringEngine;
pub use state_tracker::{StateTracker, StateTrackerConfig, StatusEvent};
