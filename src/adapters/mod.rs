pub mod probe_executor;

pub use probe_executor::{ProbeExecutor, SystemProbeExecutor};

#[cfg(test)]
pub use probe_executor::MockProbeExecutor;
