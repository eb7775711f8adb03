pub mod alert;
pub mod failure;
pub mod probe;
pub mod status;
pub mod target;

pub use alert::*;
pub use failure::*;
pub use probe::*;
pub use status::*;
pub use target::*;

/// Component names used for error tracking and recovery action keys
pub mod components {
    pub const PING_MONITOR: &str = "PingMonitor";
    pub const DNS_MONITOR: &str = "DNSMonitor";
    pub const NETWORK_TOOL: &str = "NetworkTool";
    pub const SYSTEM: &str = "System";
}
