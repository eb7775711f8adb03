use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::config::AppConfig;
use crate::domain::{ErrorCategory, ErrorSeverity};
use crate::supervisor::{classify_category, classify_severity};

#[derive(Parser)]
#[command(name = "netpulse")]
#[command(author = "netpulse developers")]
#[command(version)]
#[command(about = "Network reachability monitor with alerting and automatic recovery", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml plus NETPULSE_ENV overlay)
    #[arg(short, long, default_value = "config", env = "NETPULSE_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start monitoring until Ctrl-C or SIGTERM
    Run,
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Show how a failure message would be classified
    Classify {
        /// Free-form error message
        message: String,
    },
}

/// Output of `netpulse classify`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
}

pub fn classify_message(message: &str) -> Classification {
    Classification {
        category: classify_category(message),
        severity: classify_severity(message),
    }
}

/// Human readable validation report; `Err` carries the number of problems
pub fn check_config(config: &AppConfig) -> Result<String, usize> {
    match config.validate() {
        Ok(()) => Ok(format!(
            "configuration ok: {} ping targets, {} dns targets",
            config.targets.ping.len(),
            config.targets.dns.len()
        )),
        Err(problems) => {
            for problem in &problems {
                eprintln!("  - {}", problem);
            }
            Err(problems.len())
        }
    }
}
