use anyhow::Context;
use clap::Parser;
use netpulse::adapters::SystemProbeExecutor;
use netpulse::cli::{self, Cli, Commands};
use netpulse::clock::SystemClock;
use netpulse::config::{AppConfig, LoggingConfig};
use netpulse::services::{AlertEvent, MonitoringEngine};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => {
            let config = load_config(&cli.config)?;
            match cli::check_config(&config) {
                Ok(summary) => println!("{}", summary),
                Err(count) => anyhow::bail!("configuration has {} problem(s)", count),
            }
        }
        Some(Commands::Classify { message }) => {
            let classification = cli::classify_message(message);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Some(Commands::Run) | None => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging);
            run(config).await?;
        }
    }

    Ok(())
}

fn load_config(dir: &str) -> anyhow::Result<AppConfig> {
    AppConfig::load_from(dir).with_context(|| format!("loading configuration from {}", dir))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!("Config: {}", problem);
        }
        anyhow::bail!("configuration has {} problem(s)", problems.len());
    }

    let executor = Arc::new(SystemProbeExecutor::new(config.probe.clone()));
    let engine = MonitoringEngine::new(&config, executor, SystemClock::shared()).await;

    let ping = engine.update_ping_targets(config.targets.ping.clone()).await?;
    let dns = engine.update_dns_targets(config.targets.dns.clone()).await?;
    info!("Monitoring {} ping and {} dns targets", ping, dns);
    if ping + dns == 0 {
        warn!("No targets configured; schedulers will idle");
    }

    let alert_log = tokio::spawn(log_alerts(engine.subscribe_alerts()));
    engine.start();

    shutdown_signal().await;
    info!("Received shutdown signal");

    engine.stop();
    alert_log.abort();

    let report = serde_json::json!({
        "health": engine.system_health().await,
        "errors": engine.error_statistics().await,
        "recovery": engine.recovery_statistics().await,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn log_alerts(mut rx: broadcast::Receiver<AlertEvent>) {
    loop {
        match rx.recv().await {
            Ok(AlertEvent::Generated(alert)) => warn!("{}", alert.format_line()),
            Ok(AlertEvent::Resolved(alert)) => info!("Resolved: {}", alert.format_line()),
            Ok(AlertEvent::Acknowledged(alert)) => info!("Acknowledged: {}", alert.id),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Alert log lagged, dropped {} events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive()));

    // File logging only when NETPULSE_LOG_DIR is set.
    // `rolling::daily` panics if it cannot create the file, so check writability first.
    let file_layer = std::env::var("NETPULSE_LOG_DIR").ok().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir, e
            );
            return None;
        }
        let test_path = std::path::Path::new(&log_dir).join(".netpulse_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(&log_dir, "netpulse.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Lives for the whole process
                Box::leak(Box::new(guard));
                eprintln!("Logging to: {}/netpulse.log", log_dir);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let json_layer = logging
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let console_layer = (!logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();
}
