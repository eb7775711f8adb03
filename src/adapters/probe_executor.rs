//! Probe execution
//!
//! [`ProbeExecutor`] is the seam between scheduling and the network. The
//! bundled [`SystemProbeExecutor`] measures reachability with timed TCP
//! connects and resolves domains through the host resolver.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::ProbeConfig;
use crate::domain::{DnsResult, DnsTarget, PingResult, PingTarget};
use crate::error::{NetpulseError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    /// Reachability probe; an unreachable host is a failed result, not an error
    async fn execute_ping(&self, target: &PingTarget) -> Result<PingResult>;

    /// One result per configured domain
    async fn execute_dns(&self, target: &DnsTarget) -> Result<Vec<DnsResult>>;

    /// Drop cached tool state; used by the network tool reset
    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}

pub struct SystemProbeExecutor {
    config: ProbeConfig,
}

impl SystemProbeExecutor {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms.max(1))
    }

    fn socket_address(&self, address: &str) -> String {
        let has_port = address.parse::<std::net::SocketAddr>().is_ok()
            || address
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.contains(':') && port.parse::<u16>().is_ok());
        if has_port {
            address.to_string()
        } else if address.contains(':') {
            // Bare IPv6
            format!("[{}]:{}", address, self.config.port)
        } else {
            format!("{}:{}", address, self.config.port)
        }
    }
}

#[async_trait]
impl ProbeExecutor for SystemProbeExecutor {
    async fn execute_ping(&self, target: &PingTarget) -> Result<PingResult> {
        let address = self.socket_address(&target.address);
        let resolved = timeout(self.probe_timeout(), lookup_host(address.as_str()))
            .await
            .map_err(|_| NetpulseError::ProbeTimeout {
                target: target.name.clone(),
                timeout_ms: self.config.timeout_ms,
            })?
            .map_err(|e| {
                NetpulseError::ProbeTool(format!("cannot resolve {}: {}", target.address, e))
            })?
            .next()
            .ok_or_else(|| {
                NetpulseError::InvalidTarget(format!("{} resolved to no address", target.address))
            })?;

        let attempts = self.config.attempts.max(1);
        let mut samples = Vec::with_capacity(attempts as usize);
        let mut last_error = None;

        for _ in 0..attempts {
            let started = Instant::now();
            match timeout(self.probe_timeout(), TcpStream::connect(resolved)).await {
                Ok(Ok(_)) => samples.push(started.elapsed().as_secs_f64() * 1000.0),
                // A reset still proves the host answered
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    samples.push(started.elapsed().as_secs_f64() * 1000.0)
                }
                Ok(Err(e)) => last_error = Some(e.to_string()),
                Err(_) => last_error = Some(format!("timed out after {}ms", self.config.timeout_ms)),
            }
        }

        let loss = (attempts as usize - samples.len()) as f64 * 100.0 / attempts as f64;
        debug!("{} ({}) {}/{} replies", target.name, resolved, samples.len(), attempts);

        let mut result = if samples.is_empty() {
            PingResult::failure(
                &target.name,
                last_error.as_deref().unwrap_or("100% packet loss"),
            )
        } else {
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            PingResult::success(&target.name, mean, loss)
        };
        result.address = target.address.clone();
        Ok(result)
    }

    async fn execute_dns(&self, target: &DnsTarget) -> Result<Vec<DnsResult>> {
        if target.domains.is_empty() {
            return Err(NetpulseError::InvalidTarget(format!(
                "dns target {} has no domains",
                target.name
            )));
        }

        let mut results = Vec::with_capacity(target.domains.len());
        for domain in &target.domains {
            let started = Instant::now();
            let lookup = timeout(self.probe_timeout(), lookup_host((domain.as_str(), 0))).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            let mut result = match lookup {
                Ok(Ok(addrs)) => {
                    let mut result = DnsResult::success(&target.name, domain, elapsed_ms);
                    result.resolved_addresses = addrs.map(|a| a.ip().to_string()).collect();
                    result
                }
                Ok(Err(e)) => DnsResult::failure(&target.name, domain, &e.to_string()),
                Err(_) => DnsResult::failure(
                    &target.name,
                    domain,
                    &format!("timed out after {}ms", self.config.timeout_ms),
                ),
            };
            result.server_ip = target.server_ip.clone();
            results.push(result);
        }

        // Nothing resolved at all: report the server, not the domains
        if results.iter().all(|r| !r.success) {
            let reason = results
                .last()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "no answer".to_string());
            return Err(NetpulseError::DnsResolution {
                server: target.server_ip.clone(),
                domain: target.domains.join(","),
                reason,
            });
        }

        Ok(results)
    }

    async fn reset(&self) -> Result<()> {
        info!("Network tool reset requested; system executor keeps no state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> SystemProbeExecutor {
        SystemProbeExecutor::new(ProbeConfig::default())
    }

    #[test]
    fn test_socket_address_defaults_port() {
        let executor = executor();
        assert_eq!(executor.socket_address("10.0.0.1"), "10.0.0.1:80");
        assert_eq!(executor.socket_address("10.0.0.1:53"), "10.0.0.1:53");
        assert_eq!(executor.socket_address("example.com"), "example.com:80");
        assert_eq!(executor.socket_address("::1"), "[::1]:80");
        assert_eq!(executor.socket_address("[::1]:8080"), "[::1]:8080");
    }

    #[tokio::test]
    async fn test_local_listener_is_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {}
        });

        let target = PingTarget::new("local", &addr.to_string(), 5);
        let result = executor().execute_ping(&target).await.unwrap();
        assert!(result.success);
        assert_eq!(result.packet_loss_percent, 0.0);
        assert_eq!(result.address, addr.to_string());
    }

    #[tokio::test]
    async fn test_dns_target_without_domains_is_invalid() {
        let target = DnsTarget::new("empty", "1.1.1.1", &[], 60);
        assert!(matches!(
            executor().execute_dns(&target).await,
            Err(NetpulseError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_executor_contract() {
        let mut mock = MockProbeExecutor::new();
        mock.expect_execute_ping()
            .returning(|t| Ok(PingResult::success(&t.name, 4.0, 0.0)));
        mock.expect_reset().times(1).returning(|| Ok(()));

        let result = mock
            .execute_ping(&PingTarget::new("gw", "10.0.0.1", 5))
            .await
            .unwrap();
        assert_eq!(result.target_name, "gw");
        tokio_test::assert_ok!(mock.reset().await);
    }
}
