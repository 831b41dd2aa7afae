//! Probe module for server health checks.
//!
//! Supports TCP service, HTTP(S), ICMP ping and SNMP probes. Every probe
//! reports through [`ProbeResult`]; network failures never surface as errors
//! to the caller.

mod http;
mod ping;
mod snmp;
mod tcp;

pub use http::*;
pub use ping::*;
pub use snmp::*;
pub use tcp::*;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::db::OidDefinition;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no response from server ({0})")]
    NoResponse(String),
    #[error("{0}")]
    HttpStatus(String),
    #[error("pattern not found in response")]
    PatternNotFound,
    #[error("{0}")]
    Snmp(String),
}

impl ProbeError {
    /// Configuration errors fail the check without another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProbeError::Config(_))
    }
}

/// Outcome of a single protocol check.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub success: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
    /// False when repeating the check cannot change the outcome.
    pub retryable: bool,
    /// SNMP only.
    pub raw_value: Option<String>,
    /// SNMP only.
    pub converted_value: Option<String>,
}

impl ProbeResult {
    pub fn up(elapsed: Duration) -> Self {
        Self {
            success: true,
            elapsed,
            error: None,
            retryable: true,
            raw_value: None,
            converted_value: None,
        }
    }

    pub fn failed(elapsed: Duration, error: &ProbeError) -> Self {
        Self {
            success: false,
            elapsed,
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
            raw_value: None,
            converted_value: None,
        }
    }

    fn from_outcome(outcome: Result<(), ProbeError>, elapsed: Duration) -> Self {
        match outcome {
            Ok(()) => Self::up(elapsed),
            Err(e) => Self::failed(elapsed, &e),
        }
    }
}

/// A fully resolved check, one variant per protocol.
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    Tcp {
        host: String,
        port: u16,
        timeout: Duration,
    },
    Icmp {
        host: String,
        timeout: Duration,
    },
    Http {
        address: String,
        /// Replaces the URL's port when non-zero.
        port: u16,
        pattern: Option<String>,
        timeout: Duration,
    },
    Snmp {
        options: SnmpOptions,
        oid: String,
        definitions: Arc<Vec<OidDefinition>>,
    },
}

/// Capability interface for running one check.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult;
}

/// Prober that talks to the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkProber;

#[async_trait]
impl Prober for NetworkProber {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let start = Instant::now();
        match target {
            ProbeTarget::Tcp { host, port, timeout } => {
                let outcome = run_tcp_probe(host, *port, *timeout).await;
                ProbeResult::from_outcome(outcome, start.elapsed())
            }
            ProbeTarget::Icmp { host, timeout } => {
                let outcome = run_ping_probe(host, *timeout).await;
                ProbeResult::from_outcome(outcome, start.elapsed())
            }
            ProbeTarget::Http {
                address,
                port,
                pattern,
                timeout,
            } => {
                let outcome = run_http_probe(address, *port, pattern.as_deref(), *timeout).await;
                ProbeResult::from_outcome(outcome, start.elapsed())
            }
            ProbeTarget::Snmp {
                options,
                oid,
                definitions,
            } => match SnmpAgentClient::new(options.clone(), definitions.as_ref().clone()) {
                Ok(client) => client.query(oid).await,
                Err(e) => {
                    ProbeResult::failed(start.elapsed(), &ProbeError::Config(e.to_string()))
                }
            },
        }
    }
}

/// Render an I/O error as "code: description", the way the OS reports it.
pub(crate) fn os_error_text(e: &io::Error) -> String {
    match e.raw_os_error() {
        Some(code) => {
            let text = e.to_string();
            let description = text
                .strip_suffix(&format!(" (os error {})", code))
                .unwrap_or(&text);
            format!("{}: {}", code, description)
        }
        None => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_error_text() {
        let e = io::Error::from_raw_os_error(111);
        let text = os_error_text(&e);
        assert!(text.starts_with("111: "), "{}", text);
        assert!(!text.contains("os error"));

        let custom = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(os_error_text(&custom), "boom");
    }

    #[test]
    fn test_config_errors_are_final() {
        let result = ProbeResult::failed(Duration::ZERO, &ProbeError::Config("bad port".into()));
        assert!(!result.success);
        assert!(!result.retryable);
        assert_eq!(result.error.as_deref(), Some("invalid configuration: bad port"));

        let result = ProbeResult::failed(Duration::ZERO, &ProbeError::PatternNotFound);
        assert!(result.retryable);
    }

    #[tokio::test]
    async fn test_snmp_validation_failure_skips_network() {
        let target = ProbeTarget::Snmp {
            options: SnmpOptions {
                hostname: "192.0.2.1".to_string(),
                port: 70000,
                ..Default::default()
            },
            oid: "sysDescr".to_string(),
            definitions: Arc::new(Vec::new()),
        };
        let result = NetworkProber.probe(&target).await;
        assert!(!result.success);
        assert!(!result.retryable);
        assert!(result.error.unwrap().contains("70000"));
    }
}
