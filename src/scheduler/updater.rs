//! Probe, evaluate and persist one target.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::evaluator::{evaluate, CheckState};
use super::retry::RetryingProbe;
use super::SchedulerError;
use crate::config::MonitorConfig;
use crate::db::{PersistedUpdate, ProbeKind, SnmpSettings, Store, Target, TargetStatus, UptimeEntry};
use crate::probe::{ProbeError, ProbeResult, ProbeTarget, SnmpOptions, DEFAULT_SNMP_PORT};

/// What one update did to a target.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub target_id: i64,
    pub label: String,
    pub previous: TargetStatus,
    pub current: TargetStatus,
    pub failure_counter: u32,
    pub error: String,
    pub checked_at: DateTime<Utc>,
}

pub struct TargetUpdater {
    store: Arc<Store>,
    retry: RetryingProbe,
    config: Arc<MonitorConfig>,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl TargetUpdater {
    pub fn new(store: Arc<Store>, retry: RetryingProbe, config: Arc<MonitorConfig>) -> Self {
        Self {
            store,
            retry,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Check a target and write back its new state.
    ///
    /// Updates of the same target are serialized; the target row is read
    /// under that lock so counters are never lost.
    pub async fn update(&self, target_id: i64) -> Result<UpdateOutcome, SchedulerError> {
        let lock = self.lock_for(target_id).await;
        let _guard = lock.lock().await;

        let target = self.store.get_target(target_id)?;
        let kind = target.kind();

        let result = match self.probe_target(&target, kind.clone())? {
            Ok(probe_target) => self.retry.probe_with_retry(&probe_target).await,
            Err(e) => ProbeResult::failed(Duration::ZERO, &e),
        };

        let now = Utc::now();
        let latency = result.elapsed.as_secs_f64();
        let eval = evaluate(
            CheckState {
                status: target.status,
                failure_counter: target.failure_counter,
                threshold: target.threshold(),
            },
            result.success,
        );

        let is_snmp = kind == Ok(ProbeKind::Snmp);
        let snmp_text = |value: &Option<String>| {
            if is_snmp {
                value.clone().unwrap_or_default()
            } else {
                String::new()
            }
        };
        let error = result.error.clone().unwrap_or_default();
        let update = PersistedUpdate {
            checked_at: now,
            error: error.clone(),
            latency,
            snmp_value_raw: snmp_text(&result.raw_value),
            snmp_value_convert: snmp_text(&result.converted_value),
            status: eval.status,
            failure_counter: eval.failure_counter,
            last_online: eval.seen_up.then_some(now),
        };
        // the uptime log keeps the raw outcome, before hysteresis
        let entry = UptimeEntry {
            target_id,
            time: now,
            up: result.success,
            latency,
        };
        self.store.record_check(&entry, &update)?;

        if !result.success {
            tracing::warn!(
                "{} check failed ({}/{}, {}): {}",
                target.label,
                eval.failure_counter,
                target.threshold(),
                if eval.is_warning() { "warning" } else { "down" },
                error
            );
        }

        Ok(UpdateOutcome {
            target_id,
            label: target.label,
            previous: target.status,
            current: eval.status,
            failure_counter: eval.failure_counter,
            error,
            checked_at: now,
        })
    }

    async fn lock_for(&self, target_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(target_id).or_default().clone()
    }

    /// Resolve the check to run. The inner error is a configuration problem
    /// that fails the check without probing.
    fn probe_target(
        &self,
        target: &Target,
        kind: Result<ProbeKind, String>,
    ) -> Result<Result<ProbeTarget, ProbeError>, SchedulerError> {
        let kind = match kind {
            Ok(kind) => kind,
            Err(e) => return Ok(Err(ProbeError::Config(e))),
        };
        let timeout = self.config.timeout_for(target.timeout);
        let host = target.host.clone();
        let port = || {
            u16::try_from(target.port)
                .map_err(|_| ProbeError::Config(format!("port {} out of range 0-65535", target.port)))
        };

        Ok(match kind {
            ProbeKind::TcpService => port().map(|port| ProbeTarget::Tcp { host, port, timeout }),
            ProbeKind::Http => port().map(|port| ProbeTarget::Http {
                address: host,
                port,
                pattern: non_empty(&target.pattern).map(str::to_string),
                timeout,
            }),
            ProbeKind::Icmp => Ok(ProbeTarget::Icmp { host, timeout }),
            ProbeKind::Snmp => {
                let settings = self.store.get_snmp_settings(target.id)?.unwrap_or_default();
                let definitions = self.store.list_oid_definitions()?;
                Ok(ProbeTarget::Snmp {
                    options: self.snmp_options(target, &settings, timeout),
                    oid: non_empty(&target.snmp_oid)
                        .unwrap_or(self.config.snmp_oid.as_str())
                        .to_string(),
                    definitions: Arc::new(definitions),
                })
            }
        })
    }

    /// Merge the per-target SNMP record with the configured defaults.
    fn snmp_options(&self, target: &Target, settings: &SnmpSettings, timeout: Duration) -> SnmpOptions {
        let port = if target.port <= 0 {
            DEFAULT_SNMP_PORT as u32
        } else {
            u32::try_from(target.port).unwrap_or(u32::MAX)
        };
        let timeout_secs = if settings.timeout > 0 {
            settings.timeout
        } else {
            timeout.as_secs_f64().ceil() as u32
        };
        let retries = if settings.retries > 0 {
            settings.retries
        } else {
            self.config.snmp_retries
        };

        SnmpOptions {
            hostname: target.host.clone(),
            port,
            community: non_empty(&settings.community)
                .unwrap_or(self.config.snmp_community.as_str())
                .to_string(),
            version: non_empty(&settings.version)
                .unwrap_or(self.config.snmp_version.as_str())
                .to_string(),
            timeout_secs,
            retries,
            value_retrieval: self.config.snmp_value_retrieval,
            auto_conversion: self.config.snmp_auto_conversion,
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}
