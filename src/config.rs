//! Configuration module for serverwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::probe::ValueRetrieval;

const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
/// Upper bound applied to any target or default timeout.
const MAX_TIMEOUT_SECS: f64 = 3600.0;

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Path to the SQLite database file (default: "serverwatch.db")
    pub db_path: String,
    /// Seconds between passes; 0 runs a single pass and exits (default: 0)
    pub interval_secs: u64,
    /// Total probe attempts per target per pass (default: 2)
    pub max_attempts: u32,
    /// Targets checked in parallel within one pass (default: 1)
    pub concurrency: usize,
    /// Timeout in seconds for targets without one (default: 10)
    pub default_timeout_secs: f64,
    /// Community used when a target's SNMP record has none (default: "public")
    pub snmp_community: String,
    /// SNMP version used when a target's SNMP record has none (default: "2c")
    pub snmp_version: String,
    /// OID queried when a target names none (default: "sysDescr")
    pub snmp_oid: String,
    /// SNMP-level retries when a target has no override (default: 5)
    pub snmp_retries: u32,
    /// Rendering of fetched SNMP values, `plain` or `library` (default: plain)
    pub snmp_value_retrieval: ValueRetrieval,
    /// Convert plain values of named OIDs (default: true)
    pub snmp_auto_conversion: bool,
    /// Days of uptime log kept by the archive step (default: 365)
    pub log_retention_days: i64,
    /// Restrict passes to a single target
    pub target_id: Option<i64>,
    /// Run passes on behalf of this user
    pub user_id: Option<i64>,
    /// Append status-change events as JSON lines to this file
    pub events_path: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            db_path: "serverwatch.db".to_string(),
            interval_secs: 0,
            max_attempts: 2,
            concurrency: 1,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            snmp_community: "public".to_string(),
            snmp_version: "2c".to_string(),
            snmp_oid: "sysDescr".to_string(),
            snmp_retries: 5,
            snmp_value_retrieval: ValueRetrieval::Plain,
            snmp_auto_conversion: true,
            log_retention_days: 365,
            target_id: None,
            user_id: None,
            events_path: None,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Every field can be overridden with a `SERVERWATCH_*` variable, e.g.
    /// `SERVERWATCH_DB_PATH`, `SERVERWATCH_INTERVAL`, `SERVERWATCH_MAX_ATTEMPTS`,
    /// `SERVERWATCH_CONCURRENCY`, `SERVERWATCH_TARGET_ID`. Values that fail to
    /// parse are ignored and the default is kept.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(db_path) = env::var("SERVERWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Some(v) = parse_var("SERVERWATCH_INTERVAL") {
            cfg.interval_secs = v;
        }
        if let Some(v) = parse_var::<u32>("SERVERWATCH_MAX_ATTEMPTS") {
            cfg.max_attempts = v.max(1);
        }
        if let Some(v) = parse_var::<usize>("SERVERWATCH_CONCURRENCY") {
            cfg.concurrency = v.max(1);
        }
        if let Some(v) = parse_var::<f64>("SERVERWATCH_DEFAULT_TIMEOUT") {
            if v.is_finite() && v > 0.0 {
                cfg.default_timeout_secs = v.min(MAX_TIMEOUT_SECS);
            } else {
                tracing::warn!("Ignoring SERVERWATCH_DEFAULT_TIMEOUT={}: must be a positive number", v);
            }
        }
        if let Ok(community) = env::var("SERVERWATCH_SNMP_COMMUNITY") {
            cfg.snmp_community = community;
        }
        if let Ok(version) = env::var("SERVERWATCH_SNMP_VERSION") {
            cfg.snmp_version = version;
        }
        if let Ok(oid) = env::var("SERVERWATCH_SNMP_OID") {
            cfg.snmp_oid = oid;
        }
        if let Some(v) = parse_var("SERVERWATCH_SNMP_RETRIES") {
            cfg.snmp_retries = v;
        }
        if let Some(v) = parse_var("SERVERWATCH_SNMP_VALUE_RETRIEVAL") {
            cfg.snmp_value_retrieval = v;
        }
        if let Some(v) = parse_var("SERVERWATCH_SNMP_AUTO_CONVERSION") {
            cfg.snmp_auto_conversion = v;
        }
        if let Some(v) = parse_var("SERVERWATCH_LOG_RETENTION_DAYS") {
            cfg.log_retention_days = v;
        }
        cfg.target_id = parse_var("SERVERWATCH_TARGET_ID");
        cfg.user_id = parse_var("SERVERWATCH_USER_ID");
        cfg.events_path = env::var("SERVERWATCH_EVENTS_PATH").ok();

        cfg
    }

    /// Timeout applied to a target, falling back to the configured default.
    /// Values that are not positive and finite fall through to the next
    /// source; the result is capped at one hour.
    pub fn timeout_for(&self, configured_secs: f64) -> Duration {
        let usable = |secs: f64| secs.is_finite() && secs > 0.0;
        let secs = if usable(configured_secs) {
            configured_secs
        } else if usable(self.default_timeout_secs) {
            self.default_timeout_secs
        } else {
            DEFAULT_TIMEOUT_SECS
        };
        Duration::try_from_secs_f64(secs.min(MAX_TIMEOUT_SECS))
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.db_path, "serverwatch.db");
        assert_eq!(cfg.max_attempts, 2);
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.snmp_community, "public");
        assert_eq!(cfg.snmp_version, "2c");
        assert_eq!(cfg.snmp_oid, "sysDescr");
        assert_eq!(cfg.snmp_value_retrieval, ValueRetrieval::Plain);
        assert!(cfg.snmp_auto_conversion);
        assert!(cfg.target_id.is_none());
    }

    #[test]
    fn test_timeout_falls_back_to_default() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.timeout_for(0.0), Duration::from_secs(10));
        assert_eq!(cfg.timeout_for(-3.0), Duration::from_secs(10));
        assert_eq!(cfg.timeout_for(2.5), Duration::from_millis(2500));
    }

    #[test]
    fn test_timeout_never_panics_on_extreme_values() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.timeout_for(1e300), Duration::from_secs(3600));
        assert_eq!(cfg.timeout_for(f64::INFINITY), Duration::from_secs(10));
        assert_eq!(cfg.timeout_for(f64::NAN), Duration::from_secs(10));

        for bad_default in [-5.0, f64::INFINITY, f64::NAN] {
            let cfg = MonitorConfig {
                default_timeout_secs: bad_default,
                ..MonitorConfig::default()
            };
            assert_eq!(cfg.timeout_for(0.0), Duration::from_secs(10));
        }
    }
}
