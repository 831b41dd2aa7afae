//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol used to check a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeKind {
    TcpService,
    Http,
    Icmp,
    Snmp,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::TcpService => "tcp-service",
            ProbeKind::Http => "http",
            ProbeKind::Icmp => "icmp",
            ProbeKind::Snmp => "snmp",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    /// Accepts the canonical names plus the older `service`, `website`
    /// and `ping` spellings still found in imported rows.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp-service" | "service" | "tcp" => Ok(ProbeKind::TcpService),
            "http" | "https" | "website" => Ok(ProbeKind::Http),
            "icmp" | "ping" => Ok(ProbeKind::Icmp),
            "snmp" => Ok(ProbeKind::Snmp),
            other => Err(format!("unknown probe type: {}", other)),
        }
    }
}

/// Externally reported status of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Up,
    Down,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Up => "up",
            TargetStatus::Down => "down",
        }
    }

    pub fn is_up(&self) -> bool {
        *self == TargetStatus::Up
    }
}

impl From<bool> for TargetStatus {
    fn from(up: bool) -> Self {
        if up {
            TargetStatus::Up
        } else {
            TargetStatus::Down
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "on" => Ok(TargetStatus::Up),
            "down" | "off" => Ok(TargetStatus::Down),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// A monitored endpoint together with its last persisted check state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub label: String,
    pub host: String,
    pub port: i64,
    /// Stored probe type; parsed with [`Target::kind`] at check time.
    pub probe_type: String,
    /// Case-insensitive content pattern for HTTP targets, empty when unused.
    pub pattern: String,
    /// Timeout in seconds; 0 means "use the configured default".
    pub timeout: f64,
    pub active: bool,
    pub status: TargetStatus,
    pub warning_threshold: u32,
    pub failure_counter: u32,
    pub error: String,
    /// Seconds taken by the last check.
    pub latency: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_online: Option<DateTime<Utc>>,
    /// Symbolic name or numeric OID queried for SNMP targets.
    pub snmp_oid: String,
    pub snmp_value_raw: String,
    pub snmp_value_convert: String,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            label: String::new(),
            host: String::new(),
            port: 0,
            probe_type: ProbeKind::TcpService.as_str().to_string(),
            pattern: String::new(),
            timeout: 0.0,
            active: true,
            status: TargetStatus::Up,
            warning_threshold: 1,
            failure_counter: 0,
            error: String::new(),
            latency: None,
            last_check: None,
            last_online: None,
            snmp_oid: String::new(),
            snmp_value_raw: String::new(),
            snmp_value_convert: String::new(),
        }
    }
}

impl Target {
    pub fn kind(&self) -> Result<ProbeKind, String> {
        self.probe_type.parse()
    }

    /// Warning threshold, never below 1.
    pub fn threshold(&self) -> u32 {
        self.warning_threshold.max(1)
    }
}

/// Per-target SNMP sub-record. Zero timeout/retries mean "no override".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnmpSettings {
    pub target_id: i64,
    pub community: String,
    pub version: String,
    pub timeout: u32,
    pub retries: u32,
}

/// A user-defined OID, looked up by name for SNMP targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OidDefinition {
    pub id: i64,
    pub name: String,
    pub label: String,
    /// Numeric OID, e.g. `.1.3.6.1.2.1.2.2.1.10.1`.
    pub oid: String,
    /// Conversion rule name, empty for none.
    pub conversion: String,
    pub status_up: String,
    pub status_warning: String,
    pub status_error: String,
}

/// Fields written back to a target after a check.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedUpdate {
    pub checked_at: DateTime<Utc>,
    pub error: String,
    pub latency: f64,
    pub snmp_value_raw: String,
    pub snmp_value_convert: String,
    pub status: TargetStatus,
    pub failure_counter: u32,
    /// Set only when the check succeeded.
    pub last_online: Option<DateTime<Utc>>,
}

/// One raw check outcome, recorded before hysteresis is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct UptimeEntry {
    pub target_id: i64,
    pub time: DateTime<Utc>,
    pub up: bool,
    pub latency: f64,
}

/// Access level of the administrator role; higher numbers are less privileged.
pub const USER_LEVEL_ADMIN: i64 = 10;
/// Access level of a regular user.
#[cfg(test)]
pub const USER_LEVEL_USER: i64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub level: i64,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.level <= USER_LEVEL_ADMIN
    }
}

/// Narrows the set of active targets loaded for a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TargetFilter {
    pub target_id: Option<i64>,
    pub owner_id: Option<i64>,
}
