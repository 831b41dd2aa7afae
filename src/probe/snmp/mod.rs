//! SNMP agent client.
//!
//! Validates connection parameters up front, resolves OID names, issues one
//! GET per query and turns the value into raw and converted text.

mod ber;
mod oid;
mod session;

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::{ProbeError, ProbeResult};
use crate::db::OidDefinition;
use oid::{OidTable, ValueHealth};
use session::{SnmpError, SnmpSession};

pub const DEFAULT_SNMP_PORT: u16 = 161;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    /// Version field as carried in the message header.
    pub fn wire_value(&self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }
}

impl fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpVersion::V1 => f.write_str("1"),
            SnmpVersion::V2c => f.write_str("2C"),
        }
    }
}

impl FromStr for SnmpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        match normalized.strip_prefix('V').unwrap_or(&normalized) {
            "1" => Ok(SnmpVersion::V1),
            "2C" => Ok(SnmpVersion::V2c),
            _ => Err(format!("unsupported SNMP version '{}'", s)),
        }
    }
}

/// How the fetched value is rendered into the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueRetrieval {
    /// Bare value, eligible for conversion.
    #[default]
    Plain,
    /// Value prefixed with its type, never converted.
    Library,
}

impl FromStr for ValueRetrieval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(ValueRetrieval::Plain),
            "library" => Ok(ValueRetrieval::Library),
            other => Err(format!("unknown value retrieval mode: {}", other)),
        }
    }
}

/// Connection parameters before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SnmpOptions {
    pub hostname: String,
    /// Wider than a port so out-of-range values can be reported.
    pub port: u32,
    pub community: String,
    pub version: String,
    pub timeout_secs: u32,
    pub retries: u32,
    pub value_retrieval: ValueRetrieval,
    pub auto_conversion: bool,
}

impl Default for SnmpOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: DEFAULT_SNMP_PORT as u32,
            community: "public".to_string(),
            version: "2c".to_string(),
            timeout_secs: 10,
            retries: 5,
            value_retrieval: ValueRetrieval::Plain,
            auto_conversion: true,
        }
    }
}

/// Every problem found while validating [`SnmpOptions`].
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", .0.join(", "))]
pub struct SnmpConfigError(pub Vec<String>);

#[derive(Debug, Clone)]
pub struct SnmpAgentClient {
    options: SnmpOptions,
    version: SnmpVersion,
    port: u16,
    table: OidTable,
}

impl SnmpAgentClient {
    /// Validate the options and load the OID definitions. Nothing touches the
    /// network here.
    pub fn new(
        options: SnmpOptions,
        definitions: Vec<OidDefinition>,
    ) -> Result<Self, SnmpConfigError> {
        let mut problems = Vec::new();

        if options.hostname.trim().is_empty() {
            problems.push("hostname is empty".to_string());
        }
        if options.community.is_empty() {
            problems.push("community is empty".to_string());
        }
        let port = match u16::try_from(options.port) {
            Ok(p) if p > 0 => p,
            _ => {
                problems.push(format!("port {} out of range 1-65535", options.port));
                0
            }
        };
        let version = match options.version.parse::<SnmpVersion>() {
            Ok(v) => Some(v),
            Err(e) => {
                problems.push(e);
                None
            }
        };
        if !(1..=100).contains(&options.timeout_secs) {
            problems.push(format!("timeout {} out of range 1-100", options.timeout_secs));
        }
        if !(1..=100).contains(&options.retries) {
            problems.push(format!("retries {} out of range 1-100", options.retries));
        }

        match version {
            Some(version) if problems.is_empty() => Ok(Self {
                options,
                version,
                port,
                table: OidTable::new(definitions),
            }),
            _ => Err(SnmpConfigError(problems)),
        }
    }

    /// Fetch one OID, given by name or as a literal numeric OID.
    pub async fn query(&self, oid_ref: &str) -> ProbeResult {
        let start = Instant::now();
        let resolved = self.table.resolve(oid_ref);

        let fetched = self.fetch(&resolved.numeric).await;
        let elapsed = start.elapsed();

        let value = match fetched {
            Ok(v) => v,
            Err(e) => return ProbeResult::failed(elapsed, &ProbeError::Snmp(e.to_string())),
        };

        let plain = value.plain();
        let raw = match self.options.value_retrieval {
            ValueRetrieval::Plain => plain.clone(),
            ValueRetrieval::Library => value.library(),
        };
        let converted = match (&resolved.name, self.options.value_retrieval) {
            (Some(name), ValueRetrieval::Plain) if self.options.auto_conversion => {
                self.table.convert(name, &raw)
            }
            _ => raw.clone(),
        };

        let mut result = ProbeResult::up(elapsed);
        if let Some(def) = resolved.definition {
            match oid::classify(def, &plain) {
                Some((ValueHealth::Error, range)) => {
                    let e = ProbeError::Snmp(format!("value {} within error range {}", plain, range));
                    result = ProbeResult::failed(elapsed, &e);
                }
                Some((ValueHealth::Warning, range)) => {
                    result.error = Some(format!("value {} within warning range {}", plain, range));
                }
                Some((ValueHealth::Up, _)) | None => {}
            }
        }
        result.raw_value = Some(raw);
        result.converted_value = Some(converted);
        result
    }

    async fn fetch(&self, oid: &str) -> Result<ber::SnmpValue, SnmpError> {
        let session = SnmpSession::open(
            &self.options.hostname,
            self.port,
            self.version,
            &self.options.community,
            Duration::from_secs(self.options.timeout_secs as u64),
            self.options.retries,
        )
        .await?;
        session.get(oid).await
    }
}
