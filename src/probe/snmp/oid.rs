//! OID name resolution, value conversion and threshold classification.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::db::OidDefinition;

/// Built-in system group, consulted before user-defined names.
pub const SYSTEM_OIDS: [(&str, &str); 7] = [
    ("sysDescr", ".1.3.6.1.2.1.1.1.0"),
    ("sysObjectID", ".1.3.6.1.2.1.1.2.0"),
    ("sysUpTime", ".1.3.6.1.2.1.1.3.0"),
    ("sysContact", ".1.3.6.1.2.1.1.4.0"),
    ("sysName", ".1.3.6.1.2.1.1.5.0"),
    ("sysLocation", ".1.3.6.1.2.1.1.6.0"),
    ("sysServices", ".1.3.6.1.2.1.1.7.0"),
];

/// How a plain value is turned into its display form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Hundredths of a second rendered as days, hours, minutes, seconds.
    Uptime,
    PassThrough,
}

impl Conversion {
    pub fn apply(&self, raw: &str) -> String {
        match self {
            Conversion::Uptime => match raw.trim().parse::<u64>() {
                Ok(ticks) => format_uptime(ticks),
                Err(_) => raw.to_string(),
            },
            Conversion::PassThrough => raw.to_string(),
        }
    }
}

impl FromStr for Conversion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uptime" | "timeticks" | "sysuptime" => Ok(Conversion::Uptime),
            "" | "none" | "raw" => Ok(Conversion::PassThrough),
            other => Err(format!("unknown conversion: {}", other)),
        }
    }
}

/// Render hundredths of a second as `D days H hours M minutes S seconds`,
/// singular for a count of exactly one.
pub fn format_uptime(ticks: u64) -> String {
    let mut x = ticks / 100;
    let seconds = x % 60;
    x /= 60;
    let minutes = x % 60;
    x /= 60;
    let hours = x % 24;
    let days = x / 24;

    [
        unit(days, "day"),
        unit(hours, "hour"),
        unit(minutes, "minute"),
        unit(seconds, "second"),
    ]
    .join(" ")
}

fn unit(count: u64, name: &str) -> String {
    if count == 1 {
        format!("{} {}", count, name)
    } else {
        format!("{} {}s", count, name)
    }
}

/// An OID reference after lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOid<'a> {
    pub numeric: String,
    /// Set when the reference was a known name rather than a literal.
    pub name: Option<String>,
    pub definition: Option<&'a OidDefinition>,
}

/// Name lookup over the system group and the user-defined definitions.
#[derive(Debug, Clone)]
pub struct OidTable {
    custom: HashMap<String, OidDefinition>,
    conversions: HashMap<String, Conversion>,
}

impl OidTable {
    pub fn new(definitions: Vec<OidDefinition>) -> Self {
        let mut conversions = HashMap::from([
            ("sysUpTime".to_string(), Conversion::Uptime),
            ("sysServices".to_string(), Conversion::PassThrough),
        ]);

        let mut custom = HashMap::new();
        for def in definitions {
            match def.conversion.parse::<Conversion>() {
                Ok(Conversion::PassThrough) => {}
                Ok(rule) => {
                    conversions.insert(def.name.clone(), rule);
                }
                Err(e) => tracing::warn!("OID {}: {}, value left unconverted", def.name, e),
            }
            custom.insert(def.name.clone(), def);
        }

        Self { custom, conversions }
    }

    /// System names first, then user-defined names, else a literal OID.
    pub fn resolve(&self, reference: &str) -> ResolvedOid<'_> {
        let reference = reference.trim();
        if let Some((name, oid)) = SYSTEM_OIDS.iter().find(|(name, _)| *name == reference) {
            return ResolvedOid {
                numeric: oid.to_string(),
                name: Some(name.to_string()),
                definition: None,
            };
        }
        if let Some(def) = self.custom.get(reference) {
            return ResolvedOid {
                numeric: def.oid.clone(),
                name: Some(def.name.clone()),
                definition: Some(def),
            };
        }
        ResolvedOid {
            numeric: reference.to_string(),
            name: None,
            definition: None,
        }
    }

    pub fn convert(&self, name: &str, raw: &str) -> String {
        self.conversions
            .get(name)
            .copied()
            .unwrap_or(Conversion::PassThrough)
            .apply(raw)
    }
}

/// Health bucket of a numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueHealth {
    Up,
    Warning,
    Error,
}

/// Inclusive numeric range written `min:max`, `min:`, `:max` or `n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

impl FromStr for ValueRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bound = |part: &str| -> Result<Option<f64>, String> {
            let part = part.trim();
            if part.is_empty() {
                Ok(None)
            } else {
                part.parse::<f64>()
                    .map(Some)
                    .map_err(|_| format!("invalid range bound '{}'", part))
            }
        };

        let s = s.trim();
        let range = match s.split_once(':') {
            Some((lo, hi)) => ValueRange {
                min: bound(lo)?,
                max: bound(hi)?,
            },
            None => {
                let exact = bound(s)?;
                ValueRange { min: exact, max: exact }
            }
        };
        if range.min.is_none() && range.max.is_none() {
            return Err(format!("empty range '{}'", s));
        }
        Ok(range)
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) if lo == hi => write!(f, "{}", lo),
            (lo, hi) => write!(
                f,
                "{}:{}",
                lo.map(|v| v.to_string()).unwrap_or_default(),
                hi.map(|v| v.to_string()).unwrap_or_default()
            ),
        }
    }
}

/// Classify a value against a definition's ranges, error range first.
///
/// Returns `None` for non-numeric values, when no range matches, or when the
/// definition carries no usable ranges.
pub fn classify(def: &OidDefinition, raw: &str) -> Option<(ValueHealth, ValueRange)> {
    let value = raw.trim().parse::<f64>().ok()?;
    let buckets = [
        (ValueHealth::Error, &def.status_error),
        (ValueHealth::Warning, &def.status_warning),
        (ValueHealth::Up, &def.status_up),
    ];

    for (health, range_text) in buckets {
        if range_text.trim().is_empty() {
            continue;
        }
        match range_text.parse::<ValueRange>() {
            Ok(range) if range.contains(value) => return Some((health, range)),
            Ok(_) => {}
            Err(e) => tracing::warn!("OID {}: {}", def.name, e),
        }
    }
    None
}
