//! Database module for serverwatch.
//!
//! Provides SQLite storage for targets, SNMP settings, OID definitions,
//! users and the uptime log.

mod models;
mod store;

pub use models::*;
pub use store::*;
