//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database lock poisoned")]
    LockPoisoned,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const TARGET_COLUMNS: &str = "t.id, t.label, t.host, t.port, t.probe_type, t.pattern, t.timeout, \
     t.active, t.status, t.warning_threshold, t.warning_threshold_counter, t.error, t.latency, \
     t.last_check, t.last_online, t.snmp_oid, t.snmp_value_raw, t.snmp_value_convert";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Targets ---

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM targets t WHERE t.id = ?1", TARGET_COLUMNS),
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Get active targets ordered by label, narrowed by the filter.
    pub fn get_active_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>, DbError> {
        let mut sql = format!("SELECT {} FROM targets t", TARGET_COLUMNS);
        let mut args: Vec<i64> = Vec::new();

        if let Some(owner) = filter.owner_id {
            sql.push_str(" JOIN users_targets ut ON ut.target_id = t.id AND ut.user_id = ?");
            args.push(owner);
        }
        sql.push_str(" WHERE t.active = 'yes'");
        if let Some(id) = filter.target_id {
            sql.push_str(" AND t.id = ?");
            args.push(id);
        }
        sql.push_str(" ORDER BY t.label");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args))?;
        let mut targets = Vec::new();
        // a row that cannot be decoded is skipped, not fatal to the pass
        while let Some(row) = rows.next()? {
            match target_from_row(row) {
                Ok(target) => targets.push(target),
                Err(e) => {
                    let id: Option<i64> = row.get(0).ok();
                    tracing::warn!("Skipping target {:?}: unreadable row: {}", id, e);
                }
            }
        }
        Ok(targets)
    }

    /// Append the raw outcome to the uptime log and write back the evaluated
    /// state in one transaction.
    pub fn record_check(&self, entry: &UptimeEntry, update: &PersistedUpdate) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        write_uptime(&tx, entry)?;
        write_update(&tx, entry.target_id, update)?;
        tx.commit()?;
        Ok(())
    }

    // --- SNMP ---

    /// Get the SNMP sub-record of a target, if one exists.
    pub fn get_snmp_settings(&self, target_id: i64) -> Result<Option<SnmpSettings>, DbError> {
        let conn = self.conn()?;
        let settings = conn
            .query_row(
                "SELECT target_id, community, version, timeout, retries FROM snmp_settings WHERE target_id = ?1",
                params![target_id],
                |row| {
                    Ok(SnmpSettings {
                        target_id: row.get(0)?,
                        community: row.get(1)?,
                        version: row.get(2)?,
                        timeout: row.get(3)?,
                        retries: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(settings)
    }

    /// List user-defined OIDs ordered by name.
    pub fn list_oid_definitions(&self) -> Result<Vec<OidDefinition>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, label, oid, conversion, status_up, status_warning, status_error \
             FROM snmp_oids ORDER BY name",
        )?;
        let oids = stmt
            .query_map([], |row| {
                Ok(OidDefinition {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    label: row.get(2)?,
                    oid: row.get(3)?,
                    conversion: row.get(4)?,
                    status_up: row.get(5)?,
                    status_warning: row.get(6)?,
                    status_error: row.get(7)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(oids)
    }

    // --- Uptime log ---

    /// Delete uptime entries older than the cutoff; returns the number removed.
    pub fn delete_uptime_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM uptime WHERE time < ?1",
            params![format_db_time(&cutoff)],
        )?;
        Ok(removed)
    }

    // --- Users ---

    pub fn get_user(&self, id: i64) -> Result<User, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, level FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    level: row.get(2)?,
                })
            },
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }
}

// Provisioning and inspection helpers for tests.
#[cfg(test)]
impl Store {
    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (label, host, port, probe_type, pattern, timeout, active, status, \
             warning_threshold, warning_threshold_counter, snmp_oid) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                target.label,
                target.host,
                target.port,
                target.probe_type,
                target.pattern,
                target.timeout,
                if target.active { "yes" } else { "no" },
                target.status.as_str(),
                target.threshold(),
                target.failure_counter,
                target.snmp_oid,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Insert or replace the SNMP sub-record of a target.
    pub fn save_snmp_settings(&self, settings: &SnmpSettings) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO snmp_settings (target_id, community, version, timeout, retries) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(target_id) DO UPDATE SET community = excluded.community, \
             version = excluded.version, timeout = excluded.timeout, retries = excluded.retries",
            params![
                settings.target_id,
                settings.community,
                settings.version,
                settings.timeout,
                settings.retries,
            ],
        )?;
        Ok(())
    }

    /// Insert or update an OID definition keyed by name; returns its ID.
    pub fn save_oid_definition(&self, def: &mut OidDefinition) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO snmp_oids (name, label, oid, conversion, status_up, status_warning, status_error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(name) DO UPDATE SET label = excluded.label, oid = excluded.oid, \
             conversion = excluded.conversion, status_up = excluded.status_up, \
             status_warning = excluded.status_warning, status_error = excluded.status_error \
             RETURNING id",
            params![
                def.name,
                def.label,
                def.oid,
                def.conversion,
                def.status_up,
                def.status_warning,
                def.status_error,
            ],
            |row| row.get(0),
        )?;
        def.id = id;
        Ok(id)
    }

    /// Delete an OID definition by name.
    pub fn delete_oid_definition(&self, name: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM snmp_oids WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Append a raw check outcome to the uptime log.
    pub fn log_uptime(&self, entry: &UptimeEntry) -> Result<(), DbError> {
        let conn = self.conn()?;
        write_uptime(&conn, entry)
    }

    /// Get the uptime log of a target, oldest first.
    pub fn get_uptime(&self, target_id: i64) -> Result<Vec<UptimeEntry>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT target_id, time, status, latency FROM uptime WHERE target_id = ?1 ORDER BY time ASC, id ASC",
        )?;
        let entries = stmt
            .query_map(params![target_id], |row| {
                let time_str: String = row.get(1)?;
                Ok(UptimeEntry {
                    target_id: row.get(0)?,
                    time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                    up: row.get(2)?,
                    latency: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(entries)
    }

    /// Add a user and return its ID.
    pub fn add_user(&self, user: &mut User) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (name, level) VALUES (?1, ?2)",
            params![user.name, user.level],
        )?;
        user.id = conn.last_insert_rowid();
        Ok(user.id)
    }

    /// Grant a user ownership of a target.
    pub fn assign_target(&self, user_id: i64, target_id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO users_targets (user_id, target_id) VALUES (?1, ?2)",
            params![user_id, target_id],
        )?;
        Ok(())
    }
}

fn write_update(conn: &Connection, target_id: i64, update: &PersistedUpdate) -> Result<(), DbError> {
    let changed = conn.execute(
        "UPDATE targets SET last_check = ?1, error = ?2, latency = ?3, snmp_value_raw = ?4, \
         snmp_value_convert = ?5, status = ?6, warning_threshold_counter = ?7, \
         last_online = COALESCE(?8, last_online) WHERE id = ?9",
        params![
            format_db_time(&update.checked_at),
            update.error,
            update.latency,
            update.snmp_value_raw,
            update.snmp_value_convert,
            update.status.as_str(),
            update.failure_counter,
            update.last_online.as_ref().map(format_db_time),
            target_id,
        ],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

fn write_uptime(conn: &Connection, entry: &UptimeEntry) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO uptime (target_id, time, status, latency) VALUES (?1, ?2, ?3, ?4)",
        params![
            entry.target_id,
            format_db_time(&entry.time),
            entry.up,
            entry.latency,
        ],
    )?;
    Ok(())
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let active: String = row.get(7)?;
    let status: String = row.get(8)?;
    let last_check: Option<String> = row.get(13)?;
    let last_online: Option<String> = row.get(14)?;
    let warning_threshold: i64 = row.get(9)?;
    let failure_counter: i64 = row.get(10)?;
    Ok(Target {
        id: row.get(0)?,
        label: row.get(1)?,
        host: row.get(2)?,
        port: row.get(3)?,
        probe_type: row.get(4)?,
        pattern: row.get(5)?,
        timeout: row.get(6)?,
        active: active == "yes",
        status: status.parse().unwrap_or(TargetStatus::Down),
        warning_threshold: clamp_u32(warning_threshold, 1),
        failure_counter: clamp_u32(failure_counter, 0),
        error: row.get(11)?,
        latency: row.get(12)?,
        last_check: last_check.as_deref().and_then(parse_db_time),
        last_online: last_online.as_deref().and_then(parse_db_time),
        snmp_oid: row.get(15)?,
        snmp_value_raw: row.get(16)?,
        snmp_value_convert: row.get(17)?,
    })
}

fn clamp_u32(value: i64, floor: u32) -> u32 {
    u32::try_from(value.max(i64::from(floor))).unwrap_or(u32::MAX)
}

fn format_db_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::NamedTempFile;

    fn open_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add(store: &Store, label: &str, active: bool) -> i64 {
        let mut target = Target {
            label: label.to_string(),
            host: "127.0.0.1".to_string(),
            port: 22,
            active,
            ..Default::default()
        };
        store.add_target(&mut target).unwrap()
    }

    #[test]
    fn test_active_targets_sorted_and_filtered() {
        let (_tmp, store) = open_store();
        let b = add(&store, "bravo", true);
        let a = add(&store, "alpha", true);
        add(&store, "charlie", false);

        let all = store.get_active_targets(&TargetFilter::default()).unwrap();
        let ids: Vec<i64> = all.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, b]);

        let one = store
            .get_active_targets(&TargetFilter { target_id: Some(b), owner_id: None })
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].label, "bravo");
    }

    #[test]
    fn test_owner_join() {
        let (_tmp, store) = open_store();
        let a = add(&store, "alpha", true);
        add(&store, "bravo", true);
        let mut user = User { id: 0, name: "ops".to_string(), level: USER_LEVEL_USER };
        store.add_user(&mut user).unwrap();
        store.assign_target(user.id, a).unwrap();

        let owned = store
            .get_active_targets(&TargetFilter { target_id: None, owner_id: Some(user.id) })
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id, a);
        assert!(!store.get_user(user.id).unwrap().is_admin());
    }

    fn entry(target_id: i64, time: DateTime<Utc>, up: bool) -> UptimeEntry {
        UptimeEntry { target_id, time, up, latency: 0.01 }
    }

    #[test]
    fn test_unreadable_row_does_not_hide_the_others() {
        let (_tmp, store) = open_store();
        let a = add(&store, "alpha", true);
        let b = add(&store, "bravo", true);
        let c = add(&store, "charlie", true);
        {
            let conn = store.conn().unwrap();
            conn.execute(
                "UPDATE targets SET warning_threshold = -1, warning_threshold_counter = -4 WHERE id = ?1",
                params![a],
            )
            .unwrap();
            conn.execute("UPDATE targets SET timeout = 'soon' WHERE id = ?1", params![b])
                .unwrap();
        }

        let targets = store.get_active_targets(&TargetFilter::default()).unwrap();
        let ids: Vec<i64> = targets.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(targets[0].warning_threshold, 1);
        assert_eq!(targets[0].failure_counter, 0);
    }

    #[test]
    fn test_failed_check_keeps_last_online() {
        let (_tmp, store) = open_store();
        let id = add(&store, "alpha", true);
        let seen = Utc::now() - ChronoDuration::minutes(5);

        store
            .record_check(&entry(id, seen, true), &PersistedUpdate {
                checked_at: seen,
                error: String::new(),
                latency: 0.01,
                snmp_value_raw: String::new(),
                snmp_value_convert: String::new(),
                status: TargetStatus::Up,
                failure_counter: 0,
                last_online: Some(seen),
            })
            .unwrap();
        let now = Utc::now();
        store
            .record_check(&entry(id, now, false), &PersistedUpdate {
                checked_at: now,
                error: "111: Connection refused".to_string(),
                latency: 0.02,
                snmp_value_raw: String::new(),
                snmp_value_convert: String::new(),
                status: TargetStatus::Down,
                failure_counter: 1,
                last_online: None,
            })
            .unwrap();

        let target = store.get_target(id).unwrap();
        assert_eq!(target.status, TargetStatus::Down);
        assert_eq!(target.failure_counter, 1);
        assert_eq!(target.error, "111: Connection refused");
        let last_online = target.last_online.unwrap();
        assert!((last_online - seen).num_milliseconds().abs() < 1);
    }

    #[test]
    fn test_record_check_is_atomic() {
        let (_tmp, store) = open_store();
        let id = add(&store, "alpha", true);
        let now = Utc::now();
        let update = PersistedUpdate {
            checked_at: now,
            error: String::new(),
            latency: 0.004,
            snmp_value_raw: String::new(),
            snmp_value_convert: String::new(),
            status: TargetStatus::Up,
            failure_counter: 0,
            last_online: Some(now),
        };
        store.record_check(&entry(id, now, true), &update).unwrap();
        assert_eq!(store.get_uptime(id).unwrap().len(), 1);

        // unknown target: the uptime row is rolled back with the update
        assert!(matches!(store.record_check(&entry(999, now, true), &update), Err(DbError::NotFound)));
        assert!(store.get_uptime(999).unwrap().is_empty());
        assert!(matches!(store.get_target(999), Err(DbError::NotFound)));
    }

    #[test]
    fn test_oid_definitions_upsert_by_name() {
        let (_tmp, store) = open_store();
        let mut def = OidDefinition {
            name: "ifInOctets1".to_string(),
            oid: ".1.3.6.1.2.1.2.2.1.10.1".to_string(),
            ..Default::default()
        };
        let id = store.save_oid_definition(&mut def).unwrap();
        def.label = "Inbound octets".to_string();
        assert_eq!(store.save_oid_definition(&mut def).unwrap(), id);

        let mut other = OidDefinition {
            name: "cpuLoad".to_string(),
            oid: ".1.3.6.1.4.1.2021.10.1.3.1".to_string(),
            ..Default::default()
        };
        store.save_oid_definition(&mut other).unwrap();

        let names: Vec<String> = store
            .list_oid_definitions()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["cpuLoad", "ifInOctets1"]);

        store.delete_oid_definition("cpuLoad").unwrap();
        assert_eq!(store.list_oid_definitions().unwrap().len(), 1);
    }

    #[test]
    fn test_snmp_settings_roundtrip_and_absence() {
        let (_tmp, store) = open_store();
        let id = add(&store, "switch", true);
        assert!(store.get_snmp_settings(id).unwrap().is_none());

        let settings = SnmpSettings {
            target_id: id,
            community: "private".to_string(),
            version: "1".to_string(),
            timeout: 3,
            retries: 0,
        };
        store.save_snmp_settings(&settings).unwrap();
        assert_eq!(store.get_snmp_settings(id).unwrap(), Some(settings));
    }

    #[test]
    fn test_uptime_cleanup() {
        let (_tmp, store) = open_store();
        let id = add(&store, "alpha", true);
        let now = Utc::now();
        for (age, up) in [(400, false), (10, true)] {
            store
                .log_uptime(&UptimeEntry {
                    target_id: id,
                    time: now - ChronoDuration::days(age),
                    up,
                    latency: 0.1,
                })
                .unwrap();
        }

        let removed = store.delete_uptime_before(now - ChronoDuration::days(365)).unwrap();
        assert_eq!(removed, 1);
        let remaining = store.get_uptime(id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].up);
    }
}
