//! Retention manager for the uptime log.

use crate::db::{DbError, Store};

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

/// Deletes uptime entries past the retention period. Runs after every pass.
pub struct RetentionManager {
    store: Arc<Store>,
    retention_days: i64,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>, retention_days: i64) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    /// Returns the number of entries removed. A non-positive retention keeps
    /// everything.
    pub fn run(&self) -> Result<usize, DbError> {
        if self.retention_days <= 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - ChronoDuration::days(self.retention_days);
        let removed = self.store.delete_uptime_before(cutoff)?;
        if removed > 0 {
            tracing::info!(
                "RetentionManager: removed {} uptime entries older than {} days",
                removed,
                self.retention_days
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Target, UptimeEntry};
    use tempfile::NamedTempFile;

    #[test]
    fn test_retention_window() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let mut target = Target {
            label: "gw".into(),
            host: "192.0.2.1".into(),
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();
        for age in [40, 20, 1] {
            store
                .log_uptime(&UptimeEntry {
                    target_id: id,
                    time: Utc::now() - ChronoDuration::days(age),
                    up: true,
                    latency: 0.0,
                })
                .unwrap();
        }

        assert_eq!(RetentionManager::new(store.clone(), 0).run().unwrap(), 0);
        assert_eq!(RetentionManager::new(store.clone(), 30).run().unwrap(), 1);
        assert_eq!(RetentionManager::new(store.clone(), 7).run().unwrap(), 1);
        assert_eq!(store.get_uptime(id).unwrap().len(), 1);
    }
}
