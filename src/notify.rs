//! Status-change notification.
//!
//! The runner hands every checked target to a [`ChangeNotifier`] once per
//! pass, after its new state has been persisted.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::TargetStatus;

/// Previous and new externally reported status of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub target_id: i64,
    pub label: String,
    pub previous: TargetStatus,
    pub current: TargetStatus,
    pub error: String,
    pub checked_at: DateTime<Utc>,
}

impl StatusChange {
    pub fn is_change(&self) -> bool {
        self.previous != self.current
    }
}

pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, change: &StatusChange);
}

/// Logs transitions; unchanged targets only at debug level.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl ChangeNotifier for LogNotifier {
    fn notify(&self, change: &StatusChange) {
        if !change.is_change() {
            tracing::debug!("{} still {}", change.label, change.current);
            return;
        }
        match change.current {
            TargetStatus::Down => tracing::warn!(
                "{} (id {}) went down: {}",
                change.label,
                change.target_id,
                change.error
            ),
            TargetStatus::Up => tracing::info!(
                "{} (id {}) is back up",
                change.label,
                change.target_id
            ),
        }
    }
}

/// Appends every transition to a file, one JSON object per line.
///
/// Writes are blocking and happen on the calling task. Each event is a single
/// short line written only on a status transition, so the stall is bounded
/// by one small append.
pub struct JsonLinesNotifier {
    file: Mutex<File>,
}

impl JsonLinesNotifier {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ChangeNotifier for JsonLinesNotifier {
    fn notify(&self, change: &StatusChange) {
        if !change.is_change() {
            return;
        }
        let line = match serde_json::to_string(change) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode status change: {}", e);
                return;
            }
        };
        let Ok(mut file) = self.file.lock() else {
            tracing::error!("Event file lock poisoned, dropping event for {}", change.label);
            return;
        };
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::error!("Failed to write status change: {}", e);
        }
    }
}

impl ChangeNotifier for Vec<Arc<dyn ChangeNotifier>> {
    fn notify(&self, change: &StatusChange) {
        for notifier in self {
            notifier.notify(change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn change(previous: TargetStatus, current: TargetStatus) -> StatusChange {
        StatusChange {
            target_id: 4,
            label: "mail".to_string(),
            previous,
            current,
            error: "111: Connection refused".to_string(),
            checked_at: Utc::now(),
        }
    }

    #[test]
    fn test_json_lines_only_transitions() {
        let tmp = NamedTempFile::new().unwrap();
        let notifier = JsonLinesNotifier::open(tmp.path()).unwrap();

        notifier.notify(&change(TargetStatus::Up, TargetStatus::Up));
        notifier.notify(&change(TargetStatus::Up, TargetStatus::Down));

        let text = std::fs::read_to_string(tmp.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["previous"], "up");
        assert_eq!(event["current"], "down");
        assert_eq!(event["target_id"], 4);
    }

    #[test]
    fn test_fan_out() {
        let tmp_a = NamedTempFile::new().unwrap();
        let tmp_b = NamedTempFile::new().unwrap();
        let all: Vec<Arc<dyn ChangeNotifier>> = vec![
            Arc::new(LogNotifier),
            Arc::new(JsonLinesNotifier::open(tmp_a.path()).unwrap()),
            Arc::new(JsonLinesNotifier::open(tmp_b.path()).unwrap()),
        ];
        all.notify(&change(TargetStatus::Down, TargetStatus::Up));

        for tmp in [&tmp_a, &tmp_b] {
            assert_eq!(std::fs::read_to_string(tmp.path()).unwrap().lines().count(), 1);
        }
    }
}
