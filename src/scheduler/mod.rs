//! Scheduler module: fleet passes over the active targets.
//!
//! A pass loads the targets in scope, runs each through the
//! [`TargetUpdater`] with bounded parallelism, notifies once per target after
//! its state is persisted, and finishes with the uptime-log retention step.

mod evaluator;
mod retention;
mod retry;
mod updater;

pub use evaluator::*;
pub use retention::*;
pub use retry::*;
pub use updater::*;

use crate::config::MonitorConfig;
use crate::db::{DbError, Store, TargetFilter};
use crate::notify::{ChangeNotifier, StatusChange};
use crate::probe::Prober;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
}

/// Who a pass runs for and which targets it may touch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunScope {
    /// Unset for system-initiated passes.
    pub user_id: Option<i64>,
    pub target_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub checked: usize,
    pub up: usize,
    pub down: usize,
    pub changed: usize,
    /// Targets whose update could not be completed.
    pub errors: usize,
}

pub struct FleetUpdateRunner {
    store: Arc<Store>,
    updater: Arc<TargetUpdater>,
    notifier: Arc<dyn ChangeNotifier>,
    retention: RetentionManager,
    concurrency: usize,
}

impl FleetUpdateRunner {
    pub fn new(
        store: Arc<Store>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn ChangeNotifier>,
        config: Arc<MonitorConfig>,
    ) -> Self {
        let retry = RetryingProbe::new(prober, config.max_attempts);
        let retention = RetentionManager::new(store.clone(), config.log_retention_days);
        Self {
            updater: Arc::new(TargetUpdater::new(store.clone(), retry, config.clone())),
            store,
            notifier,
            retention,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Run one pass. Individual target failures are logged and counted; only
    /// failing to load the target list aborts the pass.
    pub async fn run(&self, scope: &RunScope) -> Result<PassSummary, SchedulerError> {
        let filter = self.resolve_filter(scope)?;
        let targets = self.store.get_active_targets(&filter)?;
        tracing::info!("Starting pass over {} targets", targets.len());

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for target in targets {
            // acquired here so targets start in label order
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let updater = self.updater.clone();
            let notifier = self.notifier.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = updater.update(target.id).await;
                if let Ok(o) = &outcome {
                    notifier.notify(&StatusChange {
                        target_id: o.target_id,
                        label: o.label.clone(),
                        previous: o.previous,
                        current: o.current,
                        error: o.error.clone(),
                        checked_at: o.checked_at,
                    });
                }
                (target.id, target.label, outcome)
            });
        }

        let mut summary = PassSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(outcome))) => {
                    summary.checked += 1;
                    if outcome.current.is_up() {
                        summary.up += 1;
                    } else {
                        summary.down += 1;
                    }
                    if outcome.previous != outcome.current {
                        summary.changed += 1;
                    }
                }
                Ok((id, label, Err(e))) => {
                    tracing::error!("Failed to update {} (id {}): {}", label, id, e);
                    summary.errors += 1;
                }
                Err(e) => {
                    tracing::error!("Update task failed: {}", e);
                    summary.errors += 1;
                }
            }
        }

        if let Err(e) = self.retention.run() {
            tracing::error!("RetentionManager: cleanup failed: {}", e);
        }

        tracing::info!(
            "Pass finished: {} checked, {} up, {} down, {} changed, {} errors",
            summary.checked,
            summary.up,
            summary.down,
            summary.changed,
            summary.errors
        );
        Ok(summary)
    }

    /// Repeat passes every `period`. Passes that overrun skip the missed ticks.
    pub async fn run_forever(&self, scope: RunScope, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let Err(e) = self.run(&scope).await {
                tracing::error!("Pass failed: {}", e);
            }
        }
    }

    /// Only admins, or passes with no user, may narrow to a single target.
    /// Other users always get exactly the targets they own.
    fn resolve_filter(&self, scope: &RunScope) -> Result<TargetFilter, SchedulerError> {
        let Some(user_id) = scope.user_id else {
            return Ok(TargetFilter {
                target_id: scope.target_id,
                owner_id: None,
            });
        };

        let user = self.store.get_user(user_id)?;
        if user.is_admin() {
            return Ok(TargetFilter {
                target_id: scope.target_id,
                owner_id: None,
            });
        }

        if let Some(id) = scope.target_id {
            tracing::warn!(
                "User {} may not select target {}, checking owned targets instead",
                user.name,
                id
            );
        }
        Ok(TargetFilter {
            target_id: None,
            owner_id: Some(user.id),
        })
    }
}
