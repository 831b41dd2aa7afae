//! ServerWatch - server health polling
//!
//! Checks TCP services, websites, ICMP hosts and SNMP agents, applies the
//! per-target warning threshold and records the results in SQLite.

mod config;
mod db;
mod notify;
mod probe;
mod scheduler;

use config::MonitorConfig;
use db::Store;
use notify::{ChangeNotifier, JsonLinesNotifier, LogNotifier};
use probe::NetworkProber;
use scheduler::{FleetUpdateRunner, RunScope};

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("serverwatch=info".parse()?))
        .init();

    let cfg = Arc::new(MonitorConfig::load());
    tracing::info!("Using database at {}", cfg.db_path);

    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let mut notifiers: Vec<Arc<dyn ChangeNotifier>> = vec![Arc::new(LogNotifier)];
    if let Some(path) = &cfg.events_path {
        notifiers.push(Arc::new(JsonLinesNotifier::open(path)?));
        tracing::info!("Writing status changes to {}", path);
    }

    let runner = FleetUpdateRunner::new(
        store,
        Arc::new(NetworkProber),
        Arc::new(notifiers),
        cfg.clone(),
    );
    let scope = RunScope {
        user_id: cfg.user_id,
        target_id: cfg.target_id,
    };

    if cfg.interval_secs == 0 {
        runner.run(&scope).await?;
    } else {
        tracing::info!("Running a pass every {}s", cfg.interval_secs);
        runner
            .run_forever(scope, Duration::from_secs(cfg.interval_secs))
            .await;
    }

    Ok(())
}
