//! Scheduled inspection-deadline sweep
//!
//! A UI-side interval timer is not a reliable trigger for a financial
//! deadline, so release evaluation runs here: a periodic job that walks
//! every `inspection`-stage transaction and drives the same transition an
//! explicit buyer acceptance would.

use crate::engine::LifecycleEngine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Configuration for the release sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Periodic auto-release job over the lifecycle engine
pub struct ReleaseSweeper {
    config: SweeperConfig,
    engine: Arc<LifecycleEngine>,
}

impl ReleaseSweeper {
    pub fn new(config: SweeperConfig, engine: Arc<LifecycleEngine>) -> Self {
        Self { config, engine }
    }

    /// Run one sweep pass, returning how many transactions were released
    pub async fn run_once(&self) -> usize {
        match self.engine.sweep_due(Utc::now()).await {
            Ok(released) => {
                if !released.is_empty() {
                    info!(count = released.len(), "auto-released transactions");
                }
                released.len()
            }
            Err(err) => {
                error!(error = %err, "deadline sweep failed");
                0
            }
        }
    }

    /// Spawn the sweep loop on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.interval_secs);
        tokio::spawn(async move {
            info!(interval_secs = self.config.interval_secs, "release sweeper started");
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                debug!("running deadline sweep");
                self.run_once().await;
            }
        })
    }
}
