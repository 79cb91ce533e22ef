//! Background sweeper for expired job results.
//!
//! Terminal jobs keep their record and detection results readable for the
//! configured retention period; after that both are discarded together.

use chrono::Utc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

use crate::orchestrator::Orchestrator;

pub struct RetentionSweeper {
    orchestrator: Orchestrator,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let interval = orchestrator.config().retention_sweep_interval;
        Self {
            orchestrator,
            interval,
        }
    }

    /// Start the sweep loop. Runs until the task is dropped.
    pub async fn run(&self) {
        info!(
            "Starting retention sweeper (interval: {:?}, retention: {:?})",
            self.interval,
            self.orchestrator.config().result_retention
        );

        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep_once();
        }
    }

    /// Run a single sweep. Returns the number of jobs discarded.
    pub fn sweep_once(&self) -> usize {
        let removed = self.orchestrator.sweep_expired(Utc::now());
        if removed > 0 {
            info!("Discarded results of {} expired job(s)", removed);
        } else {
            debug!("Retention sweep found nothing to discard");
        }
        removed
    }
}
