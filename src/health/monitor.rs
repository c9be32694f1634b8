//! Periodic health reporting.
//!
//! # Responsibilities
//! - Log the dispatcher health report on a fixed interval
//! - Publish the health score gauge
//! - Evict idle circuit breakers when eviction is configured

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthConfig;
use crate::dispatch::Dispatcher;
use crate::observability::metrics;

pub struct HealthMonitor {
    dispatcher: Arc<Dispatcher>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(dispatcher: Arc<Dispatcher>, config: HealthConfig) -> Self {
        Self { dispatcher, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Health reporting disabled");
            return;
        }

        tracing::info!(interval = self.config.log_interval_secs, "Health monitor starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.log_interval_secs.max(1)));
        // The first tick completes immediately; skip it so the first report
        // covers a full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn check(&self) {
        let report = self.dispatcher.get_health();
        report.log();
        metrics::record_health_score(report.health_score);

        let breaker = self.dispatcher.registry().breaker();
        if let Some(secs) = breaker.config().idle_eviction_secs {
            let evicted = breaker.evict_idle(Duration::from_secs(secs));
            if evicted > 0 {
                tracing::info!(evicted, "Evicted idle circuit breakers");
            }
        }
    }
}
