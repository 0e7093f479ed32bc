//! Retention sweeper
//!
//! Runs independently of the sync loop, periodically evicting hub state
//! older than the retention window and expired cached decisions.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::ensemble::EnsemblePredictor;
use crate::hub::{EvictionSummary, IntegrationHub};

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub sweep_interval: Duration,
    pub retention: chrono::Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from_hub(&HubConfig::default())
    }
}

impl MaintenanceConfig {
    pub fn from_hub(config: &HubConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            retention: chrono::Duration::seconds(config.retention_secs as i64),
        }
    }
}

/// Totals across all sweeps
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub sweeps: u64,
    pub correlations_evicted: usize,
    pub errors_evicted: usize,
    pub metrics_evicted: usize,
    pub predictions_evicted: usize,
    pub last_sweep: Option<DateTime<Utc>>,
}

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub hub: EvictionSummary,
    pub predictions: usize,
}

pub struct MaintenanceService {
    hub: Arc<IntegrationHub>,
    predictor: Option<Arc<EnsemblePredictor>>,
    config: MaintenanceConfig,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<SweepStats>>,
}

impl MaintenanceService {
    pub fn new(hub: Arc<IntegrationHub>, config: MaintenanceConfig) -> Self {
        Self {
            hub,
            predictor: None,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(SweepStats::default())),
        }
    }

    /// Also evict the predictor's expired cache entries
    pub fn with_predictor(mut self, predictor: Arc<EnsemblePredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub async fn stats(&self) -> SweepStats {
        self.stats.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the sweep loop
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Retention sweeper already running");
            return;
        }

        info!(
            "Starting retention sweeper (interval: {}s, retention: {}s)",
            self.config.sweep_interval.as_secs(),
            self.config.retention.num_seconds()
        );

        let hub = self.hub.clone();
        let predictor = self.predictor.clone();
        let config = self.config.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.sweep_interval);
            // first tick fires immediately
            interval.tick().await;

            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                Self::run_sweep_cycle(&hub, predictor.as_deref(), &config, &stats).await;
            }

            info!("Retention sweeper stopped");
        });
    }

    /// Stop the sweep loop after its current wait
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Retention sweeper stop requested");
    }

    /// Run one sweep immediately
    pub async fn sweep_now(&self) -> SweepReport {
        Self::run_sweep_cycle(&self.hub, self.predictor.as_deref(), &self.config, &self.stats).await
    }

    async fn run_sweep_cycle(
        hub: &IntegrationHub,
        predictor: Option<&EnsemblePredictor>,
        config: &MaintenanceConfig,
        stats: &RwLock<SweepStats>,
    ) -> SweepReport {
        let report = SweepReport {
            hub: hub.evict_stale(config.retention).await,
            predictions: predictor.map(|p| p.evict_expired()).unwrap_or(0),
        };

        let mut stats = stats.write().await;
        stats.sweeps += 1;
        stats.correlations_evicted += report.hub.correlations;
        stats.errors_evicted += report.hub.errors;
        stats.metrics_evicted += report.hub.metrics;
        stats.predictions_evicted += report.predictions;
        stats.last_sweep = Some(Utc::now());

        debug!(?report, "retention sweep finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::StaticFeedAdapter;
    use crate::domain::SourcePayload;

    #[test]
    fn test_config_from_hub() {
        let config = MaintenanceConfig::from_hub(&HubConfig {
            retention_secs: 120,
            sweep_interval_secs: 0,
            ..Default::default()
        });
        assert_eq!(config.retention, chrono::Duration::seconds(120));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sweep_evicts_errors_past_retention() {
        let hub = Arc::new(IntegrationHub::with_defaults());
        let adapter = Arc::new(StaticFeedAdapter::inline(
            "news",
            SourcePayload::News { headlines: vec![] },
            Duration::from_secs(300),
        ));
        adapter.set_failure(Some("feed down")).await;
        hub.register_data_source(adapter).await.unwrap();
        hub.sync_once().await;
        assert_eq!(hub.recent_errors().await.len(), 1);

        let keep = MaintenanceService::new(hub.clone(), MaintenanceConfig::default());
        assert_eq!(keep.sweep_now().await.hub.errors, 0);

        let purge = MaintenanceService::new(
            hub.clone(),
            MaintenanceConfig {
                sweep_interval: Duration::from_secs(60),
                retention: chrono::Duration::milliseconds(-1),
            },
        );
        let report = purge.sweep_now().await;
        assert_eq!(report.hub.errors, 1);
        assert!(hub.recent_errors().await.is_empty());
        assert_eq!(purge.stats().await.sweeps, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_sweeps_on_interval() {
        let hub = Arc::new(IntegrationHub::with_defaults());
        let service = MaintenanceService::new(
            hub,
            MaintenanceConfig {
                sweep_interval: Duration::from_secs(10),
                retention: chrono::Duration::hours(1),
            },
        );
        service.start();
        tokio::time::sleep(Duration::from_secs(25)).await;
        service.stop();
        assert_eq!(service.stats().await.sweeps, 2);
    }
}
