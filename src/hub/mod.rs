//! Integration Hub
//!
//! Polls every registered adapter, merges their payloads into one immutable
//! `IntegratedData` snapshot, derives trends and correlations against the
//! previous snapshot, and publishes the result.
//!
//! Each cycle runs `Idle -> Fetching -> Merging -> TrendAnalysis ->
//! Published -> Idle`. Adapter failures never abort a cycle; they are
//! recorded in the per-source metrics instead.

pub mod analysis;
pub mod merge;
pub mod metrics;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::DataAdapter;
use crate::config::HubConfig;
use crate::domain::{DataCorrelation, IntegratedData, SourceKind, SourcePayload, SyncPhase};
use crate::error::{CourtsideError, Result};

pub use metrics::SourceMetrics;

/// Outcome of one adapter fetch within a cycle
#[derive(Debug, Clone)]
pub struct AdapterResult {
    pub source_id: String,
    pub kind: SourceKind,
    pub payload: Option<SourcePayload>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl AdapterResult {
    pub fn is_ok(&self) -> bool {
        self.payload.is_some()
    }
}

/// Event emitted by the hub
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A new snapshot replaced the current one
    SnapshotPublished {
        generation: u64,
        timestamp: DateTime<Utc>,
        succeeded: usize,
        failed: usize,
    },
    /// One adapter failed during a cycle
    SourceFailed { source_id: String, error: String },
    /// Real-time sync loop started
    SyncStarted { interval_ms: u64 },
    /// Real-time sync loop stopped
    SyncStopped,
}

/// Recorded adapter failure
#[derive(Debug, Clone)]
pub struct SourceErrorRecord {
    pub source_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// What a retention sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionSummary {
    pub correlations: usize,
    pub errors: usize,
    pub metrics: usize,
}

type CorrelationKey = (String, String);

pub struct IntegrationHub {
    config: HubConfig,
    adapters: RwLock<Vec<Arc<dyn DataAdapter>>>,
    /// Current snapshot; replaced whole, never mutated
    snapshot_tx: watch::Sender<Arc<IntegratedData>>,
    phase_tx: watch::Sender<SyncPhase>,
    event_tx: broadcast::Sender<HubEvent>,
    metrics: RwLock<HashMap<String, SourceMetrics>>,
    correlations: RwLock<HashMap<CorrelationKey, DataCorrelation>>,
    errors: RwLock<VecDeque<SourceErrorRecord>>,
    /// Serializes cycles so only one writer replaces the snapshot
    cycle_lock: Mutex<()>,
    sync_interval_ms: AtomicU64,
    running: AtomicBool,
    /// Bumped on every start; a loop exits once it no longer owns the epoch
    loop_epoch: AtomicU64,
    stop_tx: watch::Sender<bool>,
    loop_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl IntegrationHub {
    pub fn new(config: HubConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(IntegratedData::empty()));
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        let (event_tx, _) = broadcast::channel(64);
        let (stop_tx, _) = watch::channel(false);

        Self {
            sync_interval_ms: AtomicU64::new(config.sync_interval_ms.max(1)),
            config,
            adapters: RwLock::new(Vec::new()),
            snapshot_tx,
            phase_tx,
            event_tx,
            metrics: RwLock::new(HashMap::new()),
            correlations: RwLock::new(HashMap::new()),
            errors: RwLock::new(VecDeque::new()),
            cycle_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            loop_epoch: AtomicU64::new(0),
            stop_tx,
            loop_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(HubConfig::default())
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register an adapter and connect it
    pub async fn register_data_source(&self, adapter: Arc<dyn DataAdapter>) -> Result<()> {
        let meta = adapter.metadata();

        let mut adapters = self.adapters.write().await;
        if adapters.iter().any(|a| a.metadata().id == meta.id) {
            return Err(CourtsideError::Validation(format!(
                "data source already registered: {}",
                meta.id
            )));
        }

        adapter.connect().await?;
        adapters.push(adapter);

        self.metrics.write().await.insert(
            meta.id.clone(),
            SourceMetrics::new(&meta.id, meta.kind, self.config.metrics_history),
        );

        info!(source = %meta.id, kind = %meta.kind, "registered data source");
        Ok(())
    }

    /// Remove and disconnect an adapter. Entries it already merged stay in
    /// the snapshot until a source with the same id replaces them.
    pub async fn unregister_data_source(&self, source_id: &str) -> Result<bool> {
        let removed = {
            let mut adapters = self.adapters.write().await;
            let idx = adapters.iter().position(|a| a.metadata().id == source_id);
            idx.map(|i| adapters.remove(i))
        };

        match removed {
            Some(adapter) => {
                adapter.disconnect().await?;
                info!(source = source_id, "unregistered data source");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn source_ids(&self) -> Vec<String> {
        self.adapters
            .read()
            .await
            .iter()
            .map(|a| a.metadata().id)
            .collect()
    }

    /// Current snapshot
    pub fn get_integrated_data(&self) -> Arc<IntegratedData> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<IntegratedData>> {
        self.snapshot_tx.subscribe()
    }

    /// Subscribe to hub events
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.event_tx.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase_tx.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    pub async fn get_source_metrics(&self) -> HashMap<String, SourceMetrics> {
        self.metrics.read().await.clone()
    }

    /// Latest correlation per source pair
    pub async fn correlation_cache(&self) -> Vec<DataCorrelation> {
        let mut out: Vec<DataCorrelation> =
            self.correlations.read().await.values().cloned().collect();
        out.sort_by(|a, b| (&a.source_a, &a.source_b).cmp(&(&b.source_a, &b.source_b)));
        out
    }

    pub async fn recent_errors(&self) -> Vec<SourceErrorRecord> {
        self.errors.read().await.iter().cloned().collect()
    }

    /// Probe every adapter's liveness
    pub async fn check_availability(&self) -> HashMap<String, bool> {
        let adapters = self.adapters.read().await.clone();
        let probes = adapters.iter().map(|adapter| async move {
            (adapter.metadata().id, adapter.is_available().await)
        });
        join_all(probes).await.into_iter().collect()
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.load(Ordering::Relaxed))
    }

    /// Change the interval used when scheduling the next cycle
    pub fn set_sync_interval(&self, interval_ms: u64) -> Result<()> {
        if interval_ms == 0 {
            return Err(CourtsideError::Validation(
                "sync interval must be positive".to_string(),
            ));
        }
        self.sync_interval_ms.store(interval_ms, Ordering::Relaxed);
        debug!(interval_ms, "sync interval updated");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Move to `phase`, warning on an out-of-order transition.
    /// Returns whether the transition was legal.
    fn set_phase(&self, phase: SyncPhase) -> bool {
        let previous = self.phase_tx.send_replace(phase);
        let legal = previous.can_transition_to(phase);
        if !legal {
            warn!(from = %previous, to = %phase, "unexpected sync phase transition");
        }
        legal
    }

    /// Run one full sync cycle and return the published snapshot
    pub async fn sync_once(&self) -> Arc<IntegratedData> {
        let _cycle = self.cycle_lock.lock().await;

        // Fetching
        self.set_phase(SyncPhase::Fetching);
        let adapters = self.adapters.read().await.clone();
        let timeout = Duration::from_millis(self.config.adapter_timeout_ms);
        let mut results = join_all(adapters.iter().map(|a| fetch_one(a.as_ref(), timeout))).await;
        results.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let now = Utc::now();
        self.record_results(&results, now).await;

        // Merging
        self.set_phase(SyncPhase::Merging);
        let previous = self.get_integrated_data();
        let timestamp = advance_timestamp(previous.timestamp, now);
        let mut next = previous.next_generation(timestamp);
        for result in &results {
            if let Some(payload) = &result.payload {
                merge::merge_payload(&mut next, &previous, &result.source_id, payload);
            }
        }

        // Trend analysis
        self.set_phase(SyncPhase::TrendAnalysis);
        next.trends = analysis::compute_trends(
            &previous.metrics(),
            &next.metrics(),
            self.config.trend_epsilon,
        );
        next.correlations = analysis::compute_correlations(
            &next,
            timestamp,
            self.config.min_correlation_samples,
        );
        self.cache_correlations(&next.correlations).await;

        // Publish
        let published = Arc::new(next);
        self.snapshot_tx.send_replace(Arc::clone(&published));
        self.set_phase(SyncPhase::Published);

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        let failed = results.len() - succeeded;
        let _ = self.event_tx.send(HubEvent::SnapshotPublished {
            generation: published.generation,
            timestamp: published.timestamp,
            succeeded,
            failed,
        });

        if failed > 0 && succeeded == 0 && !results.is_empty() {
            warn!(
                generation = published.generation,
                "all {} sources failed; published carried-forward snapshot",
                failed
            );
        } else {
            info!(
                generation = published.generation,
                succeeded,
                failed,
                trends = published.trends.len(),
                correlations = published.correlations.len(),
                "snapshot published"
            );
        }

        self.set_phase(SyncPhase::Idle);
        published
    }

    async fn record_results(&self, results: &[AdapterResult], at: DateTime<Utc>) {
        let mut metrics = self.metrics.write().await;
        let mut errors = self.errors.write().await;

        for result in results {
            let entry = metrics.entry(result.source_id.clone()).or_insert_with(|| {
                SourceMetrics::new(&result.source_id, result.kind, self.config.metrics_history)
            });

            match (&result.payload, &result.error) {
                (Some(payload), _) => {
                    entry.record_success(result.latency_ms, payload.completeness(), at);
                }
                (None, error) => {
                    let error = error.clone().unwrap_or_else(|| "unknown error".to_string());
                    entry.record_failure(result.latency_ms, &error, at);

                    if errors.len() >= self.config.error_log_capacity.max(1) {
                        errors.pop_front();
                    }
                    errors.push_back(SourceErrorRecord {
                        source_id: result.source_id.clone(),
                        error: error.clone(),
                        at,
                    });
                    let _ = self.event_tx.send(HubEvent::SourceFailed {
                        source_id: result.source_id.clone(),
                        error,
                    });
                }
            }
        }
    }

    async fn cache_correlations(&self, correlations: &[DataCorrelation]) {
        if correlations.is_empty() {
            return;
        }
        let mut cache = self.correlations.write().await;
        for c in correlations {
            cache.insert((c.source_a.clone(), c.source_b.clone()), c.clone());
        }
    }

    /// Drop correlations, errors and metrics of unregistered sources older
    /// than `max_age`
    pub async fn evict_stale(&self, max_age: chrono::Duration) -> EvictionSummary {
        let cutoff = Utc::now() - max_age;
        let mut summary = EvictionSummary::default();

        {
            let mut cache = self.correlations.write().await;
            let before = cache.len();
            cache.retain(|_, c| c.timestamp >= cutoff);
            summary.correlations = before - cache.len();
        }

        {
            let mut errors = self.errors.write().await;
            let before = errors.len();
            errors.retain(|e| e.at >= cutoff);
            summary.errors = before - errors.len();
        }

        let registered = self.source_ids().await;
        {
            let mut metrics = self.metrics.write().await;
            let before = metrics.len();
            metrics.retain(|id, m| {
                registered.contains(id) || m.last_attempt.map(|t| t >= cutoff).unwrap_or(false)
            });
            summary.metrics = before - metrics.len();
        }

        if summary != EvictionSummary::default() {
            debug!(?summary, "evicted stale hub state");
        }
        summary
    }

    /// Start polling on the configured interval.
    ///
    /// Returns false if the loop is already running. A loop left over from
    /// an earlier start finishes its in-flight cycle and exits.
    pub fn start_real_time_sync(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let epoch = self.loop_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_tx.send_replace(false);
        let mut stop_rx = self.stop_tx.subscribe();
        let hub = Arc::clone(self);

        let interval_ms = self.sync_interval_ms.load(Ordering::Relaxed);
        let _ = self.event_tx.send(HubEvent::SyncStarted { interval_ms });
        info!(interval_ms, epoch, "real-time sync started");

        let handle = tokio::spawn(async move {
            loop {
                if !hub.owns_loop(epoch) {
                    break;
                }

                // Not raced against the stop signal: an in-flight cycle
                // always completes and publishes.
                hub.sync_once().await;

                if !hub.owns_loop(epoch) {
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(hub.sync_interval()) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            let _ = hub.event_tx.send(HubEvent::SyncStopped);
            info!(epoch, "real-time sync stopped");
        });

        match self.loop_handles.lock() {
            Ok(mut handles) => {
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(e) => error!("sync loop handle lock poisoned: {}", e),
        }
        true
    }

    fn owns_loop(&self, epoch: u64) -> bool {
        self.is_running() && self.loop_epoch.load(Ordering::SeqCst) == epoch
    }

    /// Prevent any further cycle from being scheduled
    pub fn stop_real_time_sync(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop_tx.send_replace(true);
            debug!("real-time sync stop requested");
        }
    }

    /// Wait for every sync loop task to exit, including superseded ones
    pub async fn join_sync_loop(&self) {
        let handles = match self.loop_handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!("sync loop task failed: {}", e);
            }
        }
    }
}

/// Fetch one adapter with a timeout, converting every failure into a result
async fn fetch_one(adapter: &dyn DataAdapter, timeout: Duration) -> AdapterResult {
    let meta = adapter.metadata();
    let start = Instant::now();

    if !adapter.is_connected() {
        return AdapterResult {
            error: Some(CourtsideError::SourceUnavailable(meta.id.clone()).to_string()),
            source_id: meta.id,
            kind: meta.kind,
            payload: None,
            latency_ms: 0,
        };
    }

    let outcome = match tokio::time::timeout(timeout, adapter.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(CourtsideError::SourceTimeout {
            source_id: meta.id.clone(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(payload) if payload.kind() == meta.kind => AdapterResult {
            source_id: meta.id,
            kind: meta.kind,
            payload: Some(payload),
            error: None,
            latency_ms,
        },
        Ok(payload) => {
            let error = format!("expected {} payload, got {}", meta.kind, payload.kind());
            warn!(source = %meta.id, "{}", error);
            AdapterResult {
                source_id: meta.id,
                kind: meta.kind,
                payload: None,
                error: Some(error),
                latency_ms,
            }
        }
        Err(e) => {
            warn!(source = %meta.id, latency_ms, "source fetch failed: {}", e);
            AdapterResult {
                source_id: meta.id,
                kind: meta.kind,
                payload: None,
                error: Some(e.to_string()),
                latency_ms,
            }
        }
    }
}

/// Strictly later than `previous`, normally `now`
fn advance_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterMetadata, StaticFeedAdapter};
    use crate::domain::{ProjectionRecord, SentimentRecord};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct SlowAdapter;

    #[async_trait]
    impl DataAdapter for SlowAdapter {
        fn metadata(&self) -> AdapterMetadata {
            AdapterMetadata {
                id: "slow".to_string(),
                kind: SourceKind::Sentiment,
            }
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn fetch(&self) -> Result<SourcePayload> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SourcePayload::Sentiment { players: vec![] })
        }
        async fn get_data(&self) -> Option<SourcePayload> {
            None
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    fn projections(value: f64) -> SourcePayload {
        SourcePayload::Projections {
            players: vec![ProjectionRecord {
                player_id: "p1".to_string(),
                stats: BTreeMap::from([("points".to_string(), value)]),
                confidence: 0.7,
                last_updated: Utc::now(),
            }],
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let hub = IntegrationHub::with_defaults();
        let ttl = Duration::from_secs(300);
        hub.register_data_source(Arc::new(StaticFeedAdapter::inline("proj", projections(1.0), ttl)))
            .await
            .unwrap();
        let dup = hub
            .register_data_source(Arc::new(StaticFeedAdapter::inline("proj", projections(1.0), ttl)))
            .await;
        assert!(matches!(dup, Err(CourtsideError::Validation(_))));
    }

    #[tokio::test]
    async fn test_trend_between_cycles() {
        let hub = IntegrationHub::with_defaults();
        let adapter = Arc::new(StaticFeedAdapter::inline(
            "proj",
            projections(100.0),
            Duration::from_secs(300),
        ));
        hub.register_data_source(adapter.clone()).await.unwrap();

        let first = hub.sync_once().await;
        assert!(first.trends.is_empty());

        adapter.set_payload(projections(105.0)).await.unwrap();
        let second = hub.sync_once().await;
        let trend = second.trends["projection.p1.stat.points"];
        assert!((trend.change - 5.0).abs() < 1e-12);
        assert!((trend.significance - 0.05).abs() < 1e-12);
        assert_eq!(second.generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let mut config = HubConfig::default();
        config.adapter_timeout_ms = 100;
        let hub = IntegrationHub::new(config);
        hub.register_data_source(Arc::new(SlowAdapter)).await.unwrap();

        let snapshot = hub.sync_once().await;
        assert_eq!(snapshot.generation, 1);

        let metrics = hub.get_source_metrics().await;
        assert_eq!(metrics["slow"].error_rate, 1.0);
        assert!(metrics["slow"]
            .last_error
            .as_deref()
            .unwrap_or_default()
            .contains("timed out"));
        assert_eq!(hub.recent_errors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_phase_returns_to_idle() {
        let hub = IntegrationHub::with_defaults();
        let phases = hub.watch_phase();
        hub.sync_once().await;
        assert_eq!(hub.phase(), SyncPhase::Idle);
        assert!(phases.has_changed().unwrap());
    }

    #[test]
    fn test_set_phase_flags_out_of_order_transition() {
        let hub = IntegrationHub::with_defaults();
        assert!(hub.set_phase(SyncPhase::Fetching));
        assert!(!hub.set_phase(SyncPhase::Published));
        assert_eq!(hub.phase(), SyncPhase::Published);
        assert!(hub.set_phase(SyncPhase::Idle));
    }

    #[tokio::test]
    async fn test_evict_stale_correlations() {
        let hub = IntegrationHub::with_defaults();
        let players: Vec<SentimentRecord> = (0..4)
            .map(|i| SentimentRecord {
                player_id: format!("p{i}"),
                score: 0.1 * i as f64,
                mentions: 1,
            })
            .collect();
        let proj: Vec<ProjectionRecord> = (0..4)
            .map(|i| ProjectionRecord {
                player_id: format!("p{i}"),
                stats: BTreeMap::from([("points".to_string(), 10.0)]),
                confidence: 0.5 + 0.05 * i as f64,
                last_updated: Utc::now(),
            })
            .collect();
        let ttl = Duration::from_secs(300);
        hub.register_data_source(Arc::new(StaticFeedAdapter::inline(
            "social",
            SourcePayload::Sentiment { players },
            ttl,
        )))
        .await
        .unwrap();
        hub.register_data_source(Arc::new(StaticFeedAdapter::inline(
            "proj",
            SourcePayload::Projections { players: proj },
            ttl,
        )))
        .await
        .unwrap();

        hub.sync_once().await;
        assert_eq!(hub.correlation_cache().await.len(), 1);

        let kept = hub.evict_stale(chrono::Duration::hours(1)).await;
        assert_eq!(kept.correlations, 0);

        let evicted = hub.evict_stale(chrono::Duration::milliseconds(-1)).await;
        assert_eq!(evicted.correlations, 1);
        assert!(hub.correlation_cache().await.is_empty());
    }

    #[test]
    fn test_advance_timestamp_is_strict() {
        let t = Utc::now();
        assert!(advance_timestamp(t, t) > t);
        let later = t + chrono::Duration::seconds(1);
        assert_eq!(advance_timestamp(t, later), later);
    }
}
