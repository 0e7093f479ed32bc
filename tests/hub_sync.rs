use async_trait::async_trait;
use chrono::Utc;
use courtside::adapters::{AdapterMetadata, DataAdapter, StaticFeedAdapter};
use courtside::domain::{GameOdds, Headline, MarketLine, SourceKind, SourcePayload, SyncPhase};
use courtside::error::{CourtsideError, Result};
use courtside::hub::{HubEvent, IntegrationHub};
use courtside::config::HubConfig;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(300);

/// Uncached odds feed whose every fetch takes `delay`
struct SlowOddsFeed {
    delay: Duration,
    fetches: AtomicU64,
}

impl SlowOddsFeed {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            fetches: AtomicU64::new(0),
        }
    }

    fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataAdapter for SlowOddsFeed {
    fn metadata(&self) -> AdapterMetadata {
        AdapterMetadata {
            id: "slow-odds".to_string(),
            kind: SourceKind::Odds,
        }
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn fetch(&self) -> Result<SourcePayload> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(games(1))
    }

    async fn get_data(&self) -> Option<SourcePayload> {
        None
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn games(n: usize) -> SourcePayload {
    SourcePayload::Odds {
        games: (0..n)
            .map(|i| GameOdds {
                event_id: format!("game-{i}"),
                home_team: format!("home-{i}"),
                away_team: format!("away-{i}"),
                commence_time: None,
                markets: BTreeMap::from([(
                    "moneyline".to_string(),
                    MarketLine {
                        decimal_odds: 1.5 + i as f64 * 0.1,
                        line: None,
                    },
                )]),
            })
            .collect(),
    }
}

fn headlines(n: usize) -> SourcePayload {
    SourcePayload::News {
        headlines: (0..n)
            .map(|i| Headline {
                id: format!("headline-{i}"),
                title: format!("story {i}"),
                player_ids: vec![],
                sentiment: 0.1,
                published_at: Utc::now(),
            })
            .collect(),
    }
}

/// Five games and three headlines land in the snapshot keyed by their ids.
#[tokio::test]
async fn merged_snapshot_contains_exactly_the_fetched_entities() {
    let hub = IntegrationHub::with_defaults();
    hub.register_data_source(Arc::new(StaticFeedAdapter::inline("odds", games(5), TTL)))
        .await
        .unwrap();
    hub.register_data_source(Arc::new(StaticFeedAdapter::inline("news", headlines(3), TTL)))
        .await
        .unwrap();

    let snapshot = hub.sync_once().await;

    let odds: Vec<&str> = snapshot.odds.keys().map(String::as_str).collect();
    assert_eq!(odds, vec!["game-0", "game-1", "game-2", "game-3", "game-4"]);
    let news: Vec<&str> = snapshot.news.keys().map(String::as_str).collect();
    assert_eq!(news, vec!["headline-0", "headline-1", "headline-2"]);
    assert!(snapshot.projections.is_empty());
    assert_eq!(snapshot.entity_count(), 8);
    assert!(Arc::ptr_eq(&snapshot, &hub.get_integrated_data()));
}

/// A cycle where every source fails still publishes, carrying data forward.
#[tokio::test]
async fn all_failed_cycle_publishes_carried_forward_snapshot() {
    let hub = IntegrationHub::with_defaults();
    let odds = Arc::new(StaticFeedAdapter::inline("odds", games(5), TTL));
    hub.register_data_source(odds.clone()).await.unwrap();

    let first = hub.sync_once().await;
    let quality_before = hub.get_source_metrics().await["odds"].data_quality;

    odds.set_failure(Some("upstream 503")).await;
    let mut events = hub.events();
    let second = hub.sync_once().await;

    assert!(second.timestamp > first.timestamp);
    assert_eq!(second.generation, first.generation + 1);
    assert!(second.same_domain_data(&first));
    assert_eq!(second.odds.len(), 5);

    let metrics = hub.get_source_metrics().await;
    let odds_metrics = &metrics["odds"];
    assert!(odds_metrics.error_rate > 0.0);
    assert!(odds_metrics.data_quality < quality_before);
    assert_eq!(odds_metrics.failure_count, 1);

    let mut saw_failure = false;
    let mut saw_publish = false;
    while let Ok(event) = events.try_recv() {
        match event {
            HubEvent::SourceFailed { source_id, error } => {
                assert_eq!(source_id, "odds");
                assert!(error.contains("upstream 503"));
                saw_failure = true;
            }
            HubEvent::SnapshotPublished {
                succeeded, failed, ..
            } => {
                assert_eq!((succeeded, failed), (0, 1));
                saw_publish = true;
            }
            _ => {}
        }
    }
    assert!(saw_failure && saw_publish);
}

/// One failing source never blocks the others.
#[tokio::test]
async fn partial_failure_merges_healthy_sources() {
    let hub = IntegrationHub::with_defaults();
    let news = Arc::new(StaticFeedAdapter::inline("news", headlines(3), TTL));
    news.set_failure(Some("dns")).await;
    hub.register_data_source(news).await.unwrap();
    hub.register_data_source(Arc::new(StaticFeedAdapter::inline("odds", games(2), TTL)))
        .await
        .unwrap();

    let snapshot = hub.sync_once().await;
    assert_eq!(snapshot.odds.len(), 2);
    assert!(snapshot.news.is_empty());
    assert_eq!(hub.recent_errors().await.len(), 1);
}

/// Disconnected adapters are reported as failures without a fetch.
#[tokio::test]
async fn disconnected_adapter_is_not_fetched() {
    let hub = IntegrationHub::with_defaults();
    let odds = Arc::new(StaticFeedAdapter::inline("odds", games(1), TTL));
    hub.register_data_source(odds.clone()).await.unwrap();
    odds.disconnect().await.unwrap();

    hub.sync_once().await;
    assert_eq!(odds.load_count(), 0);
    let metrics = hub.get_source_metrics().await;
    assert!(metrics["odds"]
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("unavailable"));
}

/// Adapter caches absorb repeated cycles within their TTL.
#[tokio::test]
async fn adapter_cache_is_reused_across_cycles() {
    let hub = IntegrationHub::with_defaults();
    let odds = Arc::new(StaticFeedAdapter::inline("odds", games(3), TTL));
    hub.register_data_source(odds.clone()).await.unwrap();

    hub.sync_once().await;
    hub.sync_once().await;
    hub.sync_once().await;
    assert_eq!(odds.load_count(), 1);
}

/// Stopping prevents further cycles; the in-flight one still publishes.
#[tokio::test(start_paused = true)]
async fn stop_prevents_further_cycles() {
    let config = HubConfig {
        sync_interval_ms: 1_000,
        ..Default::default()
    };
    let hub = Arc::new(IntegrationHub::new(config));
    hub.register_data_source(Arc::new(StaticFeedAdapter::inline("odds", games(1), TTL)))
        .await
        .unwrap();
    let snapshots = hub.subscribe();

    assert!(hub.start_real_time_sync());
    assert!(!hub.start_real_time_sync());

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    hub.stop_real_time_sync();
    hub.join_sync_loop().await;

    let generation = hub.get_integrated_data().generation;
    assert_eq!(generation, 3);
    assert!(snapshots.has_changed().unwrap());
    assert!(!hub.is_running());
    assert_eq!(hub.phase(), SyncPhase::Idle);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(hub.get_integrated_data().generation, generation);
}

#[tokio::test]
async fn zero_sync_interval_rejected() {
    let hub = IntegrationHub::with_defaults();
    assert!(matches!(
        hub.set_sync_interval(0),
        Err(CourtsideError::Validation(_))
    ));
    hub.set_sync_interval(250).unwrap();
    assert_eq!(hub.sync_interval(), Duration::from_millis(250));
}

/// Restarting while a cycle is in flight leaves exactly one loop polling.
#[tokio::test(start_paused = true)]
async fn restart_during_cycle_keeps_single_loop() {
    let config = HubConfig {
        sync_interval_ms: 10_000,
        ..Default::default()
    };
    let hub = Arc::new(IntegrationHub::new(config));
    let feed = Arc::new(SlowOddsFeed::new(Duration::from_millis(500)));
    hub.register_data_source(feed.clone()).await.unwrap();

    assert!(hub.start_real_time_sync());
    tokio::time::sleep(Duration::from_millis(100)).await;
    hub.stop_real_time_sync();
    assert!(hub.start_real_time_sync());

    tokio::time::sleep(Duration::from_secs(60)).await;
    hub.stop_real_time_sync();
    hub.join_sync_loop().await;

    // one fetch from the superseded loop, then one cycle every ~10.5s
    let fetches = feed.fetches();
    assert!(fetches <= 8, "two sync loops polling: {fetches} fetches");
    assert!(fetches >= 6, "restarted loop stalled: {fetches} fetches");

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(feed.fetches(), fetches);
}

/// Unregistered sources keep their entries until a same-id source replaces them.
#[tokio::test]
async fn unregistered_source_entries_carry_forward() {
    let hub = IntegrationHub::with_defaults();
    hub.register_data_source(Arc::new(StaticFeedAdapter::inline("odds", games(5), TTL)))
        .await
        .unwrap();
    hub.sync_once().await;

    assert!(hub.unregister_data_source("odds").await.unwrap());
    assert!(!hub.unregister_data_source("odds").await.unwrap());
    assert!(hub.source_ids().await.is_empty());

    let carried = hub.sync_once().await;
    assert_eq!(carried.odds.len(), 5);
    assert!(carried.odds.values().all(|entry| entry.source == "odds"));

    hub.register_data_source(Arc::new(StaticFeedAdapter::inline("odds", games(2), TTL)))
        .await
        .unwrap();
    let replaced = hub.sync_once().await;
    let ids: Vec<&str> = replaced.odds.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["game-0", "game-1"]);
}

/// Availability checks reflect each adapter's health.
#[tokio::test]
async fn availability_reports_failing_adapter() {
    let hub = IntegrationHub::with_defaults();
    let news = Arc::new(StaticFeedAdapter::inline("news", headlines(1), TTL));
    news.set_failure(Some("feed down")).await;
    hub.register_data_source(news.clone()).await.unwrap();
    hub.register_data_source(Arc::new(StaticFeedAdapter::inline("odds", games(1), TTL)))
        .await
        .unwrap();

    let availability = hub.check_availability().await;
    assert_eq!(availability.len(), 2);
    assert_eq!(availability["news"], false);
    assert_eq!(availability["odds"], true);

    news.set_failure(None).await;
    assert!(hub.check_availability().await["news"]);
}
