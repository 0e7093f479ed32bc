use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::{DataAdapter, HttpJsonAdapter, HttpJsonConfig, StaticFeedAdapter};
use crate::config::{AppConfig, SourceConfig};
use crate::domain::{EnsemblePrediction, IntegratedData, PredictionRequest};
use crate::ensemble::{EnsemblePredictor, ModelConfig, ModelRegistry};
use crate::error::{CourtsideError, Result};
use crate::hub::{IntegrationHub, SourceMetrics};

#[derive(Parser)]
#[command(name = "courtside")]
#[command(version = "0.1.0")]
#[command(about = "Sports data integration hub and ensemble decision engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus COURTSIDE_ENV overlay)
    #[arg(short, long, default_value = "config", env = "COURTSIDE_CONFIG_DIR")]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a sync cycle across the configured sources
    Sync {
        /// Keep syncing on the configured interval until Ctrl+C
        #[arg(long)]
        watch: bool,
        /// Override the sync interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Score prediction requests from a JSON file
    Predict {
        /// File holding one request or an array of requests
        #[arg(short, long)]
        input: PathBuf,
    },
    /// List registered models and their weights
    Models,
    /// Replay resolved decisions and retrain model weights
    Retrain {
        /// Retrain a single model
        #[arg(short, long)]
        model: Option<String>,
        /// File holding an array of {request, won} records
        #[arg(short, long)]
        feedback: PathBuf,
    },
    /// Validate configuration and exit
    ValidateConfig,
}

/// One resolved decision used for retraining
#[derive(Debug, Deserialize)]
pub struct FeedbackEntry {
    pub request: PredictionRequest,
    pub won: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestFile {
    Many(Vec<PredictionRequest>),
    One(Box<PredictionRequest>),
}

/// Load config and fail on any validation error
pub fn load_config(dir: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    config
        .validate()
        .map_err(|errors| CourtsideError::Validation(errors.join("; ")))?;
    Ok(config)
}

/// Build the adapter a source definition describes
pub fn build_adapter(source: &SourceConfig) -> Result<Arc<dyn DataAdapter>> {
    let ttl = Duration::from_millis(source.cache_ttl_ms);
    match (&source.url, &source.path) {
        (Some(url), None) => {
            let mut http = HttpJsonConfig::new(&source.id, source.kind, url);
            http.cache_ttl_ms = source.cache_ttl_ms;
            http.api_key = source
                .api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok());
            Ok(Arc::new(HttpJsonAdapter::new(http)?))
        }
        (None, Some(path)) => Ok(Arc::new(StaticFeedAdapter::from_file(
            &source.id,
            source.kind,
            path.clone(),
            ttl,
        ))),
        _ => Err(CourtsideError::Validation(format!(
            "source {} must set exactly one of url or path",
            source.id
        ))),
    }
}

/// Hub with every configured source registered
pub async fn build_hub(config: &AppConfig) -> Result<Arc<IntegrationHub>> {
    let hub = Arc::new(IntegrationHub::new(config.hub.clone()));
    for source in &config.sources {
        hub.register_data_source(build_adapter(source)?).await?;
    }
    info!("hub ready with {} sources", config.sources.len());
    Ok(hub)
}

pub fn build_predictor(config: &AppConfig) -> EnsemblePredictor {
    EnsemblePredictor::new(
        config.ensemble.clone(),
        config.risk.clone(),
        ModelRegistry::with_default_models(),
    )
    .with_feature_config(config.features.clone())
}

/// Read one request or an array of requests
pub fn read_requests(path: &Path) -> Result<Vec<PredictionRequest>> {
    let content = std::fs::read_to_string(path)?;
    Ok(match serde_json::from_str::<RequestFile>(&content)? {
        RequestFile::Many(requests) => requests,
        RequestFile::One(request) => vec![*request],
    })
}

pub fn read_feedback(path: &Path) -> Result<Vec<FeedbackEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Score each request, printing decisions and skipping rejected ones
pub async fn run_predictions(
    predictor: &EnsemblePredictor,
    requests: Vec<PredictionRequest>,
) -> Vec<EnsemblePrediction> {
    let mut decisions = Vec::with_capacity(requests.len());
    for request in requests {
        let label = format!("{}/{}", request.entity_id, request.market);
        match predictor.generate_prediction(request).await {
            Ok(decision) => {
                print_prediction(&decision);
                decisions.push(decision);
            }
            Err(e) => {
                warn!(request = %label, class = %e.class(), "prediction rejected: {}", e);
                println!("\x1b[31m✗ {}: {}\x1b[0m", label, e);
            }
        }
    }
    decisions
}

pub fn print_snapshot(snapshot: &IntegratedData) {
    println!(
        "Snapshot #{} at {}",
        snapshot.generation,
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC")
    );
    println!(
        "  {} entities  odds: {}  projections: {}  sentiment: {}  injuries: {}  news: {}",
        snapshot.entity_count(),
        snapshot.odds.len(),
        snapshot.projections.len(),
        snapshot.sentiment.len(),
        snapshot.injuries.len(),
        snapshot.news.len()
    );

    let mut trends: Vec<_> = snapshot
        .trends
        .iter()
        .filter(|(_, t)| t.change != 0.0)
        .collect();
    trends.sort_by(|a, b| b.1.significance.total_cmp(&a.1.significance));
    for (metric, trend) in trends.iter().take(5) {
        println!(
            "  trend {:<40} {:+.4} (significance {:.2})",
            metric, trend.change, trend.significance
        );
    }
    for c in &snapshot.correlations {
        println!(
            "  corr  {} ~ {}: {:+.3} (n={}, significance {:.2})",
            c.source_a, c.source_b, c.correlation, c.sample_size, c.significance
        );
    }
}

pub fn print_source_metrics(metrics: &[SourceMetrics]) {
    for m in metrics {
        println!(
            "  {:<16} {:<12} latency {:>7.1}ms  errors {:>5.1}% ({:.1}% lifetime)  quality {:.2}{}",
            m.source_id,
            m.kind.as_str(),
            m.avg_latency_ms(),
            m.error_rate * 100.0,
            m.lifetime_error_rate() * 100.0,
            m.data_quality,
            m.last_error
                .as_ref()
                .map(|e| format!("  last error: {}", e))
                .unwrap_or_default()
        );
    }
}

pub fn print_prediction(decision: &EnsemblePrediction) {
    let marker = if decision.actionable {
        "\x1b[32m✓\x1b[0m"
    } else {
        "·"
    };
    println!(
        "{} {} {}  p={:.3} conf={:.2} consensus={:.2} edge={:+.3} kelly={:.3} stake={:.3}{} risk={}",
        marker,
        decision.entity_id,
        decision.market,
        decision.final_prediction,
        decision.confidence,
        decision.consensus_score,
        decision.value_edge,
        decision.kelly_fraction,
        decision.recommended_stake,
        decision
            .stake_usd
            .map(|usd| format!(" (${})", usd))
            .unwrap_or_default(),
        decision.risk_level
    );
    for factor in decision.ranked_factors.iter().take(3) {
        println!("    {:<20} {:+.4}", factor.feature, factor.impact);
    }
}

pub fn print_models(models: &[ModelConfig]) {
    println!(
        "{:<14} {:<14} {:>7} {:>7} {:>8} {:>8}",
        "model", "family", "active", "weight", "accuracy", "logloss"
    );
    for m in models {
        println!(
            "{:<14} {:<14} {:>7} {:>7.3} {:>8.3} {:>8.3}",
            m.name,
            m.family.as_str(),
            if m.active { "yes" } else { "no" },
            m.weight,
            m.performance.accuracy,
            m.performance.log_loss
        );
    }
}
