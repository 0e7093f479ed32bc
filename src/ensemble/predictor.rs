//! Ensemble Predictor
//!
//! Request surface of the decision engine. A request is checked for
//! staleness, engineered into features, scored by every active model,
//! combined, filtered through risk rules, then cached per (entity, market)
//! and recorded for later retraining.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::attribution::FeatureRanges;
use super::combiner::EnsembleCombiner;
use super::features::{FeatureConfig, FeatureEngineer};
use super::registry::{generate_model_prediction, ModelConfig, ModelPerformance, ModelRegistry};
use crate::config::{EnsembleConfig, RiskConfig};
use crate::domain::{EnsemblePrediction, FeatureVector, PredictionRequest, RiskLevel};
use crate::error::{CourtsideError, Result};

/// Probability clamp used when scoring log loss
const LOG_LOSS_EPSILON: f64 = 1e-6;

/// Bounds on how far one retrain can move a model's base weight
const MIN_WEIGHT_RATIO: f64 = 0.5;
const MAX_WEIGHT_RATIO: f64 = 2.0;

/// Broadcast after every freshly generated decision
#[derive(Debug, Clone)]
pub struct PredictionEvent {
    pub prediction_id: Uuid,
    pub entity_id: String,
    pub market: String,
    pub final_prediction: f64,
    pub risk_level: RiskLevel,
    pub actionable: bool,
    pub generated_at: DateTime<Utc>,
}

/// Per-model outputs of one decision, later joined with its outcome
#[derive(Debug, Clone)]
pub struct FeedbackRecord {
    pub prediction_id: Uuid,
    pub model_outputs: Vec<(String, f64)>,
    pub final_prediction: f64,
    pub outcome: Option<bool>,
    pub recorded_at: DateTime<Utc>,
}

/// What a retrain changed
#[derive(Debug, Clone, Default)]
pub struct RetrainReport {
    pub updated: Vec<String>,
    pub samples: usize,
}

struct CachedPrediction {
    prediction: EnsemblePrediction,
    stored_at: Instant,
}

/// Clears the retrain flag when dropped
struct RetrainGuard<'a>(&'a AtomicBool);

impl Drop for RetrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct EnsemblePredictor {
    config: EnsembleConfig,
    engineer: FeatureEngineer,
    ranges: FeatureRanges,
    registry: RwLock<ModelRegistry>,
    combiner: EnsembleCombiner,
    rng: std::sync::Mutex<StdRng>,
    cache: DashMap<(String, String), CachedPrediction>,
    feedback: RwLock<VecDeque<FeedbackRecord>>,
    retraining: AtomicBool,
    event_tx: broadcast::Sender<PredictionEvent>,
}

impl EnsemblePredictor {
    pub fn new(config: EnsembleConfig, risk: RiskConfig, registry: ModelRegistry) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (event_tx, _) = broadcast::channel(256);

        Self {
            combiner: EnsembleCombiner::new(risk, config.top_factors),
            engineer: FeatureEngineer::new(FeatureConfig::default()),
            ranges: FeatureRanges::default(),
            registry: RwLock::new(registry),
            rng: std::sync::Mutex::new(rng),
            cache: DashMap::new(),
            feedback: RwLock::new(VecDeque::new()),
            retraining: AtomicBool::new(false),
            event_tx,
            config,
        }
    }

    /// Default config with the standard model set
    pub fn with_defaults() -> Self {
        Self::new(
            EnsembleConfig::default(),
            RiskConfig::default(),
            ModelRegistry::with_default_models(),
        )
    }

    pub fn with_feature_config(mut self, config: FeatureConfig) -> Self {
        self.engineer = FeatureEngineer::new(config);
        self
    }

    pub fn with_ranges(mut self, ranges: FeatureRanges) -> Self {
        self.ranges = ranges;
        self
    }

    pub fn events(&self) -> broadcast::Receiver<PredictionEvent> {
        self.event_tx.subscribe()
    }

    /// Engineer features for a request, applying its overrides
    pub fn features_for(&self, request: &PredictionRequest) -> FeatureVector {
        let mut features = self.engineer.engineer(&request.context);
        for (name, value) in &request.features {
            if value.is_finite() {
                features.set(name, *value);
            } else {
                warn!(feature = %name, "ignoring non-finite feature override");
            }
        }
        features
    }

    pub async fn generate_prediction(&self, request: PredictionRequest) -> Result<EnsemblePrediction> {
        let age_secs = (Utc::now() - request.timestamp).num_seconds();
        if age_secs > self.config.max_input_age_secs {
            return Err(CourtsideError::StaleData {
                age_secs,
                max_age_secs: self.config.max_input_age_secs,
            });
        }

        let key = request.cache_key();
        if let Some(hit) = self.cached(&key) {
            debug!(entity = %key.0, market = %key.1, "prediction cache hit");
            return Ok(hit);
        }

        let features = self.features_for(&request);
        let available = features.present_count();
        if available < self.config.min_features {
            return Err(CourtsideError::InsufficientFeatures {
                available,
                required: self.config.min_features,
            });
        }

        let models = self.registry.read().await.active_models();
        if models.is_empty() {
            return Err(CourtsideError::NoScorableModels { attempted: 0 });
        }

        let predictions = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| CourtsideError::Internal("prediction rng lock poisoned".to_string()))?;
            let mut scored = Vec::with_capacity(models.len());
            for model in &models {
                match generate_model_prediction(
                    model,
                    &features,
                    &self.ranges,
                    &mut *rng,
                    self.config.noise_amplitude,
                ) {
                    Ok(p) => scored.push(p),
                    Err(e) => warn!(model = %model.name, "model excluded: {}", e),
                }
            }
            scored
        };

        if predictions.is_empty() {
            return Err(CourtsideError::NoScorableModels {
                attempted: models.len(),
            });
        }

        let mut decision = self.combiner.combine(
            &request.entity_id,
            &request.market,
            predictions,
            request.market_context(),
        )?;
        self.combiner.apply_rules(&mut decision);

        self.cache.insert(
            key,
            CachedPrediction {
                prediction: decision.clone(),
                stored_at: Instant::now(),
            },
        );
        self.record_feedback(&decision).await;

        let _ = self.event_tx.send(PredictionEvent {
            prediction_id: decision.id,
            entity_id: decision.entity_id.clone(),
            market: decision.market.clone(),
            final_prediction: decision.final_prediction,
            risk_level: decision.risk_level,
            actionable: decision.actionable,
            generated_at: decision.generated_at,
        });

        info!(
            id = %decision.id,
            entity = %decision.entity_id,
            market = %decision.market,
            prediction = decision.final_prediction,
            confidence = decision.confidence,
            edge = decision.value_edge,
            stake = decision.recommended_stake,
            risk = %decision.risk_level,
            actionable = decision.actionable,
            "ensemble decision"
        );
        Ok(decision)
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config.prediction_cache_ttl_secs)
    }

    fn cached(&self, key: &(String, String)) -> Option<EnsemblePrediction> {
        let entry = self.cache.get(key)?;
        (entry.stored_at.elapsed() < self.cache_ttl()).then(|| entry.prediction.clone())
    }

    /// Drop expired cached decisions; returns how many were removed
    pub fn evict_expired(&self) -> usize {
        let ttl = self.cache_ttl();
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before.saturating_sub(self.cache.len())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn record_feedback(&self, decision: &EnsemblePrediction) {
        let mut feedback = self.feedback.write().await;
        if feedback.len() >= self.config.max_feedback_history.max(1) {
            feedback.pop_front();
        }
        feedback.push_back(FeedbackRecord {
            prediction_id: decision.id,
            model_outputs: decision
                .model_predictions
                .iter()
                .map(|p| (p.model_name.clone(), p.prediction))
                .collect(),
            final_prediction: decision.final_prediction,
            outcome: None,
            recorded_at: decision.generated_at,
        });
    }

    /// Attach the real result to a past decision
    pub async fn record_outcome(&self, prediction_id: Uuid, won: bool) -> Result<()> {
        let mut feedback = self.feedback.write().await;
        let record = feedback
            .iter_mut()
            .find(|r| r.prediction_id == prediction_id)
            .ok_or_else(|| {
                CourtsideError::Validation(format!("unknown prediction id {}", prediction_id))
            })?;
        record.outcome = Some(won);
        Ok(())
    }

    pub async fn feedback_len(&self) -> usize {
        self.feedback.read().await.len()
    }

    pub async fn get_active_models(&self) -> Vec<ModelConfig> {
        self.registry.read().await.active_models()
    }

    pub async fn get_all_models(&self) -> Vec<ModelConfig> {
        self.registry.read().await.all_models()
    }

    pub async fn get_model_performance(&self, name: &str) -> Result<ModelPerformance> {
        self.registry.read().await.performance(name)
    }

    pub async fn register_model(&self, model: ModelConfig) -> Result<()> {
        self.registry.write().await.register(model)?;
        self.clear_cache();
        Ok(())
    }

    pub async fn activate_model(&self, name: &str) -> Result<()> {
        self.registry.write().await.activate(name)?;
        self.clear_cache();
        Ok(())
    }

    pub async fn deactivate_model(&self, name: &str) -> Result<()> {
        self.registry.write().await.deactivate(name)?;
        self.clear_cache();
        Ok(())
    }

    /// Re-derive performance and weights from resolved feedback.
    ///
    /// Rejects a concurrent call with `RetrainInProgress`. Changes are
    /// staged on a copy of the registry and swapped in only on success.
    pub async fn retrain(&self, model: Option<&str>) -> Result<RetrainReport> {
        if self.retraining.swap(true, Ordering::SeqCst) {
            return Err(CourtsideError::RetrainInProgress);
        }
        let _guard = RetrainGuard(&self.retraining);

        let resolved: Vec<FeedbackRecord> = self
            .feedback
            .read()
            .await
            .iter()
            .filter(|r| r.outcome.is_some())
            .cloned()
            .collect();
        if resolved.len() < self.config.min_feedback_for_retrain {
            return Err(CourtsideError::RetrainFailed(format!(
                "need {} resolved outcomes, have {}",
                self.config.min_feedback_for_retrain,
                resolved.len()
            )));
        }

        let mut staged = self.registry.read().await.clone();
        let targets: Vec<String> = match model {
            Some(name) => {
                if staged.get(name).is_none() {
                    return Err(CourtsideError::ModelNotFound(name.to_string()));
                }
                vec![name.to_string()]
            }
            None => staged.all_models().into_iter().map(|m| m.name).collect(),
        };

        let mut report = RetrainReport {
            updated: Vec::new(),
            samples: resolved.len(),
        };

        for name in &targets {
            let samples: Vec<(f64, bool)> = resolved
                .iter()
                .filter_map(|r| {
                    let output = r.model_outputs.iter().find(|(m, _)| m == name)?;
                    Some((output.1, r.outcome?))
                })
                .collect();
            if samples.is_empty() {
                debug!(model = %name, "no resolved feedback, skipping");
                continue;
            }

            let Some(config) = staged.get_mut(name) else {
                continue;
            };
            let performance = score_performance(&samples, &config.performance);
            let ratio = if config.performance.accuracy > 0.0 {
                (performance.accuracy / config.performance.accuracy)
                    .clamp(MIN_WEIGHT_RATIO, MAX_WEIGHT_RATIO)
            } else {
                MAX_WEIGHT_RATIO
            };
            let base_weight = config.base_weight * ratio;
            if !base_weight.is_finite() || !performance.log_loss.is_finite() {
                return Err(CourtsideError::RetrainFailed(format!(
                    "non-finite result for model {}",
                    name
                )));
            }

            config.base_weight = base_weight;
            config.performance = performance;
            report.updated.push(name.clone());
        }

        staged.rebalance();
        let active = staged.active_models();
        let total: f64 = active.iter().map(|m| m.weight).sum();
        if !active.is_empty() && (total - 1.0).abs() > 1e-9 {
            return Err(CourtsideError::RetrainFailed(format!(
                "active weights sum to {} after retrain",
                total
            )));
        }

        *self.registry.write().await = staged;
        self.clear_cache();

        info!(
            updated = ?report.updated,
            samples = report.samples,
            "retrain complete"
        );
        Ok(report)
    }
}

/// Accuracy, precision, recall and log loss of (prediction, won) pairs,
/// thresholded at 0.5. Undefined ratios keep their previous value.
fn score_performance(samples: &[(f64, bool)], previous: &ModelPerformance) -> ModelPerformance {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    let mut correct = 0usize;
    let mut log_loss = 0.0;

    for &(p, won) in samples {
        let called = p >= 0.5;
        if called == won {
            correct += 1;
        }
        match (called, won) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
        let p = p.clamp(LOG_LOSS_EPSILON, 1.0 - LOG_LOSS_EPSILON);
        log_loss -= if won { p.ln() } else { (1.0 - p).ln() };
    }

    let n = samples.len() as f64;
    ModelPerformance {
        accuracy: correct as f64 / n,
        precision: if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            previous.precision
        },
        recall: if tp + fn_ > 0 {
            tp as f64 / (tp + fn_) as f64
        } else {
            previous.recall
        },
        log_loss: log_loss / n,
        samples: samples.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityRecord, Environment, MarketState, PlayerContext};

    fn config() -> EnsembleConfig {
        EnsembleConfig {
            noise_amplitude: 0.0,
            rng_seed: Some(42),
            min_feedback_for_retrain: 4,
            ..Default::default()
        }
    }

    fn predictor() -> EnsemblePredictor {
        EnsemblePredictor::new(config(), RiskConfig::default(), ModelRegistry::with_default_models())
    }

    fn request(entity: &str) -> PredictionRequest {
        let context = EntityRecord {
            entity_id: entity.to_string(),
            player: Some(PlayerContext {
                recent_games: vec![28.0, 31.0, 25.0],
                season_average: Some(26.0),
                rest_days: Some(2.0),
                sentiment: Some(0.3),
            }),
            market: Some(MarketState {
                line_history: vec![-3.0, -4.5],
                decimal_odds: Some(1.9),
                implied_probability: None,
            }),
            environment: Some(Environment {
                home_elo: Some(1620.0),
                away_elo: Some(1540.0),
                is_home: Some(true),
                injuries: vec![],
            }),
        };
        PredictionRequest::new(entity, "moneyline", context)
    }

    #[tokio::test]
    async fn test_full_request_produces_decision() {
        let predictor = predictor();
        let mut events = predictor.events();

        let decision = predictor.generate_prediction(request("lal-bos")).await.unwrap();
        assert_eq!(decision.model_predictions.len(), 4);
        assert!((0.0..=1.0).contains(&decision.final_prediction));
        assert!(decision.recommended_stake <= 0.05);
        assert!(!decision.ranked_factors.is_empty());

        let event = events.recv().await.unwrap();
        assert_eq!(event.prediction_id, decision.id);
        assert_eq!(predictor.feedback_len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_returns_same_decision() {
        let predictor = predictor();
        let first = predictor.generate_prediction(request("a")).await.unwrap();
        let second = predictor.generate_prediction(request("a")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(predictor.feedback_len().await, 1);

        predictor.clear_cache();
        let third = predictor.generate_prediction(request("a")).await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_stale_request_rejected() {
        let predictor = predictor();
        let mut req = request("a");
        req.timestamp = Utc::now() - chrono::Duration::hours(1);
        let err = predictor.generate_prediction(req).await.unwrap_err();
        assert!(matches!(err, CourtsideError::StaleData { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_insufficient_features_rejected() {
        let predictor = predictor();
        let req = PredictionRequest::new("a", "moneyline", EntityRecord::default());
        let err = predictor.generate_prediction(req).await.unwrap_err();
        assert!(matches!(
            err,
            CourtsideError::InsufficientFeatures {
                available: 0,
                required: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_overrides_count_as_features() {
        let predictor = predictor();
        let mut req = PredictionRequest::new("a", "moneyline", EntityRecord::default());
        req.features.insert("elo_diff".to_string(), 0.2);
        req.features.insert("implied_probability".to_string(), 0.55);
        req.features.insert("recent_form".to_string(), 0.7);
        let decision = predictor.generate_prediction(req).await.unwrap();
        // situational declares none of the overridden features
        assert_eq!(decision.model_predictions.len(), 3);
    }

    #[tokio::test]
    async fn test_retrain_rejects_concurrent_call() {
        let predictor = predictor();
        predictor.retraining.store(true, Ordering::SeqCst);
        assert!(matches!(
            predictor.retrain(None).await,
            Err(CourtsideError::RetrainInProgress)
        ));
    }

    #[tokio::test]
    async fn test_retrain_failure_leaves_weights() {
        let predictor = predictor();
        let before: Vec<f64> = predictor
            .get_active_models()
            .await
            .iter()
            .map(|m| m.weight)
            .collect();

        let err = predictor.retrain(None).await.unwrap_err();
        assert!(matches!(err, CourtsideError::RetrainFailed(_)));

        let after: Vec<f64> = predictor
            .get_active_models()
            .await
            .iter()
            .map(|m| m.weight)
            .collect();
        assert_eq!(before, after);
        // flag cleared after failure
        assert!(!predictor.retraining.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_retrain_updates_performance() {
        let predictor = predictor();
        for i in 0..4 {
            let decision = predictor
                .generate_prediction(request(&format!("e{i}")))
                .await
                .unwrap();
            predictor.record_outcome(decision.id, i % 2 == 0).await.unwrap();
        }

        let report = predictor.retrain(Some("rating")).await.unwrap();
        assert_eq!(report.updated, vec!["rating".to_string()]);
        assert_eq!(report.samples, 4);

        let performance = predictor.get_model_performance("rating").await.unwrap();
        assert_eq!(performance.samples, 4);
        let total: f64 = predictor
            .get_active_models()
            .await
            .iter()
            .map(|m| m.weight)
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_config_reaches_engineer() {
        use crate::ensemble::features::ELO_DIFF;

        let wide = predictor().with_feature_config(FeatureConfig {
            elo_scale: 800.0,
            ..Default::default()
        });
        let narrow = predictor().features_for(&request("lal-bos"));
        let widened = wide.features_for(&request("lal-bos"));
        assert!(narrow.get(ELO_DIFF) > 0.0);
        assert!(widened.get(ELO_DIFF) < narrow.get(ELO_DIFF));
    }

    #[tokio::test]
    async fn test_custom_ranges_keep_attribution_additive() {
        let predictor = predictor().with_ranges(FeatureRanges::empty());
        let decision = predictor.generate_prediction(request("lal-bos")).await.unwrap();
        for model in &decision.model_predictions {
            if model.feature_attribution.is_empty() {
                continue;
            }
            let total: f64 = model.feature_attribution.values().sum();
            assert!((total - (model.prediction - 0.5)).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_record_outcome_unknown_id() {
        let predictor = predictor();
        assert!(predictor.record_outcome(Uuid::new_v4(), true).await.is_err());
    }

    #[test]
    fn test_score_performance() {
        let samples = [(0.7, true), (0.6, false), (0.4, false), (0.3, true)];
        let perf = score_performance(&samples, &ModelPerformance::default());
        assert_eq!(perf.accuracy, 0.5);
        assert_eq!(perf.precision, 0.5);
        assert_eq!(perf.recall, 0.5);
        assert!(perf.log_loss > 0.0);
    }
}
