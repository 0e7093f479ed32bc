//! Model Registry
//!
//! Holds the weighted scoring models of the ensemble and produces one
//! prediction per model per request. Each model is a family-specific
//! nudge away from a 0.5 baseline driven by the features it declares, so
//! outputs stay explainable through the attribution engine.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use super::attribution::{attribute, FeatureRanges};
use super::features::{
    ELO_DIFF, FORM_VS_AVERAGE, HOME_ADVANTAGE, IMPLIED_PROBABILITY, INJURY_IMPACT, LINE_MOVEMENT,
    RECENT_FORM, REST_IMPACT, SENTIMENT,
};
use crate::domain::{FeatureVector, ModelPrediction};
use crate::error::{CourtsideError, Result};

pub const BASELINE: f64 = 0.5;
pub const MIN_PREDICTION: f64 = 0.05;
pub const MAX_PREDICTION: f64 = 0.95;

/// Confidence added for a maximally decisive prediction
const DECISIVENESS_BONUS: f64 = 0.1;

/// Scoring approach of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Recent performance relative to baseline
    Momentum,
    /// Market-implied probability and line movement
    MarketSignal,
    /// Team strength ratings and roster availability
    Rating,
    /// Rest, venue and availability
    Situational,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Momentum => "momentum",
            ModelFamily::MarketSignal => "market_signal",
            ModelFamily::Rating => "rating",
            ModelFamily::Situational => "situational",
        }
    }

    /// Signed shift from the baseline. `v(name, neutral)` yields the
    /// feature value, or `neutral` when the model lacks it.
    fn nudge(&self, v: impl Fn(&str, f64) -> f64) -> f64 {
        match self {
            ModelFamily::Momentum => {
                0.35 * (v(RECENT_FORM, 0.5) - 0.5)
                    + 0.15 * v(FORM_VS_AVERAGE, 0.0)
                    + 0.05 * v(SENTIMENT, 0.0)
            }
            ModelFamily::MarketSignal => {
                (v(IMPLIED_PROBABILITY, 0.5) - 0.5) + 0.15 * v(LINE_MOVEMENT, 0.0)
            }
            ModelFamily::Rating => {
                0.30 * v(ELO_DIFF, 0.0) + 0.08 * (v(HOME_ADVANTAGE, 0.5) - 0.5)
                    - 0.15 * v(INJURY_IMPACT, 0.0)
            }
            ModelFamily::Situational => {
                0.50 * v(REST_IMPACT, 0.0) + 0.08 * (v(HOME_ADVANTAGE, 0.5) - 0.5)
                    - 0.20 * v(INJURY_IMPACT, 0.0)
                    + 0.05 * v(SENTIMENT, 0.0)
            }
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracked model quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub log_loss: f64,
    /// Resolved outcomes the metrics were computed from
    pub samples: usize,
}

impl Default for ModelPerformance {
    fn default() -> Self {
        Self {
            accuracy: 0.6,
            precision: 0.6,
            recall: 0.6,
            log_loss: std::f64::consts::LN_2,
            samples: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub family: ModelFamily,
    /// Unnormalized weight; active weights are derived from it
    pub base_weight: f64,
    /// Normalized weight, 0 while inactive
    pub weight: f64,
    pub active: bool,
    pub features: Vec<String>,
    pub feature_importances: BTreeMap<String, f64>,
    pub performance: ModelPerformance,
}

impl ModelConfig {
    pub fn new(name: &str, family: ModelFamily, base_weight: f64, features: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            family,
            base_weight,
            weight: 0.0,
            active: true,
            features: features.iter().map(|(f, _)| f.to_string()).collect(),
            feature_importances: features
                .iter()
                .map(|(f, imp)| (f.to_string(), *imp))
                .collect(),
            performance: ModelPerformance::default(),
        }
    }
}

/// Score one model against a feature vector.
///
/// Fails when none of the model's declared features carry real data or
/// when any declared value is non-finite.
pub fn generate_model_prediction<R: Rng>(
    model: &ModelConfig,
    features: &FeatureVector,
    ranges: &FeatureRanges,
    rng: &mut R,
    noise_amplitude: f64,
) -> Result<ModelPrediction> {
    let start = Instant::now();
    let scoring_error = |reason: String| CourtsideError::ModelScoring {
        model: model.name.clone(),
        reason,
    };

    if model.features.is_empty() {
        return Err(scoring_error("no declared features".to_string()));
    }
    if let Some(bad) = model
        .features
        .iter()
        .find(|f| !features.get(f).is_finite())
    {
        return Err(scoring_error(format!("non-finite value for {}", bad)));
    }

    let present = model
        .features
        .iter()
        .filter(|f| features.is_present(f))
        .count();
    if present == 0 {
        return Err(scoring_error("no declared feature present".to_string()));
    }

    let declared = |name: &str, neutral: f64| {
        if model.features.iter().any(|f| f == name) && features.is_present(name) {
            features.get(name)
        } else {
            neutral
        }
    };

    let mut prediction = BASELINE + model.family.nudge(declared);
    if noise_amplitude > 0.0 {
        prediction += rng.gen_range(-noise_amplitude..=noise_amplitude);
    }
    if !prediction.is_finite() {
        return Err(scoring_error("non-finite prediction".to_string()));
    }
    let prediction = prediction.clamp(MIN_PREDICTION, MAX_PREDICTION);

    let coverage = present as f64 / model.features.len() as f64;
    let decisiveness =
        DECISIVENESS_BONUS * (prediction - BASELINE).abs() / (MAX_PREDICTION - BASELINE);
    let confidence = ((model.performance.accuracy + decisiveness) * coverage).clamp(0.0, 1.0);

    let feature_attribution = attribute(
        &model.feature_importances,
        features,
        ranges,
        prediction - BASELINE,
    );

    Ok(ModelPrediction {
        model_name: model.name.clone(),
        weight: model.weight,
        prediction,
        confidence,
        feature_attribution,
        latency_ms: start.elapsed().as_millis() as u64,
    })
}

/// Registered models keyed by name
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelConfig>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four standard models
    pub fn with_default_models() -> Self {
        let mut registry = Self::new();
        for model in default_models() {
            registry.models.insert(model.name.clone(), model);
        }
        registry.rebalance();
        registry
    }

    pub fn register(&mut self, model: ModelConfig) -> Result<()> {
        if self.models.contains_key(&model.name) {
            return Err(CourtsideError::Validation(format!(
                "model already registered: {}",
                model.name
            )));
        }
        if !model.base_weight.is_finite() || model.base_weight < 0.0 {
            return Err(CourtsideError::Validation(format!(
                "model {} has invalid weight {}",
                model.name, model.base_weight
            )));
        }
        self.models.insert(model.name.clone(), model);
        self.rebalance();
        Ok(())
    }

    pub fn activate(&mut self, name: &str) -> Result<()> {
        self.set_active(name, true)
    }

    pub fn deactivate(&mut self, name: &str) -> Result<()> {
        self.set_active(name, false)
    }

    fn set_active(&mut self, name: &str, active: bool) -> Result<()> {
        let model = self
            .models
            .get_mut(name)
            .ok_or_else(|| CourtsideError::ModelNotFound(name.to_string()))?;
        model.active = active;
        self.rebalance();
        Ok(())
    }

    /// Normalize active weights to sum to 1; inactive weights become 0.
    /// Active models split evenly when every base weight is 0.
    pub fn rebalance(&mut self) {
        let active = self.models.values().filter(|m| m.active).count();
        let total: f64 = self
            .models
            .values()
            .filter(|m| m.active)
            .map(|m| m.base_weight)
            .sum();

        for model in self.models.values_mut() {
            model.weight = match (model.active, total > 0.0) {
                (false, _) => 0.0,
                (true, true) => model.base_weight / total,
                (true, false) => 1.0 / active as f64,
            };
        }
    }

    /// Active models in name order
    pub fn active_models(&self) -> Vec<ModelConfig> {
        self.models.values().filter(|m| m.active).cloned().collect()
    }

    pub fn all_models(&self) -> Vec<ModelConfig> {
        self.models.values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut ModelConfig> {
        self.models.get_mut(name)
    }

    pub fn performance(&self, name: &str) -> Result<ModelPerformance> {
        self.models
            .get(name)
            .map(|m| m.performance.clone())
            .ok_or_else(|| CourtsideError::ModelNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// The standard four-family ensemble
pub fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new(
            "momentum",
            ModelFamily::Momentum,
            0.25,
            &[(RECENT_FORM, 0.5), (FORM_VS_AVERAGE, 0.3), (SENTIMENT, 0.2)],
        ),
        ModelConfig::new(
            "market_signal",
            ModelFamily::MarketSignal,
            0.30,
            &[(IMPLIED_PROBABILITY, 0.7), (LINE_MOVEMENT, 0.3)],
        ),
        ModelConfig::new(
            "rating",
            ModelFamily::Rating,
            0.25,
            &[(ELO_DIFF, 0.5), (HOME_ADVANTAGE, 0.2), (INJURY_IMPACT, 0.3)],
        ),
        ModelConfig::new(
            "situational",
            ModelFamily::Situational,
            0.20,
            &[
                (REST_IMPACT, 0.35),
                (HOME_ADVANTAGE, 0.2),
                (INJURY_IMPACT, 0.3),
                (SENTIMENT, 0.15),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn weight_sum(registry: &ModelRegistry) -> f64 {
        registry.active_models().iter().map(|m| m.weight).sum()
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let registry = ModelRegistry::with_default_models();
        assert_eq!(registry.len(), 4);
        assert!((weight_sum(&registry) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_deactivate_renormalizes() {
        let mut registry = ModelRegistry::with_default_models();
        registry.deactivate("market_signal").unwrap();
        assert_eq!(registry.active_models().len(), 3);
        assert!((weight_sum(&registry) - 1.0).abs() < 1e-12);
        assert_eq!(registry.get("market_signal").unwrap().weight, 0.0);

        registry.activate("market_signal").unwrap();
        assert!((registry.get("market_signal").unwrap().weight - 0.30).abs() < 1e-12);
        assert!(matches!(
            registry.deactivate("missing"),
            Err(CourtsideError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_zero_base_weights_split_evenly() {
        let mut registry = ModelRegistry::new();
        registry
            .register(ModelConfig::new("a", ModelFamily::Rating, 0.0, &[(ELO_DIFF, 1.0)]))
            .unwrap();
        registry
            .register(ModelConfig::new("b", ModelFamily::Rating, 0.0, &[(ELO_DIFF, 1.0)]))
            .unwrap();
        assert_eq!(registry.get("a").unwrap().weight, 0.5);
        assert!(registry
            .register(ModelConfig::new("a", ModelFamily::Rating, 1.0, &[]))
            .is_err());
    }

    #[test]
    fn test_prediction_is_deterministic_without_noise() {
        let model = ModelConfig::new("rating", ModelFamily::Rating, 1.0, &[(ELO_DIFF, 1.0)]);
        let mut features = FeatureVector::new();
        features.set(ELO_DIFF, 0.5);
        let mut rng = StdRng::seed_from_u64(7);

        let p = generate_model_prediction(&model, &features, &FeatureRanges::default(), &mut rng, 0.0)
            .unwrap();
        assert!((p.prediction - 0.65).abs() < 1e-12);
        // full coverage: accuracy 0.6 + bonus 0.1 * 0.15 / 0.45
        assert!((p.confidence - (0.6 + 0.1 / 3.0)).abs() < 1e-12);
        let explained: f64 = p.feature_attribution.values().sum();
        assert!((explained - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_noise_stays_within_bounds() {
        let model = ModelConfig::new("m", ModelFamily::MarketSignal, 1.0, &[(IMPLIED_PROBABILITY, 1.0)]);
        let mut features = FeatureVector::new();
        features.set(IMPLIED_PROBABILITY, 0.97);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let p = generate_model_prediction(&model, &features, &FeatureRanges::default(), &mut rng, 0.05)
                .unwrap();
            assert!((MIN_PREDICTION..=MAX_PREDICTION).contains(&p.prediction));
        }
    }

    #[test]
    fn test_missing_features_fail_or_discount() {
        let model = default_models().remove(2);
        let mut rng = StdRng::seed_from_u64(3);
        let ranges = FeatureRanges::default();

        let mut features = FeatureVector::new();
        features.set_missing(ELO_DIFF);
        let err = generate_model_prediction(&model, &features, &ranges, &mut rng, 0.0);
        assert!(matches!(err, Err(CourtsideError::ModelScoring { .. })));

        features.set(ELO_DIFF, 0.0);
        let p = generate_model_prediction(&model, &features, &ranges, &mut rng, 0.0).unwrap();
        assert_eq!(p.prediction, BASELINE);
        assert!((p.confidence - 0.6 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_feature_rejected() {
        let model = ModelConfig::new("r", ModelFamily::Rating, 1.0, &[(ELO_DIFF, 1.0)]);
        let mut features = FeatureVector::new();
        features.set(ELO_DIFF, f64::NAN);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(
            generate_model_prediction(&model, &features, &FeatureRanges::default(), &mut rng, 0.0)
                .is_err()
        );
    }
}
