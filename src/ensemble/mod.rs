//! Ensemble decision engine
//!
//! EntityRecord -> FeatureEngineer -> ModelRegistry -> attribution ->
//! EnsembleCombiner -> risk rules -> decision.

pub mod attribution;
pub mod combiner;
pub mod features;
pub mod predictor;
pub mod registry;
pub mod rules;

pub use attribution::{attribute, FeatureRanges};
pub use combiner::EnsembleCombiner;
pub use features::{FeatureConfig, FeatureEngineer};
pub use predictor::{EnsemblePredictor, FeedbackRecord, PredictionEvent, RetrainReport};
pub use registry::{
    default_models, generate_model_prediction, ModelConfig, ModelFamily, ModelPerformance,
    ModelRegistry,
};
pub use rules::{Comparison, RiskRule, RuleAction, RuleMetric};
