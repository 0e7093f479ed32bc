//! Declarative risk rules.
//!
//! A rule is a closed predicate over one decision metric plus a tagged
//! action. Rules come from configuration and are matched, never executed.

use serde::{Deserialize, Serialize};

use crate::domain::EnsemblePrediction;

/// Decision metric a rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleMetric {
    FinalPrediction,
    Confidence,
    ConsensusScore,
    ValueEdge,
    KellyFraction,
    RecommendedStake,
    /// Number of models that contributed
    ModelCount,
}

impl RuleMetric {
    pub fn read(&self, prediction: &EnsemblePrediction) -> f64 {
        match self {
            RuleMetric::FinalPrediction => prediction.final_prediction,
            RuleMetric::Confidence => prediction.confidence,
            RuleMetric::ConsensusScore => prediction.consensus_score,
            RuleMetric::ValueEdge => prediction.value_edge,
            RuleMetric::KellyFraction => prediction.kelly_fraction,
            RuleMetric::RecommendedStake => prediction.recommended_stake,
            RuleMetric::ModelCount => prediction.model_predictions.len() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Move the decision one risk tier up
    EscalateRisk,
    /// Multiply the stake by `factor`, clamped to [0, 1]
    ScaleStake { factor: f64 },
    MarkNonActionable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub name: String,
    pub metric: RuleMetric,
    pub comparison: Comparison,
    pub threshold: f64,
    pub action: RuleAction,
}

impl RiskRule {
    pub fn matches(&self, prediction: &EnsemblePrediction) -> bool {
        let value = self.metric.read(prediction);
        value.is_finite() && self.comparison.holds(value, self.threshold)
    }
}
