//! Ensemble Combiner
//!
//! Folds per-model predictions into one decision: weighted value and
//! confidence, consensus, edge against the market, a Kelly-sized stake
//! adjusted for risk tier, and the ranked factors behind it.
//!
//! Everything here is deterministic for a given input.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use super::rules::RuleAction;
use crate::config::RiskConfig;
use crate::domain::{
    EnsemblePrediction, FactorDirection, MarketContext, ModelPrediction, RankedFactor, RiskLevel,
};
use crate::error::{CourtsideError, Result};

/// Reference probability when the market gives none
pub const NEUTRAL_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct EnsembleCombiner {
    risk: RiskConfig,
    top_factors: usize,
}

impl EnsembleCombiner {
    pub fn new(risk: RiskConfig, top_factors: usize) -> Self {
        Self { risk, top_factors }
    }

    pub fn risk_config(&self) -> &RiskConfig {
        &self.risk
    }

    pub fn combine(
        &self,
        entity_id: &str,
        market: &str,
        predictions: Vec<ModelPrediction>,
        context: MarketContext,
    ) -> Result<EnsemblePrediction> {
        if predictions.is_empty() {
            return Err(CourtsideError::NoScorableModels { attempted: 0 });
        }

        let weights = normalized_weights(&predictions);
        let final_prediction: f64 = predictions
            .iter()
            .zip(&weights)
            .map(|(p, w)| p.prediction * w)
            .sum();
        let confidence: f64 = predictions
            .iter()
            .zip(&weights)
            .map(|(p, w)| p.confidence * w)
            .sum::<f64>()
            .clamp(0.0, 1.0);

        let values: Vec<f64> = predictions.iter().map(|p| p.prediction).collect();
        let consensus_score = self.consensus(&values);

        let reference = reference_probability(context);
        let value_edge = final_prediction - reference;
        let kelly_fraction = self.kelly(final_prediction, reference, context.decimal_odds);

        let score = self.risk_score(confidence, consensus_score, value_edge);
        let risk_level = self.risk_level(score);
        let recommended_stake = self.stake_for(kelly_fraction, risk_level);

        let ranked_factors = rank_factors(&predictions, &weights, self.top_factors);
        let actionable =
            confidence >= self.risk.min_confidence && value_edge >= self.risk.min_edge;

        debug!(
            entity = entity_id,
            market,
            final_prediction,
            confidence,
            consensus_score,
            value_edge,
            risk_score = score,
            risk = %risk_level,
            "combined {} model predictions",
            predictions.len()
        );

        Ok(EnsemblePrediction {
            id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            market: market.to_string(),
            final_prediction,
            confidence,
            consensus_score,
            value_edge,
            kelly_fraction,
            recommended_stake,
            stake_usd: self.stake_usd(recommended_stake),
            risk_level,
            ranked_factors,
            model_predictions: predictions,
            actionable,
            generated_at: Utc::now(),
        })
    }

    /// 1 - min(1, sensitivity * population variance)
    pub fn consensus(&self, values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 1.0;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        1.0 - (self.risk.consensus_sensitivity * variance).min(1.0)
    }

    /// Kelly fraction for win probability `p`, floored at 0 and capped
    pub fn kelly(&self, p: f64, reference: f64, decimal_odds: Option<f64>) -> f64 {
        let b = match decimal_odds.filter(|o| o.is_finite() && *o > 1.0) {
            Some(odds) => odds - 1.0,
            None if reference > 0.0 && reference < 1.0 => 1.0 / reference - 1.0,
            None => return 0.0,
        };
        if b <= 0.0 {
            return 0.0;
        }

        let q = 1.0 - p;
        let raw = (b * p - q) / b;
        if !raw.is_finite() {
            return 0.0;
        }
        raw.max(0.0).min(self.risk.max_kelly_fraction)
    }

    pub fn risk_score(&self, confidence: f64, consensus: f64, edge: f64) -> f64 {
        let edge_term = (edge.abs() / self.risk.edge_expectation).min(1.0);
        0.4 * (1.0 - confidence) + 0.4 * (1.0 - consensus) + 0.2 * edge_term
    }

    pub fn risk_level(&self, score: f64) -> RiskLevel {
        if score < self.risk.low_risk_threshold {
            RiskLevel::Low
        } else if score < self.risk.high_risk_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    /// Tier-scaled Kelly, capped at the max stake fraction
    pub fn stake_for(&self, kelly: f64, level: RiskLevel) -> f64 {
        let multiplier = match level {
            RiskLevel::Low => self.risk.kelly_multiplier_low,
            RiskLevel::Medium => self.risk.kelly_multiplier_medium,
            RiskLevel::High => self.risk.kelly_multiplier_high,
        };
        (kelly * multiplier).clamp(0.0, self.risk.max_stake_fraction)
    }

    pub fn stake_usd(&self, stake: f64) -> Option<Decimal> {
        let bankroll = self.risk.bankroll_usd?;
        Decimal::from_f64_retain(stake).map(|s| (s * bankroll).round_dp(2))
    }

    /// Apply configured risk rules in order. Returns the names that fired.
    pub fn apply_rules(&self, prediction: &mut EnsemblePrediction) -> Vec<String> {
        let mut fired = Vec::new();

        for rule in &self.risk.rules {
            if !rule.matches(prediction) {
                continue;
            }
            match &rule.action {
                RuleAction::EscalateRisk => {
                    prediction.risk_level = prediction.risk_level.escalate();
                    prediction.recommended_stake = prediction
                        .recommended_stake
                        .min(self.stake_for(prediction.kelly_fraction, prediction.risk_level));
                }
                RuleAction::ScaleStake { factor } => {
                    let factor = if factor.is_finite() {
                        factor.clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    prediction.recommended_stake *= factor;
                }
                RuleAction::MarkNonActionable => prediction.actionable = false,
            }
            fired.push(rule.name.clone());
        }

        if !fired.is_empty() {
            prediction.stake_usd = self.stake_usd(prediction.recommended_stake);
            debug!(id = %prediction.id, rules = ?fired, "risk rules applied");
        }
        fired
    }
}

/// Edge reference: market probability, else 1/odds, else 0.5
pub fn reference_probability(context: MarketContext) -> f64 {
    context
        .reference_probability
        .filter(|p| p.is_finite() && *p > 0.0 && *p < 1.0)
        .or_else(|| {
            context
                .decimal_odds
                .filter(|o| o.is_finite() && *o > 1.0)
                .map(|o| 1.0 / o)
        })
        .unwrap_or(NEUTRAL_PROBABILITY)
}

/// Model weights scaled to sum to 1; equal when every weight is 0
fn normalized_weights(predictions: &[ModelPrediction]) -> Vec<f64> {
    let total: f64 = predictions.iter().map(|p| p.weight.max(0.0)).sum();
    if total > 0.0 {
        predictions
            .iter()
            .map(|p| p.weight.max(0.0) / total)
            .collect()
    } else {
        vec![1.0 / predictions.len() as f64; predictions.len()]
    }
}

fn rank_factors(predictions: &[ModelPrediction], weights: &[f64], top: usize) -> Vec<RankedFactor> {
    let mut impacts: BTreeMap<&str, f64> = BTreeMap::new();
    for (prediction, weight) in predictions.iter().zip(weights) {
        for (feature, contribution) in &prediction.feature_attribution {
            *impacts.entry(feature.as_str()).or_insert(0.0) += weight * contribution;
        }
    }

    let mut factors: Vec<RankedFactor> = impacts
        .into_iter()
        .map(|(feature, impact)| RankedFactor {
            feature: feature.to_string(),
            impact,
            direction: if impact >= 0.0 {
                FactorDirection::Positive
            } else {
                FactorDirection::Negative
            },
        })
        .collect();

    factors.sort_by(|a, b| {
        b.impact
            .abs()
            .total_cmp(&a.impact.abs())
            .then_with(|| a.feature.cmp(&b.feature))
    });
    factors.truncate(top);
    factors
}
