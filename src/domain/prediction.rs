use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Flat numeric encoding of one entity plus context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
    /// Features emitted as 0 because their source data was absent
    missing: BTreeSet<String>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a feature computed from real data
    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
        self.missing.remove(name);
    }

    /// Emit 0 for a feature whose inputs were absent
    pub fn set_missing(&mut self, name: &str) {
        self.values.insert(name.to_string(), 0.0);
        self.missing.insert(name.to_string());
    }

    pub fn get(&self, name: &str) -> f64 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    /// Whether the feature exists and came from real data
    pub fn is_present(&self, name: &str) -> bool {
        self.values.contains_key(name) && !self.missing.contains(name)
    }

    pub fn present_count(&self) -> usize {
        self.values
            .keys()
            .filter(|k| !self.missing.contains(*k))
            .count()
    }

    pub fn values(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    pub fn missing(&self) -> &BTreeSet<String> {
        &self.missing
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One model's scored output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model_name: String,
    /// Model weight at scoring time
    pub weight: f64,
    pub prediction: f64,
    pub confidence: f64,
    /// feature -> signed contribution to (prediction - baseline)
    pub feature_attribution: BTreeMap<String, f64>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// One tier riskier, saturating at High
    pub fn escalate(&self) -> RiskLevel {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium | RiskLevel::High => RiskLevel::High,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorDirection {
    Positive,
    Negative,
}

/// Aggregated feature impact across the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFactor {
    pub feature: String,
    pub impact: f64,
    pub direction: FactorDirection,
}

/// Combined recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub id: Uuid,
    pub entity_id: String,
    pub market: String,
    pub final_prediction: f64,
    pub confidence: f64,
    pub consensus_score: f64,
    pub value_edge: f64,
    pub kelly_fraction: f64,
    /// Fraction of bankroll to stake
    pub recommended_stake: f64,
    /// Stake in USD when a bankroll is configured
    pub stake_usd: Option<Decimal>,
    pub risk_level: RiskLevel,
    pub ranked_factors: Vec<RankedFactor>,
    pub model_predictions: Vec<ModelPrediction>,
    /// Passes the configured confidence and edge thresholds
    pub actionable: bool,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_presence() {
        let mut features = FeatureVector::new();
        features.set("elo_diff", 0.2);
        features.set_missing("line_movement");

        assert!(features.is_present("elo_diff"));
        assert!(!features.is_present("line_movement"));
        assert!(!features.is_present("unknown"));
        assert_eq!(features.get("line_movement"), 0.0);
        assert_eq!(features.present_count(), 1);
        assert_eq!(features.len(), 2);

        features.set("line_movement", 0.05);
        assert!(features.is_present("line_movement"));
        assert_eq!(features.present_count(), 2);
    }

    #[test]
    fn test_risk_escalation_saturates() {
        assert_eq!(RiskLevel::Low.escalate(), RiskLevel::Medium);
        assert_eq!(RiskLevel::High.escalate(), RiskLevel::High);
    }
}
