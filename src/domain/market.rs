use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::feed::InjuryStatus;

/// Player-level context for one entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerContext {
    /// Recent game performance values, most recent first
    #[serde(default)]
    pub recent_games: Vec<f64>,
    #[serde(default)]
    pub season_average: Option<f64>,
    /// Days since the last game
    #[serde(default)]
    pub rest_days: Option<f64>,
    /// Aggregated sentiment in [-1, 1]
    #[serde(default)]
    pub sentiment: Option<f64>,
}

/// Market state for the bet being evaluated
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketState {
    /// Line values, oldest first
    #[serde(default)]
    pub line_history: Vec<f64>,
    #[serde(default)]
    pub decimal_odds: Option<f64>,
    #[serde(default)]
    pub implied_probability: Option<f64>,
}

impl MarketState {
    /// Implied probability, explicit or derived from decimal odds
    pub fn implied(&self) -> Option<f64> {
        self.implied_probability.or_else(|| {
            self.decimal_odds
                .filter(|odds| *odds > 1.0)
                .map(|odds| 1.0 / odds)
        })
    }
}

/// Known injury affecting the entity's game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjuryReport {
    pub player_id: String,
    /// Player importance in [0, 1]
    pub importance: f64,
    pub status: InjuryStatus,
}

/// Game environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub home_elo: Option<f64>,
    #[serde(default)]
    pub away_elo: Option<f64>,
    #[serde(default)]
    pub is_home: Option<bool>,
    #[serde(default)]
    pub injuries: Vec<InjuryReport>,
}

/// Raw record for one entity; every sub-object is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    #[serde(default)]
    pub player: Option<PlayerContext>,
    #[serde(default)]
    pub market: Option<MarketState>,
    #[serde(default)]
    pub environment: Option<Environment>,
}

/// Request for one ensemble decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub entity_id: String,
    /// Market being priced (e.g. "moneyline", "points_over_24.5")
    pub market: String,
    /// When the input data was observed
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: EntityRecord,
    /// Precomputed features; override engineered values with the same name
    #[serde(default)]
    pub features: BTreeMap<String, f64>,
    /// Reference probability to measure edge against
    #[serde(default)]
    pub reference_probability: Option<f64>,
    /// Decimal odds available for the bet
    #[serde(default)]
    pub decimal_odds: Option<f64>,
}

impl PredictionRequest {
    pub fn new(entity_id: &str, market: &str, context: EntityRecord) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            market: market.to_string(),
            timestamp: Utc::now(),
            context,
            features: BTreeMap::new(),
            reference_probability: None,
            decimal_odds: None,
        }
    }

    /// Pricing inputs, preferring explicit request values over context
    pub fn market_context(&self) -> MarketContext {
        let market = self.context.market.as_ref();
        MarketContext {
            reference_probability: self
                .reference_probability
                .or_else(|| market.and_then(MarketState::implied)),
            decimal_odds: self
                .decimal_odds
                .or_else(|| market.and_then(|m| m.decimal_odds)),
        }
    }

    pub fn cache_key(&self) -> (String, String) {
        (self.entity_id.clone(), self.market.clone())
    }
}

/// Market inputs the combiner prices against
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub reference_probability: Option<f64>,
    pub decimal_odds: Option<f64>,
}
