//! Feature Engineering
//!
//! Turns one raw `EntityRecord` into a flat `FeatureVector`. Pure and
//! infallible: a missing player, market or environment block emits 0 for
//! the features it feeds and marks them missing, so downstream models can
//! discount their confidence.

use serde::{Deserialize, Serialize};

use crate::domain::{EntityRecord, FeatureVector, MarketState, PlayerContext};

pub const RECENT_FORM: &str = "recent_form";
pub const FORM_VS_AVERAGE: &str = "form_vs_average";
pub const REST_IMPACT: &str = "rest_impact";
pub const LINE_MOVEMENT: &str = "line_movement";
pub const ELO_DIFF: &str = "elo_diff";
pub const INJURY_IMPACT: &str = "injury_impact";
pub const IMPLIED_PROBABILITY: &str = "implied_probability";
pub const HOME_ADVANTAGE: &str = "home_advantage";
pub const SENTIMENT: &str = "sentiment";

/// Every feature the engineer emits
pub const ALL_FEATURES: [&str; 9] = [
    RECENT_FORM,
    FORM_VS_AVERAGE,
    REST_IMPACT,
    LINE_MOVEMENT,
    ELO_DIFF,
    INJURY_IMPACT,
    IMPLIED_PROBABILITY,
    HOME_ADVANTAGE,
    SENTIMENT,
];

/// Rating assumed when an Elo value is absent
pub const DEFAULT_ELO: f64 = 1500.0;

/// Tunables for feature computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Number of recent games considered
    pub form_window: usize,
    /// Weight decay per game going back in time
    pub form_decay: f64,
    /// Performance value that maps to a form of 1.0
    pub form_scale: f64,
    pub back_to_back_penalty: f64,
    pub rest_bonus_per_day: f64,
    pub max_rest_bonus: f64,
    pub optimal_rest_days: f64,
    pub rust_penalty_per_day: f64,
    pub min_rest_impact: f64,
    pub elo_scale: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            form_window: 5,
            form_decay: 0.85,
            form_scale: 40.0,
            back_to_back_penalty: -0.15,
            rest_bonus_per_day: 0.05,
            max_rest_bonus: 0.10,
            optimal_rest_days: 3.0,
            rust_penalty_per_day: 0.02,
            min_rest_impact: -0.10,
            elo_scale: 400.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn engineer(&self, record: &EntityRecord) -> FeatureVector {
        let mut features = FeatureVector::new();
        self.player_features(record.player.as_ref(), &mut features);
        self.market_features(record.market.as_ref(), &mut features);
        self.environment_features(record, &mut features);
        features
    }

    fn player_features(&self, player: Option<&PlayerContext>, out: &mut FeatureVector) {
        let Some(player) = player else {
            for name in [RECENT_FORM, FORM_VS_AVERAGE, REST_IMPACT, SENTIMENT] {
                out.set_missing(name);
            }
            return;
        };

        match self.weighted_recent(&player.recent_games) {
            Some(recent) => {
                out.set(RECENT_FORM, (recent / self.config.form_scale).clamp(0.0, 1.0));
                match player.season_average.filter(|avg| *avg != 0.0) {
                    Some(avg) => out.set(FORM_VS_AVERAGE, ((recent - avg) / avg).clamp(-1.0, 1.0)),
                    None => out.set_missing(FORM_VS_AVERAGE),
                }
            }
            None => {
                out.set_missing(RECENT_FORM);
                out.set_missing(FORM_VS_AVERAGE);
            }
        }

        match player.rest_days {
            Some(days) => out.set(REST_IMPACT, self.rest_impact(days)),
            None => out.set_missing(REST_IMPACT),
        }

        match player.sentiment.filter(|s| s.is_finite()) {
            Some(score) => out.set(SENTIMENT, score.clamp(-1.0, 1.0)),
            None => out.set_missing(SENTIMENT),
        }
    }

    fn market_features(&self, market: Option<&MarketState>, out: &mut FeatureVector) {
        let Some(market) = market else {
            out.set_missing(LINE_MOVEMENT);
            out.set_missing(IMPLIED_PROBABILITY);
            return;
        };

        out.set(LINE_MOVEMENT, line_movement(&market.line_history));

        match market.implied().filter(|p| p.is_finite()) {
            Some(p) => out.set(IMPLIED_PROBABILITY, p.clamp(0.0, 1.0)),
            None => out.set_missing(IMPLIED_PROBABILITY),
        }
    }

    fn environment_features(&self, record: &EntityRecord, out: &mut FeatureVector) {
        let Some(env) = record.environment.as_ref() else {
            for name in [ELO_DIFF, INJURY_IMPACT, HOME_ADVANTAGE] {
                out.set_missing(name);
            }
            return;
        };

        let home = env.home_elo.unwrap_or(DEFAULT_ELO);
        let away = env.away_elo.unwrap_or(DEFAULT_ELO);
        out.set(ELO_DIFF, ((home - away) / self.config.elo_scale).clamp(-1.0, 1.0));

        let impact: f64 = env
            .injuries
            .iter()
            .map(|i| i.importance.clamp(0.0, 1.0) * i.status.severity_multiplier())
            .sum();
        out.set(INJURY_IMPACT, impact.clamp(0.0, 1.0));

        match env.is_home {
            Some(true) => out.set(HOME_ADVANTAGE, 1.0),
            Some(false) => out.set(HOME_ADVANTAGE, 0.0),
            None => out.set_missing(HOME_ADVANTAGE),
        }
    }

    /// Recency-weighted mean of the last `form_window` games
    fn weighted_recent(&self, games: &[f64]) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        let mut weight = 1.0;

        for value in games
            .iter()
            .filter(|v| v.is_finite())
            .take(self.config.form_window)
        {
            weighted += value * weight;
            total_weight += weight;
            weight *= self.config.form_decay;
        }

        (total_weight > 0.0).then(|| weighted / total_weight)
    }

    fn rest_impact(&self, rest_days: f64) -> f64 {
        let c = &self.config;
        if rest_days <= 1.0 {
            return c.back_to_back_penalty;
        }

        let bonus_days = rest_days.min(c.optimal_rest_days) - 1.0;
        let bonus = (bonus_days * c.rest_bonus_per_day).min(c.max_rest_bonus);
        if rest_days <= c.optimal_rest_days {
            return bonus;
        }

        let rust = (rest_days - c.optimal_rest_days) * c.rust_penalty_per_day;
        (bonus - rust).max(c.min_rest_impact)
    }
}

/// Relative change from the earliest to the latest line
fn line_movement(history: &[f64]) -> f64 {
    match (history.first(), history.last()) {
        (Some(&first), Some(&last)) if first != 0.0 && first.is_finite() && last.is_finite() => {
            ((last - first) / first).clamp(-1.0, 1.0)
        }
        _ => 0.0,
    }
}
