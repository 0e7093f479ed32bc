//! Typed payloads produced by data adapters.
//!
//! Every adapter returns one `SourcePayload`; the hub routes it to the merge
//! function for its kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Category of data an adapter serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Odds,
    Projections,
    Sentiment,
    Injuries,
    News,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Odds => "odds",
            SourceKind::Projections => "projections",
            SourceKind::Sentiment => "sentiment",
            SourceKind::Injuries => "injuries",
            SourceKind::News => "news",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Injury designation, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjuryStatus {
    Available,
    Probable,
    Questionable,
    Doubtful,
    Out,
}

impl InjuryStatus {
    /// Share of a player's value expected to be lost
    pub fn severity_multiplier(&self) -> f64 {
        match self {
            InjuryStatus::Available => 0.0,
            InjuryStatus::Probable => 0.1,
            InjuryStatus::Questionable => 0.4,
            InjuryStatus::Doubtful => 0.75,
            InjuryStatus::Out => 1.0,
        }
    }
}

impl Default for InjuryStatus {
    fn default() -> Self {
        Self::Available
    }
}

/// One market line for a game (moneyline, spread, total...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketLine {
    /// Decimal odds offered
    pub decimal_odds: f64,
    /// Line value for spread/total markets
    #[serde(default)]
    pub line: Option<f64>,
}

impl MarketLine {
    /// Implied probability from decimal odds (no vig removal)
    pub fn implied_probability(&self) -> f64 {
        if self.decimal_odds > 1.0 {
            1.0 / self.decimal_odds
        } else {
            0.0
        }
    }
}

/// Game with its current markets, as served by an odds feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOdds {
    pub event_id: String,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub commence_time: Option<DateTime<Utc>>,
    /// market name -> line
    #[serde(default)]
    pub markets: BTreeMap<String, MarketLine>,
}

/// Per-player projection from a projections feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub player_id: String,
    /// stat name -> projected value
    pub stats: BTreeMap<String, f64>,
    pub confidence: f64,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

/// Per-player aggregated sentiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub player_id: String,
    /// Sentiment score in [-1, 1]
    pub score: f64,
    /// Number of mentions the score is derived from
    #[serde(default)]
    pub mentions: u32,
}

/// Per-player injury report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjuryRecord {
    pub player_id: String,
    pub status: InjuryStatus,
    #[serde(default)]
    pub description: Option<String>,
    /// Player importance in [0, 1]
    #[serde(default = "default_importance")]
    pub importance: f64,
}

fn default_importance() -> f64 {
    0.5
}

/// News headline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Headline {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub player_ids: Vec<String>,
    /// Headline tone in [-1, 1]
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default = "Utc::now")]
    pub published_at: DateTime<Utc>,
}

/// One adapter's fetched data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourcePayload {
    Odds { games: Vec<GameOdds> },
    Projections { players: Vec<ProjectionRecord> },
    Sentiment { players: Vec<SentimentRecord> },
    Injuries { reports: Vec<InjuryRecord> },
    News { headlines: Vec<Headline> },
}

impl SourcePayload {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourcePayload::Odds { .. } => SourceKind::Odds,
            SourcePayload::Projections { .. } => SourceKind::Projections,
            SourcePayload::Sentiment { .. } => SourceKind::Sentiment,
            SourcePayload::Injuries { .. } => SourceKind::Injuries,
            SourcePayload::News { .. } => SourceKind::News,
        }
    }

    /// Number of entities carried
    pub fn len(&self) -> usize {
        match self {
            SourcePayload::Odds { games } => games.len(),
            SourcePayload::Projections { players } => players.len(),
            SourcePayload::Sentiment { players } => players.len(),
            SourcePayload::Injuries { reports } => reports.len(),
            SourcePayload::News { headlines } => headlines.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Share of entities with usable content, in [0, 1]
    pub fn completeness(&self) -> f64 {
        let total = self.len();
        if total == 0 {
            return 0.0;
        }
        let usable = match self {
            SourcePayload::Odds { games } => games.iter().filter(|g| !g.markets.is_empty()).count(),
            SourcePayload::Projections { players } => {
                players.iter().filter(|p| !p.stats.is_empty()).count()
            }
            SourcePayload::Sentiment { players } => {
                players.iter().filter(|p| p.score.is_finite()).count()
            }
            SourcePayload::Injuries { reports } => reports.len(),
            SourcePayload::News { headlines } => {
                headlines.iter().filter(|h| !h.title.is_empty()).count()
            }
        };
        usable as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_is_monotonic() {
        let ordered = [
            InjuryStatus::Available,
            InjuryStatus::Probable,
            InjuryStatus::Questionable,
            InjuryStatus::Doubtful,
            InjuryStatus::Out,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].severity_multiplier() < pair[1].severity_multiplier());
        }
    }

    #[test]
    fn test_payload_deserializes_tagged() {
        let json = r#"{"kind":"news","headlines":[{"id":"h1","title":"Star returns"}]}"#;
        let payload: SourcePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kind(), SourceKind::News);
        assert_eq!(payload.len(), 1);
        assert!((payload.completeness() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_implied_probability() {
        let line = MarketLine {
            decimal_odds: 2.5,
            line: None,
        };
        assert!((line.implied_probability() - 0.4).abs() < 1e-12);
    }
}
