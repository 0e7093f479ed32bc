//! Integrated snapshot: one immutable merged view of every source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::feed::{InjuryStatus, MarketLine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionEntry {
    /// Adapter id that owns this entry
    pub source: String,
    pub stats: BTreeMap<String, f64>,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentEntry {
    pub source: String,
    pub score: f64,
    pub mentions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsEntry {
    pub source: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: Option<DateTime<Utc>>,
    pub markets: BTreeMap<String, MarketLine>,
    /// market -> implied probability change since the previous snapshot
    pub movement: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryEntry {
    pub source: String,
    pub status: InjuryStatus,
    pub description: Option<String>,
    pub importance: f64,
}

impl InjuryEntry {
    /// Expected share of value lost, importance x severity
    pub fn impact(&self) -> f64 {
        self.importance * self.status.severity_multiplier()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEntry {
    pub source: String,
    pub title: String,
    pub player_ids: Vec<String>,
    pub sentiment: f64,
    pub published_at: DateTime<Utc>,
}

/// Change of one metric between two successive snapshots
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub value: f64,
    pub change: f64,
    /// Relative change capped at 1
    pub significance: f64,
}

/// Statistical relationship between two sources at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCorrelation {
    pub source_a: String,
    pub source_b: String,
    /// Pearson correlation in [-1, 1]
    pub correlation: f64,
    /// Confidence that the correlation is not noise, in [0, 1]
    pub significance: f64,
    pub sample_size: usize,
    pub timestamp: DateTime<Utc>,
}

/// Merged view of all sources at one point in time.
///
/// Snapshots are never mutated after publication; each sync cycle builds a
/// new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedData {
    pub timestamp: DateTime<Utc>,
    /// Monotonic cycle counter, 0 for the initial empty snapshot
    pub generation: u64,
    pub projections: BTreeMap<String, ProjectionEntry>,
    pub sentiment: BTreeMap<String, SentimentEntry>,
    pub odds: BTreeMap<String, OddsEntry>,
    pub injuries: BTreeMap<String, InjuryEntry>,
    pub news: BTreeMap<String, NewsEntry>,
    pub trends: BTreeMap<String, Trend>,
    pub correlations: Vec<DataCorrelation>,
}

impl IntegratedData {
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            generation: 0,
            projections: BTreeMap::new(),
            sentiment: BTreeMap::new(),
            odds: BTreeMap::new(),
            injuries: BTreeMap::new(),
            news: BTreeMap::new(),
            trends: BTreeMap::new(),
            correlations: Vec::new(),
        }
    }

    /// Start the next generation from this one's domain data.
    ///
    /// Trends and correlations are derived per cycle and start empty.
    pub fn next_generation(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            generation: self.generation + 1,
            projections: self.projections.clone(),
            sentiment: self.sentiment.clone(),
            odds: self.odds.clone(),
            injuries: self.injuries.clone(),
            news: self.news.clone(),
            trends: BTreeMap::new(),
            correlations: Vec::new(),
        }
    }

    /// Whether source-derived data matches, ignoring time and derived fields
    pub fn same_domain_data(&self, other: &Self) -> bool {
        self.projections == other.projections
            && self.sentiment == other.sentiment
            && self.odds == other.odds
            && self.injuries == other.injuries
            && self.news == other.news
    }

    pub fn entity_count(&self) -> usize {
        self.projections.len()
            + self.sentiment.len()
            + self.odds.len()
            + self.injuries.len()
            + self.news.len()
    }

    /// Flatten every numeric value into `metric key -> value`.
    ///
    /// Keys are stable across snapshots so they can be diffed for trends.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();

        for (player_id, projection) in &self.projections {
            for (stat, value) in &projection.stats {
                out.insert(format!("projection.{player_id}.stat.{stat}"), *value);
            }
            out.insert(
                format!("projection.{player_id}.confidence"),
                projection.confidence,
            );
        }

        for (player_id, sentiment) in &self.sentiment {
            out.insert(format!("sentiment.{player_id}"), sentiment.score);
        }

        for (event_id, odds) in &self.odds {
            for (market, line) in &odds.markets {
                out.insert(
                    format!("odds.{event_id}.{market}"),
                    line.implied_probability(),
                );
            }
        }

        for (player_id, injury) in &self.injuries {
            out.insert(format!("injury.{player_id}"), injury.impact());
        }

        out.retain(|_, v| v.is_finite());
        out
    }
}

impl Default for IntegratedData {
    fn default() -> Self {
        Self::empty()
    }
}
