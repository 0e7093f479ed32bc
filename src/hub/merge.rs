//! Source-specific merge functions.
//!
//! Each merge folds one adapter's payload into the draft snapshot. A source
//! owns the entries it wrote last cycle: they are replaced wholesale, while
//! entries owned by other sources (including ones that failed this cycle)
//! are carried forward untouched.

use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::{
    GameOdds, Headline, InjuryEntry, InjuryRecord, IntegratedData, NewsEntry, OddsEntry,
    ProjectionEntry, ProjectionRecord, SentimentEntry, SentimentRecord, SourcePayload,
};

/// Route a payload to the merge function for its kind
pub fn merge_payload(
    draft: &mut IntegratedData,
    previous: &IntegratedData,
    source_id: &str,
    payload: &SourcePayload,
) {
    match payload {
        SourcePayload::Odds { games } => merge_odds(draft, previous, source_id, games),
        SourcePayload::Projections { players } => merge_projections(draft, source_id, players),
        SourcePayload::Sentiment { players } => merge_sentiment(draft, source_id, players),
        SourcePayload::Injuries { reports } => merge_injuries(draft, source_id, reports),
        SourcePayload::News { headlines } => merge_news(draft, source_id, headlines),
    }
    debug!(
        source = source_id,
        kind = %payload.kind(),
        entities = payload.len(),
        "merged payload"
    );
}

fn merge_odds(
    draft: &mut IntegratedData,
    previous: &IntegratedData,
    source_id: &str,
    games: &[GameOdds],
) {
    draft.odds.retain(|_, entry| entry.source != source_id);

    for game in games {
        let movement = previous
            .odds
            .get(&game.event_id)
            .map(|prior| line_movement(&prior.markets, &game.markets))
            .unwrap_or_default();

        draft.odds.insert(
            game.event_id.clone(),
            OddsEntry {
                source: source_id.to_string(),
                home_team: game.home_team.clone(),
                away_team: game.away_team.clone(),
                commence_time: game.commence_time,
                markets: game.markets.clone(),
                movement,
            },
        );
    }
}

/// Implied probability change for markets quoted in both snapshots
fn line_movement(
    prior: &BTreeMap<String, crate::domain::MarketLine>,
    current: &BTreeMap<String, crate::domain::MarketLine>,
) -> BTreeMap<String, f64> {
    current
        .iter()
        .filter_map(|(market, line)| {
            prior.get(market).map(|old| {
                (
                    market.clone(),
                    line.implied_probability() - old.implied_probability(),
                )
            })
        })
        .collect()
}

fn merge_projections(draft: &mut IntegratedData, source_id: &str, players: &[ProjectionRecord]) {
    draft.projections.retain(|_, entry| entry.source != source_id);

    for record in players {
        let stats = record
            .stats
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        draft.projections.insert(
            record.player_id.clone(),
            ProjectionEntry {
                source: source_id.to_string(),
                stats,
                confidence: clamp_unit(record.confidence),
                last_updated: record.last_updated,
            },
        );
    }
}

fn merge_sentiment(draft: &mut IntegratedData, source_id: &str, players: &[SentimentRecord]) {
    draft.sentiment.retain(|_, entry| entry.source != source_id);

    for record in players.iter().filter(|r| r.score.is_finite()) {
        draft.sentiment.insert(
            record.player_id.clone(),
            SentimentEntry {
                source: source_id.to_string(),
                score: record.score.clamp(-1.0, 1.0),
                mentions: record.mentions,
            },
        );
    }
}

fn merge_injuries(draft: &mut IntegratedData, source_id: &str, reports: &[InjuryRecord]) {
    draft.injuries.retain(|_, entry| entry.source != source_id);

    for report in reports {
        draft.injuries.insert(
            report.player_id.clone(),
            InjuryEntry {
                source: source_id.to_string(),
                status: report.status,
                description: report.description.clone(),
                importance: clamp_unit(report.importance),
            },
        );
    }
}

fn merge_news(draft: &mut IntegratedData, source_id: &str, headlines: &[Headline]) {
    draft.news.retain(|_, entry| entry.source != source_id);

    for headline in headlines {
        draft.news.insert(
            headline.id.clone(),
            NewsEntry {
                source: source_id.to_string(),
                title: headline.title.clone(),
                player_ids: headline.player_ids.clone(),
                sentiment: if headline.sentiment.is_finite() {
                    headline.sentiment.clamp(-1.0, 1.0)
                } else {
                    0.0
                },
                published_at: headline.published_at,
            },
        );
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
