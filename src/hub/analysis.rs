//! Trend and correlation detection across snapshots (no IO).

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::{DataCorrelation, IntegratedData, Trend};

/// Projection stat used as the headline performance metric
pub const PRIMARY_STAT: &str = "points";

/// Trend for a metric observed as `old` then `new`.
///
/// `significance = min(1, |change| / max(epsilon, |old|))`; any nonzero change
/// from 0 is maximally significant.
pub fn trend_for(old: f64, new: f64, epsilon: f64) -> Trend {
    let change = new - old;
    let significance = if change == 0.0 {
        0.0
    } else if old == 0.0 {
        1.0
    } else {
        (change.abs() / old.abs().max(epsilon)).min(1.0)
    };
    Trend {
        value: new,
        change,
        significance,
    }
}

/// Trends for every metric present in both snapshots
pub fn compute_trends(
    previous: &BTreeMap<String, f64>,
    current: &BTreeMap<String, f64>,
    epsilon: f64,
) -> BTreeMap<String, Trend> {
    current
        .iter()
        .filter_map(|(key, new)| {
            previous
                .get(key)
                .map(|old| (key.clone(), trend_for(*old, *new, epsilon)))
        })
        .collect()
}

/// Pearson correlation in [-1, 1]. Returns 0.0 on degenerate input.
pub fn pearson_corr(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return 0.0;
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }

    (cov / denom).clamp(-1.0, 1.0)
}

/// Map a correlation and sample size to [0, 1] via its t-statistic.
///
/// `t = |r| * sqrt((n - 2) / (1 - r^2))`, significance = t / (1 + t).
pub fn correlation_significance(r: f64, n: usize) -> f64 {
    if n < 3 || r == 0.0 {
        return 0.0;
    }
    let residual = 1.0 - r * r;
    if residual <= 0.0 {
        return 1.0;
    }
    let t = r.abs() * ((n as f64 - 2.0) / residual).sqrt();
    (t / (1.0 + t)).clamp(0.0, 1.0)
}

/// Aligned series built from two per-player maps, ordered by player id
fn align<A, B>(
    a: &BTreeMap<String, A>,
    b: &BTreeMap<String, B>,
    fa: impl Fn(&A) -> Option<f64>,
    fb: impl Fn(&B) -> Option<f64>,
) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (key, va) in a {
        if let (Some(x), Some(y)) = (fa(va), b.get(key).and_then(&fb)) {
            xs.push(x);
            ys.push(y);
        }
    }
    (xs, ys)
}

/// Per-player mean headline tone
fn news_tone_by_player(snapshot: &IntegratedData) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for entry in snapshot.news.values() {
        for player_id in &entry.player_ids {
            let slot = sums.entry(player_id.clone()).or_insert((0.0, 0));
            slot.0 += entry.sentiment;
            slot.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

/// Cross-source correlations within one snapshot.
///
/// Pairs with fewer than `min_samples` aligned players are skipped.
pub fn compute_correlations(
    snapshot: &IntegratedData,
    timestamp: DateTime<Utc>,
    min_samples: usize,
) -> Vec<DataCorrelation> {
    let mut series: Vec<(&str, &str, Vec<f64>, Vec<f64>)> = Vec::new();

    let (x, y) = align(
        &snapshot.projections,
        &snapshot.sentiment,
        |p| Some(p.confidence),
        |s| Some(s.score),
    );
    series.push(("projections.confidence", "sentiment.score", x, y));

    let (x, y) = align(
        &snapshot.projections,
        &snapshot.injuries,
        |p| {
            p.stats
                .get(PRIMARY_STAT)
                .or_else(|| p.stats.values().next())
                .copied()
        },
        |i| Some(i.impact()),
    );
    series.push(("projections.primary_stat", "injuries.impact", x, y));

    let tone = news_tone_by_player(snapshot);
    let (x, y) = align(&snapshot.sentiment, &tone, |s| Some(s.score), |t| Some(*t));
    series.push(("sentiment.score", "news.tone", x, y));

    series
        .into_iter()
        .filter(|(_, _, x, _)| x.len() >= min_samples.max(2))
        .map(|(a, b, x, y)| {
            let correlation = pearson_corr(&x, &y);
            DataCorrelation {
                source_a: a.to_string(),
                source_b: b.to_string(),
                correlation,
                significance: correlation_significance(correlation, x.len()),
                sample_size: x.len(),
                timestamp,
            }
        })
        .collect()
}
