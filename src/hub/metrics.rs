//! Rolling per-source health metrics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::domain::SourceKind;

/// Quality assumed before a source has reported anything
const UNKNOWN_QUALITY: f64 = 0.5;

/// Latency, error rate and data quality for one source over its last
/// `history` fetches
#[derive(Debug, Clone, Serialize)]
pub struct SourceMetrics {
    pub source_id: String,
    pub kind: SourceKind,
    /// Most recent fetch latencies, oldest first
    pub latency_ms: VecDeque<u64>,
    /// Failed share of the recorded fetches
    pub error_rate: f64,
    /// Mean quality of the recorded fetches (failures count as 0)
    pub data_quality: f64,
    /// Last successful update
    pub last_update: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
    #[serde(skip)]
    outcomes: VecDeque<bool>,
    #[serde(skip)]
    quality_samples: VecDeque<f64>,
    #[serde(skip)]
    history: usize,
}

impl SourceMetrics {
    pub fn new(source_id: &str, kind: SourceKind, history: usize) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind,
            latency_ms: VecDeque::with_capacity(history),
            error_rate: 0.0,
            data_quality: UNKNOWN_QUALITY,
            last_update: None,
            last_attempt: None,
            success_count: 0,
            failure_count: 0,
            last_error: None,
            outcomes: VecDeque::with_capacity(history),
            quality_samples: VecDeque::with_capacity(history),
            history: history.max(1),
        }
    }

    pub fn record_success(&mut self, latency_ms: u64, quality: f64, at: DateTime<Utc>) {
        self.success_count += 1;
        self.last_update = Some(at);
        self.last_attempt = Some(at);
        self.push(latency_ms, true, quality.clamp(0.0, 1.0));
    }

    /// `error_rate` is windowed: once the window is full of failures, or a
    /// failure displaces an older failure, it stays flat. Use
    /// `lifetime_error_rate` for a figure that rises on every failure.
    pub fn record_failure(&mut self, latency_ms: u64, error: &str, at: DateTime<Utc>) {
        self.failure_count += 1;
        self.last_attempt = Some(at);
        self.last_error = Some(error.to_string());
        self.push(latency_ms, false, 0.0);
    }

    fn push(&mut self, latency_ms: u64, ok: bool, quality: f64) {
        push_bounded(&mut self.latency_ms, latency_ms, self.history);
        push_bounded(&mut self.outcomes, ok, self.history);
        push_bounded(&mut self.quality_samples, quality, self.history);

        let n = self.outcomes.len() as f64;
        let failures = self.outcomes.iter().filter(|ok| !**ok).count() as f64;
        self.error_rate = failures / n;
        self.data_quality = self.quality_samples.iter().sum::<f64>() / n;
    }

    /// Failed share of every fetch since registration
    pub fn lifetime_error_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.failure_count as f64 / total as f64
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.latency_ms.is_empty() {
            return 0.0;
        }
        self.latency_ms.iter().sum::<u64>() as f64 / self.latency_ms.len() as f64
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut metrics = SourceMetrics::new("odds", SourceKind::Odds, 3);
        for latency in [10, 20, 30, 40, 50] {
            metrics.record_success(latency, 1.0, Utc::now());
        }
        assert_eq!(metrics.latency_ms, VecDeque::from(vec![30, 40, 50]));
        assert_eq!(metrics.success_count, 5);
        assert!((metrics.avg_latency_ms() - 40.0).abs() < 1e-12);
    }

    #[test]
    fn test_failure_raises_error_rate_and_lowers_quality() {
        let mut metrics = SourceMetrics::new("odds", SourceKind::Odds, 10);
        let quality_before = metrics.data_quality;

        metrics.record_failure(5_000, "timeout", Utc::now());
        assert_eq!(metrics.error_rate, 1.0);
        assert!(metrics.data_quality < quality_before);
        assert_eq!(metrics.last_error.as_deref(), Some("timeout"));
        assert!(metrics.last_update.is_none());

        metrics.record_success(100, 1.0, Utc::now());
        assert!((metrics.error_rate - 0.5).abs() < 1e-12);
        assert!((metrics.data_quality - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_old_failures_roll_off() {
        let mut metrics = SourceMetrics::new("news", SourceKind::News, 2);
        metrics.record_failure(1, "boom", Utc::now());
        metrics.record_success(1, 0.8, Utc::now());
        metrics.record_success(1, 0.8, Utc::now());
        assert_eq!(metrics.error_rate, 0.0);
        assert!((metrics.data_quality - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_lifetime_error_rate_rises_when_window_saturates() {
        let mut metrics = SourceMetrics::new("odds", SourceKind::Odds, 2);
        metrics.record_success(1, 1.0, Utc::now());
        metrics.record_failure(1, "boom", Utc::now());
        metrics.record_failure(1, "boom", Utc::now());
        assert_eq!(metrics.error_rate, 1.0);
        let before = metrics.lifetime_error_rate();

        metrics.record_failure(1, "boom", Utc::now());
        assert_eq!(metrics.error_rate, 1.0);
        assert!(metrics.lifetime_error_rate() > before);
        assert!((metrics.lifetime_error_rate() - 0.75).abs() < 1e-12);
    }
}
