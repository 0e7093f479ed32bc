//! Additive per-feature attribution of a prediction's deviation from baseline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::features;
use crate::domain::FeatureVector;

/// Residual below this is left undistributed
pub const RESIDUAL_EPSILON: f64 = 1e-9;

/// Contributions that absorb the residual
const RESIDUAL_RECIPIENTS: usize = 3;

/// Declared [min, max] range per feature, used to normalize values to [-1, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRanges {
    ranges: BTreeMap<String, (f64, f64)>,
}

impl Default for FeatureRanges {
    fn default() -> Self {
        let ranges = [
            (features::RECENT_FORM, (0.0, 1.0)),
            (features::FORM_VS_AVERAGE, (-1.0, 1.0)),
            (features::REST_IMPACT, (-0.15, 0.10)),
            (features::LINE_MOVEMENT, (-1.0, 1.0)),
            (features::ELO_DIFF, (-1.0, 1.0)),
            (features::INJURY_IMPACT, (0.0, 1.0)),
            (features::IMPLIED_PROBABILITY, (0.0, 1.0)),
            (features::HOME_ADVANTAGE, (0.0, 1.0)),
            (features::SENTIMENT, (-1.0, 1.0)),
        ]
        .into_iter()
        .map(|(name, range)| (name.to_string(), range))
        .collect();
        Self { ranges }
    }
}

impl FeatureRanges {
    pub fn empty() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    pub fn with_range(mut self, feature: &str, min: f64, max: f64) -> Self {
        self.ranges.insert(feature.to_string(), (min, max));
        self
    }

    /// Declared range, [0, 1] when undeclared
    pub fn range(&self, feature: &str) -> (f64, f64) {
        self.ranges.get(feature).copied().unwrap_or((0.0, 1.0))
    }

    /// Map `value` into [-1, 1]
    pub fn normalize(&self, feature: &str, value: f64) -> f64 {
        let (min, max) = self.range(feature);
        let span = max - min;
        if span <= 0.0 || !value.is_finite() {
            return 0.0;
        }
        (2.0 * (value - min) / span - 1.0).clamp(-1.0, 1.0)
    }
}

/// Split `deviation` across the features a model declares importance for.
///
/// contribution = importance * normalized value * deviation. Whatever the
/// raw contributions fail to explain is handed to the three largest by
/// magnitude, proportionally, so the result sums to `deviation`.
pub fn attribute(
    importances: &BTreeMap<String, f64>,
    features: &FeatureVector,
    ranges: &FeatureRanges,
    deviation: f64,
) -> BTreeMap<String, f64> {
    let mut contributions: BTreeMap<String, f64> = importances
        .iter()
        .filter(|(name, _)| features.is_present(name))
        .map(|(name, importance)| {
            let normalized = ranges.normalize(name, features.get(name));
            (name.clone(), importance * normalized * deviation)
        })
        .collect();

    if contributions.is_empty() {
        return contributions;
    }

    let explained: f64 = contributions.values().sum();
    let residual = deviation - explained;
    if residual.abs() <= RESIDUAL_EPSILON {
        return contributions;
    }

    let mut ranked: Vec<(String, f64)> = contributions
        .iter()
        .map(|(k, v)| (k.clone(), v.abs()))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(RESIDUAL_RECIPIENTS);

    let total: f64 = ranked.iter().map(|(_, m)| m).sum();
    let count = ranked.len() as f64;
    for (name, magnitude) in ranked {
        let share = if total > 0.0 {
            magnitude / total
        } else {
            1.0 / count
        };
        if let Some(c) = contributions.get_mut(&name) {
            *c += residual * share;
        }
    }

    contributions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: &[(&str, f64)]) -> FeatureVector {
        let mut v = FeatureVector::new();
        for (name, value) in values {
            v.set(name, *value);
        }
        v
    }

    fn importances(values: &[(&str, f64)]) -> BTreeMap<String, f64> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_normalize_uses_declared_range() {
        let ranges = FeatureRanges::default();
        assert_eq!(ranges.normalize(features::ELO_DIFF, 0.0), 0.0);
        assert_eq!(ranges.normalize(features::RECENT_FORM, 0.0), -1.0);
        assert_eq!(ranges.normalize(features::RECENT_FORM, 2.0), 1.0);
        assert_eq!(ranges.normalize("undeclared", 0.5), 0.0);
    }

    #[test]
    fn test_empty_ranges_fall_back_to_unit_interval() {
        let ranges = FeatureRanges::empty();
        assert_eq!(ranges.range(features::ELO_DIFF), (0.0, 1.0));
        assert_eq!(ranges.normalize(features::ELO_DIFF, 0.0), -1.0);

        let ranges = ranges.with_range(features::ELO_DIFF, -1.0, 1.0);
        assert_eq!(ranges.normalize(features::ELO_DIFF, 0.0), 0.0);
    }

    #[test]
    fn test_attribution_sums_to_deviation() {
        let fv = vector(&[
            (features::ELO_DIFF, 0.4),
            (features::SENTIMENT, -0.2),
            (features::RECENT_FORM, 0.9),
            (features::LINE_MOVEMENT, 0.1),
        ]);
        let imp = importances(&[
            (features::ELO_DIFF, 0.4),
            (features::SENTIMENT, 0.2),
            (features::RECENT_FORM, 0.3),
            (features::LINE_MOVEMENT, 0.1),
        ]);
        let deviation = 0.137;
        let result = attribute(&imp, &fv, &FeatureRanges::default(), deviation);
        let total: f64 = result.values().sum();
        assert!((total - deviation).abs() < 1e-9, "total={}", total);
        // smallest contributor receives no residual
        assert!(
            (result[features::LINE_MOVEMENT] - 0.1 * 0.1 * deviation).abs() < 1e-12
        );
    }

    #[test]
    fn test_all_zero_contributions_split_evenly() {
        let fv = vector(&[(features::ELO_DIFF, 0.0), (features::SENTIMENT, 0.0)]);
        let imp = importances(&[(features::ELO_DIFF, 0.5), (features::SENTIMENT, 0.5)]);
        let result = attribute(&imp, &fv, &FeatureRanges::default(), 0.2);
        assert!((result[features::ELO_DIFF] - 0.1).abs() < 1e-12);
        assert!((result[features::SENTIMENT] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_no_overlap_yields_empty() {
        let fv = vector(&[(features::ELO_DIFF, 0.3)]);
        let imp = importances(&[(features::SENTIMENT, 1.0)]);
        assert!(attribute(&imp, &fv, &FeatureRanges::default(), 0.1).is_empty());
    }
}
