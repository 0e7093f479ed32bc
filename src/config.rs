use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::adapters::DEFAULT_CACHE_TTL_MS;
use crate::domain::SourceKind;
use crate::ensemble::features::FeatureConfig;
use crate::ensemble::rules::RiskRule;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub hub: HubConfig,
    /// Data sources registered with the hub at startup
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    /// Feature engineering tunables
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Interval between sync cycles in milliseconds
    pub sync_interval_ms: u64,
    /// Keep polling after the first cycle
    pub real_time: bool,
    /// Timeout applied to every adapter fetch
    pub adapter_timeout_ms: u64,
    /// Rolling samples kept per source
    pub metrics_history: usize,
    /// Recent source errors kept for inspection
    pub error_log_capacity: usize,
    /// Age after which correlations, errors and idle metrics are evicted
    pub retention_secs: u64,
    /// Interval of the retention sweep
    pub sweep_interval_secs: u64,
    /// Floor for the relative-change denominator in trend significance
    pub trend_epsilon: f64,
    /// Minimum aligned samples before a correlation is reported
    pub min_correlation_samples: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 30_000,
            real_time: false,
            adapter_timeout_ms: 5_000,
            metrics_history: 10,
            error_log_capacity: 100,
            retention_secs: 86_400,
            sweep_interval_secs: 3_600,
            trend_epsilon: 1e-9,
            min_correlation_samples: 3,
        }
    }
}

/// One data source definition
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    /// HTTP endpoint serving the feed document
    #[serde(default)]
    pub url: Option<String>,
    /// Local JSON file serving a tagged payload
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Environment variable holding the API key, if any
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

fn default_cache_ttl_ms() -> u64 {
    DEFAULT_CACHE_TTL_MS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Minimum engineered features backed by real data
    pub min_features: usize,
    /// Inputs older than this are rejected as stale
    pub max_input_age_secs: i64,
    /// TTL of cached decisions per (entity, market)
    pub prediction_cache_ttl_secs: u64,
    /// Half-width of the uniform noise added to each model's output
    pub noise_amplitude: f64,
    /// Seed for the noise generator; random when unset
    pub rng_seed: Option<u64>,
    /// Resolved decisions kept for retraining
    pub max_feedback_history: usize,
    /// Resolved decisions required before retraining
    pub min_feedback_for_retrain: usize,
    /// Ranked factors returned per decision
    pub top_factors: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_features: 3,
            max_input_age_secs: 900,
            prediction_cache_ttl_secs: 60,
            noise_amplitude: 0.02,
            rng_seed: None,
            max_feedback_history: 1_000,
            min_feedback_for_retrain: 20,
            top_factors: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Minimum confidence for a decision to be actionable
    pub min_confidence: f64,
    /// Minimum edge for a decision to be actionable
    pub min_edge: f64,
    /// Hard cap on the recommended stake, as a bankroll fraction
    pub max_stake_fraction: f64,
    /// Cap on the reported Kelly fraction
    pub max_kelly_fraction: f64,
    pub kelly_multiplier_low: f64,
    pub kelly_multiplier_medium: f64,
    pub kelly_multiplier_high: f64,
    /// Consensus = 1 - min(1, sensitivity * variance)
    pub consensus_sensitivity: f64,
    /// Edge size treated as fully suspicious in the risk score
    pub edge_expectation: f64,
    /// Risk score below this is low risk
    pub low_risk_threshold: f64,
    /// Risk score at or above this is high risk
    pub high_risk_threshold: f64,
    /// Bankroll used to express stakes in USD
    pub bankroll_usd: Option<Decimal>,
    pub rules: Vec<RiskRule>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            min_edge: 0.03,
            max_stake_fraction: 0.05,
            max_kelly_fraction: 0.25,
            kelly_multiplier_low: 0.5,
            kelly_multiplier_medium: 0.25,
            kelly_multiplier_high: 0.1,
            consensus_sensitivity: 10.0,
            edge_expectation: 0.10,
            low_risk_threshold: 0.30,
            high_risk_threshold: 0.55,
            bankroll_usd: None,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("COURTSIDE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (COURTSIDE_HUB__SYNC_INTERVAL_MS, etc.)
            .add_source(
                Environment::with_prefix("COURTSIDE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load a single config file, still honoring environment overrides
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("COURTSIDE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Hub
        if self.hub.sync_interval_ms == 0 {
            errors.push("hub.sync_interval_ms must be positive".to_string());
        }
        if self.hub.adapter_timeout_ms == 0 {
            errors.push("hub.adapter_timeout_ms must be positive".to_string());
        }
        if self.hub.metrics_history == 0 {
            errors.push("hub.metrics_history must be positive".to_string());
        }

        // Sources
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                errors.push(format!("duplicate source id: {}", source.id));
            }
            if source.url.is_none() == source.path.is_none() {
                errors.push(format!(
                    "source {} must set exactly one of url or path",
                    source.id
                ));
            }
        }

        // Ensemble
        if self.ensemble.max_input_age_secs <= 0 {
            errors.push("ensemble.max_input_age_secs must be positive".to_string());
        }
        if !(0.0..0.45).contains(&self.ensemble.noise_amplitude) {
            errors.push("ensemble.noise_amplitude must be in [0, 0.45)".to_string());
        }
        if self.ensemble.max_feedback_history == 0 {
            errors.push("ensemble.max_feedback_history must be positive".to_string());
        }

        // Features
        if self.features.form_window == 0 {
            errors.push("features.form_window must be positive".to_string());
        }
        if self.features.form_scale <= 0.0 {
            errors.push("features.form_scale must be positive".to_string());
        }
        if self.features.elo_scale <= 0.0 {
            errors.push("features.elo_scale must be positive".to_string());
        }

        // Risk
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("risk.min_confidence", self.risk.min_confidence),
            ("risk.max_stake_fraction", self.risk.max_stake_fraction),
            ("risk.max_kelly_fraction", self.risk.max_kelly_fraction),
            ("risk.kelly_multiplier_low", self.risk.kelly_multiplier_low),
            ("risk.kelly_multiplier_medium", self.risk.kelly_multiplier_medium),
            ("risk.kelly_multiplier_high", self.risk.kelly_multiplier_high),
        ] {
            if !unit.contains(&value) {
                errors.push(format!("{name} must be between 0 and 1"));
            }
        }
        if self.risk.low_risk_threshold >= self.risk.high_risk_threshold {
            errors.push("risk.low_risk_threshold must be below risk.high_risk_threshold".to_string());
        }
        if self.risk.edge_expectation <= 0.0 {
            errors.push("risk.edge_expectation must be positive".to_string());
        }
        if let Some(bankroll) = self.risk.bankroll_usd {
            if bankroll <= Decimal::ZERO {
                errors.push("risk.bankroll_usd must be positive".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = AppConfig::default();
        config.hub.sync_interval_ms = 0;
        config.risk.max_stake_fraction = 1.5;
        config.risk.low_risk_threshold = 0.8;
        config.features.elo_scale = 0.0;
        config.sources.push(SourceConfig {
            id: "odds".to_string(),
            kind: SourceKind::Odds,
            url: None,
            path: None,
            api_key_env: None,
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
        });

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                r#"
                [hub]
                sync_interval_ms = 1000

                [features]
                form_window = 3

                [risk]
                max_stake_fraction = 0.02
                bankroll_usd = "2500"

                [[sources]]
                id = "injuries"
                kind = "injuries"
                path = "fixtures/injuries.json"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.hub.sync_interval_ms, 1000);
        assert_eq!(config.hub.metrics_history, 10);
        assert_eq!(config.features.form_window, 3);
        assert_eq!(config.features.elo_scale, 400.0);
        assert_eq!(config.risk.max_stake_fraction, 0.02);
        assert_eq!(config.sources[0].cache_ttl_ms, DEFAULT_CACHE_TTL_MS);
        assert!(config.validate().is_ok());
    }
}
