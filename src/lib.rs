pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod ensemble;
pub mod error;
pub mod hub;
pub mod services;

pub use adapters::{DataAdapter, HttpJsonAdapter, StaticFeedAdapter, TtlCache};
pub use config::AppConfig;
pub use domain::{
    EnsemblePrediction, EntityRecord, FeatureVector, IntegratedData, PredictionRequest,
    SourceKind, SourcePayload, SyncPhase,
};
pub use ensemble::{EnsemblePredictor, ModelRegistry};
pub use error::{CourtsideError, ErrorClass, Result};
pub use hub::{HubEvent, IntegrationHub, SourceMetrics};
pub use services::MaintenanceService;
