pub mod maintenance;

pub use maintenance::{MaintenanceConfig, MaintenanceService, SweepReport, SweepStats};
