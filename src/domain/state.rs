use serde::{Deserialize, Serialize};
use std::fmt;

/// Integration hub sync cycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    /// Waiting for the next cycle
    Idle,
    /// Adapter fetches in flight
    Fetching,
    /// Folding payloads into a new snapshot
    Merging,
    /// Computing trends and correlations
    TrendAnalysis,
    /// New snapshot swapped in and announced
    Published,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "IDLE",
            SyncPhase::Fetching => "FETCHING",
            SyncPhase::Merging => "MERGING",
            SyncPhase::TrendAnalysis => "TREND_ANALYSIS",
            SyncPhase::Published => "PUBLISHED",
        }
    }

    /// Check if this phase can transition to another phase
    pub fn can_transition_to(&self, target: SyncPhase) -> bool {
        use SyncPhase::*;

        matches!(
            (self, target),
            (Idle, Fetching)
                | (Fetching, Merging)
                | (Merging, TrendAnalysis)
                | (TrendAnalysis, Published)
                | (Published, Idle)
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for SyncPhase {
    fn default() -> Self {
        SyncPhase::Idle
    }
}
