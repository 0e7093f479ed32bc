pub mod feed;
pub mod market;
pub mod prediction;
pub mod snapshot;
pub mod state;

pub use feed::*;
pub use market::*;
pub use prediction::*;
pub use snapshot::*;
pub use state::*;
