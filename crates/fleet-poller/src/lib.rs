pub mod poller;
pub mod source;
pub mod state;

pub use poller::{AdaptivePoller, PollerSnapshot, PollerStats};
pub use source::{FetchError, HttpStatusSource, StatusSource};
pub use state::{PollerConfig, PollerPhase};
