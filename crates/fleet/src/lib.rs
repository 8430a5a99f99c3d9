//! Vehicle-position aggregation: catalog, caching, retries, fetch
//! orchestration, overlap spreading, polling and bearing tracking.

pub mod bearing;
pub mod cache;
pub mod catalog;
pub mod network;
pub mod orchestrator;
pub mod overlap;
pub mod polling;
pub mod provider;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use bearing::BearingTracker;
pub use cache::{CacheManager, CacheTier, CacheWindows};
pub use catalog::{LineCatalog, RouteShapes};
pub use network::{probe_from_config, NetworkProbe, PollIntervals};
pub use orchestrator::{FetchCycle, FleetOrchestrator, SourceReport};
pub use polling::{PollState, PollingController, PublishedSnapshot};
pub use provider::{DetroSource, RioSource};
pub use retry::{RetryOutcome, RetryPolicy};
