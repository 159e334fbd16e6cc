pub mod fetcher;
pub mod job;
pub mod maps;
pub mod orchestrator;
pub mod run_log;
pub mod scheduler;
pub mod stats;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use fetcher::{FetchError, ReviewFetcher};
pub use job::RunPolicy;
pub use orchestrator::{Orchestrator, StartOutcome};
pub use store::SnapshotStore;
