//! The incremental sync engine
//!
//! [`window`] resolves the lower bound of a run's extraction window,
//! [`PageFetcher`] walks the search pages lazily with per-page retry,
//! [`PageLoader`] turns each page into one atomic warehouse commit, and
//! [`SyncOrchestrator`] drives a scope end to end under a run record.

mod fetcher;
mod loader;
mod orchestrator;
pub mod window;

pub use fetcher::PageFetcher;
pub use loader::PageLoader;
pub use orchestrator::{RunMode, ScopeRunReport, SyncOrchestrator};
pub use window::SinceBoundary;
