// Kernel - core infrastructure with dependency injection
//
// The WorkerKernel holds all pipeline dependencies (database, scraper,
// agents, config, queue) and provides dependency injection through traits
// for testability.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Business logic belongs in domain layers.

pub mod agent;
pub mod ai;
pub mod config;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod scrape;
pub mod test_dependencies;
pub mod traits;
pub mod worker_kernel;

pub use ai::OpenAiClient;
pub use error::ProcessError;
pub use test_dependencies::{MockAgent, MockBehavior, MockScraper};
pub use traits::*;
pub use worker_kernel::WorkerKernel;
