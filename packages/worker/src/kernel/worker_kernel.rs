// WorkerKernel - core infrastructure with all dependencies
//
// The WorkerKernel holds all pipeline dependencies (database, scraper,
// agents, config, queue) and provides access via traits for testability.
// Kernel is for INFRASTRUCTURE only; business logic lives in domains.

use std::sync::Arc;

use sqlx::PgPool;

use super::agent::AgentManager;
use super::config::ConfigRegistry;
use super::queue::QueueManager;
use super::scrape::BaseScraper;

/// WorkerKernel holds all pipeline dependencies
pub struct WorkerKernel {
    pub db_pool: PgPool,
    pub scraper: Arc<dyn BaseScraper>,
    pub agents: Arc<AgentManager>,
    pub config: Arc<ConfigRegistry>,
    pub queue: Arc<QueueManager>,
}

impl WorkerKernel {
    pub fn new(
        db_pool: PgPool,
        scraper: Arc<dyn BaseScraper>,
        agents: Arc<AgentManager>,
        config: Arc<ConfigRegistry>,
        queue: Arc<QueueManager>,
    ) -> Self {
        Self {
            db_pool,
            scraper,
            agents,
            config,
            queue,
        }
    }
}
