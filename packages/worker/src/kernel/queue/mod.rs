//! Durable work queue.
//!
//! The queue is the backbone of the pipeline: every unit of work (fetching
//! a listing, analyzing it, scraping a source, probing a company) is a
//! `QueueItem` row. Workers claim items with a single conditional update,
//! process them, and settle the result back as a conditional transition.
//! Fan-out children carry lineage (`parent_id`, `root_id`, `depth`) so loops
//! and runaway recursion are caught structurally.

pub mod backoff;
pub mod item;
pub mod manager;
pub mod store;

pub use backoff::BackoffPolicy;
pub use item::{ItemOrigin, QueueItem, QueueItemStatus, QueueItemType, QueueStep};
pub use manager::{Completion, DedupKey, EnqueueResult, QueueManager, QueuePolicy, Submission};
pub use store::{MemoryQueueStore, PostgresQueueStore, QueueFilter, QueueStore, TransitionUpdate};
