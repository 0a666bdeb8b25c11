//! Processor graph: one lane implementation per queue item type.
//!
//! Each lane is a small state machine whose steps are the item's
//! `QueueStep`. Finishing a step returns an `Outcome` naming the terminal
//! status and the children to fan out; the queue manager applies both.
//! Processors never transition queue items themselves, and every store
//! write is an upsert on a natural key so replaying a step is safe.

pub mod company;
pub mod company_discovery;
pub mod job;
pub mod scrape_source;
pub mod source_discovery;

pub use crate::kernel::scheduler::{Outcome, Processor, ProcessorSet};

pub use company::CompanyProcessor;
pub use company_discovery::CompanyDiscoveryProcessor;
pub use job::JobProcessor;
pub use scrape_source::ScrapeSourceProcessor;
pub use source_discovery::SourceDiscoveryProcessor;

/// All five lane processors.
pub fn standard_processors() -> ProcessorSet {
    let mut set = ProcessorSet::new();
    set.register(Box::new(JobProcessor));
    set.register(Box::new(CompanyProcessor));
    set.register(Box::new(ScrapeSourceProcessor));
    set.register(Box::new(SourceDiscoveryProcessor));
    set.register(Box::new(CompanyDiscoveryProcessor));
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::queue::QueueItemType;

    #[test]
    fn standard_set_covers_every_item_type() {
        let set = standard_processors();
        for item_type in QueueItemType::ALL {
            assert!(set.get(item_type).is_some(), "missing processor for {item_type:?}");
        }
    }
}
