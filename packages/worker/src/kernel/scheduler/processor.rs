//! Processor contract and registry.
//!
//! The scheduler claims items and dispatches them through this registry.
//! Domain lanes implement `Processor` and register at startup; the kernel
//! never knows the concrete types.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::kernel::error::ProcessError;
use crate::kernel::queue::{Completion, QueueItem, QueueItemType, Submission};
use crate::kernel::WorkerKernel;

/// What a finished item becomes, plus the children it spawns.
#[derive(Debug)]
pub struct Outcome {
    pub completion: Completion,
    pub fan_out: Vec<Submission>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            completion: Completion::Success,
            fan_out: Vec::new(),
        }
    }

    pub fn success_with(fan_out: Vec<Submission>) -> Self {
        Self {
            completion: Completion::Success,
            fan_out,
        }
    }

    pub fn filtered() -> Self {
        Self {
            completion: Completion::Filtered,
            fan_out: Vec::new(),
        }
    }

    pub fn skipped() -> Self {
        Self {
            completion: Completion::Skipped,
            fan_out: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn item_type(&self) -> QueueItemType;

    /// Process one claimed item. Recoverable failures come back as
    /// `ProcessError` and are settled by the worker; only the `Outcome`
    /// path fans out children.
    async fn process(
        &self,
        item: &QueueItem,
        kernel: &WorkerKernel,
    ) -> Result<Outcome, ProcessError>;
}

/// Registry mapping item types to processors.
#[derive(Default)]
pub struct ProcessorSet {
    processors: HashMap<QueueItemType, Box<dyn Processor>>,
}

impl ProcessorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Box<dyn Processor>) {
        self.processors.insert(processor.item_type(), processor);
    }

    pub fn get(&self, item_type: QueueItemType) -> Option<&dyn Processor> {
        self.processors.get(&item_type).map(|p| p.as_ref())
    }

    pub fn registered_types(&self) -> Vec<QueueItemType> {
        self.processors.keys().copied().collect()
    }
}
