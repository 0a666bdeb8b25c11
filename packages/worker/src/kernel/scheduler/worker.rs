//! Pipeline workers: claim → dispatch → settle.
//!
//! A pool of identical tasks drives the queue. Each worker claims one item
//! at a time, moves it to processing, runs the matching lane processor
//! under the item time budget, and settles the result through the queue
//! manager. Per-type semaphores keep one noisy lane from starving the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::processor::ProcessorSet;
use crate::kernel::config::{SchedulerSettings, WorkerSettings};
use crate::kernel::error::ProcessError;
use crate::kernel::queue::{BackoffPolicy, QueueItem, QueueItemType, QueuePolicy};
use crate::kernel::WorkerKernel;

/// Per-type concurrency gates shared by the whole pool.
pub struct TypeGates {
    gates: HashMap<QueueItemType, Arc<Semaphore>>,
}

impl TypeGates {
    pub fn new(settings: &WorkerSettings) -> Self {
        let gates = QueueItemType::ALL
            .into_iter()
            .map(|t| (t, Arc::new(Semaphore::new(settings.type_cap(t.as_str())))))
            .collect();
        Self { gates }
    }

    /// Types that currently have dispatch capacity.
    fn open_types(&self) -> Vec<QueueItemType> {
        self.gates
            .iter()
            .filter(|(_, gate)| gate.available_permits() > 0)
            .map(|(t, _)| *t)
            .collect()
    }

    fn gate(&self, item_type: QueueItemType) -> Arc<Semaphore> {
        self.gates[&item_type].clone()
    }
}

/// Spawn the worker pool. Returns the join handles; cancel `shutdown` for a
/// graceful drain (in-flight items finish, no new claims).
pub async fn spawn_pool(
    kernel: Arc<WorkerKernel>,
    processors: Arc<ProcessorSet>,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let settings: WorkerSettings = kernel.config.get().await;
    let gates = Arc::new(TypeGates::new(&settings));

    info!(
        workers = settings.max_concurrency,
        poll_interval_s = settings.poll_interval_seconds,
        "starting worker pool"
    );

    (0..settings.max_concurrency)
        .map(|i| {
            let worker = Worker {
                id: i,
                kernel: kernel.clone(),
                processors: processors.clone(),
                gates: gates.clone(),
            };
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect()
}

struct Worker {
    id: usize,
    kernel: Arc<WorkerKernel>,
    processors: Arc<ProcessorSet>,
    gates: Arc<TypeGates>,
}

impl Worker {
    async fn run(&self, shutdown: CancellationToken) {
        // Process id keeps claims distinguishable across restarts
        let worker_id = format!("worker-{}-{}", std::process::id(), self.id);
        info!(worker = %worker_id, "worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let settings: WorkerSettings = self.kernel.config.get().await;
            self.refresh_queue_policy(&settings).await;

            if settings.task_delay_seconds > 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(settings.task_delay_seconds)) => {}
                }
            }

            let allowed = self.gates.open_types();
            if allowed.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(settings.poll_interval_seconds)) => {}
                }
                continue;
            }

            let claimed = match self.kernel.queue.claim(&worker_id, &allowed).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    error!(worker = %worker_id, error = %err, "claim failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let Some(item) = claimed else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(settings.poll_interval_seconds)) => {}
                }
                continue;
            };

            // Hold the lane gate for the whole dispatch
            let permit = match self.gates.gate(item.item_type).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            self.dispatch(item, &settings).await;
            drop(permit);
        }

        info!(worker = %worker_id, "worker stopped");
    }

    async fn dispatch(&self, item: QueueItem, settings: &WorkerSettings) {
        let item = match self.kernel.queue.begin(&item).await {
            Ok(item) => item,
            Err(ProcessError::StaleState) => {
                // Someone else settled it (lease sweep raced us); move on
                debug!(item = %item.id, "item no longer claimed, skipping dispatch");
                return;
            }
            Err(err) => {
                error!(item = %item.id, error = %err, "failed to begin item");
                return;
            }
        };

        let Some(processor) = self.processors.get(item.item_type) else {
            let err = ProcessError::Internal(anyhow::anyhow!(
                "no processor registered for {:?}",
                item.item_type
            ));
            let _ = self.kernel.queue.fail(&item, &err).await;
            return;
        };

        debug!(
            item = %item.id,
            item_type = item.item_type.as_str(),
            step = ?item.step,
            attempt = item.attempts,
            "dispatching"
        );

        let budget = Duration::from_secs(settings.item_timeout_seconds);
        let result = tokio::time::timeout(budget, processor.process(&item, &self.kernel)).await;

        match result {
            Ok(Ok(outcome)) => {
                match self
                    .kernel
                    .queue
                    .complete(&item, outcome.completion, outcome.fan_out)
                    .await
                {
                    Ok(children) => {
                        debug!(item = %item.id, children = children.len(), "item settled");
                    }
                    Err(ProcessError::MaxDepthExceeded { depth }) => {
                        warn!(item = %item.id, depth, "fan-out hit the depth bound");
                    }
                    Err(ProcessError::StaleState) => {
                        warn!(item = %item.id, "lost the completion race");
                    }
                    Err(err) => {
                        error!(item = %item.id, error = %err, "failed to complete item");
                    }
                }
            }
            Ok(Err(err)) => {
                if let ProcessError::Internal(inner) = &err {
                    // Bug-class failure: snapshot and keep the worker alive
                    error!(item = %item.id, error = %inner, "processor error");
                }
                if let Err(settle_err) = self.kernel.queue.settle_failure(&item, &err).await {
                    error!(item = %item.id, error = %settle_err, "failed to settle failure");
                }
            }
            Err(_elapsed) => {
                let err = ProcessError::Transient(format!(
                    "item exceeded {}s time budget",
                    settings.item_timeout_seconds
                ));
                warn!(item = %item.id, "dispatch deadline exceeded");
                if let Err(settle_err) = self.kernel.queue.settle_failure(&item, &err).await {
                    error!(item = %item.id, error = %settle_err, "failed to settle timeout");
                }
            }
        }
    }

    /// Keep queue tunables in step with config edits.
    async fn refresh_queue_policy(&self, settings: &WorkerSettings) {
        let scheduler: SchedulerSettings = self.kernel.config.get().await;
        self.kernel.queue.set_policy(QueuePolicy {
            backoff: BackoffPolicy {
                retry_base_seconds: settings.retry_base_seconds,
                retry_max_seconds: settings.retry_max_seconds,
                blocked_floor_seconds: settings.blocked_floor_seconds,
            },
            max_depth: settings.max_depth,
            default_max_attempts: settings.max_attempts,
            timezone: scheduler.tz(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::super::processor::{Outcome, Processor};
    use crate::kernel::agent::{AgentManager, MemoryCostLedger};
    use crate::kernel::config::ConfigRegistry;
    use crate::kernel::queue::{
        Completion, ItemOrigin, MemoryQueueStore, QueueItemStatus, QueueManager, QueueStep,
        QueueStore, Submission,
    };
    use crate::kernel::test_dependencies::MockScraper;

    struct ScriptedProcessor {
        item_type: QueueItemType,
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl Processor for ScriptedProcessor {
        fn item_type(&self) -> QueueItemType {
            self.item_type
        }

        async fn process(
            &self,
            _item: &QueueItem,
            _kernel: &WorkerKernel,
        ) -> Result<Outcome, ProcessError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(ProcessError::Transient("scripted failure".into()));
            }
            Ok(Outcome {
                completion: Completion::Success,
                fan_out: Vec::new(),
            })
        }
    }

    fn test_kernel(store: Arc<MemoryQueueStore>) -> Arc<WorkerKernel> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        let registry = Arc::new(ConfigRegistry::with_ttl(
            pool.clone(),
            std::time::Duration::from_secs(3600),
        ));

        // Fast loop timings for tests
        let mut settings = WorkerSettings::default();
        settings.task_delay_seconds = 0;
        settings.poll_interval_seconds = 1;
        settings.max_concurrency = 2;
        settings.retry_base_seconds = 0;
        registry.prime(&settings);
        registry.prime(&SchedulerSettings::default());

        let queue = Arc::new(QueueManager::new(store as Arc<dyn QueueStore>));
        let agents = Arc::new(AgentManager::new(
            registry.clone(),
            Arc::new(MemoryCostLedger::new()),
        ));
        Arc::new(WorkerKernel::new(
            pool,
            Arc::new(MockScraper::new()),
            agents,
            registry,
            queue,
        ))
    }

    async fn wait_for_status(
        store: &MemoryQueueStore,
        id: crate::common::QueueItemId,
        status: QueueItemStatus,
    ) {
        for _ in 0..200 {
            if store.get(id).map(|i| i.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "item never reached {status:?}, currently {:?}",
            store.get(id).map(|i| i.status)
        );
    }

    #[tokio::test]
    async fn worker_claims_dispatches_and_settles() {
        let store = Arc::new(MemoryQueueStore::new());
        let kernel = test_kernel(store.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let mut processors = ProcessorSet::new();
        processors.register(Box::new(ScriptedProcessor {
            item_type: QueueItemType::Job,
            calls: calls.clone(),
            fail_first: false,
        }));

        let result = kernel
            .queue
            .submit(
                Submission::new(QueueItemType::Job, QueueStep::Fetch)
                    .origin(ItemOrigin::UserSubmission),
            )
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handles = spawn_pool(kernel, Arc::new(processors), shutdown.clone()).await;

        wait_for_status(&store, result.item_id(), QueueItemStatus::Success).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_to_success() {
        let store = Arc::new(MemoryQueueStore::new());
        let kernel = test_kernel(store.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let mut processors = ProcessorSet::new();
        processors.register(Box::new(ScriptedProcessor {
            item_type: QueueItemType::Job,
            calls: calls.clone(),
            fail_first: true,
        }));

        let result = kernel
            .queue
            .submit(
                Submission::new(QueueItemType::Job, QueueStep::Fetch)
                    .origin(ItemOrigin::UserSubmission),
            )
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let handles = spawn_pool(kernel, Arc::new(processors), shutdown.clone()).await;

        wait_for_status(&store, result.item_id(), QueueItemStatus::Success).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "one failure, one success");
        let settled = store.get(result.item_id()).unwrap();
        assert_eq!(settled.attempts, 2);

        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn unregistered_type_fails_the_item() {
        let store = Arc::new(MemoryQueueStore::new());
        let kernel = test_kernel(store.clone());

        let result = kernel
            .queue
            .submit(
                Submission::new(QueueItemType::Company, QueueStep::Fetch)
                    .origin(ItemOrigin::UserSubmission),
            )
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        // Only a Job processor registered
        let mut processors = ProcessorSet::new();
        processors.register(Box::new(ScriptedProcessor {
            item_type: QueueItemType::Job,
            calls: Arc::new(AtomicUsize::new(0)),
            fail_first: false,
        }));
        let handles = spawn_pool(kernel, Arc::new(processors), shutdown.clone()).await;

        wait_for_status(&store, result.item_id(), QueueItemStatus::Failed).await;

        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
