//! The worker pool: routes each partition's records to a fixed worker lane.
//!
//! The pool is owned by the consumer's control task, so assignment changes
//! never race with routing. On every rebalance the whole worker set is
//! drained, the assignment recomputed wholesale, and fresh lanes started;
//! there is no incremental handoff of partitions between live workers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::consumer::distribution::DistributionStrategy;
use crate::consumer::worker::{EnqueueRejection, Worker};
use crate::context::MessageContext;
use crate::error::ConveyorError;
use crate::middleware::{MessageHandler, MiddlewareExecutor};
use crate::types::Partition;

/// Outcome of a routing attempt that could not be completed immediately.
pub enum PoolRejection {
    /// No worker owns the record's partition (stale fetch across a rebalance).
    NotAssigned(MessageContext),
    /// The owning worker's queue is full. Carries the worker index so the
    /// caller can pause that worker's partitions before blocking.
    Full { ctx: MessageContext, worker: usize },
    /// The owning worker's queue is closed (pool is stopping).
    Closed(MessageContext),
}

pub struct ConsumerWorkerPool {
    worker_count: usize,
    queue_capacity: usize,
    executor: Arc<MiddlewareExecutor>,
    handler: Arc<dyn MessageHandler>,
    strategy: Arc<dyn DistributionStrategy>,
    workers: Vec<Worker>,
    assignment: HashMap<Partition, usize>,
}

impl ConsumerWorkerPool {
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        executor: Arc<MiddlewareExecutor>,
        handler: Arc<dyn MessageHandler>,
        strategy: Arc<dyn DistributionStrategy>,
    ) -> Self {
        Self {
            worker_count,
            queue_capacity,
            executor,
            handler,
            strategy,
            workers: Vec::new(),
            assignment: HashMap::new(),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn assignment(&self) -> &HashMap<Partition, usize> {
        &self.assignment
    }

    pub fn assigned_partitions(&self) -> Vec<Partition> {
        self.assignment.keys().cloned().collect()
    }

    /// Rebuild the pool for a new partition set: drain and stop the current
    /// workers, recompute the assignment, start fresh lanes. Workers are only
    /// spawned when there is something to process.
    pub async fn prepare(&mut self, partitions: &[Partition]) {
        self.stop().await;

        if partitions.is_empty() {
            info!("No partitions assigned, pool idle");
            return;
        }

        self.assignment = self.strategy.assign(partitions, self.worker_count);
        self.workers = (0..self.worker_count)
            .map(|index| {
                Worker::spawn(
                    index,
                    self.queue_capacity,
                    self.executor.clone(),
                    self.handler.clone(),
                )
            })
            .collect();

        info!(
            workers = self.workers.len(),
            partitions = partitions.len(),
            "Worker pool prepared"
        );
        for (partition, worker) in &self.assignment {
            debug!(partition = %partition, worker, "Partition routed");
        }
    }

    /// Drain every lane and forget the assignment.
    pub async fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        info!(workers = self.workers.len(), "Stopping worker pool");
        for worker in self.workers.drain(..) {
            worker.shutdown().await;
        }
        self.assignment.clear();
    }

    /// Queue a record on its partition's worker, waiting for space.
    pub async fn enqueue(&self, ctx: MessageContext) -> Result<(), ConveyorError> {
        let Some(consumer) = ctx.consumer() else {
            return Err(ConveyorError::InvalidConfiguration(
                "record without consumer context cannot be routed".to_string(),
            ));
        };
        let partition = consumer.partition().clone();
        let Some(index) = self.assignment.get(&partition).copied() else {
            return Err(ConveyorError::PartitionNotAssigned { partition });
        };
        self.workers[index].enqueue(ctx).await
    }

    /// Queue a record without waiting. On `Full` the context comes back with
    /// the owning worker's index so the caller can apply backpressure.
    pub fn try_enqueue(&self, ctx: MessageContext) -> Result<(), PoolRejection> {
        let Some(consumer) = ctx.consumer() else {
            return Err(PoolRejection::NotAssigned(ctx));
        };
        let partition = consumer.partition().clone();
        let Some(index) = self.assignment.get(&partition).copied() else {
            return Err(PoolRejection::NotAssigned(ctx));
        };
        match self.workers[index].try_enqueue(ctx) {
            Ok(()) => Ok(()),
            Err(EnqueueRejection::Full(ctx)) => Err(PoolRejection::Full { ctx, worker: index }),
            Err(EnqueueRejection::Closed(ctx)) => Err(PoolRejection::Closed(ctx)),
        }
    }

    /// All partitions routed to the given worker.
    pub fn partitions_for_worker(&self, worker: usize) -> Vec<Partition> {
        self.assignment
            .iter()
            .filter(|(_, index)| **index == worker)
            .map(|(partition, _)| partition.clone())
            .collect()
    }

    /// Paused partitions whose owning worker has drained below the low-water
    /// mark and can take records again.
    pub fn drained_partitions(&self, paused: &HashSet<Partition>) -> Vec<Partition> {
        paused
            .iter()
            .filter(|partition| {
                self.assignment
                    .get(*partition)
                    .is_some_and(|index| self.workers[*index].below_low_water())
            })
            .cloned()
            .collect()
    }
}
