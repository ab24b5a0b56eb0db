//! Pull loop feeding the worker pool from the transport, with backpressure.
//!
//! When a worker's queue fills up, the feeder pauses that worker's partitions
//! at the transport rather than buffering further records in memory. The
//! record that hit the full queue is already fetched, so it is held on the
//! feeder and handed over once the worker has room; nothing is ever dropped
//! or re-fetched. The hold lives on the feeder itself, not inside the feed
//! future, so the consumer's control loop can cancel a feed step at any await
//! point without losing the record. Partitions resume once their worker
//! drains below the low-water mark.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, warn};

use crate::consumer::worker_pool::{ConsumerWorkerPool, PoolRejection};
use crate::context::{CommitOffsets, ConsumerContext, MessageContext};
use crate::error::ConveyorError;
use crate::metrics_consts::WORKER_BACKPRESSURE_EVENTS;
use crate::transport::RecordStream;
use crate::types::{Partition, PartitionOffset};

/// Offset committer that writes straight to the transport. Used for every
/// record unless a transaction coordinator takes over.
pub struct DirectOffsetCommitter {
    stream: Arc<dyn RecordStream>,
}

impl DirectOffsetCommitter {
    pub fn new(stream: Arc<dyn RecordStream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl CommitOffsets for DirectOffsetCommitter {
    async fn commit(&self, _group_id: &str, offset: PartitionOffset) -> Result<(), ConveyorError> {
        self.stream
            .commit_offset(offset.partition(), offset.offset())
            .await
            .map_err(ConveyorError::Transport)
    }
}

pub struct WorkerPoolFeeder {
    stream: Arc<dyn RecordStream>,
    committer: Arc<dyn CommitOffsets>,
    group_id: String,
    fetch_timeout: Duration,
    paused: HashSet<Partition>,
    // A fetched record whose worker was full. Kept here so cancelling a feed
    // step cannot drop it.
    pending: Option<MessageContext>,
}

impl WorkerPoolFeeder {
    pub fn new(stream: Arc<dyn RecordStream>, group_id: String, fetch_timeout: Duration) -> Self {
        let committer = Arc::new(DirectOffsetCommitter::new(stream.clone()));
        Self {
            stream,
            committer,
            group_id,
            fetch_timeout,
            paused: HashSet::new(),
            pending: None,
        }
    }

    pub fn paused_count(&self) -> usize {
        self.paused.len()
    }

    /// One step of the pull loop: resume drained partitions, hand any held
    /// record to its worker, fetch at most one record, route it into the
    /// pool. Safe to cancel at every await point.
    pub async fn feed_once(&mut self, pool: &ConsumerWorkerPool) -> Result<(), ConveyorError> {
        self.resume_drained(pool);

        if !self.flush_pending(pool) {
            // The held record's worker is still full; wait a beat instead of
            // fetching past it.
            tokio::time::sleep(self.fetch_timeout).await;
            return Ok(());
        }

        let record = match self.stream.fetch_next(self.fetch_timeout).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(e) => return Err(ConveyorError::Transport(e)),
        };

        let partition = Partition::new(record.topic.clone(), record.partition);
        let consumer = Arc::new(ConsumerContext::new(
            partition.clone(),
            record.offset,
            self.group_id.clone(),
            self.committer.clone(),
        ));
        let ctx = MessageContext::inbound(record, consumer);

        match pool.try_enqueue(ctx) {
            Ok(()) => Ok(()),
            Err(PoolRejection::Full { ctx, worker }) => {
                counter!(WORKER_BACKPRESSURE_EVENTS).increment(1);
                self.pause_worker_partitions(pool, worker);
                // The record is already fetched; keep it until its worker
                // drains. Its partition is paused, so no later record of the
                // same partition can be fetched past it.
                self.pending = Some(ctx);
                Ok(())
            }
            Err(PoolRejection::NotAssigned(_)) => {
                warn!(
                    partition = %partition,
                    "Fetched record for unassigned partition, dropping"
                );
                Ok(())
            }
            Err(PoolRejection::Closed(_)) => {
                warn!(partition = %partition, "Worker pool is stopping, dropping record");
                Ok(())
            }
        }
    }

    /// Hand the held record to its worker if there is room now. Returns false
    /// while the owning worker is still full.
    fn flush_pending(&mut self, pool: &ConsumerWorkerPool) -> bool {
        let Some(ctx) = self.pending.take() else {
            return true;
        };
        match pool.try_enqueue(ctx) {
            Ok(()) => true,
            Err(PoolRejection::Full { ctx, .. }) => {
                self.pending = Some(ctx);
                false
            }
            Err(PoolRejection::NotAssigned(ctx)) => {
                if let Some(consumer) = ctx.consumer() {
                    warn!(
                        partition = %consumer.partition(),
                        "Held record's partition no longer assigned, dropping"
                    );
                }
                true
            }
            Err(PoolRejection::Closed(_)) => {
                warn!("Worker pool is stopping, dropping held record");
                true
            }
        }
    }

    /// Reconcile the paused set after a pool rebuild: resume the paused
    /// partitions still assigned (their new workers start empty), forget the
    /// rest.
    pub fn rebalanced(&mut self, pool: &ConsumerWorkerPool) {
        let still_owned: Vec<Partition> = self
            .paused
            .iter()
            .filter(|partition| pool.assignment().contains_key(*partition))
            .cloned()
            .collect();
        if !still_owned.is_empty() {
            if let Err(e) = self.stream.resume(&still_owned) {
                warn!(error = %e, "Failed to resume partitions after rebalance");
            }
        }
        self.paused.clear();
    }

    fn resume_drained(&mut self, pool: &ConsumerWorkerPool) {
        if self.paused.is_empty() {
            return;
        }
        let drained = pool.drained_partitions(&self.paused);
        if drained.is_empty() {
            return;
        }
        match self.stream.resume(&drained) {
            Ok(()) => {
                for partition in &drained {
                    debug!(partition = %partition, "Resumed partition after drain");
                    self.paused.remove(partition);
                }
            }
            Err(e) => warn!(error = %e, "Failed to resume drained partitions"),
        }
    }

    fn pause_worker_partitions(&mut self, pool: &ConsumerWorkerPool, worker: usize) {
        let owned: Vec<Partition> = pool
            .partitions_for_worker(worker)
            .into_iter()
            .filter(|partition| !self.paused.contains(partition))
            .collect();
        if owned.is_empty() {
            return;
        }
        match self.stream.pause(&owned) {
            Ok(()) => {
                for partition in owned {
                    debug!(partition = %partition, worker, "Paused partition, worker saturated");
                    self.paused.insert(partition);
                }
            }
            Err(e) => warn!(error = %e, "Failed to pause saturated worker's partitions"),
        }
    }
}
