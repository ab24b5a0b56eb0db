//! A single worker lane: one bounded queue, one processing task.
//!
//! Records queued on the same worker are processed strictly in arrival
//! order, which together with partition-sticky routing gives per-partition
//! ordering. A pipeline error is confined to its record; the lane logs it
//! and moves on.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::MessageContext;
use crate::error::ConveyorError;
use crate::metrics_consts::{
    WORKER_MESSAGES_ENQUEUED, WORKER_MESSAGES_FAILED, WORKER_MESSAGES_PROCESSED,
    WORKER_PROCESSING_DURATION,
};
use crate::middleware::{MessageHandler, MiddlewareExecutor};

/// Outcome of a non-blocking enqueue attempt. The context travels back to the
/// caller so a rejected record can be re-queued after backpressure handling.
pub enum EnqueueRejection {
    Full(MessageContext),
    Closed(MessageContext),
}

pub struct Worker {
    index: usize,
    capacity: usize,
    sender: mpsc::Sender<MessageContext>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Start the worker task. The queue holds at most `capacity` records;
    /// producers into the queue block (or get `Full`) beyond that.
    pub fn spawn(
        index: usize,
        capacity: usize,
        executor: Arc<MiddlewareExecutor>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let handle = tokio::spawn(run_loop(index, receiver, executor, handler));
        Self {
            index,
            capacity,
            sender,
            handle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Queue a record, waiting for space if the lane is full.
    pub async fn enqueue(&self, ctx: MessageContext) -> Result<(), ConveyorError> {
        self.sender
            .send(ctx)
            .await
            .map_err(|_| ConveyorError::WorkerStopped { index: self.index })?;
        counter!(WORKER_MESSAGES_ENQUEUED).increment(1);
        Ok(())
    }

    /// Queue a record only if there is room right now.
    pub fn try_enqueue(&self, ctx: MessageContext) -> Result<(), EnqueueRejection> {
        match self.sender.try_send(ctx) {
            Ok(()) => {
                counter!(WORKER_MESSAGES_ENQUEUED).increment(1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(ctx)) => Err(EnqueueRejection::Full(ctx)),
            Err(mpsc::error::TrySendError::Closed(ctx)) => Err(EnqueueRejection::Closed(ctx)),
        }
    }

    /// Queue slots currently free.
    pub fn free_slots(&self) -> usize {
        self.sender.capacity()
    }

    /// True when the queue has drained to at least half free, the point at
    /// which paused partitions owned by this lane are resumed.
    pub fn below_low_water(&self) -> bool {
        self.free_slots() * 2 >= self.capacity
    }

    /// Stop accepting records and wait for the queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            error!(worker = self.index, error = %e, "Worker task panicked during shutdown");
        }
    }
}

async fn run_loop(
    index: usize,
    mut receiver: mpsc::Receiver<MessageContext>,
    executor: Arc<MiddlewareExecutor>,
    handler: Arc<dyn MessageHandler>,
) {
    info!(worker = index, "Worker started");

    while let Some(mut ctx) = receiver.recv().await {
        let started = Instant::now();
        let result = executor.execute(&mut ctx, handler.as_ref()).await;
        histogram!(WORKER_PROCESSING_DURATION).record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                counter!(WORKER_MESSAGES_PROCESSED).increment(1);
                if let Some(consumer) = ctx.consumer() {
                    if let Err(e) = consumer.store_offset().await {
                        warn!(
                            worker = index,
                            topic = consumer.topic(),
                            partition = consumer.partition().partition_number(),
                            offset = consumer.offset(),
                            error = %e,
                            "Failed to store offset after processing"
                        );
                    }
                }
            }
            Err(e) => {
                counter!(WORKER_MESSAGES_FAILED).increment(1);
                match ctx.consumer() {
                    Some(consumer) => error!(
                        worker = index,
                        topic = consumer.topic(),
                        partition = consumer.partition().partition_number(),
                        offset = consumer.offset(),
                        error = %e,
                        "Pipeline error, skipping record"
                    ),
                    None => error!(worker = index, error = %e, "Pipeline error, skipping record"),
                }
            }
        }
    }

    info!(worker = index, "Worker drained and stopped");
}
