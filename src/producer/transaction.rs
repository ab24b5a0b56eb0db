//! Transaction gate and consumer-producer transaction coordination.
//!
//! The gate keeps produced records out of a transaction boundary that is
//! being committed: every send holds a read pass for the duration of the
//! transport send, and the coordinator takes the write side while it moves
//! offsets and records into the committed transaction. tokio's RwLock queue
//! is fair, so senders blocked behind a commit proceed in arrival order.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{error, info, warn};

use crate::context::CommitOffsets;
use crate::error::ConveyorError;
use crate::metrics_consts::{
    TRANSACTIONS_ABORTED, TRANSACTIONS_COMMITTED, TRANSACTION_GATE_WAIT_DURATION,
};
use crate::producer::message_producer::MessageProducer;
use crate::types::PartitionOffset;

/// A pass through the gate, held for the duration of one transport send.
pub type GatePass = OwnedRwLockReadGuard<()>;

/// Gate between sends and transaction commits. Open by default; `initiated`
/// closes it after in-flight sends finish, `completed` reopens it.
pub struct TransactionGate {
    gate: Arc<RwLock<()>>,
    held: Mutex<Option<OwnedRwLockWriteGuard<()>>>,
}

impl TransactionGate {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(RwLock::new(())),
            held: Mutex::new(None),
        }
    }

    /// Wait for in-flight sends to finish, then close the gate. New senders
    /// queue up behind the closed gate.
    pub async fn initiated(&self) {
        let guard = self.gate.clone().write_owned().await;
        *self.held.lock().unwrap() = Some(guard);
    }

    /// Reopen the gate, releasing queued senders in arrival order.
    pub fn completed(&self) {
        self.held.lock().unwrap().take();
    }

    pub fn is_closed(&self) -> bool {
        self.held.lock().unwrap().is_some()
    }

    /// Acquire a send pass, waiting if a transaction commit is in progress.
    pub async fn pass(&self) -> GatePass {
        let started = Instant::now();
        let pass = self.gate.clone().read_owned().await;
        histogram!(TRANSACTION_GATE_WAIT_DURATION).record(started.elapsed().as_secs_f64());
        pass
    }
}

impl Default for TransactionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Commits a consumed record's offset inside the producer's transaction, so
/// the offset advance and the produced records become visible atomically.
pub struct ConsumerProducerTransactionCoordinator {
    producer: Arc<MessageProducer>,
    timeout: Duration,
}

impl ConsumerProducerTransactionCoordinator {
    pub fn new(producer: Arc<MessageProducer>, timeout: Duration) -> Self {
        Self { producer, timeout }
    }
}

#[async_trait]
impl CommitOffsets for ConsumerProducerTransactionCoordinator {
    async fn commit(&self, group_id: &str, offset: PartitionOffset) -> Result<(), ConveyorError> {
        let gate = self.producer.gate();
        gate.initiated().await;

        let result = self.run(group_id, &offset).await;

        match &result {
            Ok(()) => {
                counter!(TRANSACTIONS_COMMITTED).increment(1);
                info!(
                    group = group_id,
                    partition = %offset.partition(),
                    offset = offset.offset(),
                    "Transaction committed"
                );
            }
            Err(e) => {
                counter!(TRANSACTIONS_ABORTED).increment(1);
                warn!(group = group_id, error = %e, "Transaction failed, aborting");
                self.abort().await;
            }
        }

        gate.completed();
        result
    }
}

impl ConsumerProducerTransactionCoordinator {
    async fn run(&self, group_id: &str, offset: &PartitionOffset) -> Result<(), ConveyorError> {
        let handle = self.producer.ensure_handle().await?;
        handle
            .send_offsets_to_transaction(group_id, std::slice::from_ref(offset), self.timeout)
            .await
            .map_err(ConveyorError::Transport)?;
        handle
            .commit_transaction(self.timeout)
            .await
            .map_err(ConveyorError::Transport)?;
        // Open the next transaction so subsequent sends have a boundary to
        // join.
        handle
            .begin_transaction()
            .map_err(ConveyorError::Transport)?;
        Ok(())
    }

    async fn abort(&self) {
        let Ok(handle) = self.producer.ensure_handle().await else {
            return;
        };
        if let Err(e) = handle.abort_transaction(self.timeout).await {
            error!(error = %e, "Transaction abort failed");
            return;
        }
        if let Err(e) = handle.begin_transaction() {
            error!(error = %e, "Could not open a new transaction after abort");
        }
    }
}
