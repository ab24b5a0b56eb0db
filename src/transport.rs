//! Narrow interfaces over the log transport.
//!
//! The consumption engine and the producer are written against these traits
//! rather than a concrete client, so the core can be exercised with in-memory
//! fakes. The rdkafka-backed implementations live in `crate::client`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Partition, PartitionOffset};

/// Errors surfaced by the transport. The fatal/transient split drives the
/// producer handle lifecycle: fatal errors invalidate the cached handle,
/// transient ones do not.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("fatal transport error: {0}")]
    Fatal(String),
    #[error("transport error: {0}")]
    Transient(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Fatal(_))
    }
}

/// One record fetched from a partition.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: HashMap<String, Vec<u8>>,
    pub timestamp: Option<i64>,
}

/// A record handed to the producer transport. The payload must already be raw
/// bytes at this point; encoding is a middleware concern.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, Vec<u8>>,
}

/// Acknowledged placement of a produced record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Partition ownership changes reported by the transport's group coordinator.
///
/// `Assigned` carries the full current assignment (eager protocol); `Revoked`
/// carries only the partitions being taken away.
#[derive(Debug, Clone)]
pub enum RebalanceEvent {
    Assigned(Vec<Partition>),
    Revoked(Vec<Partition>),
}

/// Consumer-side transport operations.
#[async_trait]
pub trait RecordStream: Send + Sync {
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Fetch the next record, waiting up to `timeout`. `Ok(None)` means the
    /// timeout elapsed with nothing available. Paused partitions never yield
    /// records.
    async fn fetch_next(&self, timeout: Duration) -> Result<Option<Record>, TransportError>;

    /// Commit `offset` as the next offset to consume for `partition`.
    async fn commit_offset(&self, partition: &Partition, offset: i64)
        -> Result<(), TransportError>;

    fn pause(&self, partitions: &[Partition]) -> Result<(), TransportError>;

    fn resume(&self, partitions: &[Partition]) -> Result<(), TransportError>;
}

/// Creates producer handles on demand. The producer calls this lazily, on
/// the first send, and again after a fatal error invalidated the previous
/// handle.
pub trait ProducerHandleFactory: Send + Sync {
    fn create(&self) -> Result<std::sync::Arc<dyn ProducerHandle>, TransportError>;
}

/// Producer-side transport operations, including the transactional surface.
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryResult, TransportError>;

    async fn init_transactions(&self, timeout: Duration) -> Result<(), TransportError>;

    fn begin_transaction(&self) -> Result<(), TransportError>;

    async fn commit_transaction(&self, timeout: Duration) -> Result<(), TransportError>;

    async fn abort_transaction(&self, timeout: Duration) -> Result<(), TransportError>;

    /// Attach consumed offsets to the open transaction so they commit or roll
    /// back together with the produced records.
    async fn send_offsets_to_transaction(
        &self,
        group_id: &str,
        offsets: &[PartitionOffset],
        timeout: Duration,
    ) -> Result<(), TransportError>;
}
