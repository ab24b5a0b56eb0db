//! Per-record contexts flowing through the middleware pipeline.
//!
//! A `MessageContext` is created per record (inbound by the feeder, outbound
//! by the producer) and discarded once the pipeline completes. The key/value
//! slots are type-erased so decode middlewares can replace raw bytes with
//! application types in place; the producer demands bytes again at the
//! transport boundary.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::error::ConveyorError;
use crate::transport::Record;
use crate::types::{Partition, PartitionOffset};

/// A type-erased message slot. Starts life as `Vec<u8>` and may be replaced
/// by any `Send + Sync` application type as middlewares run.
pub type MessageValue = Box<dyn Any + Send + Sync>;

/// Destination for offset commits. Implemented directly over the transport
/// for the normal path, and by the producer's transaction coordinator when
/// exactly-once delivery is configured.
#[async_trait]
pub trait CommitOffsets: Send + Sync {
    async fn commit(&self, group_id: &str, offset: PartitionOffset) -> Result<(), ConveyorError>;
}

/// Message headers: string keys mapping to opaque byte values.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: HashMap<String, Vec<u8>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_map(self) -> HashMap<String, Vec<u8>> {
        self.entries
    }
}

impl From<HashMap<String, Vec<u8>>> for Headers {
    fn from(entries: HashMap<String, Vec<u8>>) -> Self {
        Self { entries }
    }
}

/// The mutable key/value pair carried by a context.
pub struct Message {
    key: Option<MessageValue>,
    value: Option<MessageValue>,
}

impl Message {
    pub fn new(key: Option<MessageValue>, value: Option<MessageValue>) -> Self {
        Self { key, value }
    }

    pub fn key_as<T: 'static>(&self) -> Option<&T> {
        self.key.as_ref().and_then(|k| k.downcast_ref::<T>())
    }

    pub fn value_as<T: 'static>(&self) -> Option<&T> {
        self.value.as_ref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Replace the value slot, returning the previous content. Decode and
    /// transform middlewares use this to advance the payload through its
    /// representations.
    pub fn replace_value(&mut self, value: MessageValue) -> Option<MessageValue> {
        self.value.replace(value)
    }

    pub fn replace_key(&mut self, key: MessageValue) -> Option<MessageValue> {
        self.key.replace(key)
    }
}

/// Consumer-side metadata for one record. Shared between the worker (which
/// stores the offset after processing) and the application handler (which may
/// hand it to a transactional producer).
pub struct ConsumerContext {
    partition: Partition,
    offset: i64,
    group_id: String,
    should_store_offset: AtomicBool,
    committer: Arc<dyn CommitOffsets>,
    coordinator: Mutex<Option<Arc<dyn CommitOffsets>>>,
}

impl ConsumerContext {
    pub fn new(
        partition: Partition,
        offset: i64,
        group_id: String,
        committer: Arc<dyn CommitOffsets>,
    ) -> Self {
        Self {
            partition,
            offset,
            group_id,
            should_store_offset: AtomicBool::new(true),
            committer,
            coordinator: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn should_store_offset(&self) -> bool {
        self.should_store_offset.load(Ordering::SeqCst)
    }

    pub fn set_should_store_offset(&self, enabled: bool) {
        self.should_store_offset.store(enabled, Ordering::SeqCst);
    }

    /// Route this record's offset commits through a transaction coordinator
    /// instead of the transport. Called by the producer during
    /// `register_consumer_producer_transaction`.
    pub fn register_transaction_coordinator(&self, coordinator: Arc<dyn CommitOffsets>) {
        *self.coordinator.lock().unwrap() = Some(coordinator);
    }

    pub fn has_transaction_coordinator(&self) -> bool {
        self.coordinator.lock().unwrap().is_some()
    }

    /// Commit this record's offset (as next-offset-to-consume). Delegates to
    /// the registered transaction coordinator if present, otherwise commits
    /// directly when offset storing is enabled.
    pub async fn store_offset(&self) -> Result<(), ConveyorError> {
        let next = PartitionOffset::new(self.partition.clone(), self.offset + 1);

        let coordinator = self.coordinator.lock().unwrap().clone();
        if let Some(coordinator) = coordinator {
            return coordinator.commit(&self.group_id, next).await;
        }

        if self.should_store_offset() {
            self.committer.commit(&self.group_id, next).await
        } else {
            debug!(
                topic = self.partition.topic(),
                partition = self.partition.partition_number(),
                offset = self.offset,
                "Offset store disabled, skipping commit"
            );
            Ok(())
        }
    }
}

/// Producer-side metadata for one record. The delivery placement is filled in
/// exactly once, after the transport acknowledges the send.
pub struct ProducerContext {
    topic: String,
    delivery: Option<(i32, i64)>,
}

impl ProducerContext {
    pub fn new(topic: String) -> Self {
        Self {
            topic,
            delivery: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition and offset of the delivered record, if the send completed.
    pub fn delivery(&self) -> Option<(i32, i64)> {
        self.delivery
    }

    /// Write-once: the first recorded delivery wins.
    pub fn record_delivery(&mut self, partition: i32, offset: i64) {
        if self.delivery.is_none() {
            self.delivery = Some((partition, offset));
        }
    }
}

/// One record's view of the pipeline: payload, headers, direction contexts
/// and a property bag for middleware-to-middleware data.
pub struct MessageContext {
    message: Message,
    headers: Headers,
    consumer: Option<Arc<ConsumerContext>>,
    producer: Option<ProducerContext>,
    properties: HashMap<String, MessageValue>,
}

impl MessageContext {
    /// Build an inbound context from a fetched record.
    pub fn inbound(record: Record, consumer: Arc<ConsumerContext>) -> Self {
        let key = record.key.map(|k| -> MessageValue { Box::new(k) });
        let value = record.value.map(|v| -> MessageValue { Box::new(v) });
        Self {
            message: Message::new(key, value),
            headers: Headers::from(record.headers),
            consumer: Some(consumer),
            producer: None,
            properties: HashMap::new(),
        }
    }

    /// Build an outbound context for a produce call.
    pub fn outbound(
        key: Option<MessageValue>,
        value: Option<MessageValue>,
        headers: Headers,
        topic: String,
    ) -> Self {
        Self {
            message: Message::new(key, value),
            headers,
            consumer: None,
            producer: Some(ProducerContext::new(topic)),
            properties: HashMap::new(),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn consumer(&self) -> Option<&Arc<ConsumerContext>> {
        self.consumer.as_ref()
    }

    pub fn producer(&self) -> Option<&ProducerContext> {
        self.producer.as_ref()
    }

    pub fn producer_mut(&mut self) -> Option<&mut ProducerContext> {
        self.producer.as_mut()
    }

    /// Attach a producer context to an inbound message, for produces triggered
    /// from inside a handler. Both direction contexts are then present.
    pub fn attach_producer(&mut self, producer: ProducerContext) {
        self.producer = Some(producer);
    }

    pub fn set_property<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.properties.insert(name.into(), Box::new(value));
    }

    pub fn property<T: 'static>(&self, name: &str) -> Option<&T> {
        self.properties.get(name).and_then(|v| v.downcast_ref::<T>())
    }
}
