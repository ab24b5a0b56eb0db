//! In-memory transport fakes shared by unit and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::context::MessageContext;
use crate::middleware::MessageHandler;
use crate::transport::{
    DeliveryResult, OutboundRecord, ProducerHandle, ProducerHandleFactory, Record, RecordStream,
    TransportError,
};
use crate::types::{Partition, PartitionOffset};

/// In-memory `RecordStream`: a shared queue of records honouring the
/// pause/resume contract (paused partitions never yield records, their
/// records stay queued in order).
#[derive(Default)]
pub struct InMemoryStream {
    queue: Mutex<VecDeque<Record>>,
    paused: Mutex<HashSet<Partition>>,
    commits: Mutex<Vec<(Partition, i64)>>,
    subscriptions: Mutex<Vec<String>>,
    fail_next_fetch: Mutex<Option<TransportError>>,
}

impl InMemoryStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, record: Record) {
        self.queue.lock().unwrap().push_back(record);
    }

    pub fn push_value(&self, topic: &str, partition: i32, offset: i64, value: &[u8]) {
        self.push(Record {
            topic: topic.to_string(),
            partition,
            offset,
            key: None,
            value: Some(value.to_vec()),
            headers: HashMap::new(),
            timestamp: None,
        });
    }

    pub fn fail_next_fetch(&self, error: TransportError) {
        *self.fail_next_fetch.lock().unwrap() = Some(error);
    }

    pub fn paused_partitions(&self) -> HashSet<Partition> {
        self.paused.lock().unwrap().clone()
    }

    pub fn commits(&self) -> Vec<(Partition, i64)> {
        self.commits.lock().unwrap().clone()
    }

    /// Latest committed offset for a partition, if any.
    pub fn committed_offset(&self, partition: &Partition) -> Option<i64> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == partition)
            .map(|(_, offset)| *offset)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStream for InMemoryStream {
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        self.subscriptions.lock().unwrap().extend_from_slice(topics);
        Ok(())
    }

    async fn fetch_next(&self, timeout: Duration) -> Result<Option<Record>, TransportError> {
        if let Some(error) = self.fail_next_fetch.lock().unwrap().take() {
            return Err(error);
        }
        let record = {
            let paused = self.paused.lock().unwrap();
            let mut queue = self.queue.lock().unwrap();
            let position = queue.iter().position(|record| {
                !paused.contains(&Partition::new(record.topic.clone(), record.partition))
            });
            position.and_then(|index| queue.remove(index))
        };
        match record {
            Some(record) => Ok(Some(record)),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn commit_offset(
        &self,
        partition: &Partition,
        offset: i64,
    ) -> Result<(), TransportError> {
        self.commits
            .lock()
            .unwrap()
            .push((partition.clone(), offset));
        Ok(())
    }

    fn pause(&self, partitions: &[Partition]) -> Result<(), TransportError> {
        let mut paused = self.paused.lock().unwrap();
        for partition in partitions {
            paused.insert(partition.clone());
        }
        Ok(())
    }

    fn resume(&self, partitions: &[Partition]) -> Result<(), TransportError> {
        let mut paused = self.paused.lock().unwrap();
        for partition in partitions {
            paused.remove(partition);
        }
        Ok(())
    }
}

/// In-memory `ProducerHandle` recording sends and transaction calls.
pub struct InMemoryProducerHandle {
    id: usize,
    sent: Mutex<Vec<OutboundRecord>>,
    next_offset: AtomicI64,
    fail_next_sends: Mutex<VecDeque<TransportError>>,
    fail_next_commits: Mutex<VecDeque<TransportError>>,
    transaction_log: Mutex<Vec<String>>,
}

impl InMemoryProducerHandle {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            sent: Mutex::new(Vec::new()),
            next_offset: AtomicI64::new(0),
            fail_next_sends: Mutex::new(VecDeque::new()),
            fail_next_commits: Mutex::new(VecDeque::new()),
            transaction_log: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn sent(&self) -> Vec<OutboundRecord> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next_send(&self, error: TransportError) {
        self.fail_next_sends.lock().unwrap().push_back(error);
    }

    pub fn fail_next_commit(&self, error: TransportError) {
        self.fail_next_commits.lock().unwrap().push_back(error);
    }

    /// Ordered log of transaction operations, e.g. `init`, `begin`,
    /// `offsets group events:0@3`, `commit`, `abort`.
    pub fn transaction_log(&self) -> Vec<String> {
        self.transaction_log.lock().unwrap().clone()
    }

    fn log(&self, entry: impl Into<String>) {
        self.transaction_log.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl ProducerHandle for InMemoryProducerHandle {
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryResult, TransportError> {
        if let Some(error) = self.fail_next_sends.lock().unwrap().pop_front() {
            return Err(error);
        }
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        let topic = record.topic.clone();
        self.sent.lock().unwrap().push(record);
        Ok(DeliveryResult {
            topic,
            partition: 0,
            offset,
        })
    }

    async fn init_transactions(&self, _timeout: Duration) -> Result<(), TransportError> {
        self.log("init");
        Ok(())
    }

    fn begin_transaction(&self) -> Result<(), TransportError> {
        self.log("begin");
        Ok(())
    }

    async fn commit_transaction(&self, _timeout: Duration) -> Result<(), TransportError> {
        if let Some(error) = self.fail_next_commits.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.log("commit");
        Ok(())
    }

    async fn abort_transaction(&self, _timeout: Duration) -> Result<(), TransportError> {
        self.log("abort");
        Ok(())
    }

    async fn send_offsets_to_transaction(
        &self,
        group_id: &str,
        offsets: &[PartitionOffset],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        for offset in offsets {
            self.log(format!(
                "offsets {group_id} {}@{}",
                offset.partition(),
                offset.offset()
            ));
        }
        Ok(())
    }
}

/// Factory producing `InMemoryProducerHandle`s; keeps every created handle
/// so tests can assert on handle identity and creation counts.
#[derive(Default)]
pub struct InMemoryHandleFactory {
    handles: Mutex<Vec<Arc<InMemoryProducerHandle>>>,
    fail_next_creations: Mutex<VecDeque<TransportError>>,
}

impl InMemoryHandleFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn handle(&self, index: usize) -> Arc<InMemoryProducerHandle> {
        self.handles.lock().unwrap()[index].clone()
    }

    pub fn fail_next_creation(&self, error: TransportError) {
        self.fail_next_creations.lock().unwrap().push_back(error);
    }
}

impl ProducerHandleFactory for InMemoryHandleFactory {
    fn create(&self) -> Result<Arc<dyn ProducerHandle>, TransportError> {
        if let Some(error) = self.fail_next_creations.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut handles = self.handles.lock().unwrap();
        let handle = Arc::new(InMemoryProducerHandle::new(handles.len()));
        handles.push(handle.clone());
        Ok(handle)
    }
}

/// Handler that records what it saw and optionally delays or fails.
pub struct CollectingHandler {
    seen: Mutex<Vec<(Partition, i64, Vec<u8>)>>,
    count: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    fail_values: Mutex<HashSet<Vec<u8>>>,
}

impl CollectingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
            delay: Mutex::new(None),
            fail_values: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Any record whose value matches will fail the pipeline.
    pub fn fail_on(&self, value: &[u8]) {
        self.fail_values.lock().unwrap().insert(value.to_vec());
    }

    pub fn seen(&self) -> Vec<(Partition, i64, Vec<u8>)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn offsets_for(&self, partition: &Partition) -> Vec<i64> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _, _)| p == partition)
            .map(|(_, offset, _)| *offset)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Poll until `count` records were handled or `timeout` elapses.
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.count() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.count() >= count
    }
}

#[async_trait]
impl MessageHandler for CollectingHandler {
    async fn handle(&self, ctx: &mut MessageContext) -> anyhow::Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let consumer = ctx
            .consumer()
            .ok_or_else(|| anyhow::anyhow!("missing consumer context"))?;
        let value = ctx
            .message()
            .value_as::<Vec<u8>>()
            .cloned()
            .unwrap_or_default();
        if self.fail_values.lock().unwrap().contains(&value) {
            anyhow::bail!("injected handler failure");
        }
        self.seen
            .lock()
            .unwrap()
            .push((consumer.partition().clone(), consumer.offset(), value));
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
