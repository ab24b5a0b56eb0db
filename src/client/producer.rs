//! rdkafka-backed `ProducerHandle` and its factory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::ConsumerGroupMetadata;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::debug;

use crate::client::config::{producer_client_config, KafkaSettings};
use crate::client::consumer::map_kafka_error;
use crate::producer::configuration::Acks;
use crate::transport::{
    DeliveryResult, OutboundRecord, ProducerHandle, ProducerHandleFactory, TransportError,
};
use crate::types::PartitionOffset;

/// Supplies consumer group metadata for transactional offset commits.
/// Implemented by the rdkafka record stream.
pub trait GroupMetadataSource: Send + Sync {
    fn group_metadata(&self) -> Option<ConsumerGroupMetadata>;
}

pub struct KafkaProducerHandle {
    inner: FutureProducer,
    metadata_source: Option<Arc<dyn GroupMetadataSource>>,
}

impl KafkaProducerHandle {
    pub fn new(inner: FutureProducer, metadata_source: Option<Arc<dyn GroupMetadataSource>>) -> Self {
        Self {
            inner,
            metadata_source,
        }
    }
}

#[async_trait]
impl ProducerHandle for KafkaProducerHandle {
    async fn send(&self, record: OutboundRecord) -> Result<DeliveryResult, TransportError> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value.as_slice()),
            });
        }

        let future_record: FutureRecord<'_, [u8], Vec<u8>> = FutureRecord {
            topic: &record.topic,
            partition: None,
            payload: Some(&record.value),
            key: record.key.as_deref(),
            timestamp: None,
            headers: Some(headers),
        };

        match self.inner.send(future_record, Timeout::Never).await {
            Ok((partition, offset)) => Ok(DeliveryResult {
                topic: record.topic,
                partition,
                offset,
            }),
            Err((e, _)) => Err(map_kafka_error(e)),
        }
    }

    async fn init_transactions(&self, timeout: Duration) -> Result<(), TransportError> {
        self.inner
            .init_transactions(timeout)
            .map_err(map_kafka_error)
    }

    fn begin_transaction(&self) -> Result<(), TransportError> {
        self.inner.begin_transaction().map_err(map_kafka_error)
    }

    async fn commit_transaction(&self, timeout: Duration) -> Result<(), TransportError> {
        self.inner
            .commit_transaction(timeout)
            .map_err(map_kafka_error)
    }

    async fn abort_transaction(&self, timeout: Duration) -> Result<(), TransportError> {
        self.inner
            .abort_transaction(timeout)
            .map_err(map_kafka_error)
    }

    async fn send_offsets_to_transaction(
        &self,
        _group_id: &str,
        offsets: &[PartitionOffset],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        // Fetched fresh on every transactional commit; generation changes
        // across rebalances invalidate older metadata.
        let metadata = self
            .metadata_source
            .as_ref()
            .and_then(|source| source.group_metadata());
        let Some(metadata) = metadata else {
            return Err(TransportError::Fatal(
                "no consumer group metadata available for transactional offset commit".to_string(),
            ));
        };

        let mut tpl = TopicPartitionList::new();
        for offset in offsets {
            tpl.add_partition_offset(
                offset.topic(),
                offset.partition_number(),
                Offset::Offset(offset.offset()),
            )
            .map_err(map_kafka_error)?;
        }

        self.inner
            .send_offsets_to_transaction(&tpl, &metadata, timeout)
            .map_err(map_kafka_error)
    }
}

/// Builds rdkafka producer handles from broker settings. One factory per
/// configured producer; the transactional id and acks come from the producer
/// configuration it was built for.
pub struct KafkaProducerHandleFactory {
    settings: KafkaSettings,
    acks: Acks,
    transactional_id: Option<String>,
    metadata_source: Option<Arc<dyn GroupMetadataSource>>,
}

impl KafkaProducerHandleFactory {
    pub fn new(settings: KafkaSettings, acks: Acks, transactional_id: Option<String>) -> Self {
        Self {
            settings,
            acks,
            transactional_id,
            metadata_source: None,
        }
    }

    /// Wire the consumer whose offsets this producer will commit
    /// transactionally. Required for consumer-producer transactions.
    pub fn with_metadata_source(mut self, source: Arc<dyn GroupMetadataSource>) -> Self {
        self.metadata_source = Some(source);
        self
    }
}

impl ProducerHandleFactory for KafkaProducerHandleFactory {
    fn create(&self) -> Result<Arc<dyn ProducerHandle>, TransportError> {
        let config =
            producer_client_config(&self.settings, self.acks, self.transactional_id.as_deref());
        debug!("rdkafka producer configuration: {:?}", config);
        let inner: FutureProducer = config.create().map_err(map_kafka_error)?;
        Ok(Arc::new(KafkaProducerHandle::new(
            inner,
            self.metadata_source.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::Partition;

    fn settings() -> KafkaSettings {
        KafkaSettings {
            kafka_hosts: "localhost:9092".to_string(),
            kafka_tls: false,
            kafka_producer_linger_ms: 20,
            kafka_message_timeout_ms: 20000,
            kafka_compression_codec: "none".to_string(),
            kafka_session_timeout_ms: 60000,
            kafka_heartbeat_interval_ms: 5000,
            kafka_offset_reset: "earliest".to_string(),
        }
    }

    // Creating a FutureProducer validates configuration only; no broker is
    // contacted until a send.
    #[tokio::test]
    async fn test_transactional_offsets_without_metadata_source_fail_fast() {
        let factory = KafkaProducerHandleFactory::new(settings(), Acks::All, None);
        let handle = factory.create().unwrap();

        let offsets = [PartitionOffset::new(
            Partition::new("events".to_string(), 0),
            1,
        )];
        let err = handle
            .send_offsets_to_transaction("group", &offsets, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
