//! rdkafka-backed `RecordStream`.
//!
//! Rebalance callbacks run on librdkafka's own thread, so they only forward
//! events into an unbounded channel; the consumer's control task applies
//! them. Revocations are reported from the pre-rebalance callback (before
//! ownership is lost), assignments from post-rebalance (once ownership is
//! final).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{
    BaseConsumer, Consumer, ConsumerContext as RdConsumerContext, ConsumerGroupMetadata, Rebalance,
    StreamConsumer,
};
use rdkafka::error::KafkaError;
use rdkafka::message::{Headers as RdHeaders, Message};
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::client::config::{consumer_client_config, KafkaSettings};
use crate::client::producer::GroupMetadataSource;
use crate::transport::{RebalanceEvent, Record, RecordStream, TransportError};
use crate::types::Partition;

pub(crate) fn map_kafka_error(e: KafkaError) -> TransportError {
    use rdkafka::types::RDKafkaErrorCode;
    let fatal = matches!(
        e.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Fatal | RDKafkaErrorCode::Fenced)
    );
    if fatal {
        TransportError::Fatal(e.to_string())
    } else {
        TransportError::Transient(e.to_string())
    }
}

fn partitions_from_tpl(tpl: &TopicPartitionList) -> Vec<Partition> {
    tpl.elements()
        .into_iter()
        .map(|elem| Partition::new(elem.topic().to_string(), elem.partition()))
        .collect()
}

fn tpl_from_partitions(partitions: &[Partition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for partition in partitions {
        tpl.add_partition(partition.topic(), partition.partition_number());
    }
    tpl
}

/// Client context that turns librdkafka rebalance callbacks into
/// `RebalanceEvent`s on a channel.
pub struct RebalanceForwarder {
    rebalance_tx: mpsc::UnboundedSender<RebalanceEvent>,
}

impl ClientContext for RebalanceForwarder {}

impl RdConsumerContext for RebalanceForwarder {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        if let Rebalance::Revoke(tpl) = rebalance {
            if tpl.count() == 0 {
                return;
            }
            info!(partitions = tpl.count(), "Pre-rebalance: partitions revoked");
            let event = RebalanceEvent::Revoked(partitions_from_tpl(tpl));
            if self.rebalance_tx.send(event).is_err() {
                error!("Rebalance channel closed, revoke event dropped");
            }
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!(partitions = tpl.count(), "Post-rebalance: partitions assigned");
                let event = RebalanceEvent::Assigned(partitions_from_tpl(tpl));
                if self.rebalance_tx.send(event).is_err() {
                    error!("Rebalance channel closed, assign event dropped");
                }
            }
            Rebalance::Error(e) => error!(error = %e, "Rebalance error"),
            Rebalance::Revoke(_) => {}
        }
    }
}

pub struct KafkaRecordStream {
    consumer: StreamConsumer<RebalanceForwarder>,
}

impl KafkaRecordStream {
    /// Create the stream and the rebalance channel its callbacks feed.
    pub fn new(
        settings: &KafkaSettings,
        group_id: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RebalanceEvent>), TransportError> {
        let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
        let consumer = consumer_client_config(settings, group_id)
            .create_with_context(RebalanceForwarder { rebalance_tx })
            .map_err(map_kafka_error)?;
        Ok((Self { consumer }, rebalance_rx))
    }
}

impl GroupMetadataSource for KafkaRecordStream {
    fn group_metadata(&self) -> Option<ConsumerGroupMetadata> {
        self.consumer.group_metadata()
    }
}

#[async_trait]
impl RecordStream for KafkaRecordStream {
    async fn subscribe(&self, topics: &[String]) -> Result<(), TransportError> {
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names).map_err(map_kafka_error)
    }

    async fn fetch_next(&self, timeout: Duration) -> Result<Option<Record>, TransportError> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(map_kafka_error(e)),
            Ok(Ok(message)) => message,
        };

        let mut headers = HashMap::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(header.key.to_string(), value.to_vec());
                }
            }
        }

        Ok(Some(Record {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            value: message.payload().map(<[u8]>::to_vec),
            headers,
            timestamp: message.timestamp().to_millis(),
        }))
    }

    async fn commit_offset(
        &self,
        partition: &Partition,
        offset: i64,
    ) -> Result<(), TransportError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            partition.topic(),
            partition.partition_number(),
            Offset::Offset(offset),
        )
        .map_err(map_kafka_error)?;
        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .map_err(map_kafka_error)
    }

    fn pause(&self, partitions: &[Partition]) -> Result<(), TransportError> {
        self.consumer
            .pause(&tpl_from_partitions(partitions))
            .map_err(map_kafka_error)
    }

    fn resume(&self, partitions: &[Partition]) -> Result<(), TransportError> {
        self.consumer
            .resume(&tpl_from_partitions(partitions))
            .map_err(map_kafka_error)
    }
}
