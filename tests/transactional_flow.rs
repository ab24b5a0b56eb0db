//! Consume-transform-produce with transactional offset commits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use kafka_conveyor::consumer::{Consumer, ConsumerConfiguration, ConsumerStatus};
use kafka_conveyor::context::{Headers, MessageContext};
use kafka_conveyor::middleware::MessageHandler;
use kafka_conveyor::producer::{MessageProducer, ProducerConfiguration};
use kafka_conveyor::test_utils::{InMemoryHandleFactory, InMemoryStream};
use kafka_conveyor::transport::RebalanceEvent;
use kafka_conveyor::types::Partition;

/// Forwards every consumed record to an output topic inside the producer's
/// transaction.
struct ForwardingHandler {
    producer: Arc<MessageProducer>,
}

#[async_trait]
impl MessageHandler for ForwardingHandler {
    async fn handle(&self, ctx: &mut MessageContext) -> anyhow::Result<()> {
        let consumer = ctx
            .consumer()
            .ok_or_else(|| anyhow::anyhow!("missing consumer context"))?;
        self.producer
            .register_consumer_producer_transaction(consumer)?;

        let value = ctx
            .message()
            .value_as::<Vec<u8>>()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("expected raw bytes"))?;
        self.producer
            .produce_async(Some("forwarded"), None, Some(Box::new(value)), Headers::new())
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_offsets_commit_through_the_transaction_not_the_stream() {
    let stream = InMemoryStream::new();
    stream.push_value("events", 0, 3, b"payload");

    let factory = InMemoryHandleFactory::new();
    let producer = Arc::new(MessageProducer::new(Arc::new(
        ProducerConfiguration::builder()
            .name("forwarder")
            .transactional_id("txn-forward")
            .handle_factory(factory.clone())
            .build()
            .unwrap(),
    )));

    let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();
    rebalance_tx
        .send(RebalanceEvent::Assigned(vec![Partition::new(
            "events".to_string(),
            0,
        )]))
        .unwrap();

    let config = Arc::new(
        ConsumerConfiguration::builder()
            .group_id("txn-group")
            .topic("events")
            .handler(Arc::new(ForwardingHandler {
                producer: producer.clone(),
            }))
            .fetch_timeout(Duration::from_millis(10))
            .build()
            .unwrap(),
    );
    let consumer = Consumer::new(config, stream.clone(), rebalance_rx);
    let mut handle = consumer.start();
    handle.wait_for(ConsumerStatus::Running).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while factory.created_count() == 0
        || !factory
            .handle(0)
            .transaction_log()
            .iter()
            .any(|entry| entry == "commit")
    {
        assert!(tokio::time::Instant::now() < deadline, "transaction never committed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop().await.unwrap();

    let produced_handle = factory.handle(0);
    assert_eq!(produced_handle.sent().len(), 1);
    assert_eq!(produced_handle.sent()[0].topic, "forwarded");

    // The offset advanced through the transaction (as last processed + 1) and
    // never through the consumer's direct committer.
    assert_eq!(
        produced_handle.transaction_log(),
        vec![
            "init",
            "begin",
            "offsets txn-group events:0@4",
            "commit",
            "begin"
        ]
    );
    assert!(stream.commits().is_empty());
}
