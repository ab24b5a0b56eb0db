//! The message producer: outbound middleware pipeline over a lazily created
//! transport handle.
//!
//! The handle is created on the first send (double-checked under a read/write
//! lock) and cached. A fatal transport error invalidates the cache so the
//! next send builds a fresh handle; transient errors keep it. Transactional
//! producers run `init_transactions` and open the first transaction before
//! the handle is published.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, error, warn};

use crate::context::{ConsumerContext, Headers, MessageContext, MessageValue};
use crate::error::ConveyorError;
use crate::metrics_consts::{PRODUCER_DELIVERIES, PRODUCER_HANDLE_INVALIDATIONS};
use crate::middleware::{MessageHandler, MiddlewareExecutor};
use crate::producer::configuration::ProducerConfiguration;
use crate::producer::transaction::{ConsumerProducerTransactionCoordinator, TransactionGate};
use crate::transport::{DeliveryResult, OutboundRecord, ProducerHandle};

/// Invoked with the delivery outcome of a fire-and-forget produce.
pub type DeliveryCallback =
    Box<dyn FnOnce(&Result<Option<DeliveryResult>, ConveyorError>) + Send>;

/// Completion of a fire-and-forget produce.
pub struct DeliveryFuture {
    receiver: oneshot::Receiver<Result<Option<DeliveryResult>, ConveyorError>>,
}

impl DeliveryFuture {
    /// Wait for the delivery outcome. `Ok(None)` means a middleware filtered
    /// the record out.
    pub async fn wait(self) -> Result<Option<DeliveryResult>, ConveyorError> {
        self.receiver
            .await
            .map_err(|_| ConveyorError::DeliveryAbandoned)?
    }
}

pub struct MessageProducer {
    config: Arc<ProducerConfiguration>,
    executor: MiddlewareExecutor,
    gate: TransactionGate,
    handle: RwLock<Option<Arc<dyn ProducerHandle>>>,
}

impl MessageProducer {
    pub fn new(config: Arc<ProducerConfiguration>) -> Self {
        let executor = MiddlewareExecutor::new(config.middlewares());
        Self {
            config,
            executor,
            gate: TransactionGate::new(),
            handle: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub(crate) fn gate(&self) -> &TransactionGate {
        &self.gate
    }

    /// Produce a record and wait for the delivery outcome. `Ok(None)` means a
    /// middleware filtered the record out before it reached the transport.
    ///
    /// The destination is the explicit `topic` if given, otherwise the
    /// configured default topic; with neither, the call fails before any
    /// middleware or transport work happens.
    pub async fn produce_async(
        &self,
        topic: Option<&str>,
        key: Option<MessageValue>,
        value: Option<MessageValue>,
        headers: Headers,
    ) -> Result<Option<DeliveryResult>, ConveyorError> {
        let topic = match topic.or(self.config.default_topic()) {
            Some(topic) => topic.to_string(),
            None => {
                return Err(ConveyorError::MissingDefaultTopic {
                    producer: self.config.name().to_string(),
                })
            }
        };

        let mut ctx = MessageContext::outbound(key, value, headers, topic);
        let terminal = TransportSend {
            producer: self,
            report: Mutex::new(None),
        };

        self.executor
            .execute(&mut ctx, &terminal)
            .await
            .map_err(ConveyorError::from_pipeline)?;

        let report = terminal.report.lock().unwrap().take();
        Ok(report)
    }

    /// Fire-and-forget produce: the pipeline runs on a spawned task. The
    /// outcome completes the returned future and, when provided, the
    /// callback; errors reach both.
    pub fn produce(
        self: &Arc<Self>,
        topic: Option<&str>,
        key: Option<MessageValue>,
        value: Option<MessageValue>,
        headers: Headers,
        callback: Option<DeliveryCallback>,
    ) -> DeliveryFuture {
        let producer = self.clone();
        let topic = topic.map(str::to_string);
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = producer
                .produce_async(topic.as_deref(), key, value, headers)
                .await;
            if let Err(e) = &result {
                warn!(
                    producer = producer.config.name(),
                    error = %e,
                    "Fire-and-forget delivery failed"
                );
            }
            if let Some(callback) = callback {
                callback(&result);
            }
            if tx.send(result).is_err() {
                debug!("Delivery future dropped before completion");
            }
        });

        DeliveryFuture { receiver: rx }
    }

    /// Bind a consumed record to this producer's transaction: its offset will
    /// commit through the transaction instead of the consumer's direct store.
    ///
    /// Fails if the producer has no transactional id; the consumer context is
    /// left untouched in that case.
    pub fn register_consumer_producer_transaction(
        self: &Arc<Self>,
        consumer: &ConsumerContext,
    ) -> Result<(), ConveyorError> {
        if self.config.transactional_id().is_none() {
            return Err(ConveyorError::NotTransactional {
                producer: self.config.name().to_string(),
            });
        }
        consumer.set_should_store_offset(false);
        consumer.register_transaction_coordinator(Arc::new(
            ConsumerProducerTransactionCoordinator::new(
                self.clone(),
                self.config.transaction_timeout(),
            ),
        ));
        Ok(())
    }

    /// Get the cached transport handle, creating it on first use.
    pub(crate) async fn ensure_handle(&self) -> Result<Arc<dyn ProducerHandle>, ConveyorError> {
        {
            let read = self.handle.read().await;
            if let Some(handle) = read.as_ref() {
                return Ok(handle.clone());
            }
        }

        let mut write = self.handle.write().await;
        // Another sender may have won the race while we waited.
        if let Some(handle) = write.as_ref() {
            return Ok(handle.clone());
        }

        debug!(producer = self.config.name(), "Creating producer handle");
        let handle = self
            .config
            .handle_factory()
            .create()
            .map_err(ConveyorError::HandleCreation)?;

        if self.config.transactional_id().is_some() {
            let timeout = self.config.transaction_timeout();
            handle
                .init_transactions(timeout)
                .await
                .map_err(ConveyorError::HandleCreation)?;
            handle
                .begin_transaction()
                .map_err(ConveyorError::HandleCreation)?;
        }

        *write = Some(handle.clone());
        Ok(handle)
    }

    async fn invalidate_handle(&self) {
        counter!(PRODUCER_HANDLE_INVALIDATIONS).increment(1);
        *self.handle.write().await = None;
    }

    /// The transport send, performed under a gate pass so it never straddles
    /// a transaction commit.
    async fn internal_send(&self, record: OutboundRecord) -> Result<DeliveryResult, ConveyorError> {
        let _pass = self.gate.pass().await;
        let handle = self.ensure_handle().await?;

        match handle.send(record).await {
            Ok(result) => {
                counter!(PRODUCER_DELIVERIES, "result" => "success").increment(1);
                Ok(result)
            }
            Err(e) => {
                counter!(PRODUCER_DELIVERIES, "result" => "failure").increment(1);
                if e.is_fatal() {
                    error!(
                        producer = self.config.name(),
                        error = %e,
                        "Fatal delivery error, invalidating producer handle"
                    );
                    self.invalidate_handle().await;
                } else {
                    warn!(producer = self.config.name(), error = %e, "Delivery failed");
                }
                Err(ConveyorError::Delivery(e))
            }
        }
    }
}

/// Terminal action of the produce pipeline: demand raw bytes and hand the
/// record to the transport.
struct TransportSend<'p> {
    producer: &'p MessageProducer,
    report: Mutex<Option<DeliveryResult>>,
}

#[async_trait]
impl MessageHandler for TransportSend<'_> {
    async fn handle(&self, ctx: &mut MessageContext) -> anyhow::Result<()> {
        let topic = match ctx.producer() {
            Some(producer_ctx) => producer_ctx.topic().to_string(),
            None => {
                return Err(ConveyorError::InvalidConfiguration(
                    "outbound record is missing its producer context".to_string(),
                )
                .into())
            }
        };

        let message = ctx.message();
        let value = if let Some(bytes) = message.value_as::<Vec<u8>>() {
            bytes.clone()
        } else if let Some(text) = message.value_as::<String>() {
            text.clone().into_bytes()
        } else {
            return Err(ConveyorError::UnencodedMessage { part: "value" }.into());
        };
        let key = if message.has_key() {
            if let Some(bytes) = message.key_as::<Vec<u8>>() {
                Some(bytes.clone())
            } else if let Some(text) = message.key_as::<String>() {
                Some(text.clone().into_bytes())
            } else {
                return Err(ConveyorError::UnencodedMessage { part: "key" }.into());
            }
        } else {
            None
        };

        let record = OutboundRecord {
            topic,
            key,
            value,
            headers: ctx.headers().clone().into_map(),
        };

        let result = self.producer.internal_send(record).await?;
        if let Some(producer_ctx) = ctx.producer_mut() {
            producer_ctx.record_delivery(result.partition, result.offset);
        }
        *self.report.lock().unwrap() = Some(result);
        Ok(())
    }
}
