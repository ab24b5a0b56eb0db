//! The bus: one object owning every configured producer and consumer.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::join_all;
use tracing::{info, warn};

use crate::consumer::consumer::{Consumer, ConsumerHandle};
use crate::error::ConveyorError;
use crate::producer::configuration::ProducerConfiguration;
use crate::producer::message_producer::MessageProducer;

/// Registry and lifecycle root. Producers are available by name as soon as
/// they are added (their transport handles are created lazily anyway);
/// consumers are held until `start` and drained on `stop`.
#[derive(Default)]
pub struct ConveyorBus {
    producers: DashMap<String, Arc<MessageProducer>>,
    pending: Mutex<Vec<Consumer>>,
    handles: Mutex<Vec<ConsumerHandle>>,
}

impl ConveyorBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_producer(
        &self,
        config: ProducerConfiguration,
    ) -> Result<Arc<MessageProducer>, ConveyorError> {
        let producer = Arc::new(MessageProducer::new(Arc::new(config)));
        let name = producer.name().to_string();
        if self.producers.contains_key(&name) {
            return Err(ConveyorError::InvalidConfiguration(format!(
                "a producer named {name} is already registered"
            )));
        }
        self.producers.insert(name, producer.clone());
        Ok(producer)
    }

    pub fn producer(&self, name: &str) -> Option<Arc<MessageProducer>> {
        self.producers.get(name).map(|entry| entry.value().clone())
    }

    pub fn add_consumer(&self, consumer: Consumer) {
        self.pending.lock().unwrap().push(consumer);
    }

    /// Start every pending consumer.
    pub fn start(&self) {
        let pending: Vec<Consumer> = self.pending.lock().unwrap().drain(..).collect();
        let mut handles = self.handles.lock().unwrap();
        for consumer in pending {
            let handle = consumer.start();
            info!(consumer = handle.name(), "Consumer started");
            handles.push(handle);
        }
    }

    /// Stop every running consumer concurrently, draining in-flight records.
    /// Returns the first error encountered; later failures are logged.
    pub async fn stop(&self) -> Result<(), ConveyorError> {
        let handles: Vec<ConsumerHandle> = self.handles.lock().unwrap().drain(..).collect();
        let names: Vec<String> = handles.iter().map(|h| h.name().to_string()).collect();
        let results = join_all(handles.into_iter().map(ConsumerHandle::stop)).await;

        let mut first_error = None;
        for (name, result) in names.into_iter().zip(results) {
            if let Err(e) = result {
                warn!(consumer = %name, error = %e, "Consumer stop failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
