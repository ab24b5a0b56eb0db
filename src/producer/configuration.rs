//! Producer configuration: built once through the builder, immutable after.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ConveyorError;
use crate::middleware::Middleware;
use crate::transport::ProducerHandleFactory;

const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery acknowledgement level requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acks {
    None,
    Leader,
    #[default]
    All,
}

pub struct ProducerConfiguration {
    name: String,
    default_topic: Option<String>,
    transactional_id: Option<String>,
    acks: Acks,
    transaction_timeout: Duration,
    middlewares: Vec<Arc<dyn Middleware>>,
    handle_factory: Arc<dyn ProducerHandleFactory>,
}

impl ProducerConfiguration {
    pub fn builder() -> ProducerConfigurationBuilder {
        ProducerConfigurationBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_topic(&self) -> Option<&str> {
        self.default_topic.as_deref()
    }

    pub fn transactional_id(&self) -> Option<&str> {
        self.transactional_id.as_deref()
    }

    pub fn acks(&self) -> Acks {
        self.acks
    }

    pub fn transaction_timeout(&self) -> Duration {
        self.transaction_timeout
    }

    pub fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.clone()
    }

    pub fn handle_factory(&self) -> &dyn ProducerHandleFactory {
        self.handle_factory.as_ref()
    }
}

#[derive(Default)]
pub struct ProducerConfigurationBuilder {
    name: Option<String>,
    default_topic: Option<String>,
    transactional_id: Option<String>,
    acks: Option<Acks>,
    transaction_timeout: Option<Duration>,
    middlewares: Vec<Arc<dyn Middleware>>,
    handle_factory: Option<Arc<dyn ProducerHandleFactory>>,
}

impl ProducerConfigurationBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn default_topic(mut self, topic: impl Into<String>) -> Self {
        self.default_topic = Some(topic.into());
        self
    }

    pub fn transactional_id(mut self, id: impl Into<String>) -> Self {
        self.transactional_id = Some(id.into());
        self
    }

    pub fn acks(mut self, acks: Acks) -> Self {
        self.acks = Some(acks);
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn handle_factory(mut self, factory: Arc<dyn ProducerHandleFactory>) -> Self {
        self.handle_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<ProducerConfiguration, ConveyorError> {
        let handle_factory = self.handle_factory.ok_or_else(|| {
            ConveyorError::InvalidConfiguration("a producer handle factory is required".into())
        })?;
        if self.transactional_id.as_deref() == Some("") {
            return Err(ConveyorError::InvalidConfiguration(
                "transactional id must not be empty".into(),
            ));
        }
        if self.acks.is_some()
            && self.acks != Some(Acks::All)
            && self.transactional_id.is_some()
        {
            return Err(ConveyorError::InvalidConfiguration(
                "transactional producers require acks=all".into(),
            ));
        }

        Ok(ProducerConfiguration {
            name: self.name.unwrap_or_else(|| "producer".to_string()),
            default_topic: self.default_topic,
            transactional_id: self.transactional_id,
            acks: self.acks.unwrap_or_default(),
            transaction_timeout: self
                .transaction_timeout
                .unwrap_or(DEFAULT_TRANSACTION_TIMEOUT),
            middlewares: self.middlewares,
            handle_factory,
        })
    }
}
