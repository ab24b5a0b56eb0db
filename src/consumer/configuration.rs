//! Consumer configuration: built once through the builder, immutable after.

use std::sync::Arc;
use std::time::Duration;

use crate::consumer::distribution::{DistributionStrategy, RoundRobinDistribution};
use crate::error::ConveyorError;
use crate::middleware::{MessageHandler, Middleware};

const DEFAULT_QUEUE_CAPACITY: usize = 10;
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct ConsumerConfiguration {
    name: String,
    group_id: String,
    topics: Vec<String>,
    worker_count: usize,
    queue_capacity: usize,
    strategy: Arc<dyn DistributionStrategy>,
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn MessageHandler>,
    fetch_timeout: Duration,
    telemetry_interval: Duration,
}

impl ConsumerConfiguration {
    pub fn builder() -> ConsumerConfigurationBuilder {
        ConsumerConfigurationBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn strategy(&self) -> Arc<dyn DistributionStrategy> {
        self.strategy.clone()
    }

    pub fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.clone()
    }

    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        self.handler.clone()
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn telemetry_interval(&self) -> Duration {
        self.telemetry_interval
    }
}

#[derive(Default)]
pub struct ConsumerConfigurationBuilder {
    name: Option<String>,
    group_id: Option<String>,
    topics: Vec<String>,
    worker_count: Option<usize>,
    queue_capacity: Option<usize>,
    strategy: Option<Arc<dyn DistributionStrategy>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Option<Arc<dyn MessageHandler>>,
    fetch_timeout: Option<Duration>,
    telemetry_interval: Option<Duration>,
}

impl ConsumerConfigurationBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn distribution_strategy(mut self, strategy: Arc<dyn DistributionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn telemetry_interval(mut self, interval: Duration) -> Self {
        self.telemetry_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ConsumerConfiguration, ConveyorError> {
        let group_id = self
            .group_id
            .filter(|g| !g.is_empty())
            .ok_or_else(|| ConveyorError::InvalidConfiguration("group id is required".into()))?;
        if self.topics.is_empty() {
            return Err(ConveyorError::InvalidConfiguration(
                "at least one topic is required".into(),
            ));
        }
        let handler = self
            .handler
            .ok_or_else(|| ConveyorError::InvalidConfiguration("handler is required".into()))?;
        let worker_count = self.worker_count.unwrap_or(1);
        if worker_count == 0 {
            return Err(ConveyorError::InvalidConfiguration(
                "worker count must be at least 1".into(),
            ));
        }
        let queue_capacity = self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(ConveyorError::InvalidConfiguration(
                "queue capacity must be at least 1".into(),
            ));
        }

        Ok(ConsumerConfiguration {
            name: self.name.unwrap_or_else(|| format!("consumer-{group_id}")),
            group_id,
            topics: self.topics,
            worker_count,
            queue_capacity,
            strategy: self
                .strategy
                .unwrap_or_else(|| Arc::new(RoundRobinDistribution)),
            middlewares: self.middlewares,
            handler,
            fetch_timeout: self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
            telemetry_interval: self
                .telemetry_interval
                .unwrap_or(DEFAULT_TELEMETRY_INTERVAL),
        })
    }
}
