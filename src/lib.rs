//! kafka-conveyor: a worker-pool message processing framework for Kafka.
//!
//! Records flow from a [`transport::RecordStream`] through a feeder with
//! transport-level backpressure into a pool of worker lanes, each running a
//! middleware pipeline ending in an application handler. Per-partition order
//! is preserved by routing every partition to a fixed lane. The producer side
//! mirrors the pipeline for outbound records, with lazy transport handles and
//! optional consumer-producer transactions for exactly-once processing.

pub mod bus;
pub mod client;
pub mod consumer;
pub mod context;
pub mod error;
pub mod metrics_consts;
pub mod middleware;
pub mod producer;
pub mod test_utils;
pub mod transport;
pub mod types;

pub use bus::ConveyorBus;
pub use consumer::{Consumer, ConsumerConfiguration, ConsumerHandle, ConsumerStatus};
pub use context::{ConsumerContext, Headers, MessageContext, MessageValue, ProducerContext};
pub use error::ConveyorError;
pub use middleware::{MessageHandler, Middleware, MiddlewareExecutor, Next};
pub use producer::{MessageProducer, ProducerConfiguration};
pub use transport::{DeliveryResult, RebalanceEvent, Record, TransportError};
pub use types::{Partition, PartitionOffset};
