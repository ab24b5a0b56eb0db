pub mod configuration;
pub mod message_producer;
pub mod transaction;

pub use configuration::{Acks, ProducerConfiguration, ProducerConfigurationBuilder};
pub use message_producer::{DeliveryCallback, DeliveryFuture, MessageProducer};
pub use transaction::{ConsumerProducerTransactionCoordinator, TransactionGate};
