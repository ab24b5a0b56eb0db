//! rdkafka-backed transport implementations.

pub mod config;
pub mod consumer;
pub mod producer;

pub use config::KafkaSettings;
pub use consumer::KafkaRecordStream;
pub use producer::{KafkaProducerHandle, KafkaProducerHandleFactory};
