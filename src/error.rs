use thiserror::Error;

use crate::transport::TransportError;

/// Error taxonomy for the conveyor core.
///
/// Configuration errors are raised synchronously at the call site and are
/// never retried. Delivery and transport errors carry the fatal/transient
/// distinction from the transport layer. Pipeline errors are application
/// failures surfaced from middlewares; they never cross into another record's
/// processing.
#[derive(Error, Debug)]
pub enum ConveyorError {
    #[error("no default topic configured for producer {producer}")]
    MissingDefaultTopic { producer: String },

    #[error("producer {producer} is not configured for transactions")]
    NotTransactional { producer: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "message {part} must be raw bytes when it reaches the transport; \
         add an encoding middleware"
    )]
    UnencodedMessage { part: &'static str },

    #[error("no worker owns partition {partition}")]
    PartitionNotAssigned { partition: crate::types::Partition },

    #[error("worker {index} queue is closed")]
    WorkerStopped { index: usize },

    #[error("failed to create producer handle: {0}")]
    HandleCreation(#[source] TransportError),

    #[error("delivery failed: {0}")]
    Delivery(#[source] TransportError),

    #[error("transport error: {0}")]
    Transport(#[source] TransportError),

    #[error("delivery outcome was dropped before completing")]
    DeliveryAbandoned,

    #[error("consumer task aborted: {0}")]
    ConsumerAborted(String),

    #[error("produce pipeline error: {0}")]
    Pipeline(#[source] anyhow::Error),
}

impl ConveyorError {
    /// Unwrap an error that crossed the middleware chain (which is typed as
    /// `anyhow::Error`) back into its concrete form where possible.
    pub(crate) fn from_pipeline(error: anyhow::Error) -> Self {
        match error.downcast::<ConveyorError>() {
            Ok(conveyor) => conveyor,
            Err(other) => ConveyorError::Pipeline(other),
        }
    }
}
