// ==== Consumer metrics ====
/// Counter for records handed to a worker queue
pub const WORKER_MESSAGES_ENQUEUED: &str = "conveyor_worker_messages_enqueued_total";

/// Counter for records that completed the pipeline successfully
pub const WORKER_MESSAGES_PROCESSED: &str = "conveyor_worker_messages_processed_total";

/// Counter for records whose pipeline returned an error
pub const WORKER_MESSAGES_FAILED: &str = "conveyor_worker_messages_failed_total";

/// Counter for feeder backpressure events (worker queue full, partitions paused)
pub const WORKER_BACKPRESSURE_EVENTS: &str = "conveyor_worker_backpressure_total";

/// Histogram for end-to-end pipeline duration per record
pub const WORKER_PROCESSING_DURATION: &str = "conveyor_worker_processing_duration_seconds";

/// Gauge for partitions currently assigned to a consumer
pub const CONSUMER_RUNNING_PARTITIONS: &str = "conveyor_consumer_running_partitions";

/// Gauge for partitions currently paused for backpressure
pub const CONSUMER_PAUSED_PARTITIONS: &str = "conveyor_consumer_paused_partitions";

/// Gauge for the worker count of a running consumer
pub const CONSUMER_WORKER_COUNT: &str = "conveyor_consumer_worker_count";

/// Counter for rebalance events handled by a consumer
pub const CONSUMER_REBALANCES: &str = "conveyor_consumer_rebalances_total";

// ==== Producer metrics ====
/// Counter for delivery outcomes, labelled by result
pub const PRODUCER_DELIVERIES: &str = "conveyor_producer_deliveries_total";

/// Counter for cached producer handles invalidated by fatal errors
pub const PRODUCER_HANDLE_INVALIDATIONS: &str = "conveyor_producer_handle_invalidations_total";

/// Histogram for time spent waiting on the transaction gate before a send
pub const TRANSACTION_GATE_WAIT_DURATION: &str = "conveyor_transaction_gate_wait_seconds";

/// Counter for completed consumer-producer transactions
pub const TRANSACTIONS_COMMITTED: &str = "conveyor_transactions_committed_total";

/// Counter for aborted consumer-producer transactions
pub const TRANSACTIONS_ABORTED: &str = "conveyor_transactions_aborted_total";
