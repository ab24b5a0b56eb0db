pub mod configuration;
pub mod consumer;
pub mod distribution;
pub mod feeder;
pub mod worker;
pub mod worker_pool;

pub use configuration::{ConsumerConfiguration, ConsumerConfigurationBuilder};
pub use consumer::{Consumer, ConsumerHandle, ConsumerStatus};
pub use distribution::{DistributionStrategy, KeyHashDistribution, RoundRobinDistribution};
pub use feeder::WorkerPoolFeeder;
pub use worker_pool::ConsumerWorkerPool;
