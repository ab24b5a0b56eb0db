//! Consumer lifecycle: a single control task owning the pool and the feeder.
//!
//! All state transitions, rebalances and feed steps happen on one task, so
//! pool routing never races with assignment changes. Rebalance callbacks from
//! the transport's own thread arrive over a channel and are applied here.

use std::sync::Arc;

use metrics::{counter, gauge};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::consumer::configuration::ConsumerConfiguration;
use crate::consumer::feeder::WorkerPoolFeeder;
use crate::consumer::worker_pool::ConsumerWorkerPool;
use crate::error::ConveyorError;
use crate::metrics_consts::{
    CONSUMER_PAUSED_PARTITIONS, CONSUMER_REBALANCES, CONSUMER_RUNNING_PARTITIONS,
    CONSUMER_WORKER_COUNT,
};
use crate::middleware::MiddlewareExecutor;
use crate::transport::{RebalanceEvent, RecordStream};
use crate::types::Partition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

enum ControlStep {
    Shutdown,
    Rebalance(Option<RebalanceEvent>),
    Telemetry,
    Fed(Result<(), ConveyorError>),
}

pub struct Consumer {
    config: Arc<ConsumerConfiguration>,
    stream: Arc<dyn RecordStream>,
    rebalance_rx: mpsc::UnboundedReceiver<RebalanceEvent>,
}

impl Consumer {
    /// `rebalance_rx` is the receiving end of the channel the transport's
    /// rebalance callbacks write into. Unbounded because the sending side is
    /// the client library's own callback thread, which must never block.
    pub fn new(
        config: Arc<ConsumerConfiguration>,
        stream: Arc<dyn RecordStream>,
        rebalance_rx: mpsc::UnboundedReceiver<RebalanceEvent>,
    ) -> Self {
        Self {
            config,
            stream,
            rebalance_rx,
        }
    }

    /// Spawn the control task and return a handle to observe and stop it.
    pub fn start(self) -> ConsumerHandle {
        let (status_tx, status_rx) = watch::channel(ConsumerStatus::Created);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let name = self.config.name().to_string();
        let join = tokio::spawn(self.run(status_tx, shutdown_rx));
        ConsumerHandle {
            name,
            status: status_rx,
            shutdown: Some(shutdown_tx),
            join,
        }
    }

    async fn run(
        mut self,
        status_tx: watch::Sender<ConsumerStatus>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<(), ConveyorError> {
        let config = self.config.clone();
        status_tx.send_replace(ConsumerStatus::Starting);
        info!(consumer = config.name(), group = config.group_id(), "Consumer starting");

        if let Err(e) = self.stream.subscribe(config.topics()).await {
            error!(consumer = config.name(), error = %e, "Subscribe failed");
            status_tx.send_replace(ConsumerStatus::Stopped);
            return Err(ConveyorError::Transport(e));
        }

        let executor = Arc::new(MiddlewareExecutor::new(config.middlewares()));
        let mut pool = ConsumerWorkerPool::new(
            config.worker_count(),
            config.queue_capacity(),
            executor,
            config.handler(),
            config.strategy(),
        );
        let mut feeder = WorkerPoolFeeder::new(
            self.stream.clone(),
            config.group_id().to_string(),
            config.fetch_timeout(),
        );
        let mut telemetry = tokio::time::interval(config.telemetry_interval());

        status_tx.send_replace(ConsumerStatus::Running);
        info!(consumer = config.name(), "Consumer running");

        loop {
            // Control events are checked before feeding so a shutdown or
            // rebalance is never starved by a busy partition.
            let step = tokio::select! {
                biased;
                _ = &mut shutdown_rx => ControlStep::Shutdown,
                event = self.rebalance_rx.recv() => ControlStep::Rebalance(event),
                _ = telemetry.tick() => ControlStep::Telemetry,
                result = feeder.feed_once(&pool) => ControlStep::Fed(result),
            };

            match step {
                ControlStep::Shutdown => {
                    info!(consumer = config.name(), "Shutdown requested");
                    break;
                }
                ControlStep::Rebalance(Some(event)) => {
                    counter!(CONSUMER_REBALANCES).increment(1);
                    Self::handle_rebalance(&config, event, &mut pool, &mut feeder).await;
                }
                ControlStep::Rebalance(None) => {
                    warn!(consumer = config.name(), "Rebalance channel closed, stopping");
                    break;
                }
                ControlStep::Telemetry => Self::emit_telemetry(&config, &pool, &feeder),
                ControlStep::Fed(Err(e)) => {
                    warn!(consumer = config.name(), error = %e, "Feed step failed");
                }
                ControlStep::Fed(Ok(())) => {}
            }
        }

        status_tx.send_replace(ConsumerStatus::Stopping);
        pool.stop().await;
        status_tx.send_replace(ConsumerStatus::Stopped);
        info!(consumer = config.name(), "Consumer stopped");
        Ok(())
    }

    async fn handle_rebalance(
        config: &ConsumerConfiguration,
        event: RebalanceEvent,
        pool: &mut ConsumerWorkerPool,
        feeder: &mut WorkerPoolFeeder,
    ) {
        let next: Vec<Partition> = match event {
            RebalanceEvent::Assigned(partitions) => {
                info!(
                    consumer = config.name(),
                    partitions = partitions.len(),
                    "Partitions assigned"
                );
                partitions
            }
            RebalanceEvent::Revoked(revoked) => {
                info!(
                    consumer = config.name(),
                    partitions = revoked.len(),
                    "Partitions revoked"
                );
                pool.assigned_partitions()
                    .into_iter()
                    .filter(|partition| !revoked.contains(partition))
                    .collect()
            }
        };
        pool.prepare(&next).await;
        feeder.rebalanced(pool);
    }

    fn telemetry_labels(config: &ConsumerConfiguration) -> [(&'static str, String); 3] {
        [
            ("group", config.group_id().to_string()),
            ("consumer", config.name().to_string()),
            ("topic", config.topics().join(",")),
        ]
    }

    fn emit_telemetry(
        config: &ConsumerConfiguration,
        pool: &ConsumerWorkerPool,
        feeder: &WorkerPoolFeeder,
    ) {
        let labels = Self::telemetry_labels(config);
        let paused = feeder.paused_count();
        let running = pool.assignment().len().saturating_sub(paused);
        gauge!(CONSUMER_RUNNING_PARTITIONS, &labels).set(running as f64);
        gauge!(CONSUMER_PAUSED_PARTITIONS, &labels).set(paused as f64);
        gauge!(CONSUMER_WORKER_COUNT, &labels).set(pool.worker_count() as f64);
    }
}

/// Handle to a running consumer task.
pub struct ConsumerHandle {
    name: String,
    status: watch::Receiver<ConsumerStatus>,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<Result<(), ConveyorError>>,
}

impl ConsumerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ConsumerStatus {
        *self.status.borrow()
    }

    /// Wait until the consumer reaches `target` (or a later terminal state).
    pub async fn wait_for(&mut self, target: ConsumerStatus) -> Result<(), ConveyorError> {
        loop {
            if *self.status.borrow() == target || *self.status.borrow() == ConsumerStatus::Stopped {
                return Ok(());
            }
            self.status
                .changed()
                .await
                .map_err(|_| ConveyorError::ConsumerAborted(self.name.clone()))?;
        }
    }

    /// Request a graceful stop and wait for in-flight records to drain.
    pub async fn stop(mut self) -> Result<(), ConveyorError> {
        if let Some(shutdown) = self.shutdown.take() {
            // A dropped receiver means the task already exited.
            let _ = shutdown.send(());
        }
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(ConveyorError::ConsumerAborted(format!(
                "{}: {e}",
                self.name
            ))),
        }
    }
}
