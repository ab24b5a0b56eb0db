//! Middleware chain shared by the consume and produce pipelines.
//!
//! Middlewares are invoked in registration order. Each one decides whether
//! the record continues: calling `next.run(ctx)` passes it on, dropping
//! `next` filters it out silently. Errors propagate back up the chain
//! unmodified so callers see exactly what the failing middleware returned.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::MessageContext;

/// One stage of the pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn invoke(&self, ctx: &mut MessageContext, next: Next<'_>) -> anyhow::Result<()>;
}

/// The action at the end of the chain: record processing on the consumer
/// side, the transport send on the producer side.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &mut MessageContext) -> anyhow::Result<()>;
}

/// Continuation handed to a middleware. Consumed by `run`; dropping it
/// without running ends the pipeline for this record without error.
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    index: usize,
    terminal: &'a dyn MessageHandler,
}

impl Next<'_> {
    pub async fn run(self, ctx: &mut MessageContext) -> anyhow::Result<()> {
        match self.middlewares.get(self.index) {
            Some(middleware) => {
                let next = Next {
                    middlewares: self.middlewares,
                    index: self.index + 1,
                    terminal: self.terminal,
                };
                middleware.invoke(ctx, next).await
            }
            None => self.terminal.handle(ctx).await,
        }
    }
}

/// Immutable chain of middlewares. Holds no per-record state, so a single
/// executor is shared across all workers of a consumer (and all sends of a
/// producer) without synchronization.
pub struct MiddlewareExecutor {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareExecutor {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the full chain ending in `terminal`. Returns the first error
    /// raised by any stage, or `Ok(())` whether the record reached the
    /// terminal or was filtered out along the way.
    pub async fn execute(
        &self,
        ctx: &mut MessageContext,
        terminal: &dyn MessageHandler,
    ) -> anyhow::Result<()> {
        let next = Next {
            middlewares: &self.middlewares,
            index: 0,
            terminal,
        };
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::context::Headers;

    struct TraceMiddleware {
        label: &'static str,
        trace: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for TraceMiddleware {
        async fn invoke(&self, ctx: &mut MessageContext, next: Next<'_>) -> anyhow::Result<()> {
            self.trace.lock().unwrap().push(self.label);
            next.run(ctx).await
        }
    }

    struct FilterMiddleware;

    #[async_trait]
    impl Middleware for FilterMiddleware {
        async fn invoke(&self, _ctx: &mut MessageContext, _next: Next<'_>) -> anyhow::Result<()> {
            // Drops `next` without running it.
            Ok(())
        }
    }

    struct FailingMiddleware;

    #[async_trait]
    impl Middleware for FailingMiddleware {
        async fn invoke(&self, _ctx: &mut MessageContext, _next: Next<'_>) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("decode failed"))
        }
    }

    struct CountingTerminal {
        calls: AtomicUsize,
    }

    impl CountingTerminal {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for CountingTerminal {
        async fn handle(&self, _ctx: &mut MessageContext) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn outbound_ctx() -> MessageContext {
        MessageContext::outbound(
            None,
            Some(Box::new(b"payload".to_vec())),
            Headers::new(),
            "test".to_string(),
        )
    }

    #[tokio::test]
    async fn test_middlewares_run_in_registration_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let executor = MiddlewareExecutor::new(vec![
            Arc::new(TraceMiddleware {
                label: "first",
                trace: trace.clone(),
            }),
            Arc::new(TraceMiddleware {
                label: "second",
                trace: trace.clone(),
            }),
        ]);
        let terminal = CountingTerminal::new();

        let mut ctx = outbound_ctx();
        executor.execute(&mut ctx, &terminal).await.unwrap();

        assert_eq!(*trace.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filtering_middleware_stops_the_chain_without_error() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let executor = MiddlewareExecutor::new(vec![
            Arc::new(FilterMiddleware),
            Arc::new(TraceMiddleware {
                label: "unreached",
                trace: trace.clone(),
            }),
        ]);
        let terminal = CountingTerminal::new();

        let mut ctx = outbound_ctx();
        executor.execute(&mut ctx, &terminal).await.unwrap();

        assert!(trace.lock().unwrap().is_empty());
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_middleware_error_propagates_unmodified() {
        let executor = MiddlewareExecutor::new(vec![Arc::new(FailingMiddleware)]);
        let terminal = CountingTerminal::new();

        let mut ctx = outbound_ctx();
        let err = executor.execute(&mut ctx, &terminal).await.unwrap_err();

        assert_eq!(err.to_string(), "decode failed");
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_runs_the_terminal_directly() {
        let executor = MiddlewareExecutor::new(Vec::new());
        let terminal = CountingTerminal::new();

        let mut ctx = outbound_ctx();
        executor.execute(&mut ctx, &terminal).await.unwrap();

        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_executor_is_safe_for_concurrent_records() {
        let executor = Arc::new(MiddlewareExecutor::new(vec![Arc::new(TraceMiddleware {
            label: "stage",
            trace: Arc::new(Mutex::new(Vec::new())),
        })]));
        let terminal = Arc::new(CountingTerminal::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            let terminal = terminal.clone();
            handles.push(tokio::spawn(async move {
                let mut ctx = outbound_ctx();
                executor.execute(&mut ctx, terminal.as_ref()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(terminal.calls.load(Ordering::SeqCst), 8);
    }
}
