//! Assemble a [`TaskEngine`] from configuration.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::config::EngineConfig;
use crate::core::{
    AppResult, AttemptRunner, AuditSink, Dispatcher, Enqueue, LanePolicy, LaneWorkerPool,
    RecurrenceScanner, RetryPolicy, TaskStore, TracingAuditSink, WorkExecutor,
};
use crate::infra::queue::{DelayQueue, LaneChannels};
use crate::infra::store::InMemoryStore;
use crate::runtime::engine::{EngineParts, TaskEngine};

/// Builder for [`TaskEngine`].
///
/// ```rust,ignore
/// use prometheus_task_engine::builders::EngineBuilder;
/// use prometheus_task_engine::config::EngineConfig;
/// use prometheus_task_engine::core::AdditionExecutor;
///
/// let engine = EngineBuilder::new(EngineConfig::from_env()?)
///     .build(AdditionExecutor)?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn TaskStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    scanner: bool,
}

impl EngineBuilder {
    /// Start from a configuration. Defaults: in-memory store, audit events
    /// forwarded to `tracing`, scanner thread enabled.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            audit: None,
            scanner: true,
        }
    }

    /// Use `store` instead of a fresh in-memory store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Send audit events to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Do not start the scanner thread; sweeps run only through
    /// [`TaskEngine::sweep_now`].
    #[must_use]
    pub const fn without_scanner(mut self) -> Self {
        self.scanner = false;
        self
    }

    /// Validate the configuration, start the delay queue, the lane worker
    /// pools and the scanner, and return the running engine.
    ///
    /// # Errors
    ///
    /// Invalid configuration or a thread that fails to spawn.
    pub fn build<E: WorkExecutor>(self, executor: E) -> AppResult<TaskEngine> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| anyhow!("invalid engine configuration: {e}"))?;

        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryStore::new()),
        };
        let audit: Arc<dyn AuditSink> = match self.audit {
            Some(audit) => audit,
            None => Arc::new(TracingAuditSink),
        };

        let channels = LaneChannels::bounded(config.max_queue_depth);
        let queue = Arc::new(
            DelayQueue::start(channels.clone(), config.max_queue_depth)
                .context("starting delay queue")?,
        );
        let enqueue: Arc<dyn Enqueue> = queue.clone();

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            enqueue,
            LanePolicy::from_config(&config.lanes),
            Arc::clone(&audit),
        ));
        let runner = AttemptRunner::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            executor,
            RetryPolicy::from_config(&config.retry),
            Arc::clone(&audit),
        );
        let pool = LaneWorkerPool::start(&config, channels, &runner)
            .context("starting lane worker pools")?;

        let scanner = Arc::new(RecurrenceScanner::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&audit),
            config.scan_interval(),
        ));
        let scanner_handle = if self.scanner {
            Some(
                Arc::clone(&scanner)
                    .start()
                    .context("starting recurrence scanner")?,
            )
        } else {
            None
        };

        info!(
            scan_interval_ms = config.scan_interval_ms,
            max_retries = config.retry.max_retries,
            scanner = self.scanner,
            "task engine built"
        );
        Ok(TaskEngine::from_parts(EngineParts {
            config,
            store,
            dispatcher,
            queue,
            pool,
            scanner,
            scanner_handle,
            audit,
        }))
    }
}
