//! # Prometheus Task Engine
//!
//! A priority-lane task scheduler with bounded retries and recurring tasks.
//!
//! Tasks are persisted through a [`core::TaskStore`], dispatched onto one of
//! three lanes (high, medium, low) according to their priority, and executed
//! by per-lane pools of dedicated OS threads. Unexpected faults are retried
//! with capped exponential backoff; declared domain failures are terminal.
//! Recurrence rules materialize new tasks on a fixed schedule.
//!
//! ## Key Features
//!
//! - **Explicit state machine**: `pending → queued → running → success | failed`,
//!   plus administrative `revoked` and explicit retry of `failed` tasks
//! - **Priority lanes**: per-lane base delays and worker counts; unknown
//!   priorities fall back to the medium lane
//! - **Timed dispatch without blocking workers**: lane delays, `scheduled_for`
//!   and retry backoff are handled by a timer heap, never by a sleeping worker
//! - **At most one active attempt per task**: stale or duplicate deliveries are
//!   dropped by a status re-check and an optimistic version check
//! - **Recurrence**: minutely/hourly/daily rules that advance from their
//!   previous fire time, so scan jitter never accumulates
//! - **Priority migration**: tasks that have not started can change lanes
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_task_engine::builders::EngineBuilder;
//! use prometheus_task_engine::config::EngineConfig;
//! use prometheus_task_engine::core::AdditionExecutor;
//! use prometheus_task_engine::runtime::TaskSubmission;
//!
//! let config = EngineConfig::from_env()?;
//! prometheus_task_engine::util::init_tracing_with(&config.log_filter);
//!
//! let engine = EngineBuilder::new(config).build(AdditionExecutor)?;
//! let submitted = engine.submit(TaskSubmission::single(2, 40).with_priority(1))?;
//! let task = engine.get_task(submitted.task.id())?;
//! engine.shutdown();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: task lifecycle, dispatch, retry, recurrence.
pub mod core;
/// Engine configuration.
pub mod config;
/// Builders to construct the engine from configuration.
pub mod builders;
/// Store and timed-queue backends.
pub mod infra;
/// Engine facade and service models.
pub mod runtime;
/// Shared utilities.
pub mod util;
