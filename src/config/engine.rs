//! Engine configuration: lane pools, retry curve, scanner period.
//!
//! Configuration is an explicit value threaded through constructors. Nothing
//! in the crate reads process-wide settings after construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::Lane;

/// Environment variable prefix used by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "TASK_ENGINE_";

/// Per-lane worker pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneConfig {
    /// Worker threads serving this lane.
    pub worker_count: usize,
    /// Delay applied before the first attempt of every dispatch on this lane.
    pub base_delay_ms: u64,
}

impl LaneConfig {
    /// Base delay as a duration.
    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Configuration for all three lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanesConfig {
    /// High priority lane (priority 1).
    pub high: LaneConfig,
    /// Medium priority lane (priority 2 and anything out of range).
    pub medium: LaneConfig,
    /// Low priority lane (priority 3).
    pub low: LaneConfig,
}

impl LanesConfig {
    /// Configuration of one lane.
    #[must_use]
    pub const fn get(&self, lane: Lane) -> &LaneConfig {
        match lane {
            Lane::High => &self.high,
            Lane::Medium => &self.medium,
            Lane::Low => &self.low,
        }
    }

    fn get_mut(&mut self, lane: Lane) -> &mut LaneConfig {
        match lane {
            Lane::High => &mut self.high,
            Lane::Medium => &mut self.medium,
            Lane::Low => &mut self.low,
        }
    }
}

impl Default for LanesConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            high: LaneConfig {
                worker_count: cpus,
                base_delay_ms: 0,
            },
            medium: LaneConfig {
                worker_count: (cpus / 2).max(1),
                base_delay_ms: 5_000,
            },
            low: LaneConfig {
                worker_count: 1,
                base_delay_ms: 10_000,
            },
        }
    }
}

/// Retry ceiling and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub base_delay_ms: u64,
    /// Backoff cap.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 30_000,
            max_delay_ms: 300_000,
        }
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lane pools.
    pub lanes: LanesConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Period of the recurrence scanner.
    pub scan_interval_ms: u64,
    /// Capacity of each lane channel and of the delay heap.
    pub max_queue_depth: usize,
    /// Stack size of worker threads.
    pub thread_stack_size: usize,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lanes: LanesConfig::default(),
            retry: RetryConfig::default(),
            scan_interval_ms: 10_000,
            max_queue_depth: 10_000,
            thread_stack_size: 2 * 1024 * 1024,
            log_filter: "info".into(),
        }
    }
}

impl EngineConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count of one lane.
    #[must_use]
    pub fn with_lane_workers(mut self, lane: Lane, worker_count: usize) -> Self {
        self.lanes.get_mut(lane).worker_count = worker_count;
        self
    }

    /// Set the base delay of one lane.
    #[must_use]
    pub fn with_lane_delay_ms(mut self, lane: Lane, delay_ms: u64) -> Self {
        self.lanes.get_mut(lane).base_delay_ms = delay_ms;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the scanner period.
    #[must_use]
    pub fn with_scan_interval_ms(mut self, ms: u64) -> Self {
        self.scan_interval_ms = ms;
        self
    }

    /// Set the lane channel / delay heap capacity.
    #[must_use]
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Scanner period as a duration.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        for lane in Lane::ALL {
            if self.lanes.get(lane).worker_count == 0 {
                return Err(format!("lane `{lane}` worker_count must be greater than 0"));
            }
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err("retry base_delay_ms must not exceed max_delay_ms".into());
        }
        if self.scan_interval_ms == 0 {
            return Err("scan_interval_ms must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults, overridden by `TASK_ENGINE_*` variables from the process
    /// environment (after loading a `.env` file if present).
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or the
    /// validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `TASK_ENGINE_*` overrides resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
            raw.trim()
                .parse()
                .map_err(|_| format!("{key}: cannot parse `{raw}`"))
        }
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|raw| (key, raw))
        };

        for lane in Lane::ALL {
            let upper = lane.as_str().to_ascii_uppercase();
            if let Some((key, raw)) = var(&format!("{upper}_WORKERS")) {
                self.lanes.get_mut(lane).worker_count = parse(&key, &raw)?;
            }
            if let Some((key, raw)) = var(&format!("{upper}_DELAY_MS")) {
                self.lanes.get_mut(lane).base_delay_ms = parse(&key, &raw)?;
            }
        }
        if let Some((key, raw)) = var("MAX_RETRIES") {
            self.retry.max_retries = parse(&key, &raw)?;
        }
        if let Some((key, raw)) = var("RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse(&key, &raw)?;
        }
        if let Some((key, raw)) = var("RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse(&key, &raw)?;
        }
        if let Some((key, raw)) = var("SCAN_INTERVAL_MS") {
            self.scan_interval_ms = parse(&key, &raw)?;
        }
        if let Some((key, raw)) = var("MAX_QUEUE_DEPTH") {
            self.max_queue_depth = parse(&key, &raw)?;
        }
        if let Some((_, raw)) = var("LOG") {
            self.log_filter = raw;
        }
        Ok(())
    }
}
