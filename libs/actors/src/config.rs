//! Actor System Configuration
//!
//! Tunables for one actor system. Loadable from a TOML file with
//! environment-variable overrides (`ACTOR_SYSTEM_` prefix), or built in code
//! with the `with_*` setters. Durations are milliseconds.

use crate::{ActorError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default environment prefix for overrides
pub const ENV_PREFIX: &str = "ACTOR_SYSTEM";

/// Mailbox capacity used when none is given
pub const DEFAULT_MAILBOX_CAPACITY: usize = 16;

/// Execution slot flavour used by the worker center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// One dedicated OS thread per slot
    #[default]
    Thread,
    /// One single-threaded cooperative runtime per slot
    Task,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ActorSystemConfig {
    pub name: String,

    /// Numbered slots (1..=N); the overflow slot is always created on top
    pub worker_count: usize,
    pub worker_kind: WorkerKind,

    /// Capacity for actors built through the system (0 = unbounded)
    pub default_mailbox_capacity: usize,

    pub max_shutdown_wait_ms: u64,
    pub shutdown_poll_interval_ms: u64,

    /// Empty dispatcher passes tolerated before throttling
    pub idle_tick_threshold: u32,
    pub idle_sleep_ms: u64,

    /// Park time when every pending actor is busy
    pub busy_backoff_ms: u64,

    pub mailbox_poll_timeout_ms: u64,
    pub predatory_backoff_ms: u64,
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            name: "actor-system".to_string(),
            worker_count: parallelism * 2,
            worker_kind: WorkerKind::Thread,
            default_mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_shutdown_wait_ms: 30_000,
            shutdown_poll_interval_ms: 1_000,
            idle_tick_threshold: 10,
            idle_sleep_ms: 1_000,
            busy_backoff_ms: 1,
            mailbox_poll_timeout_ms: 100,
            predatory_backoff_ms: 50,
        }
    }
}

impl ActorSystemConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load from an optional TOML file, then apply environment overrides
    ///
    /// Environment keys are `{prefix}_{FIELD}`, e.g.
    /// `ACTOR_SYSTEM_WORKER_COUNT=8`.
    pub fn load(path: Option<&Path>, env_prefix: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading actor system config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        let prefix = env_prefix.unwrap_or(ENV_PREFIX);
        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            system = %config.name,
            worker_count = config.worker_count,
            worker_kind = ?config.worker_kind,
            "Actor system config loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ActorError::configuration(
                "system name can not be blank",
                Some("name"),
            ));
        }

        let non_zero = [
            ("shutdown_poll_interval_ms", self.shutdown_poll_interval_ms),
            ("idle_sleep_ms", self.idle_sleep_ms),
            ("busy_backoff_ms", self.busy_backoff_ms),
            ("mailbox_poll_timeout_ms", self.mailbox_poll_timeout_ms),
            ("predatory_backoff_ms", self.predatory_backoff_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ActorError::configuration(
                    format!("{} must be greater than zero", field),
                    Some(field),
                ));
            }
        }

        Ok(())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_worker_kind(mut self, worker_kind: WorkerKind) -> Self {
        self.worker_kind = worker_kind;
        self
    }

    pub fn with_default_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.default_mailbox_capacity = capacity;
        self
    }

    pub fn with_max_shutdown_wait(mut self, wait: Duration) -> Self {
        self.max_shutdown_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_shutdown_poll_interval(mut self, interval: Duration) -> Self {
        self.shutdown_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
        self.idle_sleep_ms = sleep.as_millis() as u64;
        self
    }

    pub fn with_idle_tick_threshold(mut self, threshold: u32) -> Self {
        self.idle_tick_threshold = threshold;
        self
    }

    pub fn with_busy_backoff(mut self, backoff: Duration) -> Self {
        self.busy_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_mailbox_poll_timeout(mut self, timeout: Duration) -> Self {
        self.mailbox_poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_predatory_backoff(mut self, backoff: Duration) -> Self {
        self.predatory_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn max_shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.max_shutdown_wait_ms)
    }

    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn mailbox_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.mailbox_poll_timeout_ms)
    }

    pub fn predatory_backoff(&self) -> Duration {
        Duration::from_millis(self.predatory_backoff_ms)
    }
}
