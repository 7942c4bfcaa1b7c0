//! # Global runtime configuration.
//!
//! [`Config`] controls the worker pool, the plugin-config root, cron
//! timezone interpretation, the help/abort words, the shutdown grace period,
//! and the default context-cache tuning.
//!
//! Every level carries `#[serde(default)]`, so a partial YAML/JSON document
//! overrides only the keys it names:
//!
//! ```
//! use botvisor::Config;
//!
//! let config: Config = serde_yaml::from_str("worker:\n  worker_num: 20").unwrap();
//! assert_eq!(config.worker.worker_num, 20);
//! assert_eq!(config.worker.queue_size, 100); // untouched default
//! ```
//!
//! Duration-valued keys are plain integer milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Millisecond-integer (de)serialisation for `Duration` fields.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Worker-pool tuning.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker tasks draining the queue.
    pub worker_num: usize,
    /// Capacity of the bounded job queue.
    pub queue_size: usize,
    /// Queue-depth reporter interval; zero disables reporting.
    #[serde(with = "duration_ms")]
    pub supervise_interval: Duration,
}

impl Default for WorkerConfig {
    /// 10 workers, 100 queued jobs, 1 minute report interval.
    fn default() -> Self {
        Self {
            worker_num: 10,
            queue_size: 100,
            supervise_interval: Duration::from_secs(60),
        }
    }
}

/// Default context-storage tuning, used when a bot is registered without an
/// explicit storage.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextCacheConfig {
    /// Per-entry time to live.
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
    /// Global entry cap; LRU eviction beyond it.
    pub capacity: usize,
}

impl Default for ContextCacheConfig {
    /// 5 minute TTL, 1024 entries.
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            capacity: 1024,
        }
    }
}

/// Global configuration for the runtime supervisor.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker-pool tuning.
    pub worker: WorkerConfig,
    /// Root directory of per-bot plugin configuration; `None` disables the
    /// config watcher.
    pub plugin_config_root: Option<PathBuf>,
    /// IANA timezone name used to interpret cron expressions.
    pub timezone: String,
    /// Message text treated as a help request.
    pub help_command: String,
    /// Message text treated as a conversation abort.
    pub abort_command: String,
    /// Maximum time to wait for adapters to drain on shutdown.
    #[serde(with = "duration_ms")]
    pub grace: Duration,
    /// Tuning for the default per-bot context cache.
    pub context_cache: ContextCacheConfig,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `worker = WorkerConfig::default()`
    /// - `plugin_config_root = None`
    /// - `timezone = "UTC"`
    /// - `help_command = ".help"`, `abort_command = ".abort"`
    /// - `grace = 30s`
    /// - `context_cache = ContextCacheConfig::default()`
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            plugin_config_root: None,
            timezone: "UTC".to_owned(),
            help_command: ".help".to_owned(),
            abort_command: ".abort".to_owned(),
            grace: Duration::from_secs(30),
            context_cache: ContextCacheConfig::default(),
        }
    }
}
