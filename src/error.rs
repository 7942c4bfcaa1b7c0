//! # Error types used by the botvisor runtime and its plugins.
//!
//! This module groups the error enums by the boundary they cross:
//!
//! - [`RuntimeError`] errors raised by the supervisor itself.
//! - [`BotError`] fatal adapter failures escalated to the supervisor.
//! - [`EnqueueError`] / [`BlockedInput`] worker-queue saturation.
//! - [`BuildError`] command/task construction failures.
//! - [`WatcherError`] config-watcher failures.
//! - [`ExecutionError`] errors returned by command and task bodies.
//! - [`RetryError`] aggregate of failed retry attempts.
//!
//! Each type provides `as_label` returning a short stable snake_case tag for
//! logs and metrics.

use std::time::Duration;

use thiserror::Error;

use crate::message::BotType;

/// Errors produced by the runtime supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Two bots with the same [`BotType`] were registered.
    #[error("bot type '{bot_type}' is already registered")]
    DuplicateBotType {
        /// The conflicting type tag.
        bot_type: BotType,
    },

    /// `Runner::run` was called while a previous call is still active.
    #[error("runner is already running")]
    AlreadyRunning,

    /// Shutdown grace period elapsed with adapters still draining.
    #[error("shutdown grace {grace:?} exceeded; still draining: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Bot types that did not stop in time.
        stuck: Vec<String>,
    },

    /// The configured timezone is not a known IANA identifier.
    #[error("unknown timezone '{name}'")]
    UnknownTimezone {
        /// The offending name.
        name: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::DuplicateBotType { .. } => "runtime_duplicate_bot_type",
            RuntimeError::AlreadyRunning => "runtime_already_running",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::UnknownTimezone { .. } => "runtime_unknown_timezone",
        }
    }
}

/// Fatal adapter failures.
///
/// An adapter reports this through its error sink when it cannot continue
/// (exhausted reconnects, authentication failure, protocol impossibility).
/// The supervisor reacts by cancelling the bot's subtree and fanning the
/// error out to every registered alerter. Everything recoverable stays
/// inside the adapter.
#[derive(Error, Debug, Clone)]
pub enum BotError {
    /// The adapter cannot proceed and its bot must be torn down.
    #[error("non-continuable adapter failure: {reason}")]
    NonContinuable {
        /// Human-readable cause.
        reason: String,
    },
}

impl BotError {
    /// Shorthand for [`BotError::NonContinuable`].
    pub fn non_continuable(reason: impl Into<String>) -> Self {
        BotError::NonContinuable {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            BotError::NonContinuable { .. } => "bot_non_continuable",
        }
    }
}

/// Errors returned by [`WorkerPool::enqueue`](crate::worker::WorkerPool::enqueue).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The bounded job queue is full; the job was not accepted.
    #[error("worker queue is full")]
    QueueOverflow,

    /// The pool is shut down and accepts no further jobs.
    #[error("worker pool is closed")]
    Closed,
}

/// Returned to adapters when an inbound event cannot be accepted because the
/// workers are saturated. The adapter decides whether to drop, buffer, or
/// retry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("workers are saturated; input rejected")]
pub struct BlockedInput;

/// Errors raised while building a command or scheduled task from its props.
///
/// A build failure is fatal for the offending entry only: on initial startup
/// the entry is skipped, on a config-triggered rebuild the previous entry
/// stays in place.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BuildError {
    /// Command props lack an identifier, a matcher, or a function.
    #[error("command '{identifier}' needs an identifier, a matcher, and a function")]
    CommandInsufficient {
        /// Identifier as far as known (may be empty).
        identifier: String,
    },

    /// Task props lack an identifier or a function.
    #[error("scheduled task '{identifier}' needs an identifier and a function")]
    TaskInsufficient {
        /// Identifier as far as known (may be empty).
        identifier: String,
    },

    /// Neither the props nor the config supplied an execution schedule.
    #[error("scheduled task '{identifier}' has no schedule from props or config")]
    ScheduleNotGiven {
        /// The task identifier.
        identifier: String,
    },

    /// The schedule expression could not be parsed.
    #[error("invalid schedule '{expr}': {reason}")]
    InvalidSchedule {
        /// The offending expression.
        expr: String,
        /// Parser diagnostics.
        reason: String,
    },

    /// A config file was present but could not be decoded into the prototype.
    #[error("failed to decode config for '{identifier}': {reason}")]
    Config {
        /// The command/task identifier.
        identifier: String,
        /// Decoder diagnostics.
        reason: String,
    },
}

impl BuildError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            BuildError::CommandInsufficient { .. } => "build_command_insufficient",
            BuildError::TaskInsufficient { .. } => "build_task_insufficient",
            BuildError::ScheduleNotGiven { .. } => "build_schedule_not_given",
            BuildError::InvalidSchedule { .. } => "build_invalid_schedule",
            BuildError::Config { .. } => "build_config",
        }
    }
}

/// Errors surfaced by a [`ConfigWatcher`](crate::watcher::ConfigWatcher).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WatcherError {
    /// No configuration file exists for the given bot type and identifier.
    #[error("no configuration found for {bot_type}:{id}")]
    ConfigNotFound {
        /// The owning bot.
        bot_type: BotType,
        /// The command/task identifier.
        id: String,
    },

    /// A subscription for this (bot type, identifier) pair already exists.
    #[error("already subscribing to {bot_type}:{id}")]
    AlreadySubscribing {
        /// The owning bot.
        bot_type: BotType,
        /// The command/task identifier.
        id: String,
    },

    /// The watcher's event loop has terminated.
    #[error("config watcher is not running")]
    NotRunning,

    /// The underlying filesystem watch backend failed.
    #[error("filesystem watch backend failure: {0}")]
    Backend(String),

    /// A configuration file exists but could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WatcherError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            WatcherError::ConfigNotFound { .. } => "watcher_config_not_found",
            WatcherError::AlreadySubscribing { .. } => "watcher_already_subscribing",
            WatcherError::NotRunning => "watcher_not_running",
            WatcherError::Backend(_) => "watcher_backend",
            WatcherError::Io(_) => "watcher_io",
        }
    }

    /// True when the error merely signals an absent config file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WatcherError::ConfigNotFound { .. })
    }
}

/// Errors returned by command and scheduled-task bodies.
///
/// These never cross the supervisor boundary: the worker job logs them and
/// carries on.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The body failed.
    #[error("execution failed: {reason}")]
    Fail {
        /// Human-readable cause.
        reason: String,
    },

    /// The surrounding context was cancelled mid-execution.
    #[error("execution canceled")]
    Canceled,
}

impl ExecutionError {
    /// Shorthand for [`ExecutionError::Fail`].
    pub fn fail(reason: impl Into<String>) -> Self {
        ExecutionError::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecutionError::Fail { .. } => "execution_failed",
            ExecutionError::Canceled => "execution_canceled",
        }
    }
}

/// Outcome of an exhausted or cancelled retry loop.
#[derive(Error, Debug)]
pub enum RetryError {
    /// Every attempt failed; `attempts` holds each error in order.
    #[error("retry exhausted after {n} attempt(s); last error: {last}",
        n = .attempts.len(),
        last = .attempts.last().map(String::as_str).unwrap_or("unknown"))]
    Exhausted {
        /// Stringified error of every attempt, oldest first.
        attempts: Vec<String>,
    },

    /// The surrounding context was cancelled between attempts.
    #[error("retry canceled")]
    Canceled,
}

impl RetryError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            RetryError::Exhausted { .. } => "retry_exhausted",
            RetryError::Canceled => "retry_canceled",
        }
    }
}
