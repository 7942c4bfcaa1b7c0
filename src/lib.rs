//! # botvisor
//!
//! **Botvisor** is a multi-adapter chat-bot runtime: one process drives any
//! number of chat backends, dispatches inbound messages through a bounded
//! worker pool, keeps per-user conversations alive across turns, runs
//! cron-scheduled tasks, and hot-reloads command/task configuration when
//! files change on disk.
//!
//! ## Features
//!
//! | Area               | Description                                                        | Key types / traits                       |
//! |--------------------|--------------------------------------------------------------------|------------------------------------------|
//! | **Supervision**    | Own every bot's lifecycle behind one cancellation tree.            | [`Runner`], [`RunnerBuilder`]            |
//! | **Adapters**       | Plug chat platforms in behind one async seam.                      | [`Adapter`], [`Bot`], [`SupervisedBot`]  |
//! | **Commands**       | Match + execute recipes, rebuilt on config change.                 | [`Command`], [`CommandProps`]            |
//! | **Conversations**  | Per-sender next-turn continuations with TTL/LRU storage.           | [`UserContext`], [`ContextStorage`]      |
//! | **Scheduling**     | Cron and `@every` tasks through a swappable engine.                | [`ScheduledTask`], [`TaskProps`], [`Scheduler`] |
//! | **Hot reload**     | Directory watch → rebuild → in-place replace.                      | [`ConfigWatcher`], [`FileWatcher`]       |
//! | **Workers**        | Bounded queue, panic isolation, depth reporting.                   | [`WorkerPool`]                           |
//! | **Resilience**     | Retry with backoff/jitter; alerting on fatal bot loss.             | [`retry::with_policy`], [`Alerter`]      |
//! | **Errors**         | Typed errors per boundary with stable log labels.                  | [`RuntimeError`], [`BotError`], ...      |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use regex::Regex;
//! use tokio_util::sync::CancellationToken;
//! use botvisor::{CommandProps, Config, Input, Response, Runner};
//! # use botvisor::{Adapter, BotType, Output, adapter::{InputSink, ErrorSink}};
//! # struct MyAdapter;
//! # #[async_trait::async_trait]
//! # impl Adapter for MyAdapter {
//! #     fn bot_type(&self) -> BotType { BotType::from("my-chat") }
//! #     async fn run(&self, token: CancellationToken, _i: InputSink, _e: ErrorSink) {
//! #         token.cancelled().await;
//! #     }
//! #     async fn send_message(&self, _output: Output) {}
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let echo = CommandProps::builder("my-chat", "echo")
//!         .match_pattern(Regex::new(r"^\.echo ")?)
//!         .example(".echo foo")
//!         .func(|input: Input| async move {
//!             let text = input.message.trim_start_matches(".echo ").to_owned();
//!             Ok(Some(Response::text(text)))
//!         })
//!         .build()?;
//!
//!     let runner = Runner::builder(Config::default())
//!         .register_adapter(Arc::new(MyAdapter))
//!         .register_command_props(echo)
//!         .build()?;
//!
//!     let token = CancellationToken::new();
//!     runner.run(token).await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod alerter;
pub mod bot;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod retry;
pub mod runner;
pub mod schedule;
pub mod scheduler;
mod status;
pub mod task;
pub mod watcher;
pub mod worker;

// ---- Public re-exports ----

pub use adapter::Adapter;
pub use alerter::Alerter;
pub use bot::{Bot, SupervisedBot};
pub use command::{Command, CommandProps, CommandPropsBuilder, Commands, Matcher, Response};
pub use config::{Config, ContextCacheConfig, WorkerConfig};
pub use context::{CacheStorage, ContextStorage, UserContext};
pub use error::{
    BlockedInput, BotError, BuildError, EnqueueError, ExecutionError, RetryError, RuntimeError,
    WatcherError,
};
pub use message::{BotType, CommandHelp, Destination, Input, InputKind, Output, OutputContent};
pub use retry::Policy;
pub use runner::{Runner, RunnerBuilder};
pub use schedule::Schedule;
pub use scheduler::{CronScheduler, Scheduler};
pub use status::{BotStatus, Status};
pub use task::{ScheduledTask, TaskConfig, TaskProps, TaskPropsBuilder, TaskResult};
pub use watcher::{ConfigFormat, ConfigSource, ConfigWatcher, FileWatcher, NullConfigWatcher};
pub use worker::{WorkerPool, WorkerReport};
