//! # Scheduled tasks: cron-triggered functions returning outbound results.
//!
//! A [`ScheduledTask`] bundles an identifier, a parsed [`Schedule`], an
//! optional default destination, and an async body returning
//! [`TaskResult`]s. Like commands, tasks are usually registered through
//! their recipe, [`TaskProps`], so they can be rebuilt when their
//! configuration file changes.
//!
//! A task config struct may override its props through the [`TaskConfig`]
//! hooks: a non-empty `schedule()` wins over the props' schedule, and a
//! `default_destination()` wins over the props' default.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::error::{BuildError, ExecutionError};
use crate::message::{BotType, Destination, OutputContent};
use crate::schedule::Schedule;
use crate::watcher::ConfigSource;

/// One outbound message produced by a task execution.
///
/// A task may address several rooms at once by returning one result per
/// destination. A result without a destination falls back to the task's
/// default; when neither is set the result is dropped with a log.
#[derive(Clone, Debug)]
pub struct TaskResult {
    /// Reply payload.
    pub content: OutputContent,
    /// Overrides the task's default destination when set.
    pub destination: Option<Destination>,
}

impl TaskResult {
    /// Creates a result with an arbitrary content variant.
    pub fn new(content: OutputContent) -> Self {
        Self {
            content,
            destination: None,
        }
    }

    /// Creates a plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OutputContent::Text(text.into()))
    }

    /// Addresses this result explicitly.
    pub fn with_destination(mut self, destination: impl Into<Destination>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Optional overrides a task config struct can supply.
///
/// Implement this for every config prototype passed to
/// [`TaskPropsBuilder::configurable_fn`]; the defaulted methods mean a
/// plain `impl TaskConfig for MyConfig {}` opts out of both overrides.
pub trait TaskConfig {
    /// Execution schedule; a non-empty value overrides the props' schedule.
    fn schedule(&self) -> Option<String> {
        None
    }

    /// Default output destination; overrides the props' default when set.
    fn default_destination(&self) -> Option<Destination> {
        None
    }
}

type TaskFn = dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Vec<TaskResult>, ExecutionError>>
    + Send
    + Sync;

/// A cron-triggered function producing outbound results.
pub struct ScheduledTask {
    identifier: String,
    expression: String,
    schedule: Schedule,
    default_destination: Option<Destination>,
    func: Arc<TaskFn>,
}

impl ScheduledTask {
    /// Builds a task directly, without a props recipe. Useful for tasks that
    /// never reload configuration.
    pub fn new<F, Fut>(
        identifier: impl Into<String>,
        schedule: &str,
        func: F,
    ) -> Result<Self, BuildError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TaskResult>, ExecutionError>> + Send + 'static,
    {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(BuildError::TaskInsufficient { identifier });
        }
        let parsed = Schedule::parse(schedule)?;
        Ok(Self {
            identifier,
            expression: schedule.trim().to_owned(),
            schedule: parsed,
            default_destination: None,
            func: Arc::new(move |token| Box::pin(func(token))),
        })
    }

    /// Sets the fallback destination for results without one.
    pub fn with_default_destination(mut self, destination: impl Into<Destination>) -> Self {
        self.default_destination = Some(destination.into());
        self
    }

    /// Stable identifier, unique per bot.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The raw schedule expression, for logs.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The parsed schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The fallback destination, if any.
    pub fn default_destination(&self) -> Option<&Destination> {
        self.default_destination.as_ref()
    }

    /// Runs the task body.
    pub async fn execute(
        &self,
        token: CancellationToken,
    ) -> Result<Vec<TaskResult>, ExecutionError> {
        (self.func)(token).await
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("identifier", &self.identifier)
            .field("expression", &self.expression)
            .field("default_destination", &self.default_destination)
            .finish_non_exhaustive()
    }
}

/// Seed values handed from props to the erased builder.
struct TaskSeed {
    identifier: String,
    schedule: Option<String>,
    default_destination: Option<Destination>,
}

type ErasedTaskBuilder =
    dyn Fn(&TaskSeed, Option<&ConfigSource>) -> Result<Arc<ScheduledTask>, BuildError>
        + Send
        + Sync;

/// Persistent recipe for building (and rebuilding) one scheduled task.
#[derive(Clone)]
pub struct TaskProps {
    bot_type: BotType,
    identifier: String,
    schedule: Option<String>,
    default_destination: Option<Destination>,
    configurable: bool,
    builder: Arc<ErasedTaskBuilder>,
}

impl TaskProps {
    /// Starts a builder for the given bot and identifier.
    pub fn builder(bot_type: impl Into<BotType>, identifier: impl Into<String>) -> TaskPropsBuilder {
        TaskPropsBuilder {
            bot_type: bot_type.into(),
            identifier: identifier.into(),
            schedule: None,
            default_destination: None,
            builder: None,
        }
    }

    /// The owning bot's type tag.
    pub fn bot_type(&self) -> &BotType {
        &self.bot_type
    }

    /// The task identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// True when this task carries a config prototype and therefore wants a
    /// config file and change subscription.
    pub fn requires_config(&self) -> bool {
        self.configurable
    }

    /// Builds a live task from the current config contents. See
    /// [`CommandProps::build`](crate::command::CommandProps::build) for the
    /// source semantics.
    pub fn build(&self, source: Option<&ConfigSource>) -> Result<Arc<ScheduledTask>, BuildError> {
        let seed = TaskSeed {
            identifier: self.identifier.clone(),
            schedule: self.schedule.clone(),
            default_destination: self.default_destination.clone(),
        };
        (self.builder)(&seed, source)
    }
}

impl fmt::Debug for TaskProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskProps")
            .field("bot_type", &self.bot_type)
            .field("identifier", &self.identifier)
            .field("schedule", &self.schedule)
            .field("configurable", &self.configurable)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaskProps`].
pub struct TaskPropsBuilder {
    bot_type: BotType,
    identifier: String,
    schedule: Option<String>,
    default_destination: Option<Destination>,
    builder: Option<(bool, Arc<ErasedTaskBuilder>)>,
}

impl TaskPropsBuilder {
    /// Sets the execution schedule. A configurable task's config may override
    /// this through [`TaskConfig::schedule`].
    pub fn schedule(mut self, expr: impl Into<String>) -> Self {
        self.schedule = Some(expr.into());
        self
    }

    /// Sets the fallback destination for results without one. A configurable
    /// task's config may override this through
    /// [`TaskConfig::default_destination`].
    pub fn default_destination(mut self, destination: impl Into<Destination>) -> Self {
        self.default_destination = Some(destination.into());
        self
    }

    /// Sets a plain execution body. The schedule must then come from the
    /// props.
    pub fn func<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TaskResult>, ExecutionError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.builder = Some((
            false,
            Arc::new(move |seed: &TaskSeed, _source: Option<&ConfigSource>| {
                let expression = seed
                    .schedule
                    .clone()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| BuildError::ScheduleNotGiven {
                        identifier: seed.identifier.clone(),
                    })?;
                let parsed = Schedule::parse(&expression)?;
                let f = f.clone();
                Ok(Arc::new(ScheduledTask {
                    identifier: seed.identifier.clone(),
                    expression: expression.trim().to_owned(),
                    schedule: parsed,
                    default_destination: seed.default_destination.clone(),
                    func: Arc::new(move |token| {
                        let f = f.clone();
                        Box::pin(async move { (*f)(token).await })
                    }),
                }))
            }),
        ));
        self
    }

    /// Sets an execution body that receives a config value decoded from the
    /// task's config file. `prototype` is used as-is when no file exists.
    pub fn configurable_fn<C, F, Fut>(mut self, prototype: C, f: F) -> Self
    where
        C: TaskConfig + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(CancellationToken, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TaskResult>, ExecutionError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.builder = Some((
            true,
            Arc::new(move |seed: &TaskSeed, source: Option<&ConfigSource>| {
                let config: Arc<C> = match source {
                    Some(src) => {
                        Arc::new(src.populate::<C>().map_err(|e| BuildError::Config {
                            identifier: seed.identifier.clone(),
                            reason: e.to_string(),
                        })?)
                    }
                    None => Arc::new(prototype.clone()),
                };

                let expression = config
                    .schedule()
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| seed.schedule.clone().filter(|s| !s.trim().is_empty()))
                    .ok_or_else(|| BuildError::ScheduleNotGiven {
                        identifier: seed.identifier.clone(),
                    })?;
                let parsed = Schedule::parse(&expression)?;
                let default_destination = config
                    .default_destination()
                    .or_else(|| seed.default_destination.clone());

                let f = f.clone();
                Ok(Arc::new(ScheduledTask {
                    identifier: seed.identifier.clone(),
                    expression: expression.trim().to_owned(),
                    schedule: parsed,
                    default_destination,
                    func: Arc::new(move |token| {
                        let f = f.clone();
                        let config = config.clone();
                        Box::pin(async move { (*f)(token, config).await })
                    }),
                }))
            }),
        ));
        self
    }

    /// Finalises the props. Identifier and function are required; the
    /// schedule is checked at build time because a config may supply it.
    pub fn build(self) -> Result<TaskProps, BuildError> {
        let (configurable, builder) = match self.builder {
            Some(builder) if !self.identifier.is_empty() => builder,
            _ => {
                return Err(BuildError::TaskInsufficient {
                    identifier: self.identifier,
                })
            }
        };
        Ok(TaskProps {
            bot_type: self.bot_type,
            identifier: self.identifier,
            schedule: self.schedule,
            default_destination: self.default_destination,
            configurable,
            builder,
        })
    }
}
