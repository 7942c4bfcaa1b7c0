//! # Runner: the supervisor owning every bot's lifecycle.
//!
//! The runner wires all runtime components together and supervises them
//! until its root token is cancelled:
//!
//! ```text
//! RunnerBuilder ──► Runner::run(root_token)
//!                        │
//!                        ├──► WorkerPool (bounded queue, n workers)
//!                        ├──► Scheduler (cron engine)
//!                        ├──► ConfigWatcher (per-bot subscriptions)
//!                        │
//!                        ├──► per bot: child token
//!                        │        ├──► build commands from props ─► registry
//!                        │        ├──► build tasks from props ───► scheduler
//!                        │        └──► adapter driver
//!                        │                 ├── enqueue ──► worker job ──► bot.respond
//!                        │                 └── notify ───► cancel bot + alerters
//!                        │
//!                        ├──► reload loop: config event ─► rebuild ─► replace
//!                        │
//!                        └──► root cancelled ─► cancel bots ─► grace drain
//! ```
//!
//! ## Rules
//! - Bot registration is an explicit options bag; duplicate bot types are a
//!   build error, not a runtime surprise.
//! - Inbound dispatch, continuations, and scheduled task bodies all share
//!   the one worker budget.
//! - Config rebuilds are serialised by a single consumer loop; a failed
//!   rebuild keeps the previous entry.
//! - Only a non-continuable adapter failure tears a bot down, and only that
//!   bot: peers keep running.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{Adapter, ErrorSink, InputSink};
use crate::alerter::{Alerter, AlerterSet};
use crate::bot::{Bot, SupervisedBot};
use crate::command::CommandProps;
use crate::config::Config;
use crate::context::{CacheStorage, ContextStorage};
use crate::error::{BlockedInput, BotError, RuntimeError, WatcherError};
use crate::message::{BotType, Input, Output};
use crate::scheduler::{CronScheduler, Scheduler, TaskJob};
use crate::status::{Status, StatusTracker};
use crate::task::{ScheduledTask, TaskProps};
use crate::watcher::{ConfigCallback, ConfigSource, ConfigWatcher, FileWatcher, NullConfigWatcher};
use crate::worker::WorkerPool;

const RELOAD_QUEUE_DEPTH: usize = 64;

/// Builder collecting everything a [`Runner`] supervises.
///
/// This is the explicit registration surface: bots, props, alerters, and
/// component overrides all arrive here, never through hidden global state.
pub struct RunnerBuilder {
    config: Config,
    bots: Vec<Arc<dyn Bot>>,
    command_props: Vec<CommandProps>,
    task_props: Vec<TaskProps>,
    prebuilt_tasks: Vec<(BotType, Arc<ScheduledTask>)>,
    alerters: Vec<Arc<dyn Alerter>>,
    pool: Option<Arc<WorkerPool>>,
    watcher: Option<Arc<dyn ConfigWatcher>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl RunnerBuilder {
    /// Registers an adapter wrapped into the default bot with a fresh
    /// context cache tuned by the runner config.
    pub fn register_adapter(self, adapter: Arc<dyn Adapter>) -> Self {
        let cache = CacheStorage::new(
            self.config.context_cache.ttl,
            self.config.context_cache.capacity,
        );
        let storage: Arc<dyn ContextStorage> = Arc::new(cache);
        self.register_adapter_with_storage(adapter, storage)
    }

    /// Registers an adapter wrapped into the default bot with the given
    /// context storage.
    pub fn register_adapter_with_storage(
        mut self,
        adapter: Arc<dyn Adapter>,
        storage: Arc<dyn ContextStorage>,
    ) -> Self {
        self.bots.push(Arc::new(SupervisedBot::new(adapter, storage)));
        self
    }

    /// Registers a custom [`Bot`] implementation.
    pub fn register_bot(mut self, bot: Arc<dyn Bot>) -> Self {
        self.bots.push(bot);
        self
    }

    /// Registers a command recipe; the command is built (and rebuilt on
    /// config change) for the bot with the matching type.
    pub fn register_command_props(mut self, props: CommandProps) -> Self {
        self.command_props.push(props);
        self
    }

    /// Registers a scheduled-task recipe.
    pub fn register_task_props(mut self, props: TaskProps) -> Self {
        self.task_props.push(props);
        self
    }

    /// Registers a pre-built scheduled task that never reloads.
    pub fn register_scheduled_task(
        mut self,
        bot_type: impl Into<BotType>,
        task: Arc<ScheduledTask>,
    ) -> Self {
        self.prebuilt_tasks.push((bot_type.into(), task));
        self
    }

    /// Registers an alerter notified when a bot fails fatally.
    pub fn register_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerters.push(alerter);
        self
    }

    /// Overrides the worker pool.
    pub fn with_worker_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Overrides the config watcher.
    pub fn with_config_watcher(mut self, watcher: Arc<dyn ConfigWatcher>) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// Overrides the scheduling engine.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Finalises the runner. Fails on duplicate bot types or an unknown
    /// timezone.
    pub fn build(self) -> Result<Runner, RuntimeError> {
        let mut seen = HashSet::new();
        for bot in &self.bots {
            let bot_type = bot.bot_type();
            if !seen.insert(bot_type.as_str().to_owned()) {
                return Err(RuntimeError::DuplicateBotType { bot_type });
            }
        }

        let tz: Tz = self
            .config
            .timezone
            .parse()
            .map_err(|_| RuntimeError::UnknownTimezone {
                name: self.config.timezone.clone(),
            })?;

        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(WorkerPool::new(self.config.worker.clone())));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(CronScheduler::new(tz)));

        Ok(Runner {
            config: self.config,
            bots: self.bots,
            command_props: self.command_props,
            task_props: self.task_props,
            prebuilt_tasks: self.prebuilt_tasks,
            alerters: Arc::new(AlerterSet::new(self.alerters)),
            pool,
            watcher_override: self.watcher,
            scheduler,
            status: Arc::new(StatusTracker::new()),
            started: AtomicBool::new(false),
        })
    }
}

/// The runtime supervisor.
pub struct Runner {
    config: Config,
    bots: Vec<Arc<dyn Bot>>,
    command_props: Vec<CommandProps>,
    task_props: Vec<TaskProps>,
    prebuilt_tasks: Vec<(BotType, Arc<ScheduledTask>)>,
    alerters: Arc<AlerterSet>,
    pool: Arc<WorkerPool>,
    watcher_override: Option<Arc<dyn ConfigWatcher>>,
    scheduler: Arc<dyn Scheduler>,
    status: Arc<StatusTracker>,
    started: AtomicBool,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").finish_non_exhaustive()
    }
}

/// Identifies the props targeted by a config change event.
#[derive(Clone, Debug)]
struct ReloadKey {
    bot_type: BotType,
    id: String,
}

impl Runner {
    /// Starts collecting registrations against the given config.
    pub fn builder(config: Config) -> RunnerBuilder {
        RunnerBuilder {
            config,
            bots: Vec::new(),
            command_props: Vec::new(),
            task_props: Vec::new(),
            prebuilt_tasks: Vec::new(),
            alerters: Vec::new(),
            pool: None,
            watcher: None,
            scheduler: None,
        }
    }

    /// Lock-free liveness snapshot: supervisor state, per-bot flags, and the
    /// recent worker queue-depth reports.
    pub fn status(&self) -> Status {
        self.status.snapshot()
    }

    /// Runs every registered bot until `token` is cancelled.
    ///
    /// ### Startup order
    /// 1. worker pool, 2. status reporting, 3. scheduler, 4. config watcher,
    /// 5. per-bot command/task builds and subscriptions, 6. adapter drivers,
    /// 7. the config-reload loop.
    ///
    /// ### Shutdown
    /// Cancellation of `token` cancels every bot's child token, then waits
    /// up to `config.grace` for the adapter drivers to drain. Bots still
    /// running past the grace are reported through
    /// [`RuntimeError::GraceExceeded`].
    pub async fn run(&self, token: CancellationToken) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }

        info!(bots = self.bots.len(), "starting bot runtime");
        self.pool.run(token.child_token()).await;
        self.status.set_running(true);
        self.status
            .spawn_report_listener(self.pool.subscribe_reports(), token.child_token());
        self.scheduler.start(token.child_token());
        let watcher = self.resolve_watcher(&token);

        let (reload_tx, reload_rx) = mpsc::channel::<ReloadKey>(RELOAD_QUEUE_DEPTH);
        let alive: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut drivers = JoinSet::new();
        let mut bot_tokens: HashMap<String, CancellationToken> = HashMap::new();
        let mut bot_index: HashMap<String, Arc<dyn Bot>> = HashMap::new();

        for bot in &self.bots {
            let bot_type = bot.bot_type();
            let bot_token = token.child_token();
            bot_tokens.insert(bot_type.as_str().to_owned(), bot_token.clone());
            bot_index.insert(bot_type.as_str().to_owned(), bot.clone());

            self.build_bot_commands(bot, &bot_type, &watcher).await;
            self.build_bot_tasks(bot, &bot_type, &watcher, &bot_token).await;
            self.subscribe_config_events(&bot_type, &watcher, &bot_token, &reload_tx)
                .await;
            self.spawn_driver(&mut drivers, bot.clone(), bot_type, bot_token, alive.clone());
        }

        self.spawn_reload_loop(
            reload_rx,
            watcher,
            bot_index,
            bot_tokens.clone(),
            token.child_token(),
        );

        token.cancelled().await;
        info!("shutdown requested");
        self.status.set_running(false);
        for bot_token in bot_tokens.values() {
            bot_token.cancel();
        }
        self.drain_with_grace(&mut drivers, &alive).await
    }

    fn resolve_watcher(&self, token: &CancellationToken) -> Arc<dyn ConfigWatcher> {
        if let Some(watcher) = &self.watcher_override {
            return watcher.clone();
        }
        match &self.config.plugin_config_root {
            Some(root) => match FileWatcher::start(root.clone(), token.child_token()) {
                Ok(watcher) => {
                    info!(root = %root.display(), "config watcher started");
                    Arc::new(watcher)
                }
                Err(e) => {
                    error!(error = %e, "failed to start config watcher; hot reload disabled");
                    Arc::new(NullConfigWatcher)
                }
            },
            None => Arc::new(NullConfigWatcher),
        }
    }

    async fn build_bot_commands(
        &self,
        bot: &Arc<dyn Bot>,
        bot_type: &BotType,
        watcher: &Arc<dyn ConfigWatcher>,
    ) {
        for props in self
            .command_props
            .iter()
            .filter(|p| p.bot_type() == bot_type)
        {
            let id = props.identifier();
            match read_props_source(watcher, bot_type, id, props.requires_config()).await {
                Ok(source) => match props.build(source.as_ref()) {
                    Ok(command) => {
                        debug!(bot_type = %bot_type, id, "command registered");
                        bot.append_command(command).await;
                    }
                    Err(e) => {
                        error!(bot_type = %bot_type, id, error = %e, "failed to build command; skipping");
                    }
                },
                Err(e) => {
                    error!(bot_type = %bot_type, id, error = %e, "failed to read command config; skipping");
                }
            }
        }
    }

    async fn build_bot_tasks(
        &self,
        bot: &Arc<dyn Bot>,
        bot_type: &BotType,
        watcher: &Arc<dyn ConfigWatcher>,
        bot_token: &CancellationToken,
    ) {
        for props in self.task_props.iter().filter(|p| p.bot_type() == bot_type) {
            let id = props.identifier();
            match read_props_source(watcher, bot_type, id, props.requires_config()).await {
                Ok(source) => match props.build(source.as_ref()) {
                    Ok(task) => self.register_task(bot, bot_type, task, bot_token).await,
                    Err(e) => {
                        error!(bot_type = %bot_type, id, error = %e, "failed to build scheduled task; skipping");
                    }
                },
                Err(e) => {
                    error!(bot_type = %bot_type, id, error = %e, "failed to read task config; skipping");
                }
            }
        }

        for (_, task) in self
            .prebuilt_tasks
            .iter()
            .filter(|(bt, _)| bt == bot_type)
        {
            self.register_task(bot, bot_type, task.clone(), bot_token).await;
        }
    }

    async fn register_task(
        &self,
        bot: &Arc<dyn Bot>,
        bot_type: &BotType,
        task: Arc<ScheduledTask>,
        bot_token: &CancellationToken,
    ) {
        let job = task_job(
            self.pool.clone(),
            bot.clone(),
            bot_type.clone(),
            task.clone(),
            bot_token.clone(),
        );
        self.scheduler.update(bot_type, task, job).await;
    }

    async fn subscribe_config_events(
        &self,
        bot_type: &BotType,
        watcher: &Arc<dyn ConfigWatcher>,
        bot_token: &CancellationToken,
        reload_tx: &mpsc::Sender<ReloadKey>,
    ) {
        let command_ids = self
            .command_props
            .iter()
            .filter(|p| p.bot_type() == bot_type && p.requires_config())
            .map(|p| p.identifier().to_owned());
        let task_ids = self
            .task_props
            .iter()
            .filter(|p| p.bot_type() == bot_type && p.requires_config())
            .map(|p| p.identifier().to_owned());

        for id in command_ids.chain(task_ids) {
            let callback: ConfigCallback = {
                let tx = reload_tx.clone();
                let key = ReloadKey {
                    bot_type: bot_type.clone(),
                    id: id.clone(),
                };
                Arc::new(move || {
                    if tx.try_send(key.clone()).is_err() {
                        warn!(
                            bot_type = %key.bot_type,
                            id = %key.id,
                            "config reload queue full; event dropped"
                        );
                    }
                })
            };
            if let Err(e) = watcher
                .watch(bot_token, bot_type.clone(), id.clone(), callback)
                .await
            {
                warn!(bot_type = %bot_type, id = %id, error = %e, "failed to subscribe to config changes");
            }
        }
    }

    fn spawn_driver(
        &self,
        drivers: &mut JoinSet<()>,
        bot: Arc<dyn Bot>,
        bot_type: BotType,
        bot_token: CancellationToken,
        alive: Arc<Mutex<HashSet<String>>>,
    ) {
        let flag = self.status.register_bot(bot_type.clone());
        flag.store(true, Ordering::SeqCst);
        alive
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bot_type.as_str().to_owned());

        let enqueue: InputSink = {
            let pool = self.pool.clone();
            let bot = bot.clone();
            let bot_token = bot_token.clone();
            let bot_tag = bot_type.clone();
            let help = self.config.help_command.clone();
            let abort = self.config.abort_command.clone();
            Arc::new(move |input: Input| {
                if bot_token.is_cancelled() {
                    return Err(BlockedInput);
                }
                let input = input.classify(&help, &abort);
                let bot = bot.clone();
                let bot_tag = bot_tag.clone();
                let job = Box::pin(async move {
                    if let Err(e) = bot.respond(input).await {
                        error!(bot_type = %bot_tag, error = %e, "command execution failed");
                    }
                });
                pool.enqueue(job).map_err(|_| BlockedInput)
            })
        };

        let notify: ErrorSink = {
            let bot_token = bot_token.clone();
            let alerters = self.alerters.clone();
            let flag = flag.clone();
            let bot_tag = bot_type.clone();
            Arc::new(move |err: BotError| match err {
                BotError::NonContinuable { .. } => {
                    error!(
                        bot_type = %bot_tag,
                        error = %err,
                        "non-continuable adapter failure; stopping bot"
                    );
                    flag.store(false, Ordering::SeqCst);
                    bot_token.cancel();
                    let alerters = alerters.clone();
                    let bot_tag = bot_tag.clone();
                    tokio::spawn(async move {
                        alerters.alert_all(&bot_tag, &err).await;
                    });
                }
            })
        };

        drivers.spawn(async move {
            info!(bot_type = %bot_type, "starting adapter");
            bot.run(bot_token, enqueue, notify).await;
            flag.store(false, Ordering::SeqCst);
            alive
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(bot_type.as_str());
            info!(bot_type = %bot_type, "adapter stopped");
        });
    }

    fn spawn_reload_loop(
        &self,
        mut reload_rx: mpsc::Receiver<ReloadKey>,
        watcher: Arc<dyn ConfigWatcher>,
        bots: HashMap<String, Arc<dyn Bot>>,
        bot_tokens: HashMap<String, CancellationToken>,
        token: CancellationToken,
    ) {
        let context = ReloadContext {
            watcher,
            bots,
            bot_tokens,
            command_props: self.command_props.clone(),
            task_props: self.task_props.clone(),
            scheduler: self.scheduler.clone(),
            pool: self.pool.clone(),
        };
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    key = reload_rx.recv() => match key {
                        Some(key) => context.rebuild(&key).await,
                        None => break,
                    },
                }
            }
        });
    }

    async fn drain_with_grace(
        &self,
        drivers: &mut JoinSet<()>,
        alive: &Arc<Mutex<HashSet<String>>>,
    ) -> Result<(), RuntimeError> {
        let grace = self.config.grace;
        let done = async {
            while drivers.join_next().await.is_some() {}
        };
        match tokio::time::timeout(grace, done).await {
            Ok(()) => {
                info!("all bots stopped within grace");
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<String> = alive
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .iter()
                    .cloned()
                    .collect();
                error!(?stuck, "shutdown grace exceeded");
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

/// Everything the config-reload consumer needs to rebuild one entry.
///
/// One consumer processes all reload events, so rebuilds of a given
/// (bot type, identifier) are naturally serialised.
struct ReloadContext {
    watcher: Arc<dyn ConfigWatcher>,
    bots: HashMap<String, Arc<dyn Bot>>,
    bot_tokens: HashMap<String, CancellationToken>,
    command_props: Vec<CommandProps>,
    task_props: Vec<TaskProps>,
    scheduler: Arc<dyn Scheduler>,
    pool: Arc<WorkerPool>,
}

impl ReloadContext {
    async fn rebuild(&self, key: &ReloadKey) {
        let Some(bot) = self.bots.get(key.bot_type.as_str()) else {
            return;
        };

        if let Some(props) = self
            .command_props
            .iter()
            .find(|p| p.bot_type() == &key.bot_type && p.identifier() == key.id)
        {
            match read_props_source(&self.watcher, &key.bot_type, &key.id, props.requires_config())
                .await
            {
                Ok(source) => match props.build(source.as_ref()) {
                    Ok(command) => {
                        bot.append_command(command).await;
                        info!(bot_type = %key.bot_type, id = %key.id, "command rebuilt from updated config");
                    }
                    Err(e) => {
                        error!(bot_type = %key.bot_type, id = %key.id, error = %e, "command rebuild failed; keeping previous");
                    }
                },
                Err(e) => {
                    error!(bot_type = %key.bot_type, id = %key.id, error = %e, "failed to read updated config; keeping previous");
                }
            }
            return;
        }

        if let Some(props) = self
            .task_props
            .iter()
            .find(|p| p.bot_type() == &key.bot_type && p.identifier() == key.id)
        {
            match read_props_source(&self.watcher, &key.bot_type, &key.id, props.requires_config())
                .await
            {
                Ok(source) => match props.build(source.as_ref()) {
                    Ok(task) => {
                        let Some(bot_token) = self.bot_tokens.get(key.bot_type.as_str()) else {
                            return;
                        };
                        let job = task_job(
                            self.pool.clone(),
                            bot.clone(),
                            key.bot_type.clone(),
                            task.clone(),
                            bot_token.clone(),
                        );
                        self.scheduler.update(&key.bot_type, task, job).await;
                        info!(bot_type = %key.bot_type, id = %key.id, "scheduled task rebuilt from updated config");
                    }
                    Err(e) => {
                        error!(bot_type = %key.bot_type, id = %key.id, error = %e, "task rebuild failed; keeping previous");
                    }
                },
                Err(e) => {
                    error!(bot_type = %key.bot_type, id = %key.id, error = %e, "failed to read updated config; keeping previous");
                }
            }
            return;
        }

        debug!(bot_type = %key.bot_type, id = %key.id, "config event for unknown props; ignoring");
    }
}

/// Reads the config source for a props build. An absent file is tolerated;
/// any other read failure is passed back to the caller.
async fn read_props_source(
    watcher: &Arc<dyn ConfigWatcher>,
    bot_type: &BotType,
    id: &str,
    requires_config: bool,
) -> Result<Option<ConfigSource>, WatcherError> {
    if !requires_config {
        return Ok(None);
    }
    match watcher.read(bot_type, id).await {
        Ok(source) => Ok(Some(source)),
        Err(e) if e.is_not_found() => {
            info!(bot_type = %bot_type, id, "no config file; using prototype as-is");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Builds the closure fired by the scheduler on every due instant: enqueue a
/// worker job that executes the task and delivers its results.
fn task_job(
    pool: Arc<WorkerPool>,
    bot: Arc<dyn Bot>,
    bot_type: BotType,
    task: Arc<ScheduledTask>,
    bot_token: CancellationToken,
) -> TaskJob {
    Arc::new(move || {
        let fut = execute_scheduled_task(bot.clone(), task.clone(), bot_token.clone());
        if pool.enqueue(Box::pin(fut)).is_err() {
            warn!(
                bot_type = %bot_type,
                task = task.identifier(),
                "worker queue saturated; task firing skipped"
            );
        }
    })
}

/// Runs one task firing: execute, resolve each result's destination (result
/// destination over task default), deliver. Errors are logged and contained.
async fn execute_scheduled_task(
    bot: Arc<dyn Bot>,
    task: Arc<ScheduledTask>,
    token: CancellationToken,
) {
    match task.execute(token).await {
        Err(e) => {
            error!(task = task.identifier(), error = %e, "scheduled task failed");
        }
        Ok(results) => {
            for result in results {
                let destination = result
                    .destination
                    .clone()
                    .or_else(|| task.default_destination().cloned());
                match destination {
                    Some(destination) => {
                        bot.send_message(Output::new(destination, result.content)).await;
                    }
                    None => {
                        warn!(
                            task = task.identifier(),
                            "task result has no destination; dropping"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    struct IdleAdapter(BotType);

    #[async_trait]
    impl Adapter for IdleAdapter {
        fn bot_type(&self) -> BotType {
            self.0.clone()
        }

        async fn run(&self, token: CancellationToken, _inputs: InputSink, _errors: ErrorSink) {
            token.cancelled().await;
        }

        async fn send_message(&self, _output: Output) {}
    }

    #[test]
    fn duplicate_bot_types_are_rejected() {
        let err = Runner::builder(Config::default())
            .register_adapter(Arc::new(IdleAdapter(BotType::from("slack"))))
            .register_adapter(Arc::new(IdleAdapter(BotType::from("slack"))))
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateBotType { .. }));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut config = Config::default();
        config.timezone = "Mars/Olympus".to_owned();
        let err = Runner::builder(config).build().unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownTimezone { .. }));
    }

    #[tokio::test]
    async fn run_twice_is_an_error() {
        let runner = Arc::new(Runner::builder(Config::default()).build().unwrap());
        let token = CancellationToken::new();

        let first = runner.clone();
        let first_token = token.clone();
        let handle = tokio::spawn(async move { first.run(first_token).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let err = runner.run(token.clone()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning));

        token.cancel();
        handle.await.unwrap().unwrap();
    }
}
