//! # Config watcher: the directory-watch half of the hot-reload loop.
//!
//! Commands and scheduled tasks read their settings from
//! `<root>/<bot_type>/<identifier>.(yaml|yml|json)`. The [`ConfigWatcher`]
//! seam provides three operations over that layout:
//!
//! - [`read`](ConfigWatcher::read) loads the current file contents,
//! - [`watch`](ConfigWatcher::watch) subscribes a callback to create/write
//!   events for one identifier,
//! - [`unwatch`](ConfigWatcher::unwatch) releases every subscription a bot
//!   owns.
//!
//! [`FileWatcher`] is the real implementation: one event loop owns the
//! platform watcher and all subscription state, so subscription mutations
//! and filesystem events are naturally serialised. Watches are registered at
//! directory granularity; per-file routing matches the event basename
//! against subscribed identifiers.
//!
//! ## Rules
//! - Duplicate subscriptions for one (bot type, identifier) fail with
//!   [`WatcherError::AlreadySubscribing`].
//! - A bot's context cancellation removes its subscriptions; a directory
//!   with no remaining subscribers is dropped from the platform watch.
//! - Backend errors are logged and never stop the loop.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WatcherError;
use crate::message::BotType;

/// File format of a configuration source, chosen by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.json`
    Json,
}

/// Raw configuration contents plus the format to decode them with.
#[derive(Clone, Debug)]
pub struct ConfigSource {
    /// Decoder selection.
    pub format: ConfigFormat,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Decoder failure for a [`ConfigSource`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ConfigSource {
    /// Decodes the contents into the given prototype type.
    pub fn populate<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        match self.format {
            ConfigFormat::Yaml => Ok(serde_yaml::from_slice(&self.bytes)?),
            ConfigFormat::Json => Ok(serde_json::from_slice(&self.bytes)?),
        }
    }
}

/// Callback fired when a watched configuration file is created or written.
pub type ConfigCallback = Arc<dyn Fn() + Send + Sync>;

/// Subscription seam for command/task configuration changes.
#[async_trait]
pub trait ConfigWatcher: Send + Sync {
    /// Reads the latest configuration for `(bot_type, id)`.
    async fn read(&self, bot_type: &BotType, id: &str) -> Result<ConfigSource, WatcherError>;

    /// Subscribes `callback` to changes of `(bot_type, id)`'s file. The
    /// subscription is dropped when `bot_token` is cancelled.
    async fn watch(
        &self,
        bot_token: &CancellationToken,
        bot_type: BotType,
        id: String,
        callback: ConfigCallback,
    ) -> Result<(), WatcherError>;

    /// Releases every subscription owned by `bot_type`.
    async fn unwatch(&self, bot_type: &BotType) -> Result<(), WatcherError>;
}

/// Fallback watcher used when no config root is configured: nothing is ever
/// found and subscriptions are accepted but inert.
pub struct NullConfigWatcher;

#[async_trait]
impl ConfigWatcher for NullConfigWatcher {
    async fn read(&self, bot_type: &BotType, id: &str) -> Result<ConfigSource, WatcherError> {
        Err(WatcherError::ConfigNotFound {
            bot_type: bot_type.clone(),
            id: id.to_owned(),
        })
    }

    async fn watch(
        &self,
        _bot_token: &CancellationToken,
        _bot_type: BotType,
        _id: String,
        _callback: ConfigCallback,
    ) -> Result<(), WatcherError> {
        Ok(())
    }

    async fn unwatch(&self, _bot_type: &BotType) -> Result<(), WatcherError> {
        Ok(())
    }
}

const CONFIG_EXTENSIONS: [(&str, ConfigFormat); 3] = [
    ("yaml", ConfigFormat::Yaml),
    ("yml", ConfigFormat::Yaml),
    ("json", ConfigFormat::Json),
];

enum LoopCommand {
    Subscribe {
        bot_type: BotType,
        id: String,
        token: CancellationToken,
        callback: ConfigCallback,
        ack: oneshot::Sender<Result<(), WatcherError>>,
    },
    Unsubscribe {
        bot_type: BotType,
    },
}

enum FsSignal {
    Event(notify::Event),
    Error(String),
}

struct Subscription {
    bot_type: BotType,
    id: String,
    callback: ConfigCallback,
}

/// The notify-backed [`ConfigWatcher`].
pub struct FileWatcher {
    root: PathBuf,
    commands: mpsc::Sender<LoopCommand>,
}

impl FileWatcher {
    /// Creates the platform watcher and spawns the event loop. The loop runs
    /// until `token` is cancelled.
    pub fn start(root: impl Into<PathBuf>, token: CancellationToken) -> Result<Self, WatcherError> {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);

        let (fs_tx, fs_rx) = mpsc::unbounded_channel::<FsSignal>();
        let backend = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| match result {
                Ok(event) => {
                    // Only creations and content writes are interesting; some
                    // backends report writes as Modify(Any).
                    if matches!(
                        event.kind,
                        EventKind::Create(_)
                            | EventKind::Modify(ModifyKind::Data(_))
                            | EventKind::Modify(ModifyKind::Any)
                    ) {
                        let _ = fs_tx.send(FsSignal::Event(event));
                    }
                }
                Err(e) => {
                    let _ = fs_tx.send(FsSignal::Error(e.to_string()));
                }
            },
        )
        .map_err(|e| WatcherError::Backend(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<LoopCommand>(32);
        let event_loop = EventLoop {
            root: root.clone(),
            backend,
            commands: cmd_tx.clone(),
            subscriptions: HashMap::new(),
            subscribed_keys: HashSet::new(),
            waiting_bots: HashSet::new(),
        };
        tokio::spawn(event_loop.run(token, cmd_rx, fs_rx));

        Ok(Self {
            root,
            commands: cmd_tx,
        })
    }
}

#[async_trait]
impl ConfigWatcher for FileWatcher {
    async fn read(&self, bot_type: &BotType, id: &str) -> Result<ConfigSource, WatcherError> {
        let dir = self.root.join(bot_type.as_str());
        for (ext, format) in CONFIG_EXTENSIONS {
            let path = dir.join(format!("{id}.{ext}"));
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(ConfigSource { format, bytes }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(WatcherError::Io(e)),
            }
        }
        Err(WatcherError::ConfigNotFound {
            bot_type: bot_type.clone(),
            id: id.to_owned(),
        })
    }

    async fn watch(
        &self,
        bot_token: &CancellationToken,
        bot_type: BotType,
        id: String,
        callback: ConfigCallback,
    ) -> Result<(), WatcherError> {
        let (ack, ack_rx) = oneshot::channel();
        self.commands
            .send(LoopCommand::Subscribe {
                bot_type,
                id,
                token: bot_token.clone(),
                callback,
                ack,
            })
            .await
            .map_err(|_| WatcherError::NotRunning)?;
        ack_rx.await.map_err(|_| WatcherError::NotRunning)?
    }

    async fn unwatch(&self, bot_type: &BotType) -> Result<(), WatcherError> {
        self.commands
            .send(LoopCommand::Unsubscribe {
                bot_type: bot_type.clone(),
            })
            .await
            .map_err(|_| WatcherError::NotRunning)
    }
}

/// Single-threaded core owning the platform watcher and all subscription
/// state.
struct EventLoop {
    root: PathBuf,
    backend: RecommendedWatcher,
    commands: mpsc::Sender<LoopCommand>,
    /// Watched directory -> its subscribers.
    subscriptions: HashMap<PathBuf, Vec<Subscription>>,
    /// (bot type, identifier) pairs with a live subscription.
    subscribed_keys: HashSet<(String, String)>,
    /// Bot types that already have a cancellation waiter.
    waiting_bots: HashSet<String>,
}

impl EventLoop {
    async fn run(
        mut self,
        token: CancellationToken,
        mut commands: mpsc::Receiver<LoopCommand>,
        mut signals: mpsc::UnboundedReceiver<FsSignal>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("config watcher stopping");
                    break;
                }
                cmd = commands.recv() => match cmd {
                    Some(LoopCommand::Subscribe { bot_type, id, token, callback, ack }) => {
                        let _ = ack.send(self.subscribe(bot_type, id, token, callback));
                    }
                    Some(LoopCommand::Unsubscribe { bot_type }) => self.unsubscribe(&bot_type),
                    None => break,
                },
                signal = signals.recv() => match signal {
                    Some(FsSignal::Event(event)) => self.route(&event),
                    Some(FsSignal::Error(e)) => {
                        error!(error = %e, "filesystem watch backend reported an error");
                    }
                    None => break,
                },
            }
        }
    }

    fn subscribe(
        &mut self,
        bot_type: BotType,
        id: String,
        token: CancellationToken,
        callback: ConfigCallback,
    ) -> Result<(), WatcherError> {
        let key = (bot_type.as_str().to_owned(), id.clone());
        if self.subscribed_keys.contains(&key) {
            return Err(WatcherError::AlreadySubscribing { bot_type, id });
        }

        let dir = self.root.join(bot_type.as_str());
        let dir = dir.canonicalize().unwrap_or(dir);
        if !self.subscriptions.contains_key(&dir) {
            self.backend
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| WatcherError::Backend(e.to_string()))?;
            self.subscriptions.insert(dir.clone(), Vec::new());
            debug!(dir = %dir.display(), "watching config directory");
        }

        if self.waiting_bots.insert(bot_type.as_str().to_owned()) {
            let commands = self.commands.clone();
            let waiter_bot = bot_type.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = commands
                    .send(LoopCommand::Unsubscribe {
                        bot_type: waiter_bot,
                    })
                    .await;
            });
        }

        info!(bot_type = %bot_type, id = %id, "subscribed to config changes");
        if let Some(subs) = self.subscriptions.get_mut(&dir) {
            subs.push(Subscription {
                bot_type,
                id,
                callback,
            });
        }
        self.subscribed_keys.insert(key);
        Ok(())
    }

    fn unsubscribe(&mut self, bot_type: &BotType) {
        let mut released_dirs = Vec::new();
        for (dir, subs) in self.subscriptions.iter_mut() {
            subs.retain(|s| s.bot_type != *bot_type);
            if subs.is_empty() {
                released_dirs.push(dir.clone());
            }
        }
        for dir in released_dirs {
            if let Err(e) = self.backend.unwatch(&dir) {
                warn!(dir = %dir.display(), error = %e, "failed to release directory watch");
            }
            self.subscriptions.remove(&dir);
            debug!(dir = %dir.display(), "released config directory");
        }
        self.subscribed_keys
            .retain(|(bt, _)| bt != bot_type.as_str());
        self.waiting_bots.remove(bot_type.as_str());
        info!(bot_type = %bot_type, "released config subscriptions");
    }

    fn route(&self, event: &notify::Event) {
        for path in &event.paths {
            let Some(dir) = path.parent() else { continue };
            let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
            let Some(subs) = self.subscriptions.get(&dir) else {
                continue;
            };
            if !has_config_extension(path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            for sub in subs.iter().filter(|s| s.id == stem) {
                info!(
                    bot_type = %sub.bot_type,
                    id = %sub.id,
                    path = %path.display(),
                    "config file changed"
                );
                (sub.callback)();
            }
        }
    }
}

fn has_config_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml" | "json")
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        foo: u32,
    }

    fn write_config(root: &Path, bot: &str, name: &str, body: &str) {
        let dir = root.join(bot);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[tokio::test]
    async fn read_prefers_yaml_and_decodes_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "demo", "cfg.yaml", "foo: 7");
        let token = CancellationToken::new();
        let watcher = FileWatcher::start(tmp.path(), token.clone()).unwrap();

        let source = watcher.read(&BotType::from("demo"), "cfg").await.unwrap();
        assert_eq!(source.format, ConfigFormat::Yaml);
        assert_eq!(source.populate::<Sample>().unwrap(), Sample { foo: 7 });
        token.cancel();
    }

    #[tokio::test]
    async fn read_reports_missing_config() {
        let tmp = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let watcher = FileWatcher::start(tmp.path(), token.clone()).unwrap();

        let err = watcher
            .read(&BotType::from("demo"), "absent")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        token.cancel();
    }

    #[tokio::test]
    async fn json_sources_decode_too() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "demo", "cfg.json", r#"{"foo": 3}"#);
        let token = CancellationToken::new();
        let watcher = FileWatcher::start(tmp.path(), token.clone()).unwrap();

        let source = watcher.read(&BotType::from("demo"), "cfg").await.unwrap();
        assert_eq!(source.format, ConfigFormat::Json);
        assert_eq!(source.populate::<Sample>().unwrap(), Sample { foo: 3 });
        token.cancel();
    }

    #[tokio::test]
    async fn write_fires_subscribed_callback() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "demo", "cfg.yaml", "foo: 1");
        let token = CancellationToken::new();
        let watcher = FileWatcher::start(tmp.path(), token.clone()).unwrap();

        let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
        let callback: ConfigCallback = Arc::new(move || {
            let _ = hit_tx.send(());
        });
        let bot_token = token.child_token();
        watcher
            .watch(&bot_token, BotType::from("demo"), "cfg".into(), callback)
            .await
            .unwrap();

        write_config(tmp.path(), "demo", "cfg.yaml", "foo: 2");
        tokio::time::timeout(Duration::from_secs(5), hit_rx.recv())
            .await
            .expect("callback should fire on write")
            .unwrap();
        token.cancel();
    }

    #[tokio::test]
    async fn duplicate_subscription_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "demo", "cfg.yaml", "foo: 1");
        let token = CancellationToken::new();
        let watcher = FileWatcher::start(tmp.path(), token.clone()).unwrap();
        let callback: ConfigCallback = Arc::new(|| {});
        let bot_token = token.child_token();

        watcher
            .watch(
                &bot_token,
                BotType::from("demo"),
                "cfg".into(),
                callback.clone(),
            )
            .await
            .unwrap();
        let err = watcher
            .watch(&bot_token, BotType::from("demo"), "cfg".into(), callback)
            .await
            .unwrap_err();
        assert!(matches!(err, WatcherError::AlreadySubscribing { .. }));
        token.cancel();
    }

    #[tokio::test]
    async fn unwatch_silences_callbacks() {
        let tmp = tempfile::tempdir().unwrap();
        write_config(tmp.path(), "demo", "cfg.yaml", "foo: 1");
        let token = CancellationToken::new();
        let watcher = FileWatcher::start(tmp.path(), token.clone()).unwrap();

        let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
        let callback: ConfigCallback = Arc::new(move || {
            let _ = hit_tx.send(());
        });
        let bot_type = BotType::from("demo");
        let bot_token = token.child_token();
        watcher
            .watch(&bot_token, bot_type.clone(), "cfg".into(), callback)
            .await
            .unwrap();
        watcher.unwatch(&bot_type).await.unwrap();
        // Give the loop a beat to process the release before writing.
        tokio::time::sleep(Duration::from_millis(200)).await;

        write_config(tmp.path(), "demo", "cfg.yaml", "foo: 2");
        let fired = tokio::time::timeout(Duration::from_millis(500), hit_rx.recv()).await;
        assert!(fired.is_err(), "callback fired after unwatch");
        token.cancel();
    }
}
