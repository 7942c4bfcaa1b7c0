//! # Commands: match predicates, execution bodies, and the per-bot registry.
//!
//! A [`Command`] pairs a match predicate over [`Input`] with an async execute
//! body. Commands are not registered directly: a [`CommandProps`] is the
//! persistent recipe (bot type, identifier, matcher, function, optional
//! config prototype) from which the live command is (re)built whenever its
//! configuration file changes. The [`Commands`] registry keeps a bot's
//! commands in insertion order; a rebuild replaces the entry in place so the
//! command keeps its ordinal position.
//!
//! ## Rules
//! - Matching is a linear scan in insertion order; first match wins.
//! - No matching command is not an error: dispatch yields no response.
//! - Rebuilding with a broken config keeps the previous command.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use regex::Regex;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::debug;

use crate::context::UserContext;
use crate::error::{BuildError, ExecutionError};
use crate::message::{BotType, CommandHelp, Input, OutputContent};
use crate::watcher::ConfigSource;

/// What a command (or continuation) answers with.
#[derive(Debug)]
pub struct Response {
    /// Reply payload, wrapped into an [`Output`](crate::message::Output)
    /// targeting the input's `reply_to`.
    pub content: OutputContent,
    /// Continuation to run against the sender's next input, if any.
    pub next: Option<UserContext>,
}

impl Response {
    /// Creates a response with an arbitrary content variant.
    pub fn new(content: OutputContent) -> Self {
        Self {
            content,
            next: None,
        }
    }

    /// Creates a plain-text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OutputContent::Text(text.into()))
    }

    /// Attaches a next-turn continuation.
    pub fn with_next(mut self, next: UserContext) -> Self {
        self.next = Some(next);
        self
    }
}

impl std::fmt::Debug for dyn Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("identifier", &self.identifier())
            .finish()
    }
}

/// An executable chat command.
#[async_trait]
pub trait Command: Send + Sync {
    /// Stable identifier, unique within a bot.
    fn identifier(&self) -> &str;

    /// Example invocation shown in help listings.
    fn example(&self) -> &str;

    /// Whether this command should handle the given input.
    fn matches(&self, input: &Input) -> bool;

    /// Executes the command. `Ok(None)` means "handled, nothing to say".
    async fn execute(&self, input: Input) -> Result<Option<Response>, ExecutionError>;

    /// Help entry for this command.
    fn help(&self) -> CommandHelp {
        CommandHelp {
            identifier: self.identifier().to_owned(),
            example: self.example().to_owned(),
        }
    }
}

/// Match predicate of a command: a regex over the message text or an
/// arbitrary function of the whole input.
#[derive(Clone)]
pub enum Matcher {
    /// Matches when the regex matches the message text.
    Pattern(Regex),
    /// Matches when the predicate returns true.
    Func(Arc<dyn Fn(&Input) -> bool + Send + Sync>),
}

impl Matcher {
    /// Evaluates the predicate.
    pub fn matches(&self, input: &Input) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(&input.message),
            Matcher::Func(f) => f(input),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            Matcher::Func(_) => f.debug_tuple("Func").finish(),
        }
    }
}

type CommandFn =
    dyn Fn(Input) -> BoxFuture<'static, Result<Option<Response>, ExecutionError>> + Send + Sync;

/// Function-backed command produced by [`CommandProps::build`].
struct FnCommand {
    identifier: String,
    example: String,
    matcher: Matcher,
    func: Arc<CommandFn>,
}

#[async_trait]
impl Command for FnCommand {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn example(&self) -> &str {
        &self.example
    }

    fn matches(&self, input: &Input) -> bool {
        self.matcher.matches(input)
    }

    async fn execute(&self, input: Input) -> Result<Option<Response>, ExecutionError> {
        (self.func)(input).await
    }
}

type ErasedCommandBuilder = dyn Fn(&str, &Matcher, &str, Option<&ConfigSource>) -> Result<Arc<dyn Command>, BuildError>
    + Send
    + Sync;

/// Persistent recipe for building (and rebuilding) one command.
#[derive(Clone)]
pub struct CommandProps {
    bot_type: BotType,
    identifier: String,
    matcher: Matcher,
    example: String,
    configurable: bool,
    builder: Arc<ErasedCommandBuilder>,
}

impl CommandProps {
    /// Starts a builder for the given bot and identifier.
    pub fn builder(
        bot_type: impl Into<BotType>,
        identifier: impl Into<String>,
    ) -> CommandPropsBuilder {
        CommandPropsBuilder {
            bot_type: bot_type.into(),
            identifier: identifier.into(),
            matcher: None,
            example: String::new(),
            builder: None,
        }
    }

    /// The owning bot's type tag.
    pub fn bot_type(&self) -> &BotType {
        &self.bot_type
    }

    /// The command identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// True when this command carries a config prototype and therefore wants
    /// a config file and change subscription.
    pub fn requires_config(&self) -> bool {
        self.configurable
    }

    /// Builds a live command. `source` is the current config contents (absent
    /// file is tolerated: the prototype is used as-is); a present-but-broken
    /// source is a hard error.
    pub fn build(&self, source: Option<&ConfigSource>) -> Result<Arc<dyn Command>, BuildError> {
        (self.builder)(&self.identifier, &self.matcher, &self.example, source)
    }
}

impl fmt::Debug for CommandProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandProps")
            .field("bot_type", &self.bot_type)
            .field("identifier", &self.identifier)
            .field("matcher", &self.matcher)
            .field("configurable", &self.configurable)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CommandProps`].
pub struct CommandPropsBuilder {
    bot_type: BotType,
    identifier: String,
    matcher: Option<Matcher>,
    example: String,
    builder: Option<(bool, Arc<ErasedCommandBuilder>)>,
}

impl CommandPropsBuilder {
    /// Matches inputs whose message text matches `pattern`.
    pub fn match_pattern(mut self, pattern: Regex) -> Self {
        self.matcher = Some(Matcher::Pattern(pattern));
        self
    }

    /// Matches inputs for which the predicate returns true.
    pub fn match_fn(mut self, predicate: impl Fn(&Input) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Some(Matcher::Func(Arc::new(predicate)));
        self
    }

    /// Sets the example invocation shown in help listings.
    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.example = example.into();
        self
    }

    /// Sets a plain execution body.
    pub fn func<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Response>, ExecutionError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.builder = Some((
            false,
            Arc::new(
                move |id: &str, matcher: &Matcher, example: &str, _source: Option<&ConfigSource>| {
                    let f = f.clone();
                    let func: Arc<CommandFn> = Arc::new(move |input| {
                        let f = f.clone();
                        Box::pin(async move { (*f)(input).await })
                    });
                    Ok(Arc::new(FnCommand {
                        identifier: id.to_owned(),
                        example: example.to_owned(),
                        matcher: matcher.clone(),
                        func,
                    }) as Arc<dyn Command>)
                },
            ),
        ));
        self
    }

    /// Sets an execution body that receives a config value decoded from the
    /// command's config file. `prototype` is used as-is when no file exists.
    pub fn configurable_fn<C, F, Fut>(mut self, prototype: C, f: F) -> Self
    where
        C: DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(Input, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Response>, ExecutionError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.builder = Some((
            true,
            Arc::new(
                move |id: &str, matcher: &Matcher, example: &str, source: Option<&ConfigSource>| {
                    let config: Arc<C> = match source {
                        Some(src) => {
                            Arc::new(src.populate::<C>().map_err(|e| BuildError::Config {
                                identifier: id.to_owned(),
                                reason: e.to_string(),
                            })?)
                        }
                        None => Arc::new(prototype.clone()),
                    };
                    let f = f.clone();
                    let func: Arc<CommandFn> = Arc::new(move |input| {
                        let f = f.clone();
                        let config = config.clone();
                        Box::pin(async move { (*f)(input, config).await })
                    });
                    Ok(Arc::new(FnCommand {
                        identifier: id.to_owned(),
                        example: example.to_owned(),
                        matcher: matcher.clone(),
                        func,
                    }) as Arc<dyn Command>)
                },
            ),
        ));
        self
    }

    /// Finalises the props. Identifier, matcher, and function are required.
    pub fn build(self) -> Result<CommandProps, BuildError> {
        let (matcher, (configurable, builder)) = match (self.matcher, self.builder) {
            (Some(matcher), Some(builder)) if !self.identifier.is_empty() => (matcher, builder),
            _ => {
                return Err(BuildError::CommandInsufficient {
                    identifier: self.identifier,
                })
            }
        };
        Ok(CommandProps {
            bot_type: self.bot_type,
            identifier: self.identifier,
            matcher,
            example: self.example,
            configurable,
            builder,
        })
    }
}

/// Ordered, per-bot command registry.
///
/// Insertion order is significant and stable: dispatch scans it linearly and
/// rebuilds replace entries in place.
pub struct Commands {
    slots: RwLock<Vec<Arc<dyn Command>>>,
}

impl Commands {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Appends a command. When a command with the same identifier already
    /// exists it is replaced in place, keeping its slot index.
    pub async fn append(&self, command: Arc<dyn Command>) {
        let mut slots = self.slots.write().await;
        match slots
            .iter_mut()
            .find(|c| c.identifier() == command.identifier())
        {
            Some(slot) => {
                debug!(identifier = command.identifier(), "replacing command");
                *slot = command;
            }
            None => slots.push(command),
        }
    }

    /// Returns the first command whose predicate matches the input.
    pub async fn find_first_matched(&self, input: &Input) -> Option<Arc<dyn Command>> {
        self.slots
            .read()
            .await
            .iter()
            .find(|c| c.matches(input))
            .cloned()
    }

    /// Executes the first matching command. No match yields `Ok(None)`.
    pub async fn execute_first_matched(
        &self,
        input: Input,
    ) -> Result<Option<Response>, ExecutionError> {
        match self.find_first_matched(&input).await {
            Some(command) => command.execute(input).await,
            None => Ok(None),
        }
    }

    /// Help entries for every registered command, in registry order.
    pub async fn helps(&self) -> Vec<CommandHelp> {
        self.slots.read().await.iter().map(|c| c.help()).collect()
    }

    /// Number of registered commands.
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    /// True when no command is registered.
    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// Identifier of the command occupying each slot, in order.
    pub async fn identifiers(&self) -> Vec<String> {
        self.slots
            .read()
            .await
            .iter()
            .map(|c| c.identifier().to_owned())
            .collect()
    }
}

impl Default for Commands {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use crate::watcher::ConfigFormat;

    use super::*;

    fn echo_props(bot: &'static str, id: &str) -> CommandProps {
        CommandProps::builder(bot, id.to_owned())
            .match_pattern(Regex::new(r"^\.echo ").unwrap())
            .example(".echo foo")
            .func(|input: Input| async move {
                let text = input.message.trim_start_matches(".echo ").to_owned();
                Ok(Some(Response::text(text)))
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn first_match_wins_in_insertion_order() {
        let commands = Commands::new();
        let wide = CommandProps::builder("demo", "wide")
            .match_fn(|_| true)
            .func(|_| async { Ok(Some(Response::text("wide"))) })
            .build()
            .unwrap();
        commands.append(echo_props("demo", "echo").build(None).unwrap()).await;
        commands.append(wide.build(None).unwrap()).await;

        let input = Input::new("u1", ".echo hi", "room");
        let matched = commands.find_first_matched(&input).await.unwrap();
        assert_eq!(matched.identifier(), "echo");

        let response = commands
            .execute_first_matched(input)
            .await
            .unwrap()
            .unwrap();
        match response.content {
            OutputContent::Text(text) => assert_eq!(text, "hi"),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_match_is_no_response_no_error() {
        let commands = Commands::new();
        commands.append(echo_props("demo", "echo").build(None).unwrap()).await;

        let input = Input::new("u1", "unrelated", "room");
        let response = commands.execute_first_matched(input).await.unwrap();
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn append_replaces_same_identifier_in_place() {
        let commands = Commands::new();
        commands.append(echo_props("demo", "a").build(None).unwrap()).await;
        commands.append(echo_props("demo", "b").build(None).unwrap()).await;
        commands.append(echo_props("demo", "c").build(None).unwrap()).await;

        let replacement = CommandProps::builder("demo", "b")
            .match_fn(|_| false)
            .func(|_| async { Ok(None) })
            .build()
            .unwrap();
        commands.append(replacement.build(None).unwrap()).await;

        assert_eq!(commands.identifiers().await, vec!["a", "b", "c"]);
    }

    #[test]
    fn builder_requires_matcher_and_func() {
        let err = CommandProps::builder("demo", "x").build().unwrap_err();
        assert!(matches!(err, BuildError::CommandInsufficient { .. }));

        let err = CommandProps::builder("demo", "x")
            .match_fn(|_| true)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::CommandInsufficient { .. }));

        let err = CommandProps::builder("demo", "")
            .match_fn(|_| true)
            .func(|_| async { Ok(None) })
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::CommandInsufficient { .. }));
    }

    #[derive(Clone, Debug, Deserialize)]
    struct GreetConfig {
        greeting: String,
    }

    #[tokio::test]
    async fn configurable_command_reads_source_and_falls_back_to_prototype() {
        let props = CommandProps::builder("demo", "greet")
            .match_pattern(Regex::new(r"^\.greet").unwrap())
            .configurable_fn(
                GreetConfig {
                    greeting: "hello".into(),
                },
                |_input, cfg: Arc<GreetConfig>| async move {
                    Ok(Some(Response::text(cfg.greeting.clone())))
                },
            )
            .build()
            .unwrap();
        assert!(props.requires_config());

        // Prototype when no file exists.
        let command = props.build(None).unwrap();
        let response = command
            .execute(Input::new("u1", ".greet", "room"))
            .await
            .unwrap()
            .unwrap();
        match response.content {
            OutputContent::Text(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected content: {other:?}"),
        }

        // Decoded config when a source is present.
        let source = ConfigSource {
            format: ConfigFormat::Yaml,
            bytes: b"greeting: hei".to_vec(),
        };
        let command = props.build(Some(&source)).unwrap();
        let response = command
            .execute(Input::new("u1", ".greet", "room"))
            .await
            .unwrap()
            .unwrap();
        match response.content {
            OutputContent::Text(text) => assert_eq!(text, "hei"),
            other => panic!("unexpected content: {other:?}"),
        }

        // Present but undecodable source is a hard error.
        let broken = ConfigSource {
            format: ConfigFormat::Yaml,
            bytes: b"greeting: [unclosed".to_vec(),
        };
        assert!(matches!(
            props.build(Some(&broken)).unwrap_err(),
            BuildError::Config { .. }
        ));
    }
}
