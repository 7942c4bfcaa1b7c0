//! # The bot wrapper: adapter + command registry + conversation state.
//!
//! [`SupervisedBot`] is what the runtime actually drives. It owns an
//! [`Adapter`], an ordered [`Commands`] registry, and a [`ContextStorage`],
//! and implements the dispatch semantics for one inbound input:
//!
//! 1. An abort input drops the sender's stored continuation.
//! 2. A help input answers with the registered command listing.
//! 3. A stored continuation is consumed (cleared before invocation) and run.
//! 4. Otherwise the first matching command executes.
//! 5. Any response is wrapped to the input's `reply_to` and sent through the
//!    adapter; a response carrying a new continuation stores it first.
//!
//! The [`Bot`] trait is the seam: custom implementations may replace the
//! whole wrapper while still being supervised.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{Adapter, ErrorSink, InputSink};
use crate::command::{Command, Commands, Response};
use crate::context::ContextStorage;
use crate::error::ExecutionError;
use crate::message::{BotType, Input, InputKind, Output, OutputContent};

/// A supervised chat bot.
#[async_trait]
pub trait Bot: Send + Sync {
    /// The bot's type tag, unique within a runner.
    fn bot_type(&self) -> BotType;

    /// Dispatches one inbound input. Command errors are returned for the
    /// caller to log; they must never tear the bot down.
    async fn respond(&self, input: Input) -> Result<(), ExecutionError>;

    /// Delivers an outbound message through the underlying adapter.
    async fn send_message(&self, output: Output);

    /// Registers a command, replacing any previous one with the same
    /// identifier in place.
    async fn append_command(&self, command: Arc<dyn Command>);

    /// Runs the underlying adapter for its whole lifetime.
    async fn run(&self, token: CancellationToken, inputs: InputSink, errors: ErrorSink);
}

/// Default [`Bot`]: an adapter composed with a command registry and a
/// per-sender context storage.
pub struct SupervisedBot {
    adapter: Arc<dyn Adapter>,
    commands: Commands,
    contexts: Arc<dyn ContextStorage>,
}

impl SupervisedBot {
    /// Composes an adapter with the given context storage.
    pub fn new(adapter: Arc<dyn Adapter>, contexts: Arc<dyn ContextStorage>) -> Self {
        Self {
            adapter,
            commands: Commands::new(),
            contexts,
        }
    }

    /// The bot's command registry.
    pub fn commands(&self) -> &Commands {
        &self.commands
    }

    async fn deliver(&self, input: &Input, response: Option<Response>) {
        let Some(response) = response else { return };
        if let Some(next) = response.next {
            self.contexts.set(&input.sender_key, next, None).await;
        }
        self.adapter
            .send_message(Output::new(input.reply_to.clone(), response.content))
            .await;
    }
}

#[async_trait]
impl Bot for SupervisedBot {
    fn bot_type(&self) -> BotType {
        self.adapter.bot_type()
    }

    async fn respond(&self, input: Input) -> Result<(), ExecutionError> {
        match input.kind {
            InputKind::Abort => {
                debug!(sender = %input.sender_key, "aborting stored conversation");
                self.contexts.delete(&input.sender_key).await;
                Ok(())
            }
            InputKind::Help => {
                let helps = self.commands.helps().await;
                self.adapter
                    .send_message(Output::new(
                        input.reply_to.clone(),
                        OutputContent::Help(helps),
                    ))
                    .await;
                Ok(())
            }
            InputKind::Message => {
                if let Some(context) = self.contexts.get(&input.sender_key).await {
                    // Consume the slot before invocation so a concurrent
                    // input from the same sender never sees it too.
                    self.contexts.delete(&input.sender_key).await;
                    let response = context.invoke(input.clone()).await?;
                    self.deliver(&input, response).await;
                    return Ok(());
                }

                let response = self.commands.execute_first_matched(input.clone()).await?;
                self.deliver(&input, response).await;
                Ok(())
            }
        }
    }

    async fn send_message(&self, output: Output) {
        self.adapter.send_message(output).await;
    }

    async fn append_command(&self, command: Arc<dyn Command>) {
        self.commands.append(command).await;
    }

    async fn run(&self, token: CancellationToken, inputs: InputSink, errors: ErrorSink) {
        self.adapter.run(token, inputs, errors).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use regex::Regex;

    use crate::command::CommandProps;
    use crate::context::{CacheStorage, UserContext};
    use crate::message::Destination;

    use super::*;

    /// Adapter stub that records outbound messages.
    struct RecordingAdapter {
        sent: Mutex<Vec<Output>>,
    }

    impl RecordingAdapter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<Output> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Adapter for RecordingAdapter {
        fn bot_type(&self) -> BotType {
            BotType::from("recording")
        }

        async fn run(&self, token: CancellationToken, _inputs: InputSink, _errors: ErrorSink) {
            token.cancelled().await;
        }

        async fn send_message(&self, output: Output) {
            self.sent.lock().unwrap().push(output);
        }
    }

    fn guess_bot(adapter: Arc<RecordingAdapter>) -> SupervisedBot {
        SupervisedBot::new(adapter, Arc::new(CacheStorage::default()))
    }

    fn guess_props() -> CommandProps {
        CommandProps::builder("recording", "guess")
            .match_pattern(Regex::new(r"^\.guess").unwrap())
            .example(".guess")
            .func(|_input| async {
                Ok(Some(Response::text("Guess a number!").with_next(
                    UserContext::new(move |input: Input| async move {
                        match input.message.trim().parse::<u32>() {
                            Ok(7) => Ok(Some(Response::text("Correct!"))),
                            Ok(n) if n < 7 => Ok(Some(
                                Response::text("Bigger!").with_next(UserContext::new(
                                    |input: Input| async move {
                                        if input.message.trim() == "7" {
                                            Ok(Some(Response::text("Correct!")))
                                        } else {
                                            Ok(Some(Response::text("Nope.")))
                                        }
                                    },
                                )),
                            )),
                            _ => Ok(Some(Response::text("Smaller!"))),
                        }
                    }),
                )))
            })
            .build()
            .unwrap()
    }

    fn text_of(output: &Output) -> &str {
        match &output.content {
            OutputContent::Text(text) => text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let adapter = RecordingAdapter::new();
        let bot = guess_bot(adapter.clone());
        let echo = CommandProps::builder("recording", "echo")
            .match_pattern(Regex::new(r"^\.echo ").unwrap())
            .example(".echo foo")
            .func(|input: Input| async move {
                Ok(Some(Response::text(
                    input.message.trim_start_matches(".echo ").to_owned(),
                )))
            })
            .build()
            .unwrap();
        bot.append_command(echo.build(None).unwrap()).await;

        bot.respond(Input::new("u1", ".echo hi", "room"))
            .await
            .unwrap();

        let sent = adapter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(text_of(&sent[0]), "hi");
        assert_eq!(sent[0].destination, Destination::new("room"));
    }

    #[tokio::test]
    async fn continuation_runs_on_next_input_and_clears_on_success() {
        let adapter = RecordingAdapter::new();
        let bot = guess_bot(adapter.clone());
        bot.append_command(guess_props().build(None).unwrap()).await;

        bot.respond(Input::new("u1", ".guess", "room")).await.unwrap();
        bot.respond(Input::new("u1", "3", "room")).await.unwrap();
        bot.respond(Input::new("u1", "7", "room")).await.unwrap();
        // Continuation is gone: a bare number matches nothing.
        bot.respond(Input::new("u1", "7", "room")).await.unwrap();

        let sent = adapter.sent();
        let texts: Vec<&str> = sent.iter().map(text_of).collect();
        assert_eq!(texts, vec!["Guess a number!", "Bigger!", "Correct!"]);
    }

    #[tokio::test]
    async fn abort_clears_the_stored_continuation() {
        let adapter = RecordingAdapter::new();
        let bot = guess_bot(adapter.clone());
        bot.append_command(guess_props().build(None).unwrap()).await;

        bot.respond(Input::new("u1", ".guess", "room")).await.unwrap();
        bot.respond(
            Input::new("u1", ".abort", "room").classify(".help", ".abort"),
        )
        .await
        .unwrap();
        // The would-be answer falls through to command matching and misses.
        bot.respond(Input::new("u1", "7", "room")).await.unwrap();

        let sent = adapter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(text_of(&sent[0]), "Guess a number!");
    }

    #[tokio::test]
    async fn help_lists_commands_and_keeps_the_continuation() {
        let adapter = RecordingAdapter::new();
        let bot = guess_bot(adapter.clone());
        bot.append_command(guess_props().build(None).unwrap()).await;

        bot.respond(Input::new("u1", ".guess", "room")).await.unwrap();
        bot.respond(Input::new("u1", ".help", "room").classify(".help", ".abort"))
            .await
            .unwrap();
        // Continuation survived the help request.
        bot.respond(Input::new("u1", "7", "room")).await.unwrap();

        let sent = adapter.sent();
        assert_eq!(sent.len(), 3);
        match &sent[1].content {
            OutputContent::Help(helps) => {
                assert_eq!(helps.len(), 1);
                assert_eq!(helps[0].identifier, "guess");
            }
            other => panic!("expected help, got {other:?}"),
        }
        assert_eq!(text_of(&sent[2]), "Correct!");
    }

    #[tokio::test]
    async fn senders_do_not_share_continuations() {
        let adapter = RecordingAdapter::new();
        let bot = guess_bot(adapter.clone());
        bot.append_command(guess_props().build(None).unwrap()).await;

        bot.respond(Input::new("u1", ".guess", "room")).await.unwrap();
        // A different sender's number matches nothing.
        bot.respond(Input::new("u2", "7", "room")).await.unwrap();

        let sent = adapter.sent();
        assert_eq!(sent.len(), 1);
    }
}
