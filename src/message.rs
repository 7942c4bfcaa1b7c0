//! Core message types exchanged between adapters and the runtime: inbound
//! [`Input`]s, outbound [`Output`]s, and the identifiers that route them.

use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Short opaque tag identifying an adapter family ("slack", "gitter", ...).
///
/// Unique per registered bot; the supervisor rejects duplicates at build
/// time. Cheap to clone.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BotType(Cow<'static, str>);

impl BotType {
    /// Creates a new type tag.
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for BotType {
    fn from(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }
}

impl From<String> for BotType {
    fn from(tag: String) -> Self {
        Self(Cow::Owned(tag))
    }
}

/// Opaque destination handle the owning adapter understands: a channel id, a
/// room id, a user id. The runtime only carries it around.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    /// Creates a destination from any string-ish handle.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Returns the handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(handle: &str) -> Self {
        Self(handle.to_owned())
    }
}

impl From<String> for Destination {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

/// Classification of an inbound event.
///
/// `Help` and `Abort` are synthesized by the supervisor when the message text
/// equals the configured help/abort word; adapters always produce `Message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// An ordinary chat message.
    Message,
    /// A request to list registered commands.
    Help,
    /// A request to drop the sender's stored conversation context.
    Abort,
}

/// An inbound event emitted by an adapter.
#[derive(Clone, Debug)]
pub struct Input {
    /// Classification; see [`InputKind`].
    pub kind: InputKind,
    /// Stable key identifying the sender within a channel/room.
    pub sender_key: String,
    /// Message text.
    pub message: String,
    /// When the platform says the message was sent.
    pub sent_at: SystemTime,
    /// Where a reply should go.
    pub reply_to: Destination,
}

impl Input {
    /// Creates an ordinary message input stamped with the current time.
    pub fn new(
        sender_key: impl Into<String>,
        message: impl Into<String>,
        reply_to: impl Into<Destination>,
    ) -> Self {
        Self {
            kind: InputKind::Message,
            sender_key: sender_key.into(),
            message: message.into(),
            sent_at: SystemTime::now(),
            reply_to: reply_to.into(),
        }
    }

    /// Overrides the sent timestamp.
    pub fn with_sent_at(mut self, sent_at: SystemTime) -> Self {
        self.sent_at = sent_at;
        self
    }

    /// Reclassifies this input as `Help`/`Abort` when its text equals the
    /// given words. Called by the supervisor before dispatch.
    pub fn classify(mut self, help_word: &str, abort_word: &str) -> Self {
        let text = self.message.trim();
        self.kind = if !help_word.is_empty() && text == help_word {
            InputKind::Help
        } else if !abort_word.is_empty() && text == abort_word {
            InputKind::Abort
        } else {
            InputKind::Message
        };
        self
    }
}

/// Help entry describing one registered command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandHelp {
    /// The command identifier.
    pub identifier: String,
    /// Example invocation text.
    pub example: String,
}

/// Payload of an outbound message.
#[derive(Clone, Debug)]
pub enum OutputContent {
    /// Plain text.
    Text(String),
    /// A richer platform-specific payload; the adapter knows its shape.
    Rich(serde_json::Value),
    /// A listing of registered commands.
    Help(Vec<CommandHelp>),
}

/// An outbound message handed to an adapter.
#[derive(Clone, Debug)]
pub struct Output {
    /// Where the message goes.
    pub destination: Destination,
    /// What it carries.
    pub content: OutputContent,
}

impl Output {
    /// Creates an output with an arbitrary content variant.
    pub fn new(destination: impl Into<Destination>, content: OutputContent) -> Self {
        Self {
            destination: destination.into(),
            content,
        }
    }

    /// Creates a plain-text output.
    pub fn text(destination: impl Into<Destination>, text: impl Into<String>) -> Self {
        Self::new(destination, OutputContent::Text(text.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_marks_help_and_abort() {
        let help = Input::new("u1", ".help", "room").classify(".help", ".abort");
        assert_eq!(help.kind, InputKind::Help);

        let abort = Input::new("u1", " .abort ", "room").classify(".help", ".abort");
        assert_eq!(abort.kind, InputKind::Abort);

        let plain = Input::new("u1", ".echo hi", "room").classify(".help", ".abort");
        assert_eq!(plain.kind, InputKind::Message);
    }

    #[test]
    fn classify_ignores_empty_words() {
        let input = Input::new("u1", "", "room").classify("", "");
        assert_eq!(input.kind, InputKind::Message);
    }

    #[test]
    fn destination_is_transparent_in_configs() {
        let dest: Destination = serde_yaml::from_str("\"#general\"").unwrap();
        assert_eq!(dest.as_str(), "#general");
    }
}
