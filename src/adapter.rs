//! The adapter contract: the seam between the runtime and a chat platform.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BlockedInput, BotError};
use crate::message::{BotType, Input, Output};

/// Hands an inbound event to the runtime. Returns [`BlockedInput`] when the
/// workers are saturated; the adapter decides whether to drop, buffer, or
/// retry.
pub type InputSink = Arc<dyn Fn(Input) -> Result<(), BlockedInput> + Send + Sync>;

/// Escalates a fatal adapter failure to the supervisor.
pub type ErrorSink = Arc<dyn Fn(BotError) + Send + Sync>;

/// A chat-platform driver.
///
/// Implementations own their I/O loop entirely: connection management,
/// transient-failure retries (see [`retry`](crate::retry)), payload parsing.
/// Only a [`BotError::NonContinuable`] crosses the boundary, at which point
/// the supervisor tears the owning bot down.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The adapter family's type tag.
    fn bot_type(&self) -> BotType;

    /// Drives the platform connection for its whole lifetime.
    ///
    /// Inbound events go through `inputs`; unrecoverable failures through
    /// `errors`. Implementations must observe `token` and return promptly on
    /// cancellation.
    async fn run(&self, token: CancellationToken, inputs: InputSink, errors: ErrorSink);

    /// Delivers an outbound message, fire-and-forget. Must not block on
    /// backpressure beyond a small internal bound; delivery failures are the
    /// adapter's to log.
    async fn send_message(&self, output: Output);
}
