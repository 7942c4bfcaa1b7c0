//! Fan-out of fatal bot failures to registered alerters.
//!
//! An [`Alerter`] pushes a notification somewhere useful: a chat room, an
//! incident service, a pager. [`AlerterSet`] invokes every alerter in
//! parallel with a per-call timeout; an alerter that fails, hangs, or panics
//! is logged and never affects the others or the supervisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::error::BotError;
use crate::message::BotType;

const ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives fatal bot failures.
#[async_trait]
pub trait Alerter: Send + Sync {
    /// Name used in logs when this alerter misbehaves.
    fn name(&self) -> &str {
        "alerter"
    }

    /// Pushes a notification about a bot that stopped fatally.
    async fn alert(&self, bot_type: &BotType, error: &BotError);
}

/// Parallel fan-out over every registered alerter.
pub struct AlerterSet {
    alerters: Vec<Arc<dyn Alerter>>,
    timeout: Duration,
}

impl AlerterSet {
    /// Wraps the given alerters with the default per-call timeout.
    pub fn new(alerters: Vec<Arc<dyn Alerter>>) -> Self {
        Self {
            alerters,
            timeout: ALERT_TIMEOUT,
        }
    }

    /// True when no alerter is registered.
    pub fn is_empty(&self) -> bool {
        self.alerters.is_empty()
    }

    /// Notifies every alerter in parallel and waits for all of them, each
    /// bounded by the per-call timeout.
    pub async fn alert_all(&self, bot_type: &BotType, error: &BotError) {
        let mut set = JoinSet::new();
        for alerter in &self.alerters {
            let alerter = alerter.clone();
            let bot_type = bot_type.clone();
            let error = error.clone();
            let timeout = self.timeout;
            set.spawn(async move {
                let call = std::panic::AssertUnwindSafe(alerter.alert(&bot_type, &error))
                    .catch_unwind();
                match tokio::time::timeout(timeout, call).await {
                    Err(_) => warn!(alerter = alerter.name(), "alert timed out"),
                    Ok(Err(_)) => error!(alerter = alerter.name(), "alerter panicked"),
                    Ok(Ok(())) => {}
                }
            });
        }
        while set.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Alerter for Counting {
        async fn alert(&self, _bot_type: &BotType, _error: &BotError) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicking;

    #[async_trait]
    impl Alerter for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn alert(&self, _bot_type: &BotType, _error: &BotError) {
            panic!("alerter bug");
        }
    }

    #[tokio::test]
    async fn every_alerter_is_called_exactly_once() {
        let first = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let second = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let set = AlerterSet::new(vec![first.clone(), second.clone()]);

        set.alert_all(
            &BotType::from("demo"),
            &BotError::non_continuable("gone"),
        )
        .await;

        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_panicking_alerter_does_not_stop_the_others() {
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let set = AlerterSet::new(vec![Arc::new(Panicking), counting.clone()]);

        set.alert_all(
            &BotType::from("demo"),
            &BotError::non_continuable("gone"),
        )
        .await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
