//! # Per-sender conversation state.
//!
//! A command may answer with a [`Response`] carrying a [`UserContext`]: a
//! continuation to run against the *next* input from the same sender. This
//! module defines the continuation handle, the [`ContextStorage`] seam it is
//! kept behind, and the default in-process [`CacheStorage`] (TTL + size cap,
//! LRU eviction).
//!
//! Lifecycle of a stored context:
//! - created when a dispatched response carries a continuation,
//! - consumed (and cleared) on the next input from the same sender,
//! - evicted on TTL expiry, cache pressure, or an explicit abort input.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::command::Response;
use crate::error::ExecutionError;
use crate::message::Input;

/// Boxed continuation signature: next input in, optional response out.
pub type ContinuationFn =
    dyn Fn(Input) -> BoxFuture<'static, Result<Option<Response>, ExecutionError>> + Send + Sync;

/// A next-turn continuation keyed by sender.
#[derive(Clone)]
pub struct UserContext {
    next: Arc<ContinuationFn>,
}

impl UserContext {
    /// Wraps an async closure as the sender's next-turn continuation.
    pub fn new<F, Fut>(next: F) -> Self
    where
        F: Fn(Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Response>, ExecutionError>> + Send + 'static,
    {
        Self {
            next: Arc::new(move |input| Box::pin(next(input))),
        }
    }

    /// Runs the continuation against the given input.
    pub async fn invoke(&self, input: Input) -> Result<Option<Response>, ExecutionError> {
        (self.next)(input).await
    }
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserContext").finish_non_exhaustive()
    }
}

/// Storage seam for per-sender continuations.
///
/// Implementations are internally synchronised; callers never wrap them in
/// their own locks. The default is [`CacheStorage`]; external key-value
/// backends can be plugged in per bot.
#[async_trait]
pub trait ContextStorage: Send + Sync {
    /// Returns the sender's stored continuation, if any.
    async fn get(&self, sender_key: &str) -> Option<UserContext>;

    /// Stores a continuation for the sender, replacing any previous one.
    /// `ttl` overrides the storage's default expiry when given.
    async fn set(&self, sender_key: &str, context: UserContext, ttl: Option<Duration>);

    /// Drops the sender's stored continuation.
    async fn delete(&self, sender_key: &str);

    /// Drops every stored continuation.
    async fn flush(&self);
}

struct CacheEntry {
    context: UserContext,
    expires_at: Instant,
    touched: u64,
}

/// Default in-process storage: TTL cache with a global size cap and LRU
/// eviction.
///
/// Expiry is lazy: an expired entry is dropped when it is next observed.
/// When the cap is reached, the least recently touched live entry makes room.
pub struct CacheStorage {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
    clock: AtomicU64,
}

impl CacheStorage {
    /// Creates a storage with the given default TTL and entry cap.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CacheStorage {
    /// 5 minute TTL, 1024 entries.
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 1024)
    }
}

#[async_trait]
impl ContextStorage for CacheStorage {
    async fn get(&self, sender_key: &str) -> Option<UserContext> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(sender_key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };
        if expired {
            entries.remove(sender_key);
            return None;
        }
        let touched = self.tick();
        let entry = entries.get_mut(sender_key)?;
        entry.touched = touched;
        Some(entry.context.clone())
    }

    async fn set(&self, sender_key: &str, context: UserContext, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);

        if !entries.contains_key(sender_key) && entries.len() >= self.capacity {
            let evict = entries
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(key, _)| key.clone());
            if let Some(key) = evict {
                entries.remove(&key);
            }
        }

        entries.insert(
            sender_key.to_owned(),
            CacheEntry {
                context,
                expires_at: now + ttl.unwrap_or(self.ttl),
                touched: self.tick(),
            },
        );
    }

    async fn delete(&self, sender_key: &str) {
        self.entries.lock().await.remove(sender_key);
    }

    async fn flush(&self) {
        self.entries.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_context() -> UserContext {
        UserContext::new(|_input| async { Ok(None) })
    }

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let storage = CacheStorage::default();
        assert!(storage.get("u1").await.is_none());

        storage.set("u1", noop_context(), None).await;
        assert!(storage.get("u1").await.is_some());

        storage.delete("u1").await;
        assert!(storage.get("u1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let storage = CacheStorage::new(Duration::from_millis(50), 8);
        storage.set("u1", noop_context(), None).await;
        storage
            .set("u2", noop_context(), Some(Duration::from_secs(60)))
            .await;

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(storage.get("u1").await.is_none());
        assert!(storage.get("u2").await.is_some());
    }

    #[tokio::test]
    async fn least_recently_touched_entry_is_evicted_at_cap() {
        let storage = CacheStorage::new(Duration::from_secs(60), 2);
        storage.set("u1", noop_context(), None).await;
        storage.set("u2", noop_context(), None).await;

        // Touch u1 so u2 becomes the eviction candidate.
        assert!(storage.get("u1").await.is_some());

        storage.set("u3", noop_context(), None).await;
        assert!(storage.get("u1").await.is_some());
        assert!(storage.get("u2").await.is_none());
        assert!(storage.get("u3").await.is_some());
    }

    #[tokio::test]
    async fn flush_clears_everything() {
        let storage = CacheStorage::default();
        storage.set("u1", noop_context(), None).await;
        storage.set("u2", noop_context(), None).await;
        storage.flush().await;
        assert!(storage.get("u1").await.is_none());
        assert!(storage.get("u2").await.is_none());
    }
}
