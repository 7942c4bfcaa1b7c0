//! # Cron engine driving scheduled-task firings.
//!
//! The engine is deliberately small: it keeps one entry per
//! `(bot type, task identifier)` under a single lock, and a timer loop that
//! sleeps until the earliest deadline, fires every due entry, and advances
//! it to its next occurrence. Registration changes wake the loop through a
//! [`Notify`] so a freshly added fast schedule never waits for an old, slow
//! deadline.
//!
//! ## Rules
//! - `update` replaces any entry under the same key; remove-then-insert
//!   happens atomically under the entry lock.
//! - Firing calls the registered job closure, which the supervisor wires to
//!   enqueue a worker job; the loop itself never executes task bodies.
//! - A firing that comes due while the loop is behind fires once and then
//!   advances past `now`: missed instants are skipped, never duplicated.
//! - An entry whose schedule has no future occurrence is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::message::BotType;
use crate::task::ScheduledTask;

/// Fired on every due instant; built by the supervisor to enqueue the task
/// execution onto the worker pool. Must not block.
pub type TaskJob = Arc<dyn Fn() + Send + Sync>;

/// Swappable scheduling engine.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Schedules `task` under `(bot_type, task.identifier())`, replacing any
    /// existing entry.
    async fn update(&self, bot_type: &BotType, task: Arc<ScheduledTask>, job: TaskJob);

    /// Drops the entry under `(bot_type, id)`, if any.
    async fn remove(&self, bot_type: &BotType, id: &str);

    /// Starts the timer loop; it runs until `token` is cancelled.
    fn start(&self, token: CancellationToken);
}

/// How long the loop sleeps when no entry is registered.
const IDLE_POLL: Duration = Duration::from_secs(60);

struct Entry {
    task: Arc<ScheduledTask>,
    next: DateTime<Utc>,
    job: TaskJob,
}

struct SchedulerCore {
    entries: Mutex<HashMap<(String, String), Entry>>,
    wake: Notify,
}

/// The bundled [`Scheduler`] implementation.
pub struct CronScheduler {
    tz: Tz,
    core: Arc<SchedulerCore>,
}

impl CronScheduler {
    /// Creates an engine interpreting cron expressions in `tz`.
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            core: Arc::new(SchedulerCore {
                entries: Mutex::new(HashMap::new()),
                wake: Notify::new(),
            }),
        }
    }

    fn key(bot_type: &BotType, id: &str) -> (String, String) {
        (bot_type.as_str().to_owned(), id.to_owned())
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    async fn update(&self, bot_type: &BotType, task: Arc<ScheduledTask>, job: TaskJob) {
        let key = Self::key(bot_type, task.identifier());
        let now = Utc::now();
        let next = task.schedule().next_after(now, self.tz);

        let mut entries = self.core.entries.lock().await;
        match next {
            Some(next) => {
                let replaced = entries
                    .insert(
                        key,
                        Entry {
                            task: task.clone(),
                            next,
                            job,
                        },
                    )
                    .is_some();
                info!(
                    bot_type = %bot_type,
                    task = task.identifier(),
                    schedule = task.expression(),
                    replaced,
                    "scheduled task registered"
                );
            }
            None => {
                // Replace semantics still hold: a rebuilt task whose new
                // schedule has already run out clears the old entry.
                entries.remove(&key);
                info!(
                    bot_type = %bot_type,
                    task = task.identifier(),
                    schedule = task.expression(),
                    "schedule has no future occurrence; task not registered"
                );
            }
        }
        drop(entries);
        self.core.wake.notify_one();
    }

    async fn remove(&self, bot_type: &BotType, id: &str) {
        let removed = self
            .core
            .entries
            .lock()
            .await
            .remove(&Self::key(bot_type, id))
            .is_some();
        if removed {
            info!(bot_type = %bot_type, task = id, "scheduled task removed");
            self.core.wake.notify_one();
        }
    }

    fn start(&self, token: CancellationToken) {
        let core = self.core.clone();
        let tz = self.tz;
        tokio::spawn(run_loop(core, tz, token));
    }
}

async fn run_loop(core: Arc<SchedulerCore>, tz: Tz, token: CancellationToken) {
    info!("scheduler started");
    loop {
        let now = Utc::now();
        let mut nearest: Option<DateTime<Utc>> = None;
        {
            let mut entries = core.entries.lock().await;
            let mut exhausted = Vec::new();
            for (key, entry) in entries.iter_mut() {
                if entry.next <= now {
                    debug!(bot_type = %key.0, task = %key.1, "firing scheduled task");
                    (entry.job)();
                    // Advance past `now`, not past `entry.next`: instants
                    // missed while the loop was behind are skipped.
                    match entry.task.schedule().next_after(now, tz) {
                        Some(next) => entry.next = next,
                        None => {
                            exhausted.push(key.clone());
                            continue;
                        }
                    }
                }
                nearest = Some(match nearest {
                    Some(n) => n.min(entry.next),
                    None => entry.next,
                });
            }
            for key in exhausted {
                info!(bot_type = %key.0, task = %key.1, "schedule exhausted; dropping task");
                entries.remove(&key);
            }
        }

        let sleep_for = match nearest {
            Some(next) => (next - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => IDLE_POLL,
        };
        tokio::select! {
            _ = token.cancelled() => break,
            _ = core.wake.notified() => {}
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
    info!("scheduler stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn every_task(id: &str, every: &str) -> Arc<ScheduledTask> {
        Arc::new(ScheduledTask::new(id.to_owned(), every, |_token| async { Ok(Vec::new()) }).unwrap())
    }

    fn counting_job(counter: Arc<AtomicUsize>) -> TaskJob {
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn wait_for(counter: &AtomicUsize, at_least: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < at_least {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expected firings did not arrive");
    }

    #[tokio::test]
    async fn interval_task_keeps_firing() {
        let scheduler = CronScheduler::new(chrono_tz::UTC);
        let token = CancellationToken::new();
        scheduler.start(token.clone());

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .update(
                &BotType::from("demo"),
                every_task("tick", "@every 10ms"),
                counting_job(counter.clone()),
            )
            .await;

        wait_for(&counter, 5).await;
        token.cancel();
    }

    #[tokio::test]
    async fn remove_stops_firing() {
        let scheduler = CronScheduler::new(chrono_tz::UTC);
        let token = CancellationToken::new();
        scheduler.start(token.clone());

        let counter = Arc::new(AtomicUsize::new(0));
        let bot = BotType::from("demo");
        scheduler
            .update(
                &bot,
                every_task("tick", "@every 10ms"),
                counting_job(counter.clone()),
            )
            .await;
        wait_for(&counter, 2).await;

        scheduler.remove(&bot, "tick").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), settled);
        token.cancel();
    }

    #[tokio::test]
    async fn update_replaces_the_existing_entry() {
        let scheduler = CronScheduler::new(chrono_tz::UTC);
        let token = CancellationToken::new();
        scheduler.start(token.clone());

        let bot = BotType::from("demo");
        let old_counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .update(
                &bot,
                every_task("tick", "@every 10ms"),
                counting_job(old_counter.clone()),
            )
            .await;
        wait_for(&old_counter, 1).await;

        let new_counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .update(
                &bot,
                every_task("tick", "@every 10ms"),
                counting_job(new_counter.clone()),
            )
            .await;
        wait_for(&new_counter, 2).await;

        let old_settled = old_counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(old_counter.load(Ordering::SeqCst), old_settled);
        token.cancel();
    }

    #[tokio::test]
    async fn tasks_fire_independently() {
        let scheduler = CronScheduler::new(chrono_tz::UTC);
        let token = CancellationToken::new();
        scheduler.start(token.clone());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let bot = BotType::from("demo");
        scheduler
            .update(&bot, every_task("a", "@every 10ms"), counting_job(first.clone()))
            .await;
        scheduler
            .update(&bot, every_task("b", "@every 15ms"), counting_job(second.clone()))
            .await;

        wait_for(&first, 3).await;
        wait_for(&second, 3).await;
        token.cancel();
    }
}
