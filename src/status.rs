//! Liveness snapshot of the runtime and its bots.
//!
//! The supervisor keeps one atomic running flag per bot plus a bounded
//! history of worker queue-depth reports. [`Status`] is the snapshot handed
//! to callers; flags are read lock-free, only the report ring sits behind a
//! mutex held for the copy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::message::BotType;
use crate::worker::WorkerReport;

/// How many worker reports the history keeps.
const REPORT_HISTORY_DEPTH: usize = 32;

/// Liveness of one bot.
#[derive(Clone, Debug)]
pub struct BotStatus {
    /// The bot's type tag.
    pub bot_type: BotType,
    /// True while the bot's adapter is being driven.
    pub running: bool,
}

/// Snapshot of the whole runtime.
#[derive(Clone, Debug)]
pub struct Status {
    /// True between startup and shutdown of the supervisor.
    pub running: bool,
    /// Per-bot liveness, sorted by type tag.
    pub bots: Vec<BotStatus>,
    /// Recent worker queue-depth reports, oldest first.
    pub worker_reports: Vec<WorkerReport>,
}

/// Internal tracker the supervisor feeds.
pub(crate) struct StatusTracker {
    running: AtomicBool,
    bots: DashMap<String, Arc<AtomicBool>>,
    reports: Mutex<VecDeque<WorkerReport>>,
}

impl StatusTracker {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            bots: DashMap::new(),
            reports: Mutex::new(VecDeque::with_capacity(REPORT_HISTORY_DEPTH)),
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Registers a bot and returns its running flag.
    pub(crate) fn register_bot(&self, bot_type: BotType) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        self.bots
            .insert(bot_type.as_str().to_owned(), flag.clone());
        flag
    }

    fn push_report(&self, report: WorkerReport) {
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        if reports.len() == REPORT_HISTORY_DEPTH {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    /// Consumes the pool's report stream into the bounded history.
    pub(crate) fn spawn_report_listener(
        self: &Arc<Self>,
        mut reports: broadcast::Receiver<WorkerReport>,
        token: CancellationToken,
    ) {
        let tracker = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    report = reports.recv() => match report {
                        Ok(report) => tracker.push_report(report),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    pub(crate) fn snapshot(&self) -> Status {
        let mut bots: Vec<BotStatus> = self
            .bots
            .iter()
            .map(|entry| BotStatus {
                bot_type: BotType::from(entry.key().clone()),
                running: entry.value().load(Ordering::SeqCst),
            })
            .collect();
        bots.sort_unstable_by(|a, b| a.bot_type.as_str().cmp(b.bot_type.as_str()));

        let worker_reports = self
            .reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        Status {
            running: self.running.load(Ordering::SeqCst),
            bots,
            worker_reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    #[test]
    fn snapshot_reflects_flags() {
        let tracker = StatusTracker::new();
        let flag = tracker.register_bot(BotType::from("demo"));
        tracker.set_running(true);
        flag.store(true, Ordering::SeqCst);

        let status = tracker.snapshot();
        assert!(status.running);
        assert_eq!(status.bots.len(), 1);
        assert!(status.bots[0].running);

        flag.store(false, Ordering::SeqCst);
        assert!(!tracker.snapshot().bots[0].running);
    }

    #[test]
    fn bots_are_listed_sorted_by_type() {
        let tracker = StatusTracker::new();
        tracker.register_bot(BotType::from("gitter"));
        tracker.register_bot(BotType::from("slack"));
        tracker.register_bot(BotType::from("irc"));

        let tags: Vec<String> = tracker
            .snapshot()
            .bots
            .iter()
            .map(|b| b.bot_type.as_str().to_owned())
            .collect();
        assert_eq!(tags, vec!["gitter", "irc", "slack"]);
    }

    #[test]
    fn report_history_is_bounded() {
        let tracker = StatusTracker::new();
        for n in 0..(REPORT_HISTORY_DEPTH + 10) {
            tracker.push_report(WorkerReport {
                reported_at: SystemTime::now(),
                queue_size: n,
            });
        }
        let status = tracker.snapshot();
        assert_eq!(status.worker_reports.len(), REPORT_HISTORY_DEPTH);
        // Oldest entries were dropped.
        assert_eq!(status.worker_reports[0].queue_size, 10);
    }
}
