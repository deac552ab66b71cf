//! In-process dispatch of cron and one-shot firings.
//!
//! Each admitted job on this node gets a timer task that sleeps until the
//! next firing instant and invokes the firing handler. Entries are keyed
//! by `(job_id, schedule, window, length)`; re-registering an unchanged
//! job is a no-op, a changed schedule cancels and respawns the timer, and
//! pruning cancels timers for jobs that disappeared from the admitted set.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use leoscope_proto::{Job, JobId, Schedule};
use leoscope_schedule::CronExpr;

/// Invoked at each firing instant with the job and the instant.
pub type FiringHandler = Arc<dyn Fn(Job, DateTime<Utc>) + Send + Sync>;

/// The local timer table.
#[derive(Default)]
pub struct LocalDispatcher {
    entries: DashMap<JobId, DispatchEntry>,
}

struct DispatchEntry {
    key: String,
    cancel: CancellationToken,
}

impl Drop for DispatchEntry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl LocalDispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a job's timer.
    pub fn upsert(&self, job: &Job, handler: FiringHandler) {
        let key = schedule_key(job);

        if let Some(existing) = self.entries.get(&job.id) {
            if existing.key == key {
                return;
            }
        }

        debug!(job = %job.id, key = %key, "registering dispatch timer");
        let cancel = CancellationToken::new();
        spawn_timer(job.clone(), cancel.clone(), handler);
        // Dropping a replaced entry cancels its timer.
        self.entries.insert(job.id.clone(), DispatchEntry { key, cancel });
    }

    /// Cancel timers for jobs no longer in the admitted set.
    pub fn prune(&self, live: &HashSet<JobId>) {
        self.entries.retain(|job_id, _| {
            let keep = live.contains(job_id);
            if !keep {
                debug!(job = %job_id, "pruning dispatch timer");
            }
            keep
        });
    }

    /// Number of registered timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn schedule_key(job: &Job) -> String {
    match &job.schedule {
        Schedule::Cron { expr } => format!(
            "cron:{expr}:{}:{}:{}",
            job.window.start, job.window.end, job.length_secs
        ),
        Schedule::Atq => format!(
            "atq:{}:{}:{}",
            job.window.start, job.window.end, job.length_secs
        ),
    }
}

fn spawn_timer(job: Job, cancel: CancellationToken, handler: FiringHandler) {
    tokio::spawn(async move {
        match job.schedule.clone() {
            Schedule::Atq => {
                let at = job.window.start;
                if at < Utc::now() {
                    // Missed one-shots are rescheduled by the poll loop,
                    // never fired late.
                    return;
                }
                if sleep_until(at, &cancel).await {
                    handler(job, at);
                }
            }
            Schedule::Cron { expr } => {
                let cron = match CronExpr::parse(&expr) {
                    Ok(cron) => cron,
                    Err(err) => {
                        warn!(job = %job.id, error = %err, "admitted job has unparseable cron");
                        return;
                    }
                };
                let length = ChronoDuration::seconds(i64::from(job.length_secs));
                let mut from = job.window.start.max(Utc::now());
                loop {
                    let Some(next) = cron.first_at_or_after(from) else {
                        return;
                    };
                    if next + length > job.window.end {
                        return;
                    }
                    if !sleep_until(next, &cancel).await {
                        return;
                    }
                    handler(job.clone(), next);
                    from = next + ChronoDuration::seconds(1);
                }
            }
        }
    });
}

/// Sleep until the given instant; returns false when cancelled first.
async fn sleep_until(at: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let wait = (at - Utc::now()).to_std().unwrap_or_default();
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(wait) => true,
    }
}
