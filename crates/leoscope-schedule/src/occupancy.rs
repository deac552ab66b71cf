//! Occupancy enumeration and conflict detection.
//!
//! A job's occupancy set is the family of half-open intervals
//! `[t, t + length)` over its firing instants, clipped so every interval
//! fits inside the validity window. Conflict detection walks two firing
//! sequences in lockstep inside the intersection of the validity windows
//! and short-circuits on the first overlapping pair.

use chrono::{DateTime, Duration, Utc};

use leoscope_proto::{Job, JobId, Schedule, Window};

use crate::cron_expr::CronExpr;
use crate::error::{Result, ScheduleError};
use crate::trigger::TriggerExpr;

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl Interval {
    /// Create an interval.
    #[must_use]
    pub const fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True when the two half-open intervals share at least one instant.
    /// Touching boundaries do not overlap.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A detected occupancy collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// The admitted job the candidate collided with.
    pub job_id: JobId,
    /// The offending job's firing instant.
    pub instant: DateTime<Utc>,
}

/// Occupancy view of a single job, with the cron expression parsed once.
struct JobOccupancy {
    cron: Option<CronExpr>,
    window: Window,
    length: Duration,
}

impl JobOccupancy {
    fn new(job: &Job) -> Result<Self> {
        let cron = match &job.schedule {
            Schedule::Cron { expr } => Some(CronExpr::parse(expr)?),
            Schedule::Atq => None,
        };
        Ok(Self {
            cron,
            window: job.window,
            length: Duration::seconds(i64::from(job.length_secs)),
        })
    }

    /// Occupancy intervals that can intersect `span`, in firing order.
    ///
    /// A firing before `span.start` still occupies into the span when its
    /// interval extends past the boundary, so enumeration starts one
    /// occupancy length early.
    fn intervals_touching(&self, span: Window) -> Box<dyn Iterator<Item = Interval> + '_> {
        let length = self.length;
        let window_end = self.window.end;
        let from = self.window.start.max(span.start - length);

        match &self.cron {
            Some(cron) => Box::new(
                cron.firings_from(from)
                    .take_while(move |t| *t < span.end && *t + length <= window_end)
                    .map(move |t| Interval::new(t, t + length)),
            ),
            None => {
                let t = self.window.start;
                let fits = t + length <= window_end && t < span.end;
                Box::new(fits.then(|| Interval::new(t, t + length)).into_iter())
            }
        }
    }
}

/// Validate a job record for admission.
///
/// Checks the invariants that do not require looking at other jobs: a
/// positive length, an ordered validity window, a parseable cron
/// expression, a one-shot start that is not already in the past, and a
/// parseable trigger when one is present.
pub fn validate_job(job: &Job, now: DateTime<Utc>) -> Result<()> {
    if job.length_secs < 1 {
        return Err(ScheduleError::InvalidJob(
            "length_secs must be at least 1".to_owned(),
        ));
    }
    if job.window.start >= job.window.end {
        return Err(ScheduleError::InvalidJob(format!(
            "validity window is empty: {} >= {}",
            job.window.start, job.window.end
        )));
    }
    match &job.schedule {
        Schedule::Cron { expr } => {
            CronExpr::parse(expr)?;
        }
        Schedule::Atq => {
            if job.window.start < now {
                return Err(ScheduleError::InvalidJob(format!(
                    "one-shot start {} is in the past",
                    job.window.start
                )));
            }
            if job.window.start + Duration::seconds(i64::from(job.length_secs)) > job.window.end {
                return Err(ScheduleError::InvalidJob(
                    "one-shot occupancy does not fit inside the validity window".to_owned(),
                ));
            }
        }
    }
    if let Some(trigger) = &job.trigger {
        TriggerExpr::parse(trigger)?;
    }
    Ok(())
}

/// Find the first occupancy overlap between a candidate and an admitted job.
///
/// Returns `None` when the validity windows are disjoint or no pair of
/// intervals overlaps. Any overlap instant necessarily lies inside the
/// intersection of the two validity windows, so both firing sequences are
/// enumerated only there.
pub fn find_conflict(candidate: &Job, existing: &Job) -> Result<Option<Conflict>> {
    let Some(inter) = candidate.window.intersect(&existing.window) else {
        return Ok(None);
    };

    let cand = JobOccupancy::new(candidate)?;
    let exist = JobOccupancy::new(existing)?;

    let mut ci = cand.intervals_touching(inter);
    let mut ei = exist.intervals_touching(inter);
    let mut c = ci.next();
    let mut e = ei.next();

    while let (Some(a), Some(b)) = (c, e) {
        if a.overlaps(&b) {
            return Ok(Some(Conflict {
                job_id: existing.id.clone(),
                instant: b.start,
            }));
        }
        if a.end <= b.end {
            c = ci.next();
        } else {
            e = ei.next();
        }
    }
    Ok(None)
}

/// Search for the earliest instant `t >= after` at which a one-shot job's
/// occupancy `[t, t + length)` fits before its deadline without touching
/// any occupancy of the given admitted jobs.
///
/// `existing` should already be filtered to admitted overhead jobs sharing
/// a node with `job`, excluding `job` itself. Returns `None` when no slot
/// exists before the deadline.
pub fn find_nearest_slot(
    job: &Job,
    after: DateTime<Utc>,
    existing: &[Job],
) -> Result<Option<DateTime<Utc>>> {
    let length = Duration::seconds(i64::from(job.length_secs));
    let deadline = job.window.end;
    let mut t = after;

    if t + length > deadline {
        return Ok(None);
    }
    if !job.overhead {
        return Ok(Some(t));
    }

    let span = Window::new(t, deadline);
    let mut busy = Vec::new();
    for other in existing {
        let occ = JobOccupancy::new(other)?;
        busy.extend(occ.intervals_touching(span));
    }
    busy.sort_by_key(|iv| iv.start);

    for iv in &busy {
        if t + length <= iv.start {
            break;
        }
        if iv.end > t {
            t = iv.end;
        }
    }

    Ok((t + length <= deadline).then_some(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leoscope_proto::{JobParams, NodeId, UserId};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn params() -> JobParams {
        JobParams {
            mode: "network".to_owned(),
            deploy: String::new(),
            execute: "leotest/iperf:latest".to_owned(),
            finish: String::new(),
        }
    }

    fn cron_job(id: &str, expr: &str, start: DateTime<Utc>, end: DateTime<Utc>, len: u32) -> Job {
        Job {
            id: JobId::new(id),
            node_id: NodeId::new("n1"),
            owner_id: UserId::new("alice"),
            schedule: Schedule::Cron {
                expr: expr.to_owned(),
            },
            window: Window::new(start, end),
            length_secs: len,
            overhead: true,
            paired_server_node_id: None,
            trigger: None,
            config: String::new(),
            params: params(),
        }
    }

    fn atq_job(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, len: u32) -> Job {
        Job {
            id: JobId::new(id),
            node_id: NodeId::new("n1"),
            owner_id: UserId::new("alice"),
            schedule: Schedule::Atq,
            window: Window::new(start, end),
            length_secs: len,
            overhead: true,
            paired_server_node_id: None,
            trigger: None,
            config: String::new(),
            params: params(),
        }
    }

    #[test]
    fn half_open_intervals_touching_do_not_overlap() {
        let a = Interval::new(at(0, 0), at(0, 5));
        let b = Interval::new(at(0, 5), at(0, 10));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));

        let c = Interval::new(at(0, 4), at(0, 6));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn atq_overlapping_cron_firing_is_rejected() {
        // Cron every 10 minutes, 5-minute occupancy; one-shot at 00:12.
        let a = cron_job("A", "*/10 * * * *", at(0, 0), at(1, 0), 300);
        let b = atq_job("B", at(0, 12), at(0, 20), 300);

        let conflict = find_conflict(&b, &a).unwrap().unwrap();
        assert_eq!(conflict.job_id, JobId::new("A"));
        assert_eq!(conflict.instant, at(0, 10));
    }

    #[test]
    fn touching_occupancies_are_admitted() {
        // [00:10, 00:15) and [00:15, 00:16) are disjoint.
        let a = cron_job("A", "*/10 * * * *", at(0, 0), at(1, 0), 300);
        let b2 = atq_job("B2", at(0, 15), at(0, 30), 60);
        assert!(find_conflict(&b2, &a).unwrap().is_none());
    }

    #[test]
    fn disjoint_validity_windows_never_conflict() {
        let a = cron_job("A", "* * * * *", at(0, 0), at(0, 30), 60);
        let b = cron_job("B", "* * * * *", at(0, 30), at(1, 0), 60);
        assert!(find_conflict(&b, &a).unwrap().is_none());
    }

    #[test]
    fn firing_before_window_start_is_skipped() {
        // 00:00 matches the schedule but precedes the validity start.
        let a = cron_job("A", "*/10 * * * *", at(0, 5), at(1, 0), 300);
        let b = atq_job("B", at(0, 0), at(0, 6), 300);
        // B occupies [00:00, 00:05); A's first counted firing is 00:10.
        assert!(find_conflict(&b, &a).unwrap().is_none());
    }

    #[test]
    fn firing_whose_occupancy_exceeds_window_end_is_not_counted() {
        // The 00:50 firing would occupy until 01:00, past the 00:55 window
        // end, so it is dropped from the occupancy set.
        let a = cron_job("A", "*/10 * * * *", at(0, 0), at(0, 55), 600);
        let b = atq_job("B", at(0, 50), at(1, 0), 300);
        // A's firings: 00:00, 00:10, ..., 00:40 (00:50 would exceed the end).
        assert!(find_conflict(&b, &a).unwrap().is_none());
    }

    #[test]
    fn occupancy_spilling_into_window_intersection_is_caught() {
        // E fires at 00:00 with a 10-minute occupancy; C's validity only
        // begins at 00:05 but the occupancy extends into it.
        let e = atq_job("E", at(0, 0), at(0, 30), 600);
        let c = atq_job("C", at(0, 5), at(0, 30), 60);
        let conflict = find_conflict(&c, &e).unwrap().unwrap();
        assert_eq!(conflict.job_id, JobId::new("E"));
        assert_eq!(conflict.instant, at(0, 0));
    }

    #[test]
    fn two_cron_jobs_interleaved_without_overlap() {
        let a = cron_job("A", "0,20,40 * * * *", at(0, 0), at(2, 0), 600);
        let b = cron_job("B", "10,30,50 * * * *", at(0, 0), at(2, 0), 600);
        assert!(find_conflict(&b, &a).unwrap().is_none());
    }

    #[test]
    fn two_cron_jobs_with_distinct_periods_collide() {
        let a = cron_job("A", "*/10 * * * *", at(0, 0), at(2, 0), 60);
        let b = cron_job("B", "*/15 * * * *", at(0, 0), at(2, 0), 60);
        // First shared instant is 00:00; both fire there.
        let conflict = find_conflict(&b, &a).unwrap().unwrap();
        assert_eq!(conflict.instant, at(0, 0));
    }

    #[test]
    fn nearest_slot_after_conflicting_firing() {
        let a = cron_job("A", "*/10 * * * *", at(0, 0), at(1, 0), 300);
        let b = atq_job("B", at(0, 12), at(0, 20), 300);

        let slot = find_nearest_slot(&b, at(0, 15), &[a]).unwrap();
        assert_eq!(slot, Some(at(0, 15)));
    }

    #[test]
    fn nearest_slot_skips_past_busy_intervals() {
        let a = cron_job("A", "*/10 * * * *", at(0, 0), at(1, 0), 300);
        // 6-minute occupancy cannot fit in the 5-minute gaps before 00:30.
        let b = atq_job("B", at(0, 2), at(0, 45), 360);

        let slot = find_nearest_slot(&b, at(0, 2), &[a.clone()]).unwrap();
        // Gaps are [00:05,00:10), [00:15,00:20)... none fits 6 minutes until
        // the tail after the last counted firing. Firings run through 00:50,
        // so occupancies cover up to 00:55 with 5-minute gaps; no slot fits.
        assert_eq!(slot, None);

        // With a shorter occupancy the first gap works.
        let c = atq_job("C", at(0, 2), at(0, 45), 300);
        let slot = find_nearest_slot(&c, at(0, 2), &[a]).unwrap();
        assert_eq!(slot, Some(at(0, 5)));
    }

    #[test]
    fn nearest_slot_none_past_deadline() {
        let b = atq_job("B", at(0, 0), at(0, 10), 300);
        assert_eq!(find_nearest_slot(&b, at(0, 6), &[]).unwrap(), None);
    }

    #[test]
    fn validate_rejects_past_one_shot() {
        let job = atq_job("B", at(0, 0), at(1, 0), 60);
        assert!(validate_job(&job, at(0, 1)).is_err());
        assert!(validate_job(&job, at(0, 0)).is_ok());
    }

    #[test]
    fn validate_rejects_zero_length() {
        let mut job = atq_job("B", at(0, 0), at(1, 0), 60);
        job.length_secs = 0;
        assert!(validate_job(&job, at(0, 0)).is_err());
    }

    #[test]
    fn validate_rejects_bad_cron() {
        let job = cron_job("A", "not a cron", at(0, 0), at(1, 0), 60);
        assert!(validate_job(&job, at(0, 0)).is_err());
    }

    #[test]
    fn validate_rejects_bad_trigger() {
        let mut job = cron_job("A", "*/5 * * * *", at(0, 0), at(1, 0), 60);
        job.trigger = Some("elevation >".to_owned());
        assert!(validate_job(&job, at(0, 0)).is_err());
    }
}
