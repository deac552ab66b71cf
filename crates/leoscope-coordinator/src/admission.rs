//! Per-node serialisation of the admission critical section.
//!
//! Admissions touching node N must form a total order; a per-node async
//! mutex over the check-then-persist sequence is sufficient. Multi-node
//! candidates (paired jobs) acquire their locks in sorted id order so two
//! concurrent admissions can never deadlock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use leoscope_proto::{Job, NodeId, Schedule};
use leoscope_schedule::{find_conflict, find_nearest_slot, validate_job};
use leoscope_store::MetaStore;

use crate::error::{CoordinatorError, Result};

/// Admission gate holding one lock per node.
#[derive(Default)]
pub struct Admission {
    locks: DashMap<NodeId, Arc<Mutex<()>>>,
}

impl Admission {
    /// Create an empty gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the critical section for a set of nodes.
    ///
    /// Guards are returned in sorted node-id order and released on drop.
    pub async fn lock_nodes(&self, nodes: &[NodeId]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<_> = nodes.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for node in sorted {
            let lock = self
                .locks
                .entry(node)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    /// Run the admission algorithm for a candidate job.
    ///
    /// Inside the per-node critical section: validate the record, then for
    /// an overhead candidate walk every admitted overhead job sharing a
    /// target node and reject on the first occupancy overlap. Non-overhead
    /// candidates skip the conflict scan entirely. On success the job is
    /// persisted, which makes it visible to the next admission in the
    /// total order.
    pub async fn admit(
        &self,
        store: &dyn MetaStore,
        job: &Job,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_job(job, now)?;

        let targets = job.target_nodes();
        let _guards = self.lock_nodes(&targets).await;

        // Identical resubmission is a no-op; a different payload under the
        // same id is an invalid replay.
        if let Some(existing) = store.get_job(&job.id).await? {
            if &existing == job {
                return Ok(());
            }
            return Err(CoordinatorError::invalid(format!(
                "job {} already exists with a different payload",
                job.id
            )));
        }

        if job.overhead {
            let admitted = store.jobs_for_nodes(&targets).await?;
            for existing in admitted.iter().filter(|j| j.overhead && j.id != job.id) {
                if let Some(conflict) = find_conflict(job, existing)? {
                    debug!(
                        candidate = %job.id,
                        offender = %conflict.job_id,
                        instant = %conflict.instant,
                        "admission rejected"
                    );
                    return Err(CoordinatorError::Conflict {
                        offender: conflict.job_id,
                        instant: conflict.instant,
                    });
                }
            }
        }

        store.insert_job(job).await?;
        Ok(())
    }

    /// Move a one-shot job to the earliest free instant at or after
    /// `after`, inside the job's original validity.
    ///
    /// Returns the new start. Recurring jobs are not reschedulable.
    pub async fn reschedule_nearest(
        &self,
        store: &dyn MetaStore,
        job: &Job,
        after: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        if matches!(job.schedule, Schedule::Cron { .. }) {
            return Err(CoordinatorError::Unsupported(
                "recurring jobs cannot be rescheduled".to_owned(),
            ));
        }

        let targets = job.target_nodes();
        let _guards = self.lock_nodes(&targets).await;

        let admitted = store.jobs_for_nodes(&targets).await?;
        let others: Vec<_> = admitted
            .into_iter()
            .filter(|j| j.overhead && j.id != job.id)
            .collect();

        let slot = find_nearest_slot(job, after, &others)?.ok_or(CoordinatorError::NoSlot)?;

        let mut moved = job.clone();
        moved.window.start = slot;
        store.update_job(&moved).await?;

        debug!(job = %job.id, start = %slot, "one-shot job rescheduled");
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leoscope_proto::{JobId, JobParams, UserId, Window};
    use leoscope_store::MemoryMetaStore;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn cron_job(id: &str, node: &str, expr: &str) -> Job {
        Job {
            id: JobId::new(id),
            node_id: NodeId::new(node),
            owner_id: UserId::new("alice"),
            schedule: Schedule::Cron {
                expr: expr.to_owned(),
            },
            window: Window::new(at(0, 0), at(1, 0)),
            length_secs: 300,
            overhead: true,
            paired_server_node_id: None,
            trigger: None,
            config: String::new(),
            params: JobParams {
                mode: "network".to_owned(),
                deploy: String::new(),
                execute: "img".to_owned(),
                finish: String::new(),
            },
        }
    }

    fn atq_job(id: &str, node: &str, start: DateTime<Utc>, end: DateTime<Utc>, len: u32) -> Job {
        let mut job = cron_job(id, node, "* * * * *");
        job.schedule = Schedule::Atq;
        job.window = Window::new(start, end);
        job.length_secs = len;
        job
    }

    #[tokio::test]
    async fn admits_then_rejects_overlap() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();

        let a = cron_job("A", "n1", "*/10 * * * *");
        admission.admit(&store, &a, at(0, 0)).await.unwrap();

        let b = atq_job("B", "n1", at(0, 12), at(0, 20), 300);
        let err = admission.admit(&store, &b, at(0, 0)).await.unwrap_err();
        match err {
            CoordinatorError::Conflict { offender, instant } => {
                assert_eq!(offender, JobId::new("A"));
                assert_eq!(instant, at(0, 10));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn touching_occupancy_is_admitted() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();

        let a = cron_job("A", "n1", "*/10 * * * *");
        admission.admit(&store, &a, at(0, 0)).await.unwrap();

        let b2 = atq_job("B2", "n1", at(0, 15), at(0, 30), 60);
        admission.admit(&store, &b2, at(0, 0)).await.unwrap();
    }

    #[tokio::test]
    async fn non_overhead_admitted_unconditionally() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();

        let a = cron_job("A", "n1", "*/10 * * * *");
        admission.admit(&store, &a, at(0, 0)).await.unwrap();

        let mut b = atq_job("B", "n1", at(0, 10), at(0, 20), 300);
        b.overhead = false;
        admission.admit(&store, &b, at(0, 0)).await.unwrap();
    }

    #[tokio::test]
    async fn identical_resubmission_is_noop() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();

        let a = cron_job("A", "n1", "*/10 * * * *");
        admission.admit(&store, &a, at(0, 0)).await.unwrap();
        admission.admit(&store, &a, at(0, 0)).await.unwrap();

        let mut changed = a.clone();
        changed.length_secs = 60;
        let err = admission.admit(&store, &changed, at(0, 0)).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Invalid(_)));
    }

    #[tokio::test]
    async fn conflict_on_paired_server_node() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();

        let a = cron_job("A", "n2", "*/10 * * * *");
        admission.admit(&store, &a, at(0, 0)).await.unwrap();

        // Candidate runs on n1 but pairs with n2, where A is admitted.
        let mut b = atq_job("B", "n1", at(0, 10), at(0, 20), 300);
        b.paired_server_node_id = Some(NodeId::new("n2"));
        let err = admission.admit(&store, &b, at(0, 0)).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict { .. }));
    }

    #[tokio::test]
    async fn reschedule_moves_to_nearest_free_slot() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();

        let a = cron_job("A", "n1", "*/10 * * * *");
        admission.admit(&store, &a, at(0, 0)).await.unwrap();

        let b = atq_job("B", "n1", at(0, 12), at(0, 20), 300);
        store.insert_job(&b).await.unwrap();

        let slot = admission
            .reschedule_nearest(&store, &b, at(0, 15))
            .await
            .unwrap();
        assert_eq!(slot, at(0, 15));

        let stored = store.get_job(&JobId::new("B")).await.unwrap().unwrap();
        assert_eq!(stored.window.start, at(0, 15));
    }

    #[tokio::test]
    async fn reschedule_cron_is_unsupported() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();
        let a = cron_job("A", "n1", "*/10 * * * *");
        store.insert_job(&a).await.unwrap();

        let err = admission
            .reschedule_nearest(&store, &a, at(0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Unsupported(_)));
    }

    #[tokio::test]
    async fn reschedule_no_slot_past_deadline() {
        let store = MemoryMetaStore::new();
        let admission = Admission::new();

        let b = atq_job("B", "n1", at(0, 12), at(0, 20), 300);
        store.insert_job(&b).await.unwrap();

        let err = admission
            .reschedule_nearest(&store, &b, at(0, 18))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoSlot));
    }
}
