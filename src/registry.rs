//! Job registry.
//!
//! The registry is the only structure shared between the request handlers and the worker pool.
//! Each job record carries its own lock over all mutable state, and every status transition
//! writes status, counters, results and timestamps inside a single critical section. Readers copy
//! a [JobSnapshot] out under the record lock, so a snapshot may be stale but is never torn: a
//! `COMPLETED` status is always paired with published results.

use crate::error::TelemetristError;
use crate::models::{ChannelStats, JobStatus};

use bytes::Bytes;
use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One upload tracked from submission to deletion.
///
/// The worker that claims the job is the only writer until a terminal state is reached; after
/// that the record is read-only and destroyed only by explicit deletion.
#[derive(Debug)]
pub struct Job {
    upload_id: Uuid,
    state: RwLock<JobState>,
}

/// Mutable job state, guarded by the record lock.
#[derive(Debug)]
struct JobState {
    raw_payload: Bytes,
    status: JobStatus,
    accepted_count: u64,
    rejected_count: u64,
    results: Option<Arc<HashMap<String, ChannelStats>>>,
    error_message: Option<String>,
    start_time_ms: Option<i64>,
    end_time_ms: Option<i64>,
}

impl Job {
    /// Return a new PENDING job holding the raw upload payload.
    pub fn new(upload_id: Uuid, raw_payload: Bytes) -> Self {
        Self {
            upload_id,
            state: RwLock::new(JobState {
                raw_payload,
                status: JobStatus::Pending,
                accepted_count: 0,
                rejected_count: 0,
                results: None,
                error_message: None,
                start_time_ms: None,
                end_time_ms: None,
            }),
        }
    }

    /// The opaque upload identifier.
    pub fn upload_id(&self) -> Uuid {
        self.upload_id
    }

    /// The current status.
    pub async fn status(&self) -> JobStatus {
        self.state.read().await.status
    }

    /// The raw upload payload. Cheap to clone; [Bytes] is reference counted.
    pub async fn payload(&self) -> Bytes {
        self.state.read().await.raw_payload.clone()
    }

    /// Transition to PROCESSING and record the start time.
    pub async fn start_processing(&self, now_ms: i64) {
        let mut state = self.state.write().await;
        if state.status.is_terminal() {
            return;
        }
        state.status = JobStatus::Processing;
        state.start_time_ms = Some(now_ms);
    }

    /// Record the validation outcome of one row.
    pub async fn record_row(&self, accepted: bool) {
        let mut state = self.state.write().await;
        if accepted {
            state.accepted_count += 1;
        } else {
            state.rejected_count += 1;
        }
    }

    /// Publish results and transition to the terminal COMPLETED state.
    pub async fn complete(&self, results: HashMap<String, ChannelStats>, now_ms: i64) {
        let mut state = self.state.write().await;
        if state.status.is_terminal() {
            return;
        }
        state.results = Some(Arc::new(results));
        state.status = JobStatus::Completed;
        state.end_time_ms = Some(now_ms);
    }

    /// Record an error message and transition to the terminal FAILED state.
    ///
    /// Counters accumulated before the failure are retained; results are never published.
    pub async fn fail(&self, error_message: String, now_ms: i64) {
        let mut state = self.state.write().await;
        if state.status.is_terminal() {
            return;
        }
        state.status = JobStatus::Failed;
        state.error_message = Some(error_message);
        state.end_time_ms = Some(now_ms);
    }

    /// Return a consistent point-in-time copy of the job state.
    pub async fn snapshot(&self) -> JobSnapshot {
        let state = self.state.read().await;
        JobSnapshot {
            upload_id: self.upload_id,
            status: state.status,
            accepted_count: state.accepted_count,
            rejected_count: state.rejected_count,
            results: state.results.clone(),
            error_message: state.error_message.clone(),
            start_time_ms: state.start_time_ms,
            end_time_ms: state.end_time_ms,
        }
    }
}

/// A consistent point-in-time copy of one job's state.
#[derive(Clone, Debug)]
pub struct JobSnapshot {
    pub upload_id: Uuid,
    pub status: JobStatus,
    pub accepted_count: u64,
    pub rejected_count: u64,
    pub results: Option<Arc<HashMap<String, ChannelStats>>>,
    pub error_message: Option<String>,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,
}

impl JobSnapshot {
    /// Total number of rows seen so far.
    pub fn total_count(&self) -> u64 {
        self.accepted_count + self.rejected_count
    }

    /// Wall-clock processing duration, available once both timestamps are recorded.
    pub fn processing_time_ms(&self) -> Option<i64> {
        match (self.start_time_ms, self.end_time_ms) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Number of distinct devices in the published results.
    pub fn device_count(&self) -> Option<usize> {
        self.results.as_ref().map(|results| {
            results
                .values()
                .map(ChannelStats::device_id)
                .collect::<HashSet<_>>()
                .len()
        })
    }

    /// Number of distinct channels in the published results.
    pub fn channel_count(&self) -> Option<usize> {
        self.results.as_ref().map(|results| {
            results
                .values()
                .map(ChannelStats::channel)
                .collect::<HashSet<_>>()
                .len()
        })
    }
}

/// Concurrent store of job records keyed by upload ID.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<Job>>>,
}

impl JobRegistry {
    /// Return a new, empty JobRegistry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job record.
    ///
    /// Returns `DuplicateJob` if the upload ID is already registered. Upload IDs are generated
    /// randomly per submission, so this should never occur in practice.
    pub async fn put(&self, job: Arc<Job>) -> Result<(), TelemetristError> {
        let mut jobs = self.jobs.write().await;
        match jobs.entry(job.upload_id()) {
            Entry::Occupied(entry) => Err(TelemetristError::DuplicateJob {
                upload_id: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(job);
                Ok(())
            }
        }
    }

    /// Return the job record for an upload ID, if present.
    pub async fn get(&self, upload_id: &Uuid) -> Option<Arc<Job>> {
        self.jobs.read().await.get(upload_id).cloned()
    }

    /// Return a snapshot of the job for an upload ID, if present.
    pub async fn snapshot(&self, upload_id: &Uuid) -> Option<JobSnapshot> {
        let job = self.get(upload_id).await?;
        Some(job.snapshot().await)
    }

    /// Return snapshots of all jobs whose status matches the filter, or of all jobs when no
    /// filter is given. No ordering is guaranteed.
    pub async fn list(&self, status_filter: Option<JobStatus>) -> Vec<JobSnapshot> {
        let jobs: Vec<Arc<Job>> = self.jobs.read().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(jobs.len());
        for job in jobs {
            let snapshot = job.snapshot().await;
            if status_filter.map_or(true, |status| snapshot.status == status) {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Remove a job record. Returns whether a record existed.
    pub async fn delete(&self, upload_id: &Uuid) -> bool {
        self.jobs.write().await.remove(upload_id).is_some()
    }

    /// Return the number of non-terminal jobs and the total number of records.
    pub async fn counts(&self) -> (usize, usize) {
        let jobs: Vec<Arc<Job>> = self.jobs.read().await.values().cloned().collect();
        let total = jobs.len();
        let mut pending = 0;
        for job in jobs {
            if !job.status().await.is_terminal() {
                pending += 1;
            }
        }
        (pending, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Arc<Job> {
        Arc::new(Job::new(Uuid::new_v4(), Bytes::from_static(b"payload")))
    }

    fn test_results() -> HashMap<String, ChannelStats> {
        let mut results = HashMap::new();
        let mut stats = ChannelStats::new("s1".to_string(), "temp".to_string());
        stats.add_value(10.0);
        results.insert("s1:temp".to_string(), stats);
        results
    }

    #[tokio::test]
    async fn put_and_get() {
        let registry = JobRegistry::new();
        let job = test_job();
        let upload_id = job.upload_id();
        registry.put(job).await.unwrap();
        let snapshot = registry.snapshot(&upload_id).await.unwrap();
        assert_eq!(JobStatus::Pending, snapshot.status);
        assert_eq!(0, snapshot.total_count());
        assert!(snapshot.results.is_none());
    }

    #[tokio::test]
    async fn put_duplicate() {
        let registry = JobRegistry::new();
        let job = test_job();
        registry.put(job.clone()).await.unwrap();
        let result = registry.put(job).await;
        assert!(matches!(
            result,
            Err(TelemetristError::DuplicateJob { upload_id: _ })
        ));
    }

    #[tokio::test]
    async fn get_unknown() {
        let registry = JobRegistry::new();
        assert!(registry.get(&Uuid::new_v4()).await.is_none());
        assert!(registry.snapshot(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn delete_job() {
        let registry = JobRegistry::new();
        let job = test_job();
        let upload_id = job.upload_id();
        registry.put(job).await.unwrap();
        assert!(registry.delete(&upload_id).await);
        assert!(registry.snapshot(&upload_id).await.is_none());
        assert!(registry.list(None).await.is_empty());
        // A second delete finds nothing.
        assert!(!registry.delete(&upload_id).await);
    }

    #[tokio::test]
    async fn list_with_filter() {
        let registry = JobRegistry::new();
        let completed = test_job();
        let pending = test_job();
        registry.put(completed.clone()).await.unwrap();
        registry.put(pending.clone()).await.unwrap();
        completed.start_processing(1).await;
        completed.complete(test_results(), 2).await;

        assert_eq!(2, registry.list(None).await.len());
        let filtered = registry.list(Some(JobStatus::Completed)).await;
        assert_eq!(1, filtered.len());
        assert_eq!(completed.upload_id(), filtered[0].upload_id);
        assert!(registry.list(Some(JobStatus::Failed)).await.is_empty());
    }

    #[tokio::test]
    async fn counts() {
        let registry = JobRegistry::new();
        let done = test_job();
        let waiting = test_job();
        registry.put(done.clone()).await.unwrap();
        registry.put(waiting).await.unwrap();
        done.start_processing(1).await;
        done.fail("oops".to_string(), 2).await;
        assert_eq!((1, 2), registry.counts().await);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let job = test_job();
        assert_eq!(JobStatus::Pending, job.status().await);
        job.start_processing(100).await;
        assert_eq!(JobStatus::Processing, job.status().await);
        job.record_row(true).await;
        job.record_row(true).await;
        job.record_row(false).await;
        job.complete(test_results(), 150).await;

        let snapshot = job.snapshot().await;
        assert_eq!(JobStatus::Completed, snapshot.status);
        assert_eq!(2, snapshot.accepted_count);
        assert_eq!(1, snapshot.rejected_count);
        assert_eq!(Some(50), snapshot.processing_time_ms());
        // Completed status is always paired with published results.
        assert!(snapshot.results.is_some());
        assert!(snapshot.error_message.is_none());
    }

    #[tokio::test]
    async fn terminal_state_is_final() {
        let job = test_job();
        job.start_processing(1).await;
        job.complete(test_results(), 2).await;
        job.fail("too late".to_string(), 3).await;
        job.start_processing(4).await;

        let snapshot = job.snapshot().await;
        assert_eq!(JobStatus::Completed, snapshot.status);
        assert!(snapshot.error_message.is_none());
        assert_eq!(Some(2), snapshot.end_time_ms);
    }

    #[tokio::test]
    async fn failed_job_retains_partial_counts() {
        let job = test_job();
        job.start_processing(1).await;
        job.record_row(true).await;
        job.record_row(false).await;
        job.fail("decode error".to_string(), 2).await;

        let snapshot = job.snapshot().await;
        assert_eq!(JobStatus::Failed, snapshot.status);
        assert_eq!(1, snapshot.accepted_count);
        assert_eq!(1, snapshot.rejected_count);
        assert_eq!(Some("decode error".to_string()), snapshot.error_message);
        assert!(snapshot.results.is_none());
    }

    #[tokio::test]
    async fn snapshot_device_and_channel_counts() {
        let job = test_job();
        let mut results = test_results();
        let mut stats = ChannelStats::new("s1".to_string(), "humidity".to_string());
        stats.add_value(55.0);
        results.insert("s1:humidity".to_string(), stats);
        job.start_processing(1).await;
        job.complete(results, 2).await;

        let snapshot = job.snapshot().await;
        assert_eq!(Some(1), snapshot.device_count());
        assert_eq!(Some(2), snapshot.channel_count());
    }
}
