//! Ingestion pipeline.
//!
//! A submission registers a PENDING job and enqueues it for a bounded pool of background
//! workers. Each worker owns one job end to end: it transitions the job to PROCESSING, streams
//! the rows of the payload through the validator and the per-key accumulators, and publishes a
//! terminal state. Tasks never synchronise with each other beyond the registry and the system
//! counters.

use crate::cli::CommandLineArgs;
use crate::error::TelemetristError;
use crate::metrics;
use crate::models::{now_ms, ChannelStats, StatusResponse};
use crate::registry::{Job, JobRegistry};
use crate::validator::{self, Columns};

use bytes::Bytes;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{event, Level};
use uuid::Uuid;

/// Process-wide ingestion counters.
///
/// The counters increase monotonically, once per row across all jobs, and are readable at any
/// time without blocking writers.
#[derive(Debug, Default)]
pub struct SystemStats {
    received: AtomicU64,
    processed: AtomicU64,
    invalid: AtomicU64,
}

impl SystemStats {
    /// Record one row that passed validation.
    pub fn record_accepted(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
        metrics::ROWS_INGESTED.with_label_values(&["accepted"]).inc();
    }

    /// Record one row that failed validation.
    pub fn record_rejected(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.invalid.fetch_add(1, Ordering::Relaxed);
        metrics::ROWS_INGESTED.with_label_values(&["rejected"]).inc();
    }

    /// Total rows seen, accepted or rejected.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Total rows that passed validation.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Total rows that failed validation.
    pub fn invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }
}

/// The ingestion pipeline: job registry, system counters and the worker pool feeding queue.
#[derive(Debug)]
pub struct Pipeline {
    registry: JobRegistry,
    stats: SystemStats,
    queue: mpsc::Sender<Arc<Job>>,
    // Kept alive so the queue never closes, even with zero workers configured.
    receiver: Arc<Mutex<mpsc::Receiver<Arc<Job>>>>,
}

impl Pipeline {
    /// Return a new Pipeline and spawn its worker pool onto the current Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `args`: Command line arguments supplying the worker count and queue capacity
    pub fn new(args: &CommandLineArgs) -> Arc<Self> {
        let (queue, receiver) = mpsc::channel(args.queue_capacity.max(1));
        let pipeline = Arc::new(Self {
            registry: JobRegistry::new(),
            stats: SystemStats::default(),
            queue,
            receiver: Arc::new(Mutex::new(receiver)),
        });

        for worker_id in 0..args.worker_count {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                event!(Level::DEBUG, worker_id, "worker started");
                loop {
                    // The lock is held only while waiting for the next job, so an idle worker
                    // never blocks a busy one.
                    let job = pipeline.receiver.lock().await.recv().await;
                    match job {
                        Some(job) => pipeline.process(job).await,
                        None => break,
                    }
                }
            });
        }

        pipeline
    }

    /// The job registry.
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// The system counters.
    pub fn stats(&self) -> &SystemStats {
        &self.stats
    }

    /// Register a PENDING job for the payload and enqueue it for processing.
    ///
    /// Returns as soon as the job is queued; processing happens off the request path. When the
    /// queue is at capacity the submission is rejected and the job is not registered.
    pub async fn submit(&self, payload: Bytes) -> Result<Uuid, TelemetristError> {
        let upload_id = Uuid::new_v4();
        let job = Arc::new(Job::new(upload_id, payload));
        self.registry.put(Arc::clone(&job)).await?;

        if let Err(err) = self.queue.try_send(job) {
            self.registry.delete(&upload_id).await;
            return match err {
                TrySendError::Full(_) => Err(TelemetristError::QueueFull),
                TrySendError::Closed(_) => Err(TelemetristError::QueueClosed),
            };
        }

        metrics::UPLOADS_SUBMITTED.inc();
        event!(Level::INFO, upload_id = %upload_id, "upload accepted for processing");
        Ok(upload_id)
    }

    /// Return the system counters together with job counts derived from the registry.
    pub async fn system_status(&self) -> StatusResponse {
        let (pending_jobs, total_jobs) = self.registry.counts().await;
        StatusResponse {
            total_samples_received: self.stats.received(),
            total_samples_processed: self.stats.processed(),
            total_invalid_samples: self.stats.invalid(),
            pending_jobs,
            total_jobs,
        }
    }

    /// Process one job end to end.
    ///
    /// Row-level validation failures are absorbed as rejection counters. A structural decode
    /// failure transitions the job to FAILED and publishes no results. Nothing is propagated
    /// past the worker boundary, so one bad upload cannot take down the pool.
    async fn process(&self, job: Arc<Job>) {
        let upload_id = job.upload_id();
        job.start_processing(now_ms()).await;
        event!(Level::DEBUG, upload_id = %upload_id, "processing started");

        let payload = job.payload().await;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(payload.as_ref());

        let columns = match reader.headers() {
            Ok(headers) => Columns::from_headers(headers),
            Err(err) => {
                self.fail_job(&job, err).await;
                return;
            }
        };

        let mut results: HashMap<String, ChannelStats> = HashMap::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    self.fail_job(&job, err).await;
                    return;
                }
            };

            match validator::validate(&columns, &record, now_ms()) {
                Ok(sample) => {
                    let key = format!("{}:{}", sample.device_id, sample.channel);
                    results
                        .entry(key)
                        .or_insert_with(|| {
                            ChannelStats::new(sample.device_id.clone(), sample.channel.clone())
                        })
                        .add_value(sample.value);
                    job.record_row(true).await;
                    self.stats.record_accepted();
                }
                Err(rejection) => {
                    event!(Level::DEBUG, upload_id = %upload_id, reason = %rejection, "row rejected");
                    job.record_row(false).await;
                    self.stats.record_rejected();
                }
            }
        }

        job.complete(results, now_ms()).await;
        let snapshot = job.snapshot().await;
        event!(
            Level::INFO,
            upload_id = %upload_id,
            accepted = snapshot.accepted_count,
            rejected = snapshot.rejected_count,
            "processing completed"
        );
    }

    /// Record a structural decode failure on the job.
    async fn fail_job(&self, job: &Job, err: csv::Error) {
        let message = format!("failed to decode dataset: {}", err);
        job.fail(message, now_ms()).await;
        event!(Level::WARN, upload_id = %job.upload_id(), error = %err, "processing failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::JobStatus;
    use crate::test_utils::{csv_of, test_args, wait_terminal, SAMPLE_CSV};

    #[tokio::test]
    async fn completes_sample_dataset() {
        let pipeline = Pipeline::new(&test_args(2, 16));
        let upload_id = pipeline.submit(Bytes::from(SAMPLE_CSV)).await.unwrap();

        let snapshot = wait_terminal(pipeline.registry(), &upload_id).await;
        assert_eq!(JobStatus::Completed, snapshot.status);
        assert_eq!(2, snapshot.accepted_count);
        assert_eq!(1, snapshot.rejected_count);
        assert!(snapshot.error_message.is_none());
        assert!(snapshot.processing_time_ms().is_some());

        let results = snapshot.results.as_ref().unwrap();
        let stats = results.get("s1:temp").unwrap();
        assert_eq!(2, stats.count());
        assert_eq!(10.0, stats.min());
        assert_eq!(20.0, stats.max());
        assert_eq!(15.0, stats.average());
        assert!((stats.std_dev() - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn accepted_plus_rejected_equals_rows() {
        let pipeline = Pipeline::new(&test_args(1, 16));
        let payload = csv_of(&[
            ("1000", "s1", "temp", "10.0"),
            ("2000", "s2", "temp", "20.0"),
            ("-5", "s1", "temp", "30.0"),
            ("3000", "", "temp", "40.0"),
            ("4000", "s1", "humidity", "NaN"),
        ]);
        let upload_id = pipeline.submit(Bytes::from(payload)).await.unwrap();

        let snapshot = wait_terminal(pipeline.registry(), &upload_id).await;
        assert_eq!(JobStatus::Completed, snapshot.status);
        assert_eq!(5, snapshot.total_count());
        assert_eq!(2, snapshot.accepted_count);
        assert_eq!(3, snapshot.rejected_count);

        let results = snapshot.results.as_ref().unwrap();
        let grouped: u64 = results.values().map(|stats| stats.count()).sum();
        assert_eq!(snapshot.accepted_count, grouped);

        assert_eq!(5, pipeline.stats().received());
        assert_eq!(2, pipeline.stats().processed());
        assert_eq!(3, pipeline.stats().invalid());
    }

    #[tokio::test]
    async fn groups_by_device_and_channel() {
        let pipeline = Pipeline::new(&test_args(1, 16));
        let payload = csv_of(&[
            ("1000", "s1", "temp", "10.0"),
            ("2000", "s1", "temp", "20.0"),
            ("3000", "s1", "humidity", "55.0"),
            ("4000", "s2", "temp", "-5.0"),
        ]);
        let upload_id = pipeline.submit(Bytes::from(payload)).await.unwrap();

        let snapshot = wait_terminal(pipeline.registry(), &upload_id).await;
        let results = snapshot.results.as_ref().unwrap();
        assert_eq!(3, results.len());
        assert_eq!(2, results.get("s1:temp").unwrap().count());
        assert_eq!(1, results.get("s1:humidity").unwrap().count());
        assert_eq!(-5.0, results.get("s2:temp").unwrap().min());
        assert_eq!(Some(2), snapshot.device_count());
        assert_eq!(Some(2), snapshot.channel_count());
    }

    #[tokio::test]
    async fn header_only_dataset_completes_empty() {
        let pipeline = Pipeline::new(&test_args(1, 16));
        let upload_id = pipeline.submit(Bytes::from(csv_of(&[]))).await.unwrap();

        let snapshot = wait_terminal(pipeline.registry(), &upload_id).await;
        assert_eq!(JobStatus::Completed, snapshot.status);
        assert_eq!(0, snapshot.total_count());
        assert!(snapshot.results.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_header_column_rejects_all_rows() {
        let pipeline = Pipeline::new(&test_args(1, 16));
        let payload = "timestamp_ms,device_id,value\n1000,s1,10.0\n2000,s2,20.0\n";
        let upload_id = pipeline.submit(Bytes::from(payload)).await.unwrap();

        let snapshot = wait_terminal(pipeline.registry(), &upload_id).await;
        assert_eq!(JobStatus::Completed, snapshot.status);
        assert_eq!(0, snapshot.accepted_count);
        assert_eq!(2, snapshot.rejected_count);
        assert!(snapshot.results.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn structural_failure_retains_partial_counts() {
        let pipeline = Pipeline::new(&test_args(1, 16));
        // One good row, then invalid UTF-8 that the decoder cannot represent.
        let mut payload = b"timestamp_ms,device_id,channel,value\n1000,s1,temp,10.0\n".to_vec();
        payload.extend_from_slice(b"2000,s1,temp,\xff\xfe\n");
        let upload_id = pipeline.submit(Bytes::from(payload)).await.unwrap();

        let snapshot = wait_terminal(pipeline.registry(), &upload_id).await;
        assert_eq!(JobStatus::Failed, snapshot.status);
        assert_eq!(1, snapshot.accepted_count);
        assert_eq!(0, snapshot.rejected_count);
        assert!(snapshot.results.is_none());
        let message = snapshot.error_message.unwrap();
        assert!(message.starts_with("failed to decode dataset"), "{message}");
    }

    #[tokio::test]
    async fn queue_full_rejects_submission() {
        // No workers, so the single queue slot fills and stays full.
        let pipeline = Pipeline::new(&test_args(0, 1));
        let queued = pipeline.submit(Bytes::from(SAMPLE_CSV)).await.unwrap();

        let result = pipeline.submit(Bytes::from(SAMPLE_CSV)).await;
        assert!(matches!(result, Err(TelemetristError::QueueFull)));

        // The rejected submission was never registered.
        let jobs = pipeline.registry().list(None).await;
        assert_eq!(1, jobs.len());
        assert_eq!(queued, jobs[0].upload_id);
        assert_eq!(JobStatus::Pending, jobs[0].status);
    }

    #[tokio::test]
    async fn concurrent_jobs_all_reach_terminal_state() {
        // More jobs than workers; all must complete, none lost or duplicated.
        let pipeline = Pipeline::new(&test_args(4, 64));
        let mut upload_ids = Vec::new();
        for i in 0..12 {
            let payload = csv_of(&[
                ("1000", "s1", "temp", "10.0"),
                ("2000", "s1", "temp", &format!("{}.0", i)),
                ("bad", "s1", "temp", "30.0"),
            ]);
            upload_ids.push(pipeline.submit(Bytes::from(payload)).await.unwrap());
        }

        for upload_id in &upload_ids {
            let snapshot = wait_terminal(pipeline.registry(), upload_id).await;
            assert_eq!(JobStatus::Completed, snapshot.status);
            assert_eq!(2, snapshot.accepted_count);
            assert_eq!(1, snapshot.rejected_count);
        }

        // Global counters equal the per-job sums once everything is terminal.
        assert_eq!(36, pipeline.stats().received());
        assert_eq!(24, pipeline.stats().processed());
        assert_eq!(12, pipeline.stats().invalid());

        let status = pipeline.system_status().await;
        assert_eq!(0, status.pending_jobs);
        assert_eq!(12, status.total_jobs);
    }

    #[tokio::test]
    async fn repeated_reads_are_idempotent() {
        let pipeline = Pipeline::new(&test_args(1, 16));
        let upload_id = pipeline.submit(Bytes::from(SAMPLE_CSV)).await.unwrap();
        wait_terminal(pipeline.registry(), &upload_id).await;

        let first = pipeline.registry().snapshot(&upload_id).await.unwrap();
        let second = pipeline.registry().snapshot(&upload_id).await.unwrap();
        assert_eq!(first.accepted_count, second.accepted_count);
        assert_eq!(first.rejected_count, second.rejected_count);
        let stats = first.results.as_ref().unwrap().get("s1:temp").unwrap();
        let stats2 = second.results.as_ref().unwrap().get("s1:temp").unwrap();
        assert_eq!(stats.average(), stats2.average());
        assert_eq!(stats.std_dev(), stats2.std_dev());
    }
}
