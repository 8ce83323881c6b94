//! Data types and associated functions and methods

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::Display;

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or_default()
}

/// One validated sensor reading.
///
/// Samples are ephemeral. They exist only while a row is routed through the ingestion pipeline
/// and are never stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Reading timestamp as milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Identifier of the reporting device
    pub device_id: String,
    /// Named measurement stream within the device
    pub channel: String,
    /// Measured value
    pub value: f64,
}

/// Job lifecycle states
///
/// A job moves from `Pending` through `Processing` to one of the terminal states `Completed` or
/// `Failed`. No transition ever leaves a terminal state.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum JobStatus {
    /// Registered, awaiting a worker
    Pending,
    /// Claimed by a worker, rows being processed
    Processing,
    /// All rows processed, statistics published
    Completed,
    /// Structural decode failure, no statistics published
    Failed,
}

impl JobStatus {
    /// Returns true for the terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Running statistics for one device+channel pair within one job.
///
/// This is an online single-pass accumulator using Welford's algorithm, which is numerically
/// stable for large magnitudes and sample counts. Average and standard deviation are derived on
/// read rather than stored, so repeated reads never double-count.
#[derive(Clone, Debug)]
pub struct ChannelStats {
    device_id: String,
    channel: String,
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl ChannelStats {
    /// Return a new, empty ChannelStats.
    ///
    /// Accumulators are created lazily on the first accepted sample for a key, so the unset
    /// extrema sentinels are never observable externally.
    pub fn new(device_id: String, channel: String) -> Self {
        Self {
            device_id,
            channel,
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Fold one value into the accumulator.
    pub fn add_value(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Identifier of the reporting device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Named measurement stream within the device.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Number of values folded in.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Smallest value seen.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Largest value seen.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Arithmetic mean of the values seen, or 0 when empty.
    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.mean
        } else {
            0.0
        }
    }

    /// Population variance of the values seen, clamped to be non-negative.
    ///
    /// Returns 0 for fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2 / self.count as f64).max(0.0)
    }

    /// Population standard deviation of the values seen.
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

/// Per-channel statistics record as rendered in API responses.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatsView {
    pub device_id: String,
    pub channel: String,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub std_dev: f64,
}

impl From<&ChannelStats> for ChannelStatsView {
    fn from(stats: &ChannelStats) -> Self {
        Self {
            device_id: stats.device_id().to_string(),
            channel: stats.channel().to_string(),
            count: stats.count(),
            min: stats.min(),
            max: stats.max(),
            average: stats.average(),
            std_dev: stats.std_dev(),
        }
    }
}

/// Response to a successful upload submission.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub upload_id: String,
    pub message: String,
    pub size: usize,
    pub status_url: String,
}

impl UploadResponse {
    /// Return a new UploadResponse for an accepted upload.
    pub fn new(upload_id: String, size: usize) -> Self {
        let status_url = format!("/api/results/{}", upload_id);
        Self {
            upload_id,
            message: "Upload accepted for processing".to_string(),
            size,
            status_url,
        }
    }
}

/// Full processing results for one upload.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub upload_id: String,
    pub status: String,
    pub accepted_count: u64,
    pub rejected_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// Present only for COMPLETED jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Vec<ChannelStatsView>>,
}

/// Counts-only summary of processing results.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub upload_id: String,
    pub status: String,
    pub accepted_count: u64,
    pub rejected_count: u64,
    pub total_count: u64,
    pub rejection_rate: f64,
    pub statistics_count: usize,
}

/// System-wide ingestion counters and job counts.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub total_samples_received: u64,
    pub total_samples_processed: u64,
    pub total_invalid_samples: u64,
    pub pending_jobs: usize,
    pub total_jobs: usize,
}

/// One job as rendered by the job listing and job info endpoints.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub upload_id: String,
    pub status: String,
    pub accepted_count: u64,
    pub rejected_count: u64,
    pub total_count: u64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Job summary with derived detail fields.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    #[serde(flatten)]
    pub summary: JobSummary,
    /// Number of distinct devices in the published results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_count: Option<usize>,
    /// Number of distinct channels in the published results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<usize>,
}
