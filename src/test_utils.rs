use crate::cli::CommandLineArgs;
use crate::registry::{JobRegistry, JobSnapshot};

use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

/// The dataset header row.
pub(crate) const CSV_HEADER: &str = "timestamp_ms,device_id,channel,value";

/// A small dataset with two valid rows and one bad value.
pub(crate) const SAMPLE_CSV: &str =
    "timestamp_ms,device_id,channel,value\n1000,s1,temp,10.0\n2000,s1,temp,20.0\n3000,s1,temp,bad\n";

/// Render a dataset from (timestamp, device, channel, value) tuples.
pub(crate) fn csv_of(rows: &[(&str, &str, &str, &str)]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for (timestamp, device, channel, value) in rows {
        out.push_str(&format!("{},{},{},{}\n", timestamp, device, channel, value));
    }
    out
}

/// Create CommandLineArgs with defaults and the given pool configuration.
pub(crate) fn test_args(worker_count: usize, queue_capacity: usize) -> CommandLineArgs {
    let mut args = CommandLineArgs::parse_from(["telemetrist"]);
    args.worker_count = worker_count;
    args.queue_capacity = queue_capacity;
    args
}

/// Poll the registry until the job reaches a terminal state.
pub(crate) async fn wait_terminal(registry: &JobRegistry, upload_id: &Uuid) -> JobSnapshot {
    for _ in 0..500 {
        if let Some(snapshot) = registry.snapshot(upload_id).await {
            if snapshot.status.is_terminal() {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not reach a terminal state", upload_id);
}
