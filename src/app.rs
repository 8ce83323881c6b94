//! API routing and request handlers.

use crate::app_state::SharedAppState;
use crate::error::TelemetristError;
use crate::metrics;
use crate::models::{
    ChannelStatsView, JobInfo, JobStatus, JobSummary, ResultResponse, ResultSummary,
    StatusResponse, UploadResponse,
};
use crate::registry::JobSnapshot;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::header,
    http::Request,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;
use uuid::Uuid;

/// Returns the application [Router].
///
/// The `/api` subtree requires an authorization header to be present; credential verification
/// itself belongs to the identity provider fronting this service.
pub fn router(state: SharedAppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/upload", post(upload))
        .route("/results/:upload_id", get(get_results))
        .route("/results/:upload_id/summary", get(get_results_summary))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:upload_id", get(get_job_info).delete(delete_job))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .on_request(metrics::request_counter)
                        .on_response(metrics::record_response_metrics),
                )
                .layer(ValidateRequestHeaderLayer::custom(
                    // Validate that an authorization header has been provided.
                    |request: &mut Request<Body>| {
                        if request.headers().contains_key(header::AUTHORIZATION) {
                            Ok(())
                        } else {
                            Err(StatusCode::UNAUTHORIZED.into_response())
                        }
                    },
                )),
        );

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
}

/// Query parameters accepted by the results endpoint.
#[derive(Debug, Deserialize)]
struct ResultsQuery {
    device_id: Option<String>,
    channel: Option<String>,
}

/// Query parameters accepted by the job listing endpoint.
#[derive(Debug, Deserialize)]
struct JobsQuery {
    status: Option<JobStatus>,
}

/// Parse an upload ID from its path representation.
///
/// An ID that is not a well-formed UUID cannot name any job, so it maps to "not found" rather
/// than "bad request"; upload IDs are opaque to clients.
fn parse_upload_id(upload_id: &str) -> Result<Uuid, TelemetristError> {
    Uuid::parse_str(upload_id).map_err(|_| TelemetristError::JobNotFound {
        upload_id: upload_id.to_string(),
    })
}

/// Render the statistics list for a COMPLETED job, applying the optional filters.
fn statistics_view(
    snapshot: &JobSnapshot,
    device_id: Option<&str>,
    channel: Option<&str>,
) -> Option<Vec<ChannelStatsView>> {
    if snapshot.status != JobStatus::Completed {
        return None;
    }
    snapshot.results.as_ref().map(|results| {
        results
            .values()
            .filter(|stats| device_id.map_or(true, |device| device == stats.device_id()))
            .filter(|stats| channel.map_or(true, |channel| channel == stats.channel()))
            .map(ChannelStatsView::from)
            .collect()
    })
}

/// Render a job summary from a snapshot.
fn job_summary(snapshot: &JobSnapshot) -> JobSummary {
    JobSummary {
        upload_id: snapshot.upload_id.to_string(),
        status: snapshot.status.to_string(),
        accepted_count: snapshot.accepted_count,
        rejected_count: snapshot.rejected_count,
        total_count: snapshot.total_count(),
        start_time: snapshot.start_time_ms,
        end_time: snapshot.end_time_ms,
        processing_time_ms: snapshot.processing_time_ms(),
        error_message: snapshot.error_message.clone(),
    }
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "running"}))
}

/// Return system-wide counters and job counts.
async fn get_status(State(state): State<SharedAppState>) -> Json<StatusResponse> {
    Json(state.pipeline.system_status().await)
}

/// Accept a dataset upload and schedule it for background processing.
///
/// Returns 202 as soon as the job is registered and queued; results become available through the
/// results endpoint once a worker finishes the job.
async fn upload(
    State(state): State<SharedAppState>,
    body: Bytes,
) -> Result<impl IntoResponse, TelemetristError> {
    if body.is_empty() {
        return Err(TelemetristError::EmptyUpload);
    }
    let size = body.len();
    let upload_id = state.pipeline.submit(body).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse::new(upload_id.to_string(), size)),
    ))
}

/// Return processing results for an upload, with optional device and channel filters.
async fn get_results(
    State(state): State<SharedAppState>,
    Path(upload_id): Path<String>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultResponse>, TelemetristError> {
    let id = parse_upload_id(&upload_id)?;
    let snapshot = state
        .pipeline
        .registry()
        .snapshot(&id)
        .await
        .ok_or(TelemetristError::JobNotFound { upload_id })?;

    let statistics = statistics_view(
        &snapshot,
        query.device_id.as_deref(),
        query.channel.as_deref(),
    );
    Ok(Json(ResultResponse {
        upload_id: snapshot.upload_id.to_string(),
        status: snapshot.status.to_string(),
        accepted_count: snapshot.accepted_count,
        rejected_count: snapshot.rejected_count,
        error_message: snapshot.error_message.clone(),
        start_time: snapshot.start_time_ms,
        end_time: snapshot.end_time_ms,
        statistics,
    }))
}

/// Return a counts-only summary of processing results.
async fn get_results_summary(
    State(state): State<SharedAppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<ResultSummary>, TelemetristError> {
    let id = parse_upload_id(&upload_id)?;
    let snapshot = state
        .pipeline
        .registry()
        .snapshot(&id)
        .await
        .ok_or(TelemetristError::JobNotFound { upload_id })?;

    let total_count = snapshot.total_count();
    let rejection_rate = if total_count > 0 {
        snapshot.rejected_count as f64 / total_count as f64
    } else {
        0.0
    };
    let statistics_count = statistics_view(&snapshot, None, None).map_or(0, |stats| stats.len());
    Ok(Json(ResultSummary {
        upload_id: snapshot.upload_id.to_string(),
        status: snapshot.status.to_string(),
        accepted_count: snapshot.accepted_count,
        rejected_count: snapshot.rejected_count,
        total_count,
        rejection_rate,
        statistics_count,
    }))
}

/// List all jobs, optionally filtered by status.
async fn list_jobs(
    State(state): State<SharedAppState>,
    Query(query): Query<JobsQuery>,
) -> Json<Vec<JobSummary>> {
    let snapshots = state.pipeline.registry().list(query.status).await;
    Json(snapshots.iter().map(job_summary).collect())
}

/// Return detailed information about one job.
async fn get_job_info(
    State(state): State<SharedAppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<JobInfo>, TelemetristError> {
    let id = parse_upload_id(&upload_id)?;
    let snapshot = state
        .pipeline
        .registry()
        .snapshot(&id)
        .await
        .ok_or(TelemetristError::JobNotFound { upload_id })?;

    Ok(Json(JobInfo {
        summary: job_summary(&snapshot),
        device_count: snapshot.device_count(),
        channel_count: snapshot.channel_count(),
    }))
}

/// Delete a job record.
async fn delete_job(
    State(state): State<SharedAppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<serde_json::Value>, TelemetristError> {
    let id = parse_upload_id(&upload_id)?;
    if state.pipeline.registry().delete(&id).await {
        Ok(Json(json!({"uploadId": upload_id, "deleted": true})))
    } else {
        Err(TelemetristError::JobNotFound { upload_id })
    }
}
