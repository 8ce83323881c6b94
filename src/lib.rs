//! This crate provides an asynchronous sensor data ingestion and aggregation server. Clients
//! upload bulk time-series sensor readings as CSV datasets, processing happens off the request
//! path on a bounded pool of background workers, and per-device/per-channel summary statistics
//! become queryable by an opaque upload ID once processing completes.
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team on top of various popular components,
//!   including the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON response data.
//! * [csv] decodes the uploaded datasets.
//! * [Prometheus](prometheus) exposes HTTP request metrics.

pub mod app;
pub mod app_state;
pub mod cli;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod server;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validator;
