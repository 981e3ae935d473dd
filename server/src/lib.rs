//! EasySmart telemetry ingestion worker
//!
//! Consumes claim-check envelopes from a message queue, resolves the referenced
//! gzip blobs from object storage and bulk-inserts validated telemetry rows
//! into PostgreSQL.

pub(crate) mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
