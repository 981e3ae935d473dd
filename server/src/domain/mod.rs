//! Domain logic for telemetry ingestion
//!
//! - `ingest` - Consumer loop, claim-check resolution and bulk persistence
//! - `retention` - Expiry sweep for claim-check blobs

pub mod ingest;
pub mod retention;
