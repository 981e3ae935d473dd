//! Data layer
//!
//! - `objects` - Claim-check blob storage (local filesystem, MinIO)
//! - `queue` - Envelope message queue (in-memory, Redis Streams)
//! - `postgres` - PostgreSQL pool, schema and telemetry queries
//! - `telemetry` - `TelemetryStore` seam used by the ingest pipeline

pub mod objects;
pub mod postgres;
pub mod queue;
pub mod telemetry;

pub use objects::{ObjectStore, ObjectStoreError, StorageRegistry};
pub use postgres::{PostgresError, PostgresService};
pub use queue::{MessageQueue, QueueError};
pub use telemetry::{InsertOutcome, TelemetryRow, TelemetryStore, TelemetryStoreError};
