//! Telemetry ingestion pipeline
//!
//! - `envelope` - Queue message decoding (claim-check or legacy inline)
//! - `resolver` - Claim-check dereferencing and payload normalization
//! - `record` - Per-record validation into telemetry rows
//! - `processor` - Transactional bulk insert with retry
//! - `consumer` - Poll/process/commit loop
//! - `enqueue` - Claim-check producer for replays

pub mod consumer;
pub mod enqueue;
pub mod envelope;
pub mod processor;
pub mod record;
pub mod resolver;

pub use consumer::{BatchSummary, ConsumerLoop, ConsumerSettings, IngestError};
pub use enqueue::{EnqueueError, enqueue_payload};
pub use envelope::{ClaimCheckEnvelope, Envelope, EnvelopeBody, EnvelopeError};
pub use processor::{BatchResult, BulkProcessor, parse_tenant_id};
pub use record::{ErrorDetail, validate_record};
pub use resolver::{ClaimCheckRef, PayloadResolver, ResolveError, ResolvedPayload, normalize_records};
