//! Queue envelope decoding
//!
//! The gateway publishes either a claim-check pointer or, for older clients,
//! the telemetry inline. The form is decided once here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::data::queue::QueueMessage;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("envelope is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid claim-check envelope: {0}")]
    InvalidClaimCheck(String),
}

/// Pointer to a compressed telemetry blob in object storage
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimCheckPointer {
    pub claim_check: String,
    #[serde(default)]
    pub storage_type: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub compression: Option<String>,
}

/// Decoded message body
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeBody {
    ClaimCheck(ClaimCheckPointer),
    /// Legacy inline form: `{"data": [...]}` or a bare value
    Inline(Value),
}

impl EnvelopeBody {
    /// Decode a message value
    ///
    /// Any JSON object carrying `claim_check` is a claim-check envelope and
    /// must be well formed; everything else is inline telemetry.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes)?;

        let is_claim_check = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("claim_check"));
        if !is_claim_check {
            return Ok(EnvelopeBody::Inline(value));
        }

        let pointer: ClaimCheckPointer = serde_json::from_value(value)
            .map_err(|e| EnvelopeError::InvalidClaimCheck(e.to_string()))?;
        if pointer.claim_check.trim().is_empty() {
            return Err(EnvelopeError::InvalidClaimCheck(
                "claim_check is empty".to_string(),
            ));
        }
        Ok(EnvelopeBody::ClaimCheck(pointer))
    }
}

/// Message with its decoded body and queue coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub key: Option<String>,
    pub body: EnvelopeBody,
    pub partition: u32,
    pub offset: String,
    /// Size of the raw message value in bytes
    pub size: usize,
}

impl Envelope {
    pub fn from_message(message: &QueueMessage) -> Result<Self, EnvelopeError> {
        Ok(Self {
            key: message.key.clone(),
            body: EnvelopeBody::decode(&message.value)?,
            partition: message.partition,
            offset: message.offset.clone(),
            size: message.value.len(),
        })
    }
}

/// Claim-check envelope as published by the gateway and the `enqueue` command
#[derive(Debug, Clone, Serialize)]
pub struct ClaimCheckEnvelope {
    pub claim_check: String,
    pub storage_type: String,
    pub file_size: u64,
    pub original_size: u64,
    pub compression: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_claim_check() {
        let body = EnvelopeBody::decode(
            br#"{"claim_check":"telemetry/x/a.json.gz","storage_type":"local","file_size":120,
                 "bucket":"telemetry-raw","original_size":900,"compression":"gzip"}"#,
        )
        .unwrap();

        assert_eq!(
            body,
            EnvelopeBody::ClaimCheck(ClaimCheckPointer {
                claim_check: "telemetry/x/a.json.gz".to_string(),
                storage_type: Some("local".to_string()),
                file_size: 120,
                compression: Some("gzip".to_string()),
            })
        );
    }

    #[test]
    fn test_decode_minimal_claim_check() {
        let body = EnvelopeBody::decode(br#"{"claim_check":"k.json.gz"}"#).unwrap();
        let EnvelopeBody::ClaimCheck(pointer) = body else {
            panic!("expected claim check");
        };
        assert_eq!(pointer.storage_type, None);
        assert_eq!(pointer.file_size, 0);
    }

    #[test]
    fn test_decode_legacy_data() {
        let body = EnvelopeBody::decode(br#"{"data":[{"a":1}]}"#).unwrap();
        assert_eq!(body, EnvelopeBody::Inline(json!({"data": [{"a": 1}]})));
    }

    #[test]
    fn test_decode_bare_array() {
        let body = EnvelopeBody::decode(b"[1,2]").unwrap();
        assert_eq!(body, EnvelopeBody::Inline(json!([1, 2])));
    }

    #[test]
    fn test_non_string_claim_check_is_error() {
        assert!(matches!(
            EnvelopeBody::decode(br#"{"claim_check": 42}"#),
            Err(EnvelopeError::InvalidClaimCheck(_))
        ));
        assert!(matches!(
            EnvelopeBody::decode(br#"{"claim_check": null}"#),
            Err(EnvelopeError::InvalidClaimCheck(_))
        ));
    }

    #[test]
    fn test_empty_claim_check_is_error() {
        assert!(EnvelopeBody::decode(br#"{"claim_check": " "}"#).is_err());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            EnvelopeBody::decode(b"{not json"),
            Err(EnvelopeError::Json(_))
        ));
    }

    #[test]
    fn test_from_message_keeps_coordinates() {
        let message = QueueMessage {
            partition: 2,
            offset: "17".to_string(),
            key: Some("5".to_string()),
            value: b"[]".to_vec(),
        };
        let envelope = Envelope::from_message(&message).unwrap();
        assert_eq!(envelope.partition, 2);
        assert_eq!(envelope.offset, "17");
        assert_eq!(envelope.key.as_deref(), Some("5"));
        assert_eq!(envelope.size, 2);
    }
}
