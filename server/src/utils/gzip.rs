//! Gzip helpers for claim-check blobs

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Decompress a single-member gzip stream.
///
/// Trailing members are ignored, matching how the gateway writes blobs.
pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4));
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Compress bytes as a single gzip member (level 6, same as the gateway)
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(6));
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompress_restores_input() {
        let json = br#"[{"sensor_uuid":"s1","status":"21.5"}]"#;
        let packed = compress(json).unwrap();
        assert_ne!(packed.as_slice(), json.as_slice());
        assert_eq!(decompress(&packed).unwrap(), json);
    }

    #[test]
    fn test_decompress_rejects_plain_json() {
        assert!(decompress(br#"{"not":"gzip"}"#).is_err());
    }

    #[test]
    fn test_decompress_rejects_truncated_stream() {
        let packed = compress(b"some telemetry payload").unwrap();
        assert!(decompress(&packed[..packed.len() / 2]).is_err());
    }
}
