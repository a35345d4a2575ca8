//! Remote Value Codec
//!
//! Values are stored in the remote tier as JSON text. When a write asks for
//! compression and the encoded text is large enough, the text is LZ4
//! block-compressed and framed with a short magic prefix. The prefix starts
//! with a NUL byte, which never begins valid JSON, so plain and compressed
//! values can be told apart on read.
//!
//! Decoding never fails: a stored value that is not valid JSON (for example
//! one written by another client) is returned as a JSON string holding the
//! raw text.

use bytes::Bytes;
use lz4::block::CompressionMode;
use serde::{Deserialize, Serialize};

use super::entry::CacheValue;
use crate::error::{Error, Result};

/// Frame marker for LZ4-compressed values
const LZ4_MAGIC: &[u8] = b"\0LZ4";

/// Largest value the remote tier accepts by default (Redis string limit)
pub const DEFAULT_MAX_VALUE_BYTES: usize = 512 * 1024 * 1024;

/// Codec configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Encoded values smaller than this are stored uncompressed
    pub min_compress_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
    /// Upper bound on the encoded JSON size
    pub max_value_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            min_compress_bytes: 1024,
            level: 4,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
        }
    }
}

/// Encoder/decoder for remote values
#[derive(Debug, Clone, Default)]
pub struct ValueCodec {
    config: CodecConfig,
}

impl ValueCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    /// Encode a value, compressing when requested and worthwhile
    pub fn encode(&self, value: &CacheValue, compress: bool) -> Result<Bytes> {
        let json = serde_json::to_vec(value)?;
        if json.len() > self.config.max_value_bytes {
            return Err(Error::PayloadTooLarge {
                size: json.len(),
                limit: self.config.max_value_bytes,
            });
        }

        if !compress || json.len() < self.config.min_compress_bytes {
            return Ok(Bytes::from(json));
        }

        let compressed = lz4::block::compress(
            &json,
            Some(CompressionMode::HIGHCOMPRESSION(self.config.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })?;

        // Only keep the compressed form if it is actually smaller
        if compressed.len() + LZ4_MAGIC.len() >= json.len() {
            return Ok(Bytes::from(json));
        }

        let mut framed = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
        framed.extend_from_slice(LZ4_MAGIC);
        framed.extend_from_slice(&compressed);
        Ok(Bytes::from(framed))
    }

    /// Decode a stored value
    pub fn decode(&self, raw: &[u8]) -> CacheValue {
        if let Some(body) = raw.strip_prefix(LZ4_MAGIC) {
            match lz4::block::decompress(body, None) {
                Ok(json) => return parse_or_raw(&json),
                Err(e) => {
                    tracing::warn!(error = %e, "Stored value has LZ4 frame but failed to decompress");
                }
            }
        }
        parse_or_raw(raw)
    }

    /// True when `raw` carries the compressed frame
    pub fn is_compressed(raw: &[u8]) -> bool {
        raw.starts_with(LZ4_MAGIC)
    }
}

fn parse_or_raw(raw: &[u8]) -> CacheValue {
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| CacheValue::String(String::from_utf8_lossy(raw).into_owned()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_structured_value() {
        let codec = ValueCodec::default();
        let value = json!({"id": 7, "tags": ["a", "b"], "nested": {"ok": true}});
        let raw = codec.encode(&value, false).unwrap();
        assert!(!ValueCodec::is_compressed(&raw));
        assert_eq!(codec.decode(&raw), value);
    }

    #[test]
    fn test_compression_applies_above_threshold() {
        let codec = ValueCodec::new(CodecConfig {
            min_compress_bytes: 64,
            ..Default::default()
        });
        let value = json!({"body": "abcdefgh".repeat(200)});
        let raw = codec.encode(&value, true).unwrap();
        assert!(ValueCodec::is_compressed(&raw));
        assert_eq!(codec.decode(&raw), value);

        // Small values are left as plain JSON even when compression is requested
        let small = codec.encode(&json!("tiny"), true).unwrap();
        assert!(!ValueCodec::is_compressed(&small));
    }

    #[test]
    fn test_non_json_falls_back_to_string() {
        let codec = ValueCodec::default();
        assert_eq!(codec.decode(b"plain text"), json!("plain text"));
        assert_eq!(codec.decode(b"42"), json!(42));
    }

    #[test]
    fn test_payload_limit() {
        let codec = ValueCodec::new(CodecConfig {
            max_value_bytes: 8,
            ..Default::default()
        });
        assert_matches!(
            codec.encode(&json!("this is too long"), false),
            Err(Error::PayloadTooLarge { limit: 8, .. })
        );
    }
}
