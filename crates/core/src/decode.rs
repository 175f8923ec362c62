//! Diagram source decoding
//!
//! Sources embedded in a URL are zlib-compressed and then base64-encoded with
//! the URL-safe alphabet. The payload is untrusted: every failure surfaces as
//! a [`DecodeError`] and decompression stops one byte past the configured
//! limit, so an oversized or hostile payload never reaches a renderer.

use std::io::Write;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use thiserror::Error;

/// Default upper bound for a decoded source (1 MiB)
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 1024 * 1024;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("source is empty")]
    Empty,

    #[error("invalid base64 encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid compressed stream: {0}")]
    InvalidCompression(String),

    #[error("source exceeds the maximum size of {limit} bytes")]
    TooLarge {
        /// Configured maximum in bytes
        limit: usize,
    },
}

/// Literal diagram description, immutable for the lifetime of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramSource {
    bytes: Bytes,
}

impl DiagramSource {
    /// Wrap a raw (unencoded) source, e.g. a POST body
    pub fn from_raw(bytes: impl Into<Bytes>, max_source_bytes: usize) -> Result<Self, DecodeError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        if bytes.len() > max_source_bytes {
            return Err(DecodeError::TooLarge {
                limit: max_source_bytes,
            });
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap handle to the underlying buffer
    pub fn to_bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Turns an encoded string into a [`DiagramSource`]
///
/// Implementations must be pure: no I/O and no process spawning.
pub trait SourceDecoder: Send + Sync {
    fn decode(&self, encoded: &str) -> Result<DiagramSource, DecodeError>;
}

/// Decoder for the zlib + URL-safe base64 scheme
#[derive(Debug, Clone, Copy)]
pub struct CompressedSourceDecoder {
    max_source_bytes: usize,
}

impl CompressedSourceDecoder {
    pub fn new(max_source_bytes: usize) -> Self {
        Self { max_source_bytes }
    }

    pub fn max_source_bytes(&self) -> usize {
        self.max_source_bytes
    }
}

impl Default for CompressedSourceDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SOURCE_BYTES)
    }
}

impl SourceDecoder for CompressedSourceDecoder {
    fn decode(&self, encoded: &str) -> Result<DiagramSource, DecodeError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(DecodeError::Empty);
        }

        // Accept the standard alphabet as well
        let normalized: String = encoded
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();

        let compressed = URL_SAFE_LENIENT
            .decode(normalized.as_bytes())
            .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

        let decoded = inflate(&compressed, self.max_source_bytes)?;
        DiagramSource::from_raw(decoded, self.max_source_bytes)
    }
}

/// Inflate a zlib stream, producing at most `limit + 1` bytes
///
/// The stream must be complete: running out of input before the end marker is
/// reported as [`DecodeError::InvalidCompression`].
fn inflate(compressed: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let ceiling = limit.saturating_add(1);
    let mut inflater = Decompress::new(true);
    let mut decoded = Vec::with_capacity(compressed.len().saturating_mul(4).min(ceiling));

    loop {
        let consumed = inflater.total_in() as usize;
        let status = inflater
            .decompress_vec(&compressed[consumed..], &mut decoded, FlushDecompress::Finish)
            .map_err(|e| DecodeError::InvalidCompression(e.to_string()))?;

        if decoded.len() > limit {
            return Err(DecodeError::TooLarge { limit });
        }
        match status {
            Status::StreamEnd if (inflater.total_in() as usize) < compressed.len() => {
                return Err(DecodeError::InvalidCompression(
                    "trailing data after compressed stream".to_string(),
                ))
            }
            Status::StreamEnd => return Ok(decoded),
            _ if decoded.len() == decoded.capacity() => {
                let grow = decoded.capacity().max(64).min(ceiling - decoded.len());
                decoded.reserve(grow);
            }
            _ => {
                return Err(DecodeError::InvalidCompression(
                    "unexpected end of compressed stream".to_string(),
                ))
            }
        }
    }
}

/// Encode a source for use in a GET URL (inverse of [`CompressedSourceDecoder`])
pub fn encode(source: &[u8]) -> String {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    // Writing into a Vec cannot fail
    let compressed = encoder
        .write_all(source)
        .and_then(|_| encoder.finish())
        .unwrap_or_default();
    URL_SAFE_NO_PAD.encode(compressed)
}
