//! Cache-friendly response envelopes
//!
//! A rendered image is a pure function of the renderer version, the output
//! format and the source, so the entity tag is derived from exactly those and
//! the response may be cached for a long time.

use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::decode::DiagramSource;
use crate::format::FileFormat;

/// Five days
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(432_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age: Duration,
}

impl CachePolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn header_value(&self) -> String {
        format!("public, max-age={}", self.max_age.as_secs())
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

/// Transport-independent response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub body: Bytes,
}

/// Builds success responses for one service version
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    version: String,
    cache_control: String,
}

impl ResponseBuilder {
    pub fn new(version: impl Into<String>, policy: CachePolicy) -> Self {
        Self {
            version: version.into(),
            cache_control: policy.header_value(),
        }
    }

    /// Quoted strong entity tag for `(version, format, source)`
    pub fn etag(&self, source: &DiagramSource, format: FileFormat) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        hasher.update([0u8]);
        hasher.update(format.name().as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    /// 200 response carrying the rendered bytes verbatim
    pub fn build(&self, source: &DiagramSource, format: FileFormat, body: Bytes) -> ResponseEnvelope {
        ResponseEnvelope {
            status: 200,
            content_type: Some(format.mime_type()),
            etag: Some(self.etag(source, format)),
            cache_control: Some(self.cache_control.clone()),
            body,
        }
    }

    /// 304 response for a request whose validator already matches
    pub fn not_modified(&self, etag: String) -> ResponseEnvelope {
        ResponseEnvelope {
            status: 304,
            content_type: None,
            etag: Some(etag),
            cache_control: Some(self.cache_control.clone()),
            body: Bytes::new(),
        }
    }
}

/// Whether an `If-None-Match` header value matches `etag`
///
/// Weak comparison, as RFC 9110 requires for `If-None-Match`.
pub fn if_none_match(header: &str, etag: &str) -> bool {
    let wanted = etag.trim_start_matches("W/");
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == wanted
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &str) -> DiagramSource {
        DiagramSource::from_raw(text.to_string(), 1024).unwrap()
    }

    #[test]
    fn test_build_sets_headers_and_keeps_body_verbatim() {
        let builder = ResponseBuilder::new("2.43.0", CachePolicy::default());
        let body = Bytes::from_static(b"\x89PNG\r\n\x1a\n\0\0binary");
        let response = builder.build(&source("graph { a -- b }"), FileFormat::Png, body.clone());

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, Some("image/png"));
        assert_eq!(response.cache_control.as_deref(), Some("public, max-age=432000"));
        assert_eq!(response.body, body);

        let etag = response.etag.unwrap();
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 64 + 2);
    }

    #[test]
    fn test_etag_is_deterministic() {
        let builder = ResponseBuilder::new("1.0", CachePolicy::default());
        let first = builder.etag(&source("a -> b"), FileFormat::Svg);
        let second = builder.etag(&source("a -> b"), FileFormat::Svg);
        assert_eq!(first, second);
    }

    #[test]
    fn test_etag_depends_on_every_input() {
        let v1 = ResponseBuilder::new("1.0", CachePolicy::default());
        let v2 = ResponseBuilder::new("2.0", CachePolicy::default());
        let base = v1.etag(&source("a -> b"), FileFormat::Svg);

        assert_ne!(base, v2.etag(&source("a -> b"), FileFormat::Svg));
        assert_ne!(base, v1.etag(&source("a -> b"), FileFormat::Png));
        assert_ne!(base, v1.etag(&source("a -> c"), FileFormat::Svg));
    }

    #[test]
    fn test_not_modified_has_no_body() {
        let builder = ResponseBuilder::new("1.0", CachePolicy::new(Duration::from_secs(60)));
        let response = builder.not_modified("\"abc\"".to_string());
        assert_eq!(response.status, 304);
        assert!(response.body.is_empty());
        assert_eq!(response.content_type, None);
        assert_eq!(response.cache_control.as_deref(), Some("public, max-age=60"));
    }

    #[test]
    fn test_if_none_match() {
        assert!(if_none_match("\"abc\"", "\"abc\""));
        assert!(if_none_match("\"x\", W/\"abc\"", "\"abc\""));
        assert!(if_none_match("*", "\"abc\""));
        assert!(!if_none_match("\"abd\"", "\"abc\""));
        assert!(!if_none_match("", "\"abc\""));
    }
}
