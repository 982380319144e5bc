//! Body codec for responses that must be inspected
//!
//! Converts between the on-wire (possibly gzip compressed) bytes and the
//! decoded bytes the response filter works on.

use crate::error::FilterError;
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::{header, HeaderMap};
use std::io::{Read, Write};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Content coding of a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Gzip,
    Identity,
}

impl ContentCoding {
    /// Determine the coding from `Content-Encoding`, sniffing the body when
    /// the header is absent.
    pub fn detect(headers: &HeaderMap, body: &[u8]) -> Result<Self, FilterError> {
        let declared = headers
            .get(header::CONTENT_ENCODING)
            .map(|v| {
                v.to_str()
                    .map(|s| s.trim().to_ascii_lowercase())
                    .map_err(|_| FilterError::UnsupportedEncoding("<non-ascii>".to_string()))
            })
            .transpose()?;

        match declared.as_deref() {
            Some("gzip") | Some("x-gzip") => Ok(ContentCoding::Gzip),
            Some("identity") | Some("") | None => {
                if body.starts_with(&GZIP_MAGIC) {
                    Ok(ContentCoding::Gzip)
                } else {
                    Ok(ContentCoding::Identity)
                }
            }
            Some(other) => Err(FilterError::UnsupportedEncoding(other.to_string())),
        }
    }

    /// Value for the `Content-Encoding` header, if any
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            ContentCoding::Gzip => Some("gzip"),
            ContentCoding::Identity => None,
        }
    }

    /// Fully decode a body, failing once the decoded size passes `limit`
    pub fn decode(self, body: &[u8], limit: usize) -> Result<Vec<u8>, FilterError> {
        let decoded = match self {
            ContentCoding::Identity if body.len() > limit => {
                return Err(FilterError::TooLarge { limit });
            }
            ContentCoding::Identity => body.to_vec(),
            ContentCoding::Gzip => {
                let mut decoded = Vec::with_capacity(body.len().saturating_mul(4).min(limit));
                // One byte past the limit is enough to tell it was exceeded
                MultiGzDecoder::new(body)
                    .take((limit as u64).saturating_add(1))
                    .read_to_end(&mut decoded)
                    .map_err(FilterError::Decode)?;
                decoded
            }
        };

        if decoded.len() > limit {
            return Err(FilterError::TooLarge { limit });
        }
        Ok(decoded)
    }

    /// Encode a decoded body for the wire
    pub fn encode(self, body: &[u8]) -> Result<Bytes, FilterError> {
        match self {
            ContentCoding::Identity => Ok(Bytes::copy_from_slice(body)),
            ContentCoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body).map_err(FilterError::Encode)?;
                let encoded = encoder.finish().map_err(FilterError::Encode)?;
                Ok(Bytes::from(encoded))
            }
        }
    }
}
