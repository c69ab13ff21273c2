use axum::http::{header, HeaderMap, HeaderValue};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

const GZIP: &str = "gzip";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read gzip-encoded content: {0}")]
    Decode(#[source] std::io::Error),

    #[error("failed to write gzip-encoded content: {0}")]
    Encode(#[source] std::io::Error),
}

pub fn is_compressed(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.trim().eq_ignore_ascii_case(GZIP))
}

/// Inflates a whole gzip body. Concatenated members are read back to back.
pub fn decode(data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut decoded = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut decoded)
        .map_err(TransportError::Decode)?;
    Ok(decoded)
}

pub fn encode(data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(TransportError::Encode)?;
    encoder.finish().map_err(TransportError::Encode)
}

pub fn set_content_encoding(headers: &mut HeaderMap, compressed: bool) {
    if compressed {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(GZIP));
    } else {
        headers.remove(header::CONTENT_ENCODING);
    }
}

pub fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}
