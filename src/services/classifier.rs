//! Content-type classification for uploaded files.
//!
//! Resolution order:
//! 1. a recognized filename extension wins outright (spreadsheet formats are
//!    zip or OLE containers and sniff ambiguously);
//! 2. otherwise the first [`SNIFF_LEN`] bytes are sniffed for a magic number,
//!    falling back to a text/binary check;
//! 3. CSV and OOXML overrides disambiguate the sniffed candidate, and a
//!    declared textual header may refine a bare `text/plain`.
//!
//! The classifier never consults the allow-list.

use crate::models::upload::{ByteStream, ClassificationResult, ContentTypeSource};
use bytes::BytesMut;
use futures::{StreamExt, stream};
use std::io;
use thiserror::Error;

/// Upper bound on the bytes inspected for sniffing.
pub const SNIFF_LEN: usize = 512;

pub const CSV: &str = "text/csv";
pub const TEXT_PLAIN: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const ZIP: &str = "application/zip";
pub const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const ZIP_LOCAL_HEADER: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("empty filename")]
    EmptyFilename,
    #[error("file is empty")]
    EmptyStream,
    #[error("failed to read file: {0}")]
    Read(#[source] io::Error),
}

/// A classification plus the body, rebuilt so no sampled byte is lost.
pub struct Classified<'a> {
    pub result: ClassificationResult,
    pub body: ByteStream<'a>,
}

/// Resolve the effective MIME type of `body`.
///
/// Reads at most one chunk past what is needed for a [`SNIFF_LEN`] sample;
/// the returned body replays those bytes before the untouched remainder.
pub async fn classify<'a>(
    filename: &str,
    declared: Option<&str>,
    mut body: ByteStream<'a>,
) -> Result<Classified<'a>, ClassifyError> {
    // "." survives sanitizing but cannot name an object.
    if filename.bytes().all(|b| b == b'.') {
        return Err(ClassifyError::EmptyFilename);
    }

    let prefix = read_prefix(&mut body).await?;
    let sample = &prefix[..prefix.len().min(SNIFF_LEN)];
    let result = resolve(filename, declared, sample);

    let replay = stream::once(async move { Ok(prefix.freeze()) })
        .chain(body)
        .boxed();

    Ok(Classified {
        result,
        body: replay,
    })
}

/// Pull chunks until at least [`SNIFF_LEN`] bytes are buffered or the body ends.
async fn read_prefix(body: &mut ByteStream<'_>) -> Result<BytesMut, ClassifyError> {
    let mut prefix = BytesMut::with_capacity(SNIFF_LEN);
    while prefix.len() < SNIFF_LEN {
        match body.next().await {
            Some(Ok(chunk)) => prefix.extend_from_slice(&chunk),
            Some(Err(err)) => return Err(ClassifyError::Read(err)),
            None => break,
        }
    }

    if prefix.is_empty() {
        return Err(ClassifyError::EmptyStream);
    }
    Ok(prefix)
}

fn resolve(filename: &str, declared: Option<&str>, sample: &[u8]) -> ClassificationResult {
    if let Some(mime_type) = type_from_extension(filename) {
        return ClassificationResult {
            mime_type,
            source: ContentTypeSource::Extension,
        };
    }

    let candidate = apply_overrides(filename, sniff(sample), sample);
    if candidate == TEXT_PLAIN {
        if let Some(declared) = declared.and_then(textual_essence) {
            return ClassificationResult {
                mime_type: declared,
                source: ContentTypeSource::DeclaredHeader,
            };
        }
    }

    ClassificationResult {
        mime_type: candidate.to_string(),
        source: ContentTypeSource::SniffedBytes,
    }
}

fn type_from_extension(filename: &str) -> Option<String> {
    mime_guess::from_path(filename)
        .first()
        .map(|mime| mime.essence_str().to_ascii_lowercase())
}

/// Magic-number detection, then the browser rule: any binary data byte
/// means opaque bytes, otherwise plain text.
fn sniff(sample: &[u8]) -> &'static str {
    if let Some(kind) = infer::get(sample) {
        return kind.mime_type();
    }
    if sample.iter().copied().any(is_binary_data_byte) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN
    }
}

fn is_binary_data_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

fn apply_overrides<'t>(filename: &str, candidate: &'t str, sample: &[u8]) -> &'t str {
    let lower = filename.to_ascii_lowercase();

    if lower.contains(".csv") && sample.iter().any(|b| matches!(b, b',' | b';')) {
        return CSV;
    }

    if candidate == ZIP && lower.contains(".xlsx") && sample.starts_with(&ZIP_LOCAL_HEADER) {
        return XLSX;
    }

    candidate
}

/// Essence of a declared header, if it names a textual type.
fn textual_essence(declared: &str) -> Option<String> {
    let essence = declared.split(';').next()?.trim().to_ascii_lowercase();
    let (kind, subtype) = essence.split_once('/')?;
    if kind.is_empty() || subtype.is_empty() {
        return None;
    }

    let textual = kind == "text"
        || essence == "application/json"
        || essence == "application/csv"
        || subtype.ends_with("+json");
    textual.then_some(essence)
}
