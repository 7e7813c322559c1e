//! Request-scoped values flowing through the upload pipeline.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::BoxStream;
use serde::{Serialize, Serializer};
use std::{fmt, io};

/// Single-pass byte stream carrying an upload body.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// One file handed to the pipeline by the transport layer.
///
/// The body can be read exactly once, front to back. It is never rewound.
pub struct UploadRequest<'a> {
    /// Filename as declared by the client (untrusted).
    pub filename: String,

    /// `Content-Type` declared for the file part, if any.
    pub content_type: Option<String>,

    /// Size declared ahead of the body, if the client sent one.
    pub declared_size: Option<u64>,

    pub body: ByteStream<'a>,
}

impl<'a> UploadRequest<'a> {
    pub fn new(filename: impl Into<String>, body: ByteStream<'a>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            declared_size: None,
            body,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }
}

impl fmt::Debug for UploadRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("declared_size", &self.declared_size)
            .finish_non_exhaustive()
    }
}

/// Where a resolved content type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTypeSource {
    Extension,
    SniffedBytes,
    DeclaredHeader,
}

impl fmt::Display for ContentTypeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Extension => "extension",
            Self::SniffedBytes => "sniffed-bytes",
            Self::DeclaredHeader => "declared-header",
        };
        f.write_str(label)
    }
}

/// Effective MIME type of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    /// Lowercase MIME essence, without parameters.
    pub mime_type: String,
    pub source: ContentTypeSource,
}

/// Durable record of a successful upload.
///
/// Built once the backend has committed the object and never modified after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObjectDescriptor {
    /// Sanitized filename, used as the object key.
    pub filename: String,

    /// Bytes committed to the backend.
    pub file_size: u64,

    pub bucket: String,

    /// Backend URI of the stored object (e.g. `gs://bucket/key`).
    #[serde(rename = "gcspath", skip_serializing_if = "Option::is_none")]
    pub gcs_path: Option<String>,

    /// Commit time, always UTC.
    #[serde(serialize_with = "rfc3339_utc")]
    pub upload_time: DateTime<Utc>,
}

fn rfc3339_utc<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
}
