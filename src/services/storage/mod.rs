//! Object-storage backends.
//!
//! The pipeline only sees [`ObjectStorage`] and [`ObjectSink`]. Every call to
//! [`ObjectStorage::open_writer`] returns an independent sink, so a failed
//! write can be retried without touching bytes from the earlier attempt.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

pub mod cloud;
pub mod local;
#[cfg(test)]
pub(crate) mod testing;

pub use cloud::CloudStore;
pub use local::LocalStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: &'static str },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("sink already finished")]
    SinkClosed,
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    /// Whether another attempt against the same backend could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BucketNotFound(_)
            | Self::InvalidBucketName { .. }
            | Self::InvalidObjectKey
            | Self::SinkClosed => false,
            Self::ObjectStore(_) | Self::Io(_) => true,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A backend able to hand out writers for `(bucket, key)` pairs.
///
/// Implementations are shared by every request and must be safe for
/// concurrent use.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// URI under which `key` is addressable once committed.
    fn object_uri(&self, bucket: &str, key: &str) -> String;

    /// Open a fresh sink for `key`. Nothing becomes visible until commit.
    async fn open_writer(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn ObjectSink>>;

    /// Cheap round-trip used by the readiness probe.
    async fn check(&self) -> StorageResult<()>;
}

/// Write side of a single object upload attempt.
#[async_trait]
pub trait ObjectSink: Send {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()>;

    /// Make the object durable and visible; returns the bytes committed.
    async fn commit(self: Box<Self>) -> StorageResult<u64>;

    /// Discard whatever this attempt wrote. Best effort.
    async fn abort(self: Box<Self>);
}

/// Reject keys that could escape a bucket or confuse a backend.
///
/// Keys reaching a backend are already sanitized; this is the backend's own
/// guard for callers that bypass the pipeline.
pub(crate) fn ensure_key_safe(key: &str) -> StorageResult<()> {
    const MAX_OBJECT_KEY_LEN: usize = 1024;

    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key == "." || key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}
