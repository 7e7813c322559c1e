//! Bucket-backed storage through `object_store`.
//!
//! Production uses Google Cloud Storage; tests use the in-memory store. Each
//! sink is its own multipart upload, so an aborted attempt never shares parts
//! with the next one.

use super::{ObjectSink, ObjectStorage, StorageError, StorageResult, ensure_key_safe};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    ObjectStore, WriteMultipart, gcp::GoogleCloudStorageBuilder, memory::InMemory,
    path::Path as ObjectPath,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Part uploads allowed in flight per sink before `write` waits.
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// Key looked up by the readiness probe; it does not need to exist.
const PROBE_KEY: &str = ".readyz";

#[derive(Clone)]
pub struct CloudStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    scheme: &'static str,
}

impl CloudStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, scheme: &'static str) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            scheme,
        }
    }

    /// Google Cloud Storage client for `bucket`.
    ///
    /// Credentials come from the environment (`GOOGLE_SERVICE_ACCOUNT`,
    /// `GOOGLE_APPLICATION_CREDENTIALS`, or the metadata server).
    pub fn gcs(bucket: &str) -> StorageResult<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self::new(Arc::new(store), bucket, "gs"))
    }

    pub fn in_memory(bucket: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), bucket, "memory")
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStorage for CloudStore {
    fn object_uri(&self, bucket: &str, key: &str) -> String {
        format!("{}://{}/{}", self.scheme, bucket, key)
    }

    async fn open_writer(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn ObjectSink>> {
        if bucket != self.bucket {
            return Err(StorageError::BucketNotFound(bucket.to_string()));
        }
        ensure_key_safe(key)?;

        let location = ObjectPath::from(key);
        let upload = self.store.put_multipart(&location).await?;
        debug!(bucket, key, "opened multipart upload");

        Ok(Box::new(CloudSink {
            writer: Some(WriteMultipart::new(upload)),
            written: 0,
        }))
    }

    async fn check(&self) -> StorageResult<()> {
        match self.store.head(&ObjectPath::from(PROBE_KEY)).await {
            Ok(_) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct CloudSink {
    writer: Option<WriteMultipart>,
    written: u64,
}

#[async_trait]
impl ObjectSink for CloudSink {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        let writer = self.writer.as_mut().ok_or(StorageError::SinkClosed)?;
        writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await?;
        writer.write(&chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<u64> {
        let mut sink = self;
        let writer = sink.writer.take().ok_or(StorageError::SinkClosed)?;
        writer.finish().await?;
        Ok(sink.written)
    }

    async fn abort(self: Box<Self>) {
        let mut sink = self;
        if let Some(writer) = sink.writer.take() {
            if let Err(err) = writer.abort().await {
                warn!(error = %err, "failed to abort multipart upload");
            }
        }
    }
}
