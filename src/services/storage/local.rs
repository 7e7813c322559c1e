//! Local-disk backend.
//!
//! Objects live at `base_path/{bucket}/{key}`. Each sink streams into its own
//! `.tmp-{uuid}` file next to the destination, fsyncs it, and renames it into
//! place on commit, so readers never observe a half-written object.

use super::{ObjectSink, ObjectStorage, StorageError, StorageResult, ensure_key_safe};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Debug, Clone)]
pub struct LocalStore {
    /// Base directory; one subdirectory per bucket.
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Final on-disk location of an object. Parents may not exist yet.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket);
        path.push(key);
        path
    }
}

#[async_trait]
impl ObjectStorage for LocalStore {
    fn object_uri(&self, bucket: &str, key: &str) -> String {
        format!("file://{bucket}/{key}")
    }

    async fn open_writer(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn ObjectSink>> {
        ensure_bucket_name_safe(bucket)?;
        ensure_key_safe(key)?;

        let final_path = self.object_path(bucket, key);
        let parent = final_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or(StorageError::InvalidObjectKey)?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let file = File::create(&tmp_path).await?;
        debug!(tmp = %tmp_path.display(), "opened local sink");

        Ok(Box::new(LocalSink {
            file: Some(file),
            tmp_path,
            final_path,
            written: 0,
            finished: false,
        }))
    }

    /// Write, read back, and delete a probe file under the base directory.
    async fn check(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));

        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;

        if read_back? == b"readyz" {
            Ok(())
        } else {
            Err(std::io::Error::other("probe file content mismatch").into())
        }
    }
}

/// One upload attempt against the local disk.
pub struct LocalSink {
    file: Option<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    finished: bool,
}

#[async_trait]
impl ObjectSink for LocalSink {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        let file = self.file.as_mut().ok_or(StorageError::SinkClosed)?;
        file.write_all(&chunk).await?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<u64> {
        let mut sink = self;
        let file = sink.file.take().ok_or(StorageError::SinkClosed)?;
        sink.finished = true;

        if let Err(err) = persist(file, &sink.tmp_path, &sink.final_path).await {
            let _ = fs::remove_file(&sink.tmp_path).await;
            return Err(err);
        }
        Ok(sink.written)
    }

    async fn abort(self: Box<Self>) {
        let mut sink = self;
        sink.file.take();
        sink.finished = true;
        match fs::remove_file(&sink.tmp_path).await {
            Ok(()) => debug!(tmp = %sink.tmp_path.display(), "discarded local sink"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!(
                "failed to remove {} after abort: {}",
                sink.tmp_path.display(),
                err
            ),
        }
    }
}

impl Drop for LocalSink {
    fn drop(&mut self) {
        // Dropped mid-attempt (e.g. the request was cancelled).
        if !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Flush and fsync the temp file, then rename it over the destination.
async fn persist(mut file: File, tmp_path: &Path, final_path: &Path) -> StorageResult<()> {
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Err(err) = fs::rename(tmp_path, final_path).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(final_path).await?;
            fs::rename(tmp_path, final_path).await?;
        } else {
            return Err(err.into());
        }
    }
    Ok(())
}

/// Bucket names double as directory names, so hold them to S3/GCS rules:
/// 3-63 chars of lowercase letters, digits, dots and hyphens, alphanumeric at
/// both ends, no `..`, and not shaped like an IPv4 address.
fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
    let invalid = |reason| {
        Err(StorageError::InvalidBucketName {
            name: name.to_string(),
            reason,
        })
    };

    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
        return invalid("must be between 3 and 63 characters");
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
    {
        return invalid("allowed characters are lowercase letters, digits, dots, hyphens, and underscores");
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric())
        || !name.ends_with(|c: char| c.is_ascii_alphanumeric())
    {
        return invalid("must start and end with a lowercase letter or digit");
    }
    if name.contains("..") {
        return invalid("cannot contain consecutive dots");
    }
    if is_ipv4_like(name) {
        return invalid("must not be formatted like an IP address");
    }
    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|segment| !segment.is_empty() && segment.parse::<u8>().is_ok())
}
