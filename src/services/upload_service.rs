//! UploadService: the single-file upload pipeline.
//!
//! sanitize → classify → validate → spool → write → describe.
//!
//! Validation happens before any backend call, so a rejected upload never
//! opens a sink. The validated body is spooled into memory (bounded by the
//! policy limit) because the request stream is single-pass and every retry
//! attempt must replay the full payload.

use crate::{
    models::upload::{ByteStream, StoredObjectDescriptor, UploadRequest},
    services::{
        classifier::{Classified, ClassifyError, classify},
        policy::{RejectReason, UploadPolicy, UploadPolicyDecision},
        retry_writer::{RetryingWriter, WriteError},
        sanitizer::sanitize_filename,
        storage::ObjectStorage,
    },
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use std::{error::Error as _, io, sync::Arc, time::Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Which side of the request is responsible for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Client,
    Server,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file could not be classified: {0}")]
    Classification(#[from] ClassifyError),
    #[error("file type `{mime_type}` is not allowed")]
    TypeNotAllowed {
        mime_type: String,
        allowed: Vec<String>,
    },
    /// `size` is the declared size, or the bytes read when the limit tripped
    /// mid-stream, so it is a lower bound on the real size.
    #[error("file is larger than the limit of {limit} bytes")]
    SizeExceeded { size: u64, limit: u64 },
    #[error("failed to read upload body: {0}")]
    BodyRead(#[source] io::Error),
    #[error("failed to store file")]
    Storage(#[source] WriteError),
    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn fault(&self) -> Fault {
        match self {
            Self::TypeNotAllowed { .. } | Self::SizeExceeded { .. } | Self::BodyRead(_) => {
                Fault::Client
            }
            Self::Classification(_) | Self::Storage(_) | Self::Cancelled => Fault::Server,
        }
    }

    /// Policy reason code, for rejections.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::TypeNotAllowed { .. } => Some(RejectReason::TypeNotAllowed),
            Self::SizeExceeded { .. } => Some(RejectReason::SizeExceeded),
            _ => None,
        }
    }
}

impl From<WriteError> for UploadError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}

#[derive(Clone)]
pub struct UploadService {
    /// Process-wide backend client, shared by every request.
    storage: Arc<dyn ObjectStorage>,
    bucket: String,
    policy: Arc<UploadPolicy>,
    writer: RetryingWriter,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        bucket: impl Into<String>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            storage,
            bucket: bucket.into(),
            policy: Arc::new(policy),
            writer: RetryingWriter::default(),
        }
    }

    pub fn with_writer(mut self, writer: RetryingWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn storage(&self) -> &dyn ObjectStorage {
        self.storage.as_ref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Validate and persist one uploaded file.
    ///
    /// Every failure comes back as an [`UploadError`]; use
    /// [`UploadError::fault`] to tell client mistakes from server faults.
    pub async fn upload_file(
        &self,
        cancel: &CancellationToken,
        request: UploadRequest<'_>,
    ) -> Result<StoredObjectDescriptor, UploadError> {
        let started = Instant::now();
        let key = sanitize_filename(&request.filename);

        let result = self.run(cancel, &key, request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(stored) => info!(
                filename = %stored.filename,
                size = stored.file_size,
                uri = stored.gcs_path.as_deref().unwrap_or_default(),
                duration_ms,
                "file uploaded successfully"
            ),
            Err(err) if err.fault() == Fault::Client => error!(
                filename = %key,
                error = %err,
                fault = "client",
                duration_ms,
                "upload rejected"
            ),
            Err(err) => error!(
                filename = %key,
                error = %error_chain(err),
                fault = "server",
                duration_ms,
                "upload failed"
            ),
        }
        result
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        key: &str,
        request: UploadRequest<'_>,
    ) -> Result<StoredObjectDescriptor, UploadError> {
        let UploadRequest {
            content_type,
            declared_size,
            body,
            ..
        } = request;

        let Classified {
            result: classification,
            body,
        } = classify(key, content_type.as_deref(), body).await?;
        debug!(
            filename = %key,
            content_type = %classification.mime_type,
            source = %classification.source,
            "file content type detected"
        );

        match self.policy.evaluate(&classification.mime_type, declared_size) {
            UploadPolicyDecision::Accept => {}
            UploadPolicyDecision::Reject(RejectReason::TypeNotAllowed) => {
                return Err(UploadError::TypeNotAllowed {
                    mime_type: classification.mime_type,
                    allowed: self.policy.allowed_types().map(str::to_string).collect(),
                });
            }
            UploadPolicyDecision::Reject(RejectReason::SizeExceeded) => {
                return Err(UploadError::SizeExceeded {
                    size: declared_size.unwrap_or_default(),
                    limit: self.policy.max_bytes(),
                });
            }
        }

        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            payload = self.spool(body) => payload?,
        };

        let written = self
            .writer
            .write(self.storage.as_ref(), &self.bucket, key, &payload, cancel)
            .await?;

        Ok(StoredObjectDescriptor {
            filename: key.to_string(),
            file_size: written,
            bucket: self.bucket.clone(),
            gcs_path: Some(self.storage.object_uri(&self.bucket, key)),
            upload_time: Utc::now(),
        })
    }

    /// Buffer the body, tripping the size breaker as soon as the running
    /// total passes the limit.
    async fn spool(&self, mut body: ByteStream<'_>) -> Result<Bytes, UploadError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(UploadError::BodyRead)?;
            let observed = (buf.len() + chunk.len()) as u64;
            if let UploadPolicyDecision::Reject(_) = self.policy.check_observed(observed) {
                return Err(UploadError::SizeExceeded {
                    size: observed,
                    limit: self.policy.max_bytes(),
                });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// `err: cause: cause` for log lines.
fn error_chain(err: &UploadError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
