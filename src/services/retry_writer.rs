//! Write-through to the backend with a fixed retry schedule.
//!
//! Each attempt opens its own sink and replays the whole payload into it.
//! A sink that failed is aborted and never written to again.

use crate::services::storage::{ObjectStorage, StorageError, StorageResult};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Delays between attempts: 100 ms, 500 ms, 1 s (four attempts in total).
pub const DEFAULT_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(1),
];

/// Payload slice handed to the sink per write call.
const WRITE_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("upload failed after {attempts} attempts")]
    Exhausted {
        attempts: usize,
        #[source]
        source: StorageError,
    },
    #[error("upload cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RetryingWriter {
    backoff: Vec<Duration>,
}

impl RetryingWriter {
    /// `backoff[i]` is the wait after failed attempt `i + 1`; the writer makes
    /// `backoff.len() + 1` attempts.
    pub fn new(backoff: impl Into<Vec<Duration>>) -> Self {
        Self {
            backoff: backoff.into(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }

    /// Store `payload` under `bucket/key`, returning the bytes committed.
    ///
    /// Cancellation drops the in-flight attempt and stops retrying.
    pub async fn write(
        &self,
        storage: &dyn ObjectStorage,
        bucket: &str,
        key: &str,
        payload: &Bytes,
        cancel: &CancellationToken,
    ) -> Result<u64, WriteError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WriteError::Cancelled),
                outcome = write_once(storage, bucket, key, payload) => outcome,
            };

            let err = match outcome {
                Ok(written) => {
                    debug!(attempt, written, key, "object committed");
                    return Ok(written);
                }
                Err(err) => err,
            };

            let delay = match self.backoff.get(attempt - 1) {
                Some(delay) if err.is_transient() => *delay,
                _ => {
                    return Err(WriteError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
            };

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                key,
                error = %err,
                "write attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WriteError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryingWriter {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF)
    }
}

/// One full copy of `payload` into a fresh sink.
async fn write_once(
    storage: &dyn ObjectStorage,
    bucket: &str,
    key: &str,
    payload: &Bytes,
) -> StorageResult<u64> {
    let mut sink = storage.open_writer(bucket, key).await?;

    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + WRITE_CHUNK_SIZE).min(payload.len());
        if let Err(err) = sink.write(payload.slice(offset..end)).await {
            sink.abort().await;
            return Err(err);
        }
        offset = end;
    }

    sink.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::{
        LocalStore,
        testing::{Behavior, RecordingStore},
    };
    use tokio::time::Instant;

    fn payload() -> Bytes {
        Bytes::from_static(b"a,b,c\n1,2,3")
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_does_not_retry() {
        let store = RecordingStore::healthy();
        let written = RetryingWriter::default()
            .write(&store, "b", "k.csv", &payload(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(store.opened(), 1);
        assert_eq!(store.object("k.csv").unwrap(), b"a,b,c\n1,2,3");
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_then_success_uses_two_fresh_sinks() {
        let store = RecordingStore::new(Behavior::FailFirst(1));
        let written = RetryingWriter::default()
            .write(&store, "b", "k.csv", &payload(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(store.opened(), 2);
        assert_eq!(store.aborted(), 1);
        assert_eq!(store.object("k.csv").unwrap(), b"a,b,c\n1,2,3");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_after_four_attempts_with_fixed_backoff() {
        let store = RecordingStore::new(Behavior::FailFirst(usize::MAX));
        let err = RetryingWriter::default()
            .write(&store, "b", "k.csv", &payload(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WriteError::Exhausted {
                attempts: 4,
                source: StorageError::Io(_)
            }
        ));
        assert_eq!(store.opened(), 4);
        assert!(store.object("k.csv").is_none());

        let opened = store.opened_at();
        let gaps: Vec<Duration> = opened.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, DEFAULT_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retries() {
        let store = RecordingStore::new(Behavior::FailFirst(usize::MAX));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = RetryingWriter::default()
            .write(&store, "b", "k.csv", &payload(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::Cancelled));
        assert_eq!(store.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_abandons_in_flight_write() {
        let store = RecordingStore::new(Behavior::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });

        let err = RetryingWriter::default()
            .write(&store, "b", "k.csv", &payload(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, WriteError::Cancelled));
        assert_eq!(store.opened(), 1);
        assert!(store.object("k.csv").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let started = Instant::now();

        let err = RetryingWriter::default()
            .write(&store, "Not A Bucket", "k.csv", &payload(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WriteError::Exhausted {
                attempts: 1,
                source: StorageError::InvalidBucketName { .. }
            }
        ));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn default_schedule_allows_four_attempts() {
        assert_eq!(RetryingWriter::default().max_attempts(), 4);
    }
}
