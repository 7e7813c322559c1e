//! Recording backend for unit tests: counts sinks, injects failures, and
//! keeps committed objects in memory.

use super::{ObjectSink, ObjectStorage, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// The first `n` sinks fail on their first write.
    FailFirst(usize),
    /// Writes never complete.
    Hang,
}

#[derive(Debug, Default)]
pub struct Recorded {
    /// When each sink was opened, in order.
    pub opened_at: Vec<Instant>,
    pub aborted: usize,
    pub committed: HashMap<String, Vec<u8>>,
}

pub struct RecordingStore {
    behavior: Behavior,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingStore {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            recorded: Arc::default(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(Behavior::FailFirst(0))
    }

    pub fn opened(&self) -> usize {
        self.recorded.lock().unwrap().opened_at.len()
    }

    pub fn opened_at(&self) -> Vec<Instant> {
        self.recorded.lock().unwrap().opened_at.clone()
    }

    pub fn aborted(&self) -> usize {
        self.recorded.lock().unwrap().aborted
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.recorded.lock().unwrap().committed.get(key).cloned()
    }
}

#[async_trait]
impl ObjectStorage for RecordingStore {
    fn object_uri(&self, bucket: &str, key: &str) -> String {
        format!("mock://{bucket}/{key}")
    }

    async fn open_writer(&self, _bucket: &str, key: &str) -> StorageResult<Box<dyn ObjectSink>> {
        let attempt = {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.opened_at.push(Instant::now());
            recorded.opened_at.len()
        };
        let fails = match self.behavior {
            Behavior::FailFirst(n) => attempt <= n,
            Behavior::Hang => false,
        };

        Ok(Box::new(RecordingSink {
            key: key.to_string(),
            buf: Vec::new(),
            fails,
            hangs: self.behavior == Behavior::Hang,
            recorded: Arc::clone(&self.recorded),
        }))
    }

    async fn check(&self) -> StorageResult<()> {
        Ok(())
    }
}

struct RecordingSink {
    key: String,
    buf: Vec<u8>,
    fails: bool,
    hangs: bool,
    recorded: Arc<Mutex<Recorded>>,
}

#[async_trait]
impl ObjectSink for RecordingSink {
    async fn write(&mut self, chunk: Bytes) -> StorageResult<()> {
        if self.hangs {
            std::future::pending::<()>().await;
        }
        if self.fails {
            return Err(io::Error::other("injected write failure").into());
        }
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<u64> {
        let written = self.buf.len() as u64;
        self.recorded
            .lock()
            .unwrap()
            .committed
            .insert(self.key.clone(), self.buf.clone());
        Ok(written)
    }

    async fn abort(self: Box<Self>) {
        self.recorded.lock().unwrap().aborted += 1;
    }
}
