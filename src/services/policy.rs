//! Allow-list and size ceiling for uploads.

use crate::services::classifier::{CSV, XLSX};
use std::{collections::BTreeSet, fmt};

/// Default ceiling: 10 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_ALLOWED_TYPES: &[&str] = &[
    CSV,
    "application/csv",
    "application/vnd.ms-excel",
    XLSX,
    "application/json",
];

/// Why an upload was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TypeNotAllowed,
    SizeExceeded,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeNotAllowed => f.write_str("type-not-allowed"),
            Self::SizeExceeded => f.write_str("size-exceeded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPolicyDecision {
    Accept,
    Reject(RejectReason),
}

/// Immutable upload policy, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    max_bytes: u64,
    allowed_types: BTreeSet<String>,
}

impl UploadPolicy {
    pub fn new<I, S>(max_bytes: u64, allowed_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            max_bytes,
            allowed_types: allowed_types
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self::new(max_bytes, DEFAULT_ALLOWED_TYPES)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn allowed_types(&self) -> impl Iterator<Item = &str> {
        self.allowed_types.iter().map(String::as_str)
    }

    pub fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed_types.contains(mime_type)
    }

    /// Check a resolved type and, when the client declared one, its size.
    pub fn evaluate(&self, mime_type: &str, declared_size: Option<u64>) -> UploadPolicyDecision {
        if !self.is_allowed(mime_type) {
            return UploadPolicyDecision::Reject(RejectReason::TypeNotAllowed);
        }
        match declared_size {
            Some(size) => self.check_observed(size),
            None => UploadPolicyDecision::Accept,
        }
    }

    /// Size breaker for bytes actually read so far.
    pub fn check_observed(&self, observed: u64) -> UploadPolicyDecision {
        if observed > self.max_bytes {
            UploadPolicyDecision::Reject(RejectReason::SizeExceeded)
        } else {
            UploadPolicyDecision::Accept
        }
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_BYTES)
    }
}
