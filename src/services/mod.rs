//! Upload pipeline services and storage backends.

pub mod classifier;
pub mod policy;
pub mod retry_writer;
pub mod sanitizer;
pub mod storage;
pub mod upload_service;
