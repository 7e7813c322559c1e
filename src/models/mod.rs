//! Data model for the upload pipeline.
//!
//! Everything here is request-scoped: values are created for one upload,
//! returned or logged, and dropped.

pub mod upload;
