//! Authenticated single-file upload service.
//!
//! A multipart upload is sanitized, classified, checked against an
//! immutable [`services::policy::UploadPolicy`], and written to object
//! storage with a fixed retry schedule.

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
