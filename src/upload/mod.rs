//! Bulk upload of finished sessions to the collection server.

pub mod tcp;

pub use tcp::*;

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why an upload did not reach the collection server
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to connect: timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Failed to connect: {0}")]
    Connect(#[source] io::Error),
    #[error("Failed to send records: {0}")]
    Write(#[source] io::Error),
}

/// What a successful upload delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub records: usize,
    pub bytes: usize,
}

/// Delivers a set of record lines in one transfer. No retry: a failed
/// upload is reported and the data is discarded by the caller.
pub trait Uploader {
    fn upload(
        &self,
        lines: &[String],
    ) -> impl std::future::Future<Output = Result<UploadReport, UploadError>> + Send;
}
