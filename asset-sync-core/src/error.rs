//! Error types for the reconciliation pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::asset::AssetStatus;

/// Boxed error returned by external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while running a webhook stage.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("invalid filter '{filter}' for service {service}: {source}")]
    InvalidFilter {
        service: String,
        filter: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("call to {service} failed: {source}")]
    Transport {
        service: String,
        #[source]
        source: BoxError,
    },

    #[error("call to {service} timed out after {timeout_secs}s")]
    Timeout { service: String, timeout_secs: u64 },

    #[error("service {service} responded with status {status}: {body}")]
    UnexpectedStatus {
        service: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {service}: {message}")]
    InvalidResponse { service: String, message: String },

    #[error("webhook stage cancelled")]
    Cancelled,

    #[error("webhook worker failed: {0}")]
    Worker(String),
}

/// One file that could not be uploaded.
#[derive(Debug)]
pub struct UploadError {
    pub file_name: String,
    pub object_name: String,
    pub error: BoxError,
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (object {}): {}",
            self.file_name, self.object_name, self.error
        )
    }
}

/// Errors raised by the content synchronisation engine.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to list objects in bucket {bucket} under {prefix}: {source}")]
    List {
        bucket: String,
        prefix: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to remove object {object} from bucket {bucket}: {source}")]
    Remove {
        bucket: String,
        object: String,
        #[source]
        source: BoxError,
    },

    #[error("{} of {total} uploads failed: {}", .failed.len(), join_errors(.failed))]
    Upload {
        total: usize,
        failed: Vec<UploadError>,
    },

    #[error("store operation cancelled")]
    Cancelled,

    #[error("upload worker failed: {0}")]
    Worker(String),
}

fn join_errors(errors: &[UploadError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while provisioning buckets.
#[derive(Error, Debug)]
pub enum BucketError {
    #[error("failed to ensure bucket {bucket} after {attempts} attempts: {source}")]
    RetriesExhausted {
        bucket: String,
        attempts: usize,
        #[source]
        source: BoxError,
    },

    #[error("failed to set policy on bucket {bucket}: {source}")]
    Policy {
        bucket: String,
        #[source]
        source: BoxError,
    },
}

/// Error returned by a [`crate::contract::Loader`].
///
/// Carries the scratch directory when one was created before the failure so
/// the caller can release it.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct LoadError {
    pub dir: Option<PathBuf>,
    #[source]
    pub source: BoxError,
}

impl LoadError {
    pub fn new(dir: Option<PathBuf>, source: impl Into<BoxError>) -> Self {
        Self {
            dir,
            source: source.into(),
        }
    }
}

/// Failure of one step of an asset reconciliation pass.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("while resolving bucket {bucket}: {source}")]
    BucketStatus {
        bucket: String,
        #[source]
        source: BoxError,
    },

    #[error("while listing published objects: {0}")]
    ListObjects(#[source] StoreError),

    #[error("while pulling asset content: {0}")]
    Load(#[source] LoadError),

    #[error("while mutating asset content: {0}")]
    Mutation(#[source] WebhookError),

    #[error("while validating asset content: {0}")]
    Validation(#[source] WebhookError),

    #[error("while extracting asset metadata: {0}")]
    MetadataExtraction(#[source] WebhookError),

    #[error("while uploading asset content: {0}")]
    Upload(#[source] StoreError),

    #[error("while verifying published content: {0}")]
    Verification(#[source] StoreError),

    #[error("while deleting published content: {0}")]
    Delete(#[source] StoreError),
}

/// Error returned from a reconciliation pass.
///
/// `status`, when present, is the Failed status describing the error; the
/// caller persists it before surfacing the error.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct ProcessError {
    pub status: Option<AssetStatus>,
    #[source]
    pub source: HandlerError,
}
