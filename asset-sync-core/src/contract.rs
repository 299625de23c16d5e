//! # contract: collaborator interfaces of the reconciliation pipeline
//!
//! Every capability the pipeline consumes from the outside world is a trait
//! declared here: the object store, bucket administration, content loading,
//! bucket status lookup, event recording and webhook calls.
//!
//! ## Mocking & Testing
//! - Traits are annotated for `mockall`; with the `test-export-mocks` feature
//!   (on by default) the generated `Mock*` types are exported so integration
//!   tests can script collaborator behaviour.
//!
//! ## Error Handling
//! - External systems have open-ended failure modes, so collaborator methods
//!   return [`BoxError`]. The loader is the exception: its error keeps the
//!   scratch directory so the caller can release it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::asset::{AssetMode, BucketStatus, ObjectMeta, WebhookService};
pub use crate::error::BoxError;
use crate::error::{LoadError, WebhookError};

/// Object-level operations against a bucket.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Names of every object whose name starts with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BoxError>;

    /// Uploads the local file at `file_path` as `object_name`, returning the bytes written.
    async fn put_object(
        &self,
        bucket: &str,
        object_name: &str,
        file_path: &Path,
    ) -> Result<u64, BoxError>;

    async fn remove_object(&self, bucket: &str, object_name: &str) -> Result<(), BoxError>;
}

/// Bucket administration.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BucketClient: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BoxError>;

    async fn make_bucket(&self, bucket: &str, region: &str) -> Result<(), BoxError>;

    /// Replaces the access policy document of the bucket.
    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> Result<(), BoxError>;
}

/// Files fetched into a scratch directory by a [`Loader`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedContent {
    pub dir: PathBuf,
    /// Paths relative to `dir`, `/`-separated.
    pub files: Vec<String>,
}

/// Turns a source reference into a local directory of files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(
        &self,
        src: &str,
        asset_name: &str,
        mode: AssetMode,
        filter: &str,
    ) -> Result<LoadedContent, LoadError>;

    /// Releases a scratch directory returned by `load`.
    async fn clean(&self, dir: &Path) -> Result<(), BoxError>;
}

/// Looks up the status of the bucket an asset references.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BucketStatusFinder: Send + Sync {
    /// `Ok(None)` when the bucket is not known.
    async fn find(
        &self,
        namespace: &str,
        bucket_name: &str,
    ) -> Result<Option<BucketStatus>, BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// Records human-readable events against a resource.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait EventRecorder: Send + Sync {
    fn record(&self, resource: &ObjectMeta, severity: Severity, reason: &str, message: &str);
}

/// Metadata a service extracted for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_path: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate outcome of one webhook stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StageResult {
    pub success: bool,
    /// Messages of services that reported a failure.
    pub messages: Vec<String>,
    pub metadata: Vec<FileMetadata>,
}

impl StageResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }
}

/// One webhook stage (mutation, validation or metadata extraction) as seen by
/// the asset state machine.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait WebhookStage: Send + Sync {
    async fn run(
        &self,
        cancel: &CancellationToken,
        base_dir: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<StageResult, WebhookError>;
}

/// File shipped to a webhook service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookFile {
    pub name: String,
    /// Base64-encoded file content.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub files: Vec<WebhookFile>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Delivers one webhook request and returns the raw response.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn call(&self, url: &str, request: &WebhookRequest) -> Result<WebhookResponse, BoxError>;
}
