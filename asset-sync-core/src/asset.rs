//! Asset data model: identity, declarative spec and machine-readable status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a reconciled resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Bumped by the owner on every spec edit.
    #[serde(default = "default_generation")]
    pub generation: i64,
    /// Set by the owner when the resource is being removed.
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_generation() -> i64 {
    1
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            generation: default_generation(),
            deletion_timestamp: None,
        }
    }

    /// Cluster-scoped resources have an empty namespace.
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    /// `namespace/name`, or the bare name for cluster-scoped resources. Used
    /// as the controller table key and in logs.
    pub fn key(&self) -> String {
        if self.is_cluster_scoped() {
            return self.name.clone();
        }
        format!("{}/{}", self.namespace, self.name)
    }
}

/// The unit of reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(flatten)]
    pub meta: ObjectMeta,
    pub spec: AssetSpec,
    #[serde(default)]
    pub status: Option<AssetStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub source: AssetSource,
    pub bucket_ref: BucketRef,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRef {
    pub name: String,
}

/// Where the content lives and which webhook stages it passes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSource {
    pub url: String,
    pub mode: AssetMode,
    /// Regex applied to file names for `package` and `index` modes. Empty matches everything.
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub mutation_webhook_service: Vec<WebhookService>,
    #[serde(default)]
    pub validation_webhook_service: Vec<WebhookService>,
    #[serde(default)]
    pub metadata_webhook_service: Vec<WebhookService>,
}

/// Fetch mode of an asset source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetMode {
    /// A single file downloaded as-is.
    Single,
    /// An archive extracted into many files.
    Package,
    /// A structured object whose entries become files.
    Index,
}

/// A remote service taking part in one webhook stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookService {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub endpoint: String,
    /// Regex restricting which files are sent to this service. Empty matches everything.
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

impl WebhookService {
    /// Resolves the URL the service is called on.
    ///
    /// Absolute `http(s)://` endpoints are used verbatim; anything else is a
    /// path on the in-cluster service address.
    pub fn url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.clone();
        }
        format!(
            "http://{}.{}.svc.cluster.local{}",
            self.name, self.namespace, self.endpoint
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Pending,
    Ready,
    Failed,
}

/// Fine-grained explanation of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    Scheduled,
    BucketNotReady,
    Uploaded,
    BucketError,
    PullingFailed,
    MutationFailed,
    MutationError,
    ValidationFailed,
    ValidationError,
    MetadataExtractionFailed,
    UploadFailed,
    MissingContent,
    RemoteContentVerificationError,
}

impl Reason {
    /// Reasons that are only left behind by a spec change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Reason::MutationFailed | Reason::ValidationFailed | Reason::MissingContent
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Scheduled => "Scheduled",
            Reason::BucketNotReady => "BucketNotReady",
            Reason::Uploaded => "Uploaded",
            Reason::BucketError => "BucketError",
            Reason::PullingFailed => "PullingFailed",
            Reason::MutationFailed => "MutationFailed",
            Reason::MutationError => "MutationError",
            Reason::ValidationFailed => "ValidationFailed",
            Reason::ValidationError => "ValidationError",
            Reason::MetadataExtractionFailed => "MetadataExtractionFailed",
            Reason::UploadFailed => "UploadFailed",
            Reason::MissingContent => "MissingContent",
            Reason::RemoteContentVerificationError => "RemoteContentVerificationError",
        }
    }

    /// Human-readable message template for status and events.
    pub fn message(self) -> &'static str {
        match self {
            Reason::Scheduled => "Asset scheduled for processing",
            Reason::BucketNotReady => "Referenced bucket is not ready",
            Reason::Uploaded => "Asset content has been uploaded",
            Reason::BucketError => "Unable to verify bucket status",
            Reason::PullingFailed => "Asset content could not be pulled",
            Reason::MutationFailed => "Asset content mutation failed",
            Reason::MutationError => "Unable to mutate asset content",
            Reason::ValidationFailed => "Asset content validation failed",
            Reason::ValidationError => "Unable to validate asset content",
            Reason::MetadataExtractionFailed => "Unable to extract asset metadata",
            Reason::UploadFailed => "Asset content could not be uploaded",
            Reason::MissingContent => "Published asset content is missing",
            Reason::RemoteContentVerificationError => "Unable to verify published asset content",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetStatus {
    pub phase: Phase,
    pub reason: Reason,
    #[serde(default)]
    pub message: String,
    pub last_heartbeat_time: DateTime<Utc>,
    /// Generation last processed; equal to `meta.generation` once caught up.
    pub observed_generation: i64,
    /// Published content; present once the asset has been uploaded.
    #[serde(default)]
    pub asset_ref: Option<AssetRef>,
}

/// Where the published content can be read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub base_url: String,
    pub files: Vec<AssetFile>,
}

impl AssetRef {
    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetFile {
    pub name: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Phase of the bucket an asset is published into, as reported by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketPhase {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketStatus {
    pub phase: BucketPhase,
    /// Public base URL of the bucket.
    pub url: String,
    /// Name of the bucket in the object store.
    pub remote_name: String,
}
