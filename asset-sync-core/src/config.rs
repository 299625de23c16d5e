use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Timeouts and worker counts for the three webhook stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub mutation_timeout_secs: u64,
    pub mutation_workers: usize,
    pub validation_timeout_secs: u64,
    pub validation_workers: usize,
    pub metadata_timeout_secs: u64,
    pub metadata_workers: usize,
    /// When false, webhook calls accept invalid TLS certificates.
    pub verify_tls: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            mutation_timeout_secs: 60,
            mutation_workers: 10,
            validation_timeout_secs: 60,
            validation_workers: 10,
            metadata_timeout_secs: 60,
            metadata_workers: 10,
            verify_tls: true,
        }
    }
}

impl WebhookConfig {
    pub fn trace_loaded(&self) {
        info!(
            mutation_workers = self.mutation_workers,
            validation_workers = self.validation_workers,
            metadata_workers = self.metadata_workers,
            verify_tls = self.verify_tls,
            "Loaded webhook config"
        );
        debug!(?self, "Webhook config loaded (full debug)");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub upload_workers: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { upload_workers: 10 }
    }
}

/// Naming and retry policy for bucket provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub private_prefix: String,
    pub public_prefix: String,
    pub region: String,
    /// Delay between provisioning attempts.
    pub retry_delay_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            private_prefix: "system-private".to_string(),
            public_prefix: "system-public".to_string(),
            region: "us-east-1".to_string(),
            retry_delay_ms: 500,
        }
    }
}

impl BucketConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Parent of every scratch directory; the system temp dir when unset.
    pub temporary_dir: Option<PathBuf>,
    /// Root of structured objects read in `index` mode.
    pub objects_dir: PathBuf,
    pub verify_tls: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            temporary_dir: None,
            objects_dir: PathBuf::from("objects"),
            verify_tls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Minimum time between re-verifications of a settled asset.
    pub relist_interval_secs: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            relist_interval_secs: 300,
        }
    }
}

impl HandlerConfig {
    pub fn relist_interval(&self) -> Duration {
        Duration::from_secs(self.relist_interval_secs)
    }
}
