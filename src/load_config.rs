use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use asset_sync_core::asset::Asset;
use asset_sync_core::config::{BucketConfig, HandlerConfig, LoaderConfig, StoreConfig, WebhookConfig};
use serde::Deserialize;
use tracing::{error, info};

pub const ENV_STORE_ROOT: &str = "ASSET_SYNC_STORE_ROOT";
pub const ENV_RELIST_INTERVAL_SECS: &str = "ASSET_SYNC_RELIST_INTERVAL_SECS";
pub const ENV_UPLOAD_WORKERS: &str = "ASSET_SYNC_UPLOAD_WORKERS";
pub const ENV_VERIFY_TLS: &str = "ASSET_SYNC_VERIFY_TLS";

/// A bucket assets may reference by name.
///
/// An empty `namespace` declares a cluster-scoped bucket, visible only to
/// cluster-scoped assets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BucketDecl {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Name of the bucket in the object store; `name` when unset.
    #[serde(default)]
    pub remote_name: Option<String>,
    #[serde(default)]
    pub public: bool,
}

impl BucketDecl {
    pub fn remote_name(&self) -> &str {
        self.remote_name.as_deref().unwrap_or(&self.name)
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_max_concurrent_reconciles() -> usize {
    4
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_store_root() -> PathBuf {
    PathBuf::from("buckets")
}

/// Everything the binary needs, merged from the YAML file and the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Directory holding one subdirectory per bucket.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bucket: BucketConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub handler: HandlerConfig,
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub buckets: Vec<BucketDecl>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

fn env_override<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let var = match std::env::var(name) {
        Ok(var) => var,
        Err(_) => return Ok(None),
    };
    match var.parse::<T>() {
        Ok(value) => {
            info!(var = %name, "Applied environment override");
            Ok(Some(value))
        }
        Err(e) => {
            error!(error = %e, var = %name, value = ?var, "Invalid environment override");
            Err(anyhow::anyhow!("{name} has an invalid value {var:?}: {e}"))
        }
    }
}

/// Loads the YAML config file, then applies `ASSET_SYNC_*` environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let mut config: AppConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Some(root) = env_override::<PathBuf>(ENV_STORE_ROOT)? {
        config.store_root = root;
    }
    if let Some(secs) = env_override::<u64>(ENV_RELIST_INTERVAL_SECS)? {
        config.handler.relist_interval_secs = secs;
    }
    if let Some(workers) = env_override::<usize>(ENV_UPLOAD_WORKERS)? {
        config.store.upload_workers = workers;
    }
    if let Some(verify) = env_override::<bool>(ENV_VERIFY_TLS)? {
        config.webhook.verify_tls = verify;
        config.loader.verify_tls = verify;
    }

    if config.max_concurrent_reconciles == 0 {
        error!("max_concurrent_reconciles must be at least 1");
        anyhow::bail!("max_concurrent_reconciles must be at least 1");
    }

    config.webhook.trace_loaded();
    info!(
        store_root = %config.store_root.display(),
        buckets = config.buckets.len(),
        assets = config.assets.len(),
        relist_interval_secs = config.handler.relist_interval_secs,
        "Config loaded and merged successfully"
    );

    Ok(config)
}
