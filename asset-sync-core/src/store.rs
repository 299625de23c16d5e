//! Content synchronisation: publishes a local directory of files as the
//! object set of one asset inside a bucket.
//!
//! Publishing is all-or-nothing per asset. Every object previously stored
//! under the asset prefix is removed before the fresh files are uploaded, and
//! uploads run on a bounded [`WorkerPool`]. Per-file failures are merged into
//! a single [`StoreError::Upload`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::StoreConfig;
use crate::contract::ObjectClient;
use crate::error::{StoreError, UploadError};
use crate::pool::WorkerPool;

/// Object name of `file_name` when published for `asset_name`: the asset name
/// as a prefix, followed by the file's relative path.
pub fn normalize_object_name(asset_name: &str, file_name: &str) -> String {
    let relative = file_name.replace('\\', "/");
    let relative = relative.trim_start_matches("./").trim_start_matches('/');
    format!("{}/{}", asset_name.trim_end_matches('/'), relative)
}

fn asset_prefix(asset_name: &str) -> String {
    format!("{}/", asset_name.trim_end_matches('/'))
}

/// Remote changes needed to publish the current content of an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Object names to remove before uploading.
    pub to_delete: Vec<String>,
    /// Local file names (relative to the content directory) to upload.
    pub to_upload: Vec<String>,
}

impl SyncPlan {
    /// Replaces the whole existing object set with `files`.
    pub fn replace(existing: Vec<String>, files: &[String]) -> Self {
        Self {
            to_delete: existing,
            to_upload: files.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_upload.is_empty()
    }
}

/// Outcome of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub file_name: String,
    pub object_name: String,
    pub size: u64,
}

pub struct Store {
    client: Arc<dyn ObjectClient>,
    pool: WorkerPool,
}

impl Store {
    pub fn new(client: Arc<dyn ObjectClient>, config: &StoreConfig) -> Self {
        Self {
            client,
            pool: WorkerPool::new(config.upload_workers),
        }
    }

    /// Names of every object published for `asset_name`.
    pub async fn list_objects(
        &self,
        bucket: &str,
        asset_name: &str,
    ) -> Result<Vec<String>, StoreError> {
        let prefix = asset_prefix(asset_name);
        self.client
            .list_objects(bucket, &prefix)
            .await
            .map_err(|source| StoreError::List {
                bucket: bucket.to_string(),
                prefix,
                source,
            })
    }

    /// Removes the named objects one by one, stopping at the first failure.
    pub async fn remove_objects(&self, bucket: &str, objects: &[String]) -> Result<(), StoreError> {
        for object in objects {
            self.client
                .remove_object(bucket, object)
                .await
                .map_err(|source| StoreError::Remove {
                    bucket: bucket.to_string(),
                    object: object.clone(),
                    source,
                })?;
            debug!(bucket = %bucket, object = %object, "Removed object");
        }
        Ok(())
    }

    /// Removes every object published for `asset_name`.
    pub async fn delete_objects(&self, bucket: &str, asset_name: &str) -> Result<(), StoreError> {
        let objects = self.list_objects(bucket, asset_name).await?;
        self.remove_objects(bucket, &objects).await?;
        info!(bucket = %bucket, asset = %asset_name, removed = objects.len(), "Deleted asset objects");
        Ok(())
    }

    /// Uploads `files` from `dir` under the asset prefix.
    ///
    /// Every file is attempted; the call fails if any single upload failed.
    pub async fn put_objects(
        &self,
        cancel: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        dir: &Path,
        files: &[String],
    ) -> Result<Vec<UploadResult>, StoreError> {
        let jobs: Vec<(String, String, PathBuf)> = files
            .iter()
            .map(|f| (f.clone(), normalize_object_name(asset_name, f), dir.join(f)))
            .collect();
        let total = jobs.len();

        let client = Arc::clone(&self.client);
        let bucket_owned = bucket.to_string();
        let token = cancel.clone();
        let outcomes = self
            .pool
            .run(jobs, move |(file_name, object_name, path)| {
                let client = Arc::clone(&client);
                let bucket = bucket_owned.clone();
                let token = token.clone();
                async move {
                    let put = tokio::select! {
                        biased;
                        _ = token.cancelled() => None,
                        res = client.put_object(&bucket, &object_name, &path) => Some(res),
                    };
                    match put {
                        Some(Ok(size)) => Ok(UploadResult {
                            file_name,
                            object_name,
                            size,
                        }),
                        Some(Err(error)) => Err(UploadError {
                            file_name,
                            object_name,
                            error,
                        }),
                        None => Err(UploadError {
                            file_name,
                            object_name,
                            error: "upload cancelled".into(),
                        }),
                    }
                }
            })
            .await
            .map_err(|e| StoreError::Worker(e.to_string()))?;

        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut results = Vec::with_capacity(total);
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => {
                    debug!(bucket = %bucket, object = %result.object_name, size = result.size, "Uploaded object");
                    results.push(result);
                }
                Err(e) => {
                    error!(bucket = %bucket, file = %e.file_name, error = %e.error, "Upload failed");
                    failed.push(e);
                }
            }
        }

        if !failed.is_empty() {
            return Err(StoreError::Upload { total, failed });
        }
        info!(bucket = %bucket, asset = %asset_name, uploaded = results.len(), "Uploaded asset objects");
        Ok(results)
    }

    /// True only if every file of `files` is currently stored for the asset.
    pub async fn contains_all_objects(
        &self,
        bucket: &str,
        asset_name: &str,
        files: &[String],
    ) -> Result<bool, StoreError> {
        let existing: HashSet<String> = self
            .list_objects(bucket, asset_name)
            .await?
            .into_iter()
            .collect();
        let missing: Vec<String> = files
            .iter()
            .map(|f| normalize_object_name(asset_name, f))
            .filter(|name| !existing.contains(name))
            .collect();
        if !missing.is_empty() {
            info!(bucket = %bucket, asset = %asset_name, ?missing, "Published objects are missing");
        }
        Ok(missing.is_empty())
    }

    /// Computes the plan that replaces the asset's objects with `files`.
    pub async fn plan(
        &self,
        bucket: &str,
        asset_name: &str,
        files: &[String],
    ) -> Result<SyncPlan, StoreError> {
        let existing = self.list_objects(bucket, asset_name).await?;
        Ok(SyncPlan::replace(existing, files))
    }

    /// Executes a plan: deletions first, then uploads.
    pub async fn apply(
        &self,
        cancel: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        dir: &Path,
        plan: &SyncPlan,
    ) -> Result<Vec<UploadResult>, StoreError> {
        if !plan.to_delete.is_empty() {
            self.remove_objects(bucket, &plan.to_delete).await?;
        }
        self.put_objects(cancel, bucket, asset_name, dir, &plan.to_upload)
            .await
    }

    /// Replaces the published object set of an asset with the files in `dir`.
    pub async fn publish(
        &self,
        cancel: &CancellationToken,
        bucket: &str,
        asset_name: &str,
        dir: &Path,
        files: &[String],
    ) -> Result<Vec<UploadResult>, StoreError> {
        let plan = self.plan(bucket, asset_name, files).await?;
        self.apply(cancel, bucket, asset_name, dir, &plan).await
    }
}
