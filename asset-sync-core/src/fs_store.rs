//! Object store backed by a local directory.
//!
//! Each bucket is a directory below `root`, each object a file whose path
//! relative to the bucket directory is its name. Bucket policies are kept as
//! `root/.policies/<bucket>.json`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::contract::{BoxError, BucketClient, ObjectClient};

const POLICY_DIR: &str = ".policies";

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, BoxError> {
        if bucket.is_empty() || bucket.starts_with('.') || bucket.contains(['/', '\\']) {
            return Err(format!("invalid bucket name '{bucket}'").into());
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, object_name: &str) -> Result<PathBuf, BoxError> {
        let relative = Path::new(object_name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if object_name.is_empty() || escapes {
            return Err(format!("invalid object name '{object_name}'").into());
        }
        Ok(self.bucket_dir(bucket)?.join(relative))
    }

    /// Policy document last stored for `bucket`, if any.
    pub async fn bucket_policy(&self, bucket: &str) -> Result<Option<String>, BoxError> {
        let path = self.root.join(POLICY_DIR).join(format!("{bucket}.json"));
        match tokio::fs::read_to_string(&path).await {
            Ok(policy) => Ok(Some(policy)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn require_bucket(&self, bucket: &str) -> Result<PathBuf, BoxError> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(format!("bucket '{bucket}' does not exist").into());
        }
        Ok(dir)
    }
}

fn object_name(bucket_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(bucket_dir).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectClient for FsObjectStore {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, BoxError> {
        let bucket_dir = self.require_bucket(bucket).await?;
        let mut names = Vec::new();
        let mut pending = vec![bucket_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if let Some(name) = object_name(&bucket_dir, &path) {
                    if name.starts_with(prefix) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn put_object(
        &self,
        bucket: &str,
        object_name: &str,
        file_path: &Path,
    ) -> Result<u64, BoxError> {
        self.require_bucket(bucket).await?;
        let target = self.object_path(bucket, object_name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = tokio::fs::copy(file_path, &target).await?;
        debug!(bucket = %bucket, object = %object_name, size, "Stored object");
        Ok(size)
    }

    async fn remove_object(&self, bucket: &str, object_name: &str) -> Result<(), BoxError> {
        let target = self.object_path(bucket, object_name)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl BucketClient for FsObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, BoxError> {
        let dir = self.bucket_dir(bucket)?;
        Ok(tokio::fs::try_exists(&dir).await?)
    }

    async fn make_bucket(&self, bucket: &str, region: &str) -> Result<(), BoxError> {
        let dir = self.bucket_dir(bucket)?;
        tokio::fs::create_dir_all(&dir).await?;
        debug!(bucket = %bucket, region = %region, path = %dir.display(), "Created bucket directory");
        Ok(())
    }

    async fn set_bucket_policy(&self, bucket: &str, policy: &str) -> Result<(), BoxError> {
        self.require_bucket(bucket).await?;
        let dir = self.root.join(POLICY_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(format!("{bucket}.json")), policy).await?;
        Ok(())
    }
}
