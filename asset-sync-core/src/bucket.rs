//! Bucket provisioning.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::BucketConfig;
use crate::contract::{BoxError, BucketClient};
use crate::error::BucketError;

/// Attempts made by [`BucketHandler::ensure_system_buckets`] per bucket.
pub const MAX_ATTEMPTS: usize = 5;

/// Names of the two buckets the controller owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemBucketNames {
    pub public: String,
    pub private: String,
}

impl SystemBucketNames {
    /// Fresh names: the configured prefixes followed by a suffix derived from `now`.
    pub fn generate(config: &BucketConfig, now: DateTime<Utc>) -> Self {
        let suffix = unique_suffix(now);
        Self {
            public: format!("{}-{}", config.public_prefix, suffix),
            private: format!("{}-{}", config.private_prefix, suffix),
        }
    }
}

fn unique_suffix(now: DateTime<Utc>) -> String {
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
    to_base36(nanos.unsigned_abs())
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Anonymous read-only access to every object of `bucket`.
pub fn public_read_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": {"AWS": ["*"]},
            "Action": ["s3:GetBucketLocation", "s3:ListBucket"],
            "Resource": [format!("arn:aws:s3:::{bucket}")]
        }, {
            "Effect": "Allow",
            "Principal": {"AWS": ["*"]},
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{bucket}/*")]
        }]
    })
    .to_string()
}

pub struct BucketHandler {
    client: Arc<dyn BucketClient>,
    config: BucketConfig,
}

impl BucketHandler {
    pub fn new(client: Arc<dyn BucketClient>, config: BucketConfig) -> Self {
        Self { client, config }
    }

    /// Creates `bucket` unless it already exists. One attempt.
    pub async fn create_if_missing(&self, bucket: &str, region: &str) -> Result<(), BoxError> {
        if self.client.bucket_exists(bucket).await? {
            info!(bucket = %bucket, "Bucket already exists");
            return Ok(());
        }
        self.client.make_bucket(bucket, region).await?;
        info!(bucket = %bucket, region = %region, "Created bucket");
        Ok(())
    }

    async fn create_with_retry(&self, bucket: &str) -> Result<(), BucketError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.create_if_missing(bucket, &self.config.region).await {
                Ok(()) => return Ok(()),
                Err(source) if attempt >= MAX_ATTEMPTS => {
                    error!(bucket = %bucket, attempts = attempt, error = %source, "Giving up on bucket");
                    return Err(BucketError::RetriesExhausted {
                        bucket: bucket.to_string(),
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    warn!(bucket = %bucket, attempt, error = %e, "Bucket provisioning failed, retrying");
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    /// Grants anonymous read access to `bucket`.
    pub async fn set_public_policy(&self, bucket: &str) -> Result<(), BucketError> {
        self.client
            .set_bucket_policy(bucket, &public_read_policy(bucket))
            .await
            .map_err(|source| BucketError::Policy {
                bucket: bucket.to_string(),
                source,
            })?;
        info!(bucket = %bucket, "Set public read policy");
        Ok(())
    }

    /// Provisions freshly named system buckets, retrying each up to
    /// [`MAX_ATTEMPTS`] times. The public bucket gets a public-read policy.
    pub async fn ensure_system_buckets(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SystemBucketNames, BucketError> {
        let names = SystemBucketNames::generate(&self.config, now);
        self.create_with_retry(&names.public).await?;
        self.set_public_policy(&names.public).await?;
        self.create_with_retry(&names.private).await?;
        info!(public = %names.public, private = %names.private, "System buckets ready");
        Ok(names)
    }

    /// Re-creates missing system buckets and reasserts the public policy.
    pub async fn check_buckets(&self, names: &SystemBucketNames) -> Result<(), BoxError> {
        self.create_if_missing(&names.private, &self.config.region)
            .await?;
        self.create_if_missing(&names.public, &self.config.region)
            .await?;
        self.set_public_policy(&names.public).await?;
        Ok(())
    }
}
