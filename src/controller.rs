//! Reconciliation trigger loop.
//!
//! The [`Controller`] keeps every declared asset in an in-memory table, runs
//! one handler pass per asset on each tick and persists the returned status
//! back into the table.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use asset_sync_core::asset::{Asset, AssetStatus, BucketPhase, BucketStatus};
use asset_sync_core::contract::{BoxError, BucketClient, BucketStatusFinder};
use asset_sync_core::error::ProcessError;
use asset_sync_core::handler::{AssetHandler, Finalization};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::load_config::BucketDecl;

/// Resolves bucket references against the configured bucket list.
///
/// A declared bucket is Ready once it exists in the store and Pending before
/// that. Undeclared buckets are unknown. Cluster-scoped assets (empty
/// namespace) resolve only cluster-scoped declarations.
pub struct ConfigBucketFinder {
    buckets: Vec<BucketDecl>,
    client: Arc<dyn BucketClient>,
    base_url: String,
}

impl ConfigBucketFinder {
    pub fn new(buckets: Vec<BucketDecl>, client: Arc<dyn BucketClient>, base_url: &str) -> Self {
        Self {
            buckets,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BucketStatusFinder for ConfigBucketFinder {
    async fn find(
        &self,
        namespace: &str,
        bucket_name: &str,
    ) -> Result<Option<BucketStatus>, BoxError> {
        let Some(decl) = self
            .buckets
            .iter()
            .find(|b| b.namespace == namespace && b.name == bucket_name)
        else {
            debug!(namespace = %namespace, bucket = %bucket_name, "Bucket is not declared");
            return Ok(None);
        };
        let remote_name = decl.remote_name();
        let phase = if self.client.bucket_exists(remote_name).await? {
            BucketPhase::Ready
        } else {
            BucketPhase::Pending
        };
        Ok(Some(BucketStatus {
            phase,
            url: format!("{}/{}", self.base_url, remote_name),
            remote_name: remote_name.to_string(),
        }))
    }
}

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub removed: usize,
}

/// What one reconciliation of an asset produced.
enum Pass {
    Status(Option<AssetStatus>),
    Finalized(Finalization),
}

pub struct Controller {
    handler: AssetHandler,
    assets: Mutex<BTreeMap<String, Asset>>,
    permits: Semaphore,
    tick_interval: Duration,
}

impl Controller {
    pub fn new(handler: AssetHandler, max_concurrent_reconciles: usize, tick_interval: Duration) -> Self {
        Self {
            handler,
            assets: Mutex::new(BTreeMap::new()),
            permits: Semaphore::new(max_concurrent_reconciles.max(1)),
            tick_interval,
        }
    }

    /// Inserts a new asset or replaces the desired state of a known one.
    ///
    /// A changed spec bumps the generation; the last status is kept so the
    /// handler sees the drift.
    pub async fn apply(&self, mut asset: Asset) {
        let key = asset.meta.key();
        let mut assets = self.assets.lock().await;
        match assets.get_mut(&key) {
            Some(existing) if existing.spec != asset.spec => {
                existing.spec = asset.spec;
                existing.meta.generation += 1;
                info!(asset = %key, generation = existing.meta.generation, "Asset spec changed");
            }
            Some(_) => debug!(asset = %key, "Asset unchanged"),
            None => {
                asset.meta.deletion_timestamp = None;
                info!(asset = %key, "Asset added");
                assets.insert(key, asset);
            }
        }
    }

    /// Marks an asset for deletion. Returns false when the key is unknown.
    pub async fn delete(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut assets = self.assets.lock().await;
        match assets.get_mut(key) {
            Some(asset) => {
                asset.meta.deletion_timestamp.get_or_insert(now);
                info!(asset = %key, "Asset marked for deletion");
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Asset> {
        self.assets.lock().await.get(key).cloned()
    }

    pub async fn statuses(&self) -> Vec<(String, Option<AssetStatus>)> {
        self.assets
            .lock()
            .await
            .iter()
            .map(|(key, asset)| (key.clone(), asset.status.clone()))
            .collect()
    }

    async fn reconcile_one(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
        asset: &Asset,
    ) -> Result<Pass, ProcessError> {
        let _permit = self.permits.acquire().await;
        debug!(asset = %asset.meta.key(), "Reconciling asset");
        if asset.meta.deletion_timestamp.is_some() {
            return self.handler.finalize(asset).await.map(Pass::Finalized);
        }
        self.handler.process(cancel, now, asset).await.map(Pass::Status)
    }

    /// Runs exactly one pass for every asset in the table, concurrently up to
    /// the configured limit.
    pub async fn reconcile_all(&self, cancel: &CancellationToken, now: DateTime<Utc>) -> PassReport {
        let snapshot: Vec<Asset> = self.assets.lock().await.values().cloned().collect();
        let results = join_all(
            snapshot
                .iter()
                .map(|asset| self.reconcile_one(cancel, now, asset)),
        )
        .await;

        let mut report = PassReport {
            processed: snapshot.len(),
            ..PassReport::default()
        };
        let mut assets = self.assets.lock().await;
        for (asset, result) in snapshot.iter().zip(results) {
            let key = asset.meta.key();
            match result {
                Ok(Pass::Finalized(Finalization::Completed)) => {
                    assets.remove(&key);
                    report.removed += 1;
                    info!(asset = %key, "Asset removed");
                }
                Ok(Pass::Finalized(Finalization::Deferred)) => {
                    debug!(asset = %key, "Deletion deferred to a later pass");
                }
                Ok(Pass::Status(Some(status))) => {
                    if let Some(entry) = assets.get_mut(&key) {
                        info!(
                            asset = %key,
                            phase = ?status.phase,
                            reason = %status.reason,
                            "Asset status updated"
                        );
                        entry.status = Some(status);
                        report.updated += 1;
                    }
                }
                Ok(Pass::Status(None)) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(asset = %key, error = %e, "Reconciliation failed");
                    if let (Some(status), Some(entry)) = (e.status, assets.get_mut(&key)) {
                        entry.status = Some(status);
                        report.updated += 1;
                    }
                }
            }
        }
        info!(
            processed = report.processed,
            updated = report.updated,
            failed = report.failed,
            removed = report.removed,
            "Reconciliation pass complete"
        );
        report
    }

    /// Reconciles on every tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        info!(tick_interval = ?self.tick_interval, "Controller started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Controller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.reconcile_all(&cancel, Utc::now()).await;
                }
            }
        }
    }
}
