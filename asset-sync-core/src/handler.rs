//! # handler: the asset reconciliation state machine
//!
//! [`AssetHandler::process`] is called once per asset per pass and decides,
//! from the asset's spec and last status, what to do next:
//!
//! - deletion marker set: erase the published objects, never touch the status;
//! - generation changed: reschedule (`Pending/Scheduled`);
//! - `Ready` with a stale heartbeat: verify the published objects still exist;
//! - `Pending`, or `Failed` with a retryable reason: run the publish pipeline
//!   (load, mutate, validate, extract metadata, replace remote objects);
//! - anything else: no change.
//!
//! The returned status, if any, must be persisted by the caller. Errors come
//! with the Failed status describing them. Callers that must know whether a
//! deletion actually completed use [`AssetHandler::finalize`] instead.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::asset::{Asset, AssetFile, AssetRef, AssetStatus, BucketPhase, BucketStatus, Phase, Reason};
use crate::config::HandlerConfig;
use crate::contract::{BucketStatusFinder, EventRecorder, FileMetadata, Loader, Severity, WebhookStage};
use crate::error::{HandlerError, ProcessError};
use crate::store::{Store, SyncPlan};

/// The three webhook stages, run in this order.
pub struct Stages {
    pub mutator: Arc<dyn WebhookStage>,
    pub validator: Arc<dyn WebhookStage>,
    pub extractor: Arc<dyn WebhookStage>,
}

/// Event reason recorded when published content cannot be erased.
pub const DELETION_FAILED: &str = "DeletionFailed";

/// Result of erasing the published objects of a deleted asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalization {
    /// Nothing of the asset is left in its bucket.
    Completed,
    /// The bucket could not be resolved; retry on a later pass.
    Deferred,
}

/// Result of the publish pipeline once the bucket is known to be ready.
enum Outcome {
    Uploaded(AssetRef),
    /// A stage rejected the content; no error is surfaced.
    Rejected(Reason, String),
    Failed(Reason, HandlerError),
}

pub struct AssetHandler {
    store: Store,
    loader: Arc<dyn Loader>,
    finder: Arc<dyn BucketStatusFinder>,
    recorder: Arc<dyn EventRecorder>,
    stages: Stages,
    relist_interval: Duration,
}

impl AssetHandler {
    pub fn new(
        store: Store,
        loader: Arc<dyn Loader>,
        finder: Arc<dyn BucketStatusFinder>,
        recorder: Arc<dyn EventRecorder>,
        stages: Stages,
        config: &HandlerConfig,
    ) -> Self {
        Self {
            store,
            loader,
            finder,
            recorder,
            stages,
            relist_interval: config.relist_interval(),
        }
    }

    pub fn relist_interval(&self) -> Duration {
        self.relist_interval
    }

    /// Runs one reconciliation pass. `Ok(None)` means nothing changed.
    pub async fn process(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
        asset: &Asset,
    ) -> Result<Option<AssetStatus>, ProcessError> {
        if asset.meta.deletion_timestamp.is_some() {
            return self.finalize(asset).await.map(|_| None);
        }

        let Some(status) = asset.status.as_ref() else {
            return Ok(Some(self.on_schedule(now, asset)));
        };
        if status.observed_generation != asset.meta.generation {
            return Ok(Some(self.on_schedule(now, asset)));
        }

        match status.phase {
            Phase::Ready if self.is_stale(status, now) => self.on_ready(now, asset, status).await,
            Phase::Ready => Ok(None),
            Phase::Pending
                if status.reason == Reason::BucketNotReady && !self.is_stale(status, now) =>
            {
                debug!(asset = %asset.meta.key(), "Bucket recently not ready, waiting");
                Ok(None)
            }
            Phase::Pending => self.on_pending(cancel, now, asset).await,
            Phase::Failed if status.reason.is_terminal() => Ok(None),
            Phase::Failed => self.on_pending(cancel, now, asset).await,
        }
    }

    fn is_stale(&self, status: &AssetStatus, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(status.last_heartbeat_time).to_std() {
            Ok(elapsed) => elapsed >= self.relist_interval,
            Err(_) => false,
        }
    }

    fn previous_ref(asset: &Asset) -> Option<AssetRef> {
        asset.status.as_ref().and_then(|s| s.asset_ref.clone())
    }

    fn status(
        asset: &Asset,
        now: DateTime<Utc>,
        phase: Phase,
        reason: Reason,
        message: String,
        asset_ref: Option<AssetRef>,
    ) -> AssetStatus {
        AssetStatus {
            phase,
            reason,
            message,
            last_heartbeat_time: now,
            observed_generation: asset.meta.generation,
            asset_ref,
        }
    }

    fn record(&self, asset: &Asset, severity: Severity, reason: Reason, message: &str) {
        self.recorder
            .record(&asset.meta, severity, reason.as_str(), message);
    }

    /// Builds a Failed status for `reason`, records a warning and pairs it with the error.
    fn fail(&self, now: DateTime<Utc>, asset: &Asset, reason: Reason, source: HandlerError) -> ProcessError {
        let message = format!("{}: {}", reason.message(), source);
        error!(asset = %asset.meta.key(), reason = %reason, error = %source, "Asset processing failed");
        self.record(asset, Severity::Warning, reason, &message);
        ProcessError {
            status: Some(Self::status(
                asset,
                now,
                Phase::Failed,
                reason,
                message,
                Self::previous_ref(asset),
            )),
            source,
        }
    }

    fn on_schedule(&self, now: DateTime<Utc>, asset: &Asset) -> AssetStatus {
        info!(asset = %asset.meta.key(), generation = asset.meta.generation, "Scheduling asset");
        let reason = Reason::Scheduled;
        self.record(asset, Severity::Normal, reason, reason.message());
        Self::status(
            asset,
            now,
            Phase::Pending,
            reason,
            reason.message().to_string(),
            None,
        )
    }

    fn on_bucket_not_ready(&self, now: DateTime<Utc>, asset: &Asset) -> AssetStatus {
        let reason = Reason::BucketNotReady;
        info!(asset = %asset.meta.key(), bucket = %asset.spec.bucket_ref.name, "Bucket not ready");
        self.record(asset, Severity::Normal, reason, reason.message());
        Self::status(
            asset,
            now,
            Phase::Pending,
            reason,
            reason.message().to_string(),
            Self::previous_ref(asset),
        )
    }

    /// The bucket's status when it is ready, `None` when it is unknown or not ready.
    async fn resolve_bucket(&self, asset: &Asset) -> Result<Option<BucketStatus>, HandlerError> {
        let bucket = &asset.spec.bucket_ref.name;
        let found = self
            .finder
            .find(&asset.meta.namespace, bucket)
            .await
            .map_err(|source| HandlerError::BucketStatus {
                bucket: bucket.clone(),
                source,
            })?;
        Ok(found.filter(|b| b.phase == BucketPhase::Ready))
    }

    /// Erases the published objects of an asset that is being removed.
    ///
    /// [`Finalization::Deferred`] means the bucket could not be resolved and
    /// the asset must be finalized again on a later pass.
    pub async fn finalize(&self, asset: &Asset) -> Result<Finalization, ProcessError> {
        self.on_delete(asset).await.map_err(|source| {
            error!(asset = %asset.meta.key(), error = %source, "Deleting published content failed");
            self.recorder.record(
                &asset.meta,
                Severity::Warning,
                DELETION_FAILED,
                &format!("Published content could not be deleted: {source}"),
            );
            ProcessError {
                status: None,
                source,
            }
        })
    }

    async fn on_delete(&self, asset: &Asset) -> Result<Finalization, HandlerError> {
        let bucket = match self.resolve_bucket(asset).await {
            Ok(Some(bucket)) => bucket,
            Ok(None) => {
                info!(asset = %asset.meta.key(), "Bucket not ready, deferring deletion");
                return Ok(Finalization::Deferred);
            }
            Err(e) => {
                warn!(asset = %asset.meta.key(), error = %e, "Bucket lookup failed, deferring deletion");
                self.recorder.record(
                    &asset.meta,
                    Severity::Warning,
                    Reason::BucketError.as_str(),
                    &format!("Deletion deferred: {e}"),
                );
                return Ok(Finalization::Deferred);
            }
        };

        let objects = self
            .store
            .list_objects(&bucket.remote_name, &asset.meta.name)
            .await
            .map_err(HandlerError::ListObjects)?;
        if objects.is_empty() {
            debug!(asset = %asset.meta.key(), "No published objects to delete");
            return Ok(Finalization::Completed);
        }

        self.store
            .remove_objects(&bucket.remote_name, &objects)
            .await
            .map_err(HandlerError::Delete)?;
        info!(asset = %asset.meta.key(), removed = objects.len(), "Deleted published objects");
        Ok(Finalization::Completed)
    }

    async fn on_ready(
        &self,
        now: DateTime<Utc>,
        asset: &Asset,
        status: &AssetStatus,
    ) -> Result<Option<AssetStatus>, ProcessError> {
        let bucket = match self.resolve_bucket(asset).await {
            Ok(Some(bucket)) => bucket,
            Ok(None) => return Ok(Some(self.on_bucket_not_ready(now, asset))),
            Err(e) => return Err(self.fail(now, asset, Reason::BucketError, e)),
        };

        let files = status
            .asset_ref
            .as_ref()
            .map(AssetRef::file_names)
            .unwrap_or_default();
        let present = self
            .store
            .contains_all_objects(&bucket.remote_name, &asset.meta.name, &files)
            .await
            .map_err(|e| {
                self.fail(
                    now,
                    asset,
                    Reason::RemoteContentVerificationError,
                    HandlerError::Verification(e),
                )
            })?;

        if !present {
            let reason = Reason::MissingContent;
            warn!(asset = %asset.meta.key(), "Published content is missing");
            self.record(asset, Severity::Warning, reason, reason.message());
            return Ok(Some(Self::status(
                asset,
                now,
                Phase::Failed,
                reason,
                reason.message().to_string(),
                status.asset_ref.clone(),
            )));
        }

        debug!(asset = %asset.meta.key(), "Published content verified");
        Ok(Some(Self::status(
            asset,
            now,
            Phase::Ready,
            Reason::Uploaded,
            Reason::Uploaded.message().to_string(),
            status.asset_ref.clone(),
        )))
    }

    async fn on_pending(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
        asset: &Asset,
    ) -> Result<Option<AssetStatus>, ProcessError> {
        let bucket = match self.resolve_bucket(asset).await {
            Ok(Some(bucket)) => bucket,
            Ok(None) => return Ok(Some(self.on_bucket_not_ready(now, asset))),
            Err(e) => return Err(self.fail(now, asset, Reason::BucketError, e)),
        };

        let existing = self
            .store
            .list_objects(&bucket.remote_name, &asset.meta.name)
            .await
            .map_err(|e| {
                self.fail(
                    now,
                    asset,
                    Reason::RemoteContentVerificationError,
                    HandlerError::ListObjects(e),
                )
            })?;

        let source = &asset.spec.source;
        let content = match self
            .loader
            .load(&source.url, &asset.meta.name, source.mode, &source.filter)
            .await
        {
            Ok(content) => content,
            Err(e) => {
                if let Some(dir) = e.dir.as_deref() {
                    self.clean(asset, dir).await;
                }
                return Err(self.fail(now, asset, Reason::PullingFailed, HandlerError::Load(e)));
            }
        };
        info!(asset = %asset.meta.key(), files = content.files.len(), "Pulled asset content");

        let outcome = self
            .publish(cancel, asset, &bucket, existing, &content.dir, &content.files)
            .await;
        self.clean(asset, &content.dir).await;

        match outcome {
            Outcome::Uploaded(asset_ref) => {
                let reason = Reason::Uploaded;
                info!(asset = %asset.meta.key(), base_url = %asset_ref.base_url, "Asset uploaded");
                self.record(asset, Severity::Normal, reason, reason.message());
                Ok(Some(Self::status(
                    asset,
                    now,
                    Phase::Ready,
                    reason,
                    reason.message().to_string(),
                    Some(asset_ref),
                )))
            }
            Outcome::Rejected(reason, details) => {
                let message = format!("{}: {}", reason.message(), details);
                warn!(asset = %asset.meta.key(), reason = %reason, details = %details, "Asset content rejected");
                self.record(asset, Severity::Warning, reason, &message);
                Ok(Some(Self::status(
                    asset,
                    now,
                    Phase::Failed,
                    reason,
                    message,
                    Self::previous_ref(asset),
                )))
            }
            Outcome::Failed(reason, source) => Err(self.fail(now, asset, reason, source)),
        }
    }

    /// Runs the webhook stages and replaces the remote objects.
    async fn publish(
        &self,
        cancel: &CancellationToken,
        asset: &Asset,
        bucket: &BucketStatus,
        existing: Vec<String>,
        dir: &Path,
        files: &[String],
    ) -> Outcome {
        let source = &asset.spec.source;

        if !source.mutation_webhook_service.is_empty() {
            match self
                .stages
                .mutator
                .run(cancel, dir, files, &source.mutation_webhook_service)
                .await
            {
                Err(e) => return Outcome::Failed(Reason::MutationError, HandlerError::Mutation(e)),
                Ok(result) if !result.success => {
                    return Outcome::Rejected(Reason::MutationFailed, result.messages.join("; "))
                }
                Ok(_) => {}
            }
        }

        if !source.validation_webhook_service.is_empty() {
            match self
                .stages
                .validator
                .run(cancel, dir, files, &source.validation_webhook_service)
                .await
            {
                Err(e) => {
                    return Outcome::Failed(Reason::ValidationError, HandlerError::Validation(e))
                }
                Ok(result) if !result.success => {
                    return Outcome::Rejected(Reason::ValidationFailed, result.messages.join("; "))
                }
                Ok(_) => {}
            }
        }

        let mut metadata = Vec::new();
        if !source.metadata_webhook_service.is_empty() {
            match self
                .stages
                .extractor
                .run(cancel, dir, files, &source.metadata_webhook_service)
                .await
            {
                Err(e) => {
                    return Outcome::Failed(
                        Reason::MetadataExtractionFailed,
                        HandlerError::MetadataExtraction(e),
                    )
                }
                Ok(result) => metadata = result.metadata,
            }
        }

        let plan = SyncPlan::replace(existing, files);
        if let Err(e) = self
            .store
            .apply(cancel, &bucket.remote_name, &asset.meta.name, dir, &plan)
            .await
        {
            return Outcome::Failed(Reason::UploadFailed, HandlerError::Upload(e));
        }

        Outcome::Uploaded(AssetRef {
            base_url: format!("{}/{}", bucket.url.trim_end_matches('/'), asset.meta.name),
            files: attach_metadata(files, metadata),
        })
    }

    async fn clean(&self, asset: &Asset, dir: &Path) {
        if let Err(e) = self.loader.clean(dir).await {
            error!(asset = %asset.meta.key(), path = %dir.display(), error = %e, "Failed to clean scratch directory");
        }
    }
}

fn attach_metadata(files: &[String], metadata: Vec<FileMetadata>) -> Vec<AssetFile> {
    files
        .iter()
        .map(|name| AssetFile {
            name: name.clone(),
            metadata: metadata
                .iter()
                .find(|m| &m.file_path == name)
                .and_then(|m| m.metadata.clone()),
        })
        .collect()
}
