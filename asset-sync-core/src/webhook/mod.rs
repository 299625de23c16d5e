//! Webhook execution engine.
//!
//! Mutation, validation and metadata extraction share one execution model:
//! every configured service is dispatched to a bounded worker pool, each call
//! is bounded by the stage timeout and by the caller's cancellation token, and
//! the per-service outcomes are reduced to a single [`StageResult`].
//!
//! The first transport or protocol error to complete stops further dispatch
//! and is returned; calls already in flight finish but their outcomes are
//! dropped. Mutations are written back only when no two services returned the
//! same file.

pub mod transport;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::WebhookService;
use crate::config::WebhookConfig;
use crate::contract::{
    FileMetadata, StageResult, WebhookFile, WebhookRequest, WebhookStage, WebhookTransport,
};
use crate::error::WebhookError;
use crate::pool::WorkerPool;

pub use transport::HttpTransport;

/// Status code a service answers with to reject content.
const STATUS_UNPROCESSABLE: u16 = 422;

/// Response contract of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Mutation,
    Validation,
    MetadataExtraction,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Mutation => "mutation",
            StageKind::Validation => "validation",
            StageKind::MetadataExtraction => "metadata-extraction",
        }
    }
}

/// Outcome of a single service call.
#[derive(Debug)]
enum CallOutcome {
    Passed,
    Rejected(String),
    Mutated {
        service: String,
        files: HashMap<String, Vec<u8>>,
    },
    Extracted(Vec<FileMetadata>),
}

#[derive(Deserialize)]
struct MutationResponse {
    #[serde(default)]
    files: HashMap<String, String>,
}

#[derive(Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    data: Vec<FileMetadata>,
}

/// One stage of the webhook pipeline.
pub struct WebhookEngine {
    kind: StageKind,
    transport: Arc<dyn WebhookTransport>,
    timeout: Duration,
    pool: WorkerPool,
}

impl WebhookEngine {
    pub fn new(
        kind: StageKind,
        transport: Arc<dyn WebhookTransport>,
        timeout: Duration,
        workers: usize,
    ) -> Self {
        Self {
            kind,
            transport,
            timeout,
            pool: WorkerPool::new(workers),
        }
    }

    pub fn mutation(transport: Arc<dyn WebhookTransport>, config: &WebhookConfig) -> Self {
        Self::new(
            StageKind::Mutation,
            transport,
            Duration::from_secs(config.mutation_timeout_secs),
            config.mutation_workers,
        )
    }

    pub fn validation(transport: Arc<dyn WebhookTransport>, config: &WebhookConfig) -> Self {
        Self::new(
            StageKind::Validation,
            transport,
            Duration::from_secs(config.validation_timeout_secs),
            config.validation_workers,
        )
    }

    pub fn metadata_extraction(
        transport: Arc<dyn WebhookTransport>,
        config: &WebhookConfig,
    ) -> Self {
        Self::new(
            StageKind::MetadataExtraction,
            transport,
            Duration::from_secs(config.metadata_timeout_secs),
            config.metadata_workers,
        )
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Builds one request per service, skipping services whose filter matches no file.
    async fn build_calls(
        &self,
        base_dir: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<Vec<ServiceCall>, WebhookError> {
        let mut contents: HashMap<&str, String> = HashMap::new();
        let mut calls = Vec::with_capacity(services.len());

        for service in services {
            let selected = filter_files(service, files)?;
            if selected.is_empty() {
                debug!(
                    stage = self.kind.as_str(),
                    service = %service.name,
                    "No files match service filter, skipping"
                );
                continue;
            }

            let mut request_files = Vec::with_capacity(selected.len());
            for name in selected {
                if !contents.contains_key(name.as_str()) {
                    let path = base_dir.join(name);
                    let bytes = tokio::fs::read(&path)
                        .await
                        .map_err(|source| WebhookError::ReadFile { path, source })?;
                    contents.insert(name.as_str(), STANDARD.encode(bytes));
                }
                request_files.push(WebhookFile {
                    name: name.clone(),
                    content: contents[name.as_str()].clone(),
                });
            }

            calls.push(ServiceCall {
                service: service.name.clone(),
                url: service.url(),
                request: WebhookRequest {
                    files: request_files,
                    parameters: service.parameters.clone(),
                },
            });
        }
        Ok(calls)
    }
}

struct ServiceCall {
    service: String,
    url: String,
    request: WebhookRequest,
}

fn filter_files<'a>(
    service: &WebhookService,
    files: &'a [String],
) -> Result<Vec<&'a String>, WebhookError> {
    if service.filter.is_empty() {
        return Ok(files.iter().collect());
    }
    let re = Regex::new(&service.filter).map_err(|source| WebhookError::InvalidFilter {
        service: service.name.clone(),
        filter: service.filter.clone(),
        source,
    })?;
    Ok(files.iter().filter(|f| re.is_match(f)).collect())
}

async fn dispatch(
    kind: StageKind,
    transport: Arc<dyn WebhookTransport>,
    timeout: Duration,
    cancel: CancellationToken,
    call: ServiceCall,
) -> Result<CallOutcome, WebhookError> {
    let attempt = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        res = tokio::time::timeout(timeout, transport.call(&call.url, &call.request)) => Some(res),
    };
    let response = match attempt {
        None => return Err(WebhookError::Cancelled),
        Some(Err(_)) => {
            return Err(WebhookError::Timeout {
                service: call.service,
                timeout_secs: timeout.as_secs(),
            })
        }
        Some(Ok(Err(source))) => {
            return Err(WebhookError::Transport {
                service: call.service,
                source,
            })
        }
        Some(Ok(Ok(response))) => response,
    };

    let body = String::from_utf8_lossy(&response.body).into_owned();
    match (kind, response.status) {
        (StageKind::Mutation, 200) => {
            let parsed: MutationResponse = serde_json::from_slice(&response.body).map_err(|e| {
                WebhookError::InvalidResponse {
                    service: call.service.clone(),
                    message: e.to_string(),
                }
            })?;
            let mut mutated = HashMap::with_capacity(parsed.files.len());
            for (name, encoded) in parsed.files {
                if !call.request.files.iter().any(|f| f.name == name) {
                    return Err(WebhookError::InvalidResponse {
                        service: call.service,
                        message: format!("returned unknown file {name}"),
                    });
                }
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| WebhookError::InvalidResponse {
                        service: call.service.clone(),
                        message: format!("file {name}: {e}"),
                    })?;
                mutated.insert(name, bytes);
            }
            Ok(CallOutcome::Mutated {
                service: call.service,
                files: mutated,
            })
        }
        (StageKind::Validation, 200) => Ok(CallOutcome::Passed),
        (StageKind::MetadataExtraction, 200) => {
            let parsed: MetadataResponse = serde_json::from_slice(&response.body).map_err(|e| {
                WebhookError::InvalidResponse {
                    service: call.service.clone(),
                    message: e.to_string(),
                }
            })?;
            Ok(CallOutcome::Extracted(parsed.data))
        }
        (StageKind::Mutation | StageKind::Validation, STATUS_UNPROCESSABLE) => {
            Ok(CallOutcome::Rejected(format!("{}: {}", call.service, body)))
        }
        (_, status) => Err(WebhookError::UnexpectedStatus {
            service: call.service,
            status,
            body,
        }),
    }
}

async fn write_mutated(base_dir: &Path, files: HashMap<String, Vec<u8>>) -> Result<(), WebhookError> {
    for (name, bytes) in files {
        let path: PathBuf = base_dir.join(&name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| WebhookError::WriteFile { path, source })?;
        debug!(file = %name, "Wrote mutated file");
    }
    Ok(())
}

#[async_trait]
impl WebhookStage for WebhookEngine {
    async fn run(
        &self,
        cancel: &CancellationToken,
        base_dir: &Path,
        files: &[String],
        services: &[WebhookService],
    ) -> Result<StageResult, WebhookError> {
        if services.is_empty() {
            return Ok(StageResult::succeeded());
        }

        let calls = self.build_calls(base_dir, files, services).await?;
        info!(
            stage = self.kind.as_str(),
            services = services.len(),
            dispatched = calls.len(),
            workers = self.pool.workers(),
            "Running webhook stage"
        );

        let kind = self.kind;
        let transport = Arc::clone(&self.transport);
        let timeout = self.timeout;
        let token = cancel.clone();
        let drained = self
            .pool
            .run_until(
                calls,
                move |call| dispatch(kind, Arc::clone(&transport), timeout, token.clone(), call),
                |outcome: &Result<CallOutcome, WebhookError>| outcome.is_err(),
            )
            .await
            .map_err(|e| WebhookError::Worker(e.to_string()))?;

        let mut outcomes = drained.outputs;
        if let Some(first) = drained.first_halt {
            if let Err(e) = outcomes.swap_remove(first) {
                return Err(e);
            }
        }

        let mut result = StageResult::succeeded();
        let mut mutated = Vec::new();
        let mut written_by: HashMap<String, String> = HashMap::new();
        for outcome in outcomes {
            match outcome? {
                CallOutcome::Passed => {}
                CallOutcome::Rejected(message) => {
                    warn!(stage = kind.as_str(), message = %message, "Service rejected content");
                    result.success = false;
                    result.messages.push(message);
                }
                CallOutcome::Mutated { service, files } => {
                    for name in files.keys() {
                        if let Some(previous) = written_by.insert(name.clone(), service.clone()) {
                            return Err(WebhookError::InvalidResponse {
                                service,
                                message: format!("file {name} was also mutated by {previous}"),
                            });
                        }
                    }
                    mutated.push(files);
                }
                CallOutcome::Extracted(metadata) => result.metadata.extend(metadata),
            }
        }

        for files in mutated {
            write_mutated(base_dir, files).await?;
        }

        info!(
            stage = kind.as_str(),
            success = result.success,
            "Webhook stage finished"
        );
        Ok(result)
    }
}
