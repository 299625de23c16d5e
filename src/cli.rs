use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use asset_sync_core::bucket::BucketHandler;
use asset_sync_core::contract::{BucketClient, ObjectClient, WebhookTransport};
use asset_sync_core::events::TracingRecorder;
use asset_sync_core::fs_store::FsObjectStore;
use asset_sync_core::handler::{AssetHandler, Stages};
use asset_sync_core::loader::DefaultLoader;
use asset_sync_core::store::Store;
use asset_sync_core::webhook::{HttpTransport, WebhookEngine};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::controller::{ConfigBucketFinder, Controller};
use crate::load_config::{load_config, AppConfig};

/// CLI for asset-sync: keep declared assets published in their buckets.
#[derive(Parser)]
#[clap(
    name = "asset-sync",
    version,
    about = "Fetch declared assets, run them through webhook stages and publish them into buckets"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile every configured asset until interrupted
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Run a single reconciliation pass and exit
        #[clap(long)]
        once: bool,
    },
    /// Provision the system buckets and print their names
    Buckets {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

fn store_base_url(root: &Path) -> Result<String> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("creating store root {}", root.display()))?;
    let root = root
        .canonicalize()
        .with_context(|| format!("resolving store root {}", root.display()))?;
    Ok(format!("file://{}", root.display()))
}

async fn build_controller(config: &AppConfig, fs_store: Arc<FsObjectStore>) -> Result<Controller> {
    let base_url = store_base_url(&config.store_root)?;

    let buckets = BucketHandler::new(
        Arc::clone(&fs_store) as Arc<dyn BucketClient>,
        config.bucket.clone(),
    );
    for decl in &config.buckets {
        buckets
            .create_if_missing(decl.remote_name(), &config.bucket.region)
            .await
            .map_err(|e| anyhow::anyhow!("creating bucket {}: {e}", decl.remote_name()))?;
        if decl.public {
            buckets.set_public_policy(decl.remote_name()).await?;
        }
    }

    let transport: Arc<dyn WebhookTransport> = Arc::new(
        HttpTransport::new(config.webhook.verify_tls)
            .map_err(|e| anyhow::anyhow!("building webhook client: {e}"))?,
    );
    let loader = DefaultLoader::new(&config.loader)
        .map_err(|e| anyhow::anyhow!("building loader: {e}"))?;
    let finder = ConfigBucketFinder::new(
        config.buckets.clone(),
        Arc::clone(&fs_store) as Arc<dyn BucketClient>,
        &base_url,
    );

    let handler = AssetHandler::new(
        Store::new(fs_store as Arc<dyn ObjectClient>, &config.store),
        Arc::new(loader),
        Arc::new(finder),
        Arc::new(TracingRecorder),
        Stages {
            mutator: Arc::new(WebhookEngine::mutation(Arc::clone(&transport), &config.webhook)),
            validator: Arc::new(WebhookEngine::validation(Arc::clone(&transport), &config.webhook)),
            extractor: Arc::new(WebhookEngine::metadata_extraction(transport, &config.webhook)),
        },
        &config.handler,
    );

    let controller = Controller::new(
        handler,
        config.max_concurrent_reconciles,
        Duration::from_secs(config.tick_interval_secs.max(1)),
    );
    for asset in &config.assets {
        controller.apply(asset.clone()).await;
    }
    Ok(controller)
}

async fn print_summary(controller: &Controller) {
    println!("Asset status:");
    for (key, status) in controller.statuses().await {
        match status {
            Some(status) => println!("  {key}: {:?}/{} {}", status.phase, status.reason, status.message),
            None => println!("  {key}: <none>"),
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config, once } => {
            let config = load_config(config)?;
            let fs_store = Arc::new(FsObjectStore::new(&config.store_root));
            let controller = build_controller(&config, fs_store).await?;
            let cancel = CancellationToken::new();

            if once {
                println!("Reconciliation starting...");
                // A fresh asset is scheduled on its first pass and published on
                // the second.
                let first = controller.reconcile_all(&cancel, Utc::now()).await;
                let second = controller.reconcile_all(&cancel, Utc::now()).await;
                print_summary(&controller).await;
                if first.failed + second.failed > 0 {
                    eprintln!("[ERROR] Reconciliation finished with failures");
                    anyhow::bail!("{} reconciliation(s) failed", first.failed + second.failed);
                }
                println!("Reconciliation complete.");
                return Ok(());
            }

            let stop = cancel.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Interrupt received"),
                    Err(e) => error!(error = ?e, "Failed to listen for interrupt"),
                }
                stop.cancel();
            });
            controller.run(cancel).await;
            print_summary(&controller).await;
            Ok(())
        }
        Commands::Buckets { config } => {
            let config = load_config(config)?;
            let fs_store = Arc::new(FsObjectStore::new(&config.store_root));
            let handler = BucketHandler::new(fs_store, config.bucket.clone());
            match handler.ensure_system_buckets(Utc::now()).await {
                Ok(names) => {
                    println!("public: {}", names.public);
                    println!("private: {}", names.private);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("[ERROR] Bucket provisioning failed: {}", e);
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}
