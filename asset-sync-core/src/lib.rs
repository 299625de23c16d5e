#![doc = "asset-sync-core: core reconciliation logic for asset-sync."]

//! This crate contains the per-asset reconciliation pipeline and everything it
//! drives: the asset state machine, the webhook stage engine and the bucket
//! content synchronisation engine, together with the collaborator contracts
//! they depend on.
//!
//! # Usage
//! Build an [`handler::AssetHandler`] from concrete collaborators (or the mocks
//! exported from [`contract`]) and call `process` once per asset per pass.

pub mod asset;
pub mod bucket;
pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod fs_store;
pub mod handler;
pub mod loader;
pub mod pool;
pub mod store;
pub mod webhook;
