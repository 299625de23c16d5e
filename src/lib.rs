#![doc = "asset-sync: CLI glue around asset-sync-core."]

//! Loads the YAML configuration, wires the concrete collaborators into an
//! [`asset_sync_core::handler::AssetHandler`] and drives it from the
//! [`controller::Controller`] loop.

pub mod cli;
pub mod controller;
pub mod load_config;
