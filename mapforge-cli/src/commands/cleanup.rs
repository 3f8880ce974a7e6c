//! The `cleanup` subcommand.
//!
//! Removes the on-disk tile trees (and, when wired to a persistent
//! catalog, the rows and quota) left behind by a failed import.

use crate::error::CliError;
use clap::Args;
use mapforge::cleanup::CleanupService;
use mapforge::config::ImportConfig;
use mapforge::quota::StorageQuotaService;
use mapforge::store::MemoryMapStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args)]
pub struct CleanupArgs {
    /// Tenant whose artefacts are removed.
    #[arg(long)]
    pub tenant: String,

    /// Map ids to remove, repeatable.
    #[arg(long = "map-id")]
    pub map_ids: Vec<i64>,

    /// Grid ids to remove, repeatable.
    #[arg(long = "grid-id")]
    pub grid_ids: Vec<String>,

    /// Override the configured storage root.
    #[arg(long)]
    pub storage_root: Option<PathBuf>,
}

pub async fn run(args: CleanupArgs, mut config: ImportConfig) -> Result<(), CliError> {
    if let Some(root) = args.storage_root {
        config.storage_root = root;
    }

    let store = Arc::new(MemoryMapStore::new());
    let quota = StorageQuotaService::new(Arc::clone(&store));
    let service = CleanupService::new(store, quota, config.storage_root.clone());

    service
        .cleanup(&args.tenant, &args.map_ids, &args.grid_ids)
        .await;

    println!(
        "cleaned {} map(s) and {} grid id(s) under {}",
        args.map_ids.len(),
        args.grid_ids.len(),
        config.storage_root.display(),
    );
    Ok(())
}
