//! The `import` subcommand.

use crate::error::CliError;
use clap::Args;
use mapforge::config::ImportConfig;
use mapforge::import::{ImportMode, ImportService, ProgressCallback};
use mapforge::resource::{HttpResourceFetcher, TileResourceService};
use mapforge::store::{MemoryMapStore, MemoryMarkerStore};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Args)]
pub struct ImportArgs {
    /// Path to the .hmap world export.
    pub file: PathBuf,

    /// Tenant the import belongs to.
    #[arg(long)]
    pub tenant: String,

    /// Merge into existing maps instead of creating new ones per segment.
    #[arg(long)]
    pub merge: bool,

    /// Override the configured storage root.
    #[arg(long)]
    pub storage_root: Option<PathBuf>,

    /// Override the tileset resource endpoint.
    #[arg(long)]
    pub resource_url: Option<String>,
}

pub async fn run(args: ImportArgs, mut config: ImportConfig) -> Result<(), CliError> {
    if let Some(root) = args.storage_root {
        config.storage_root = root;
    }
    if let Some(url) = args.resource_url {
        config.resource_base_url = Some(url);
    }

    let fetcher = match &config.resource_base_url {
        Some(url) => Some(HttpResourceFetcher::new(url.clone())?),
        None => None,
    };
    let resources = Arc::new(TileResourceService::new(
        config.resource_cache_dir(),
        fetcher,
        config.memory_cache_entries,
    )?);

    let store = Arc::new(MemoryMapStore::new());
    let markers = Arc::new(MemoryMarkerStore::new());
    let service = ImportService::new(store, markers, resources, config);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, canceling import");
            signal_cancel.cancel();
        }
    });

    let progress: ProgressCallback = Arc::new(|report| {
        eprintln!(
            "[{}/5] {:?}: {}/{} ({:.1}% overall, {:.1} items/s)",
            report.phase_number,
            report.phase,
            report.current_item,
            report.total_items,
            report.overall_percent,
            report.items_per_second,
        );
    });

    let mode = if args.merge {
        ImportMode::Merge
    } else {
        ImportMode::CreateNew
    };
    let input = File::open(&args.file)?;
    let result = service
        .import(input, &args.tenant, mode, Some(progress), cancel)
        .await;

    println!(
        "maps created:     {}\n\
         grids imported:   {}\n\
         grids skipped:    {}\n\
         tiles rendered:   {}\n\
         markers imported: {}\n\
         markers skipped:  {}\n\
         duration:         {:.2}s",
        result.maps_created,
        result.grids_imported,
        result.grids_skipped,
        result.tiles_rendered,
        result.markers_imported,
        result.markers_skipped,
        result.duration.as_secs_f64(),
    );

    if result.success {
        Ok(())
    } else {
        if !result.created_map_ids.is_empty() || !result.created_grid_ids.is_empty() {
            eprintln!(
                "partial state left behind: maps {:?}, grids {:?} (use `mapforge cleanup`)",
                result.created_map_ids, result.created_grid_ids
            );
        }
        Err(CliError::ImportFailed(
            result
                .error_message
                .unwrap_or_else(|| "unknown failure".to_string()),
        ))
    }
}
