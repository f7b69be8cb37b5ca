//! catalog-sync
//!
//! Keeps search engine indexes in sync with the catalog.
//!
//! # Usage
//!
//! ```bash
//! catalog-sync reindex --entity products --store 1 [--ids 1,2,3] [--queue] [--dry-run]
//! catalog-sync queue run|status|health|clear|prune-archive
//! catalog-sync credentials check [--store N]
//! catalog-sync config show
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/catalog-sync/config.toml)
//! 3. File given with --config
//! 4. Environment variables (CATALOG_SYNC_*)
//! 5. CLI flags

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use sync_cli::{
    handle_config, handle_credentials, handle_queue, handle_reindex, init_logging, load_settings,
    Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_logging(&settings.log_level);
    let settings = Arc::new(settings);

    match cli.command {
        Commands::Reindex {
            entity,
            store,
            ids,
            queue,
            dry_run,
        } => {
            handle_reindex(settings, entity, store, ids, queue, dry_run).await?;
        }
        Commands::Queue { db_path, command } => {
            handle_queue(settings, db_path.as_deref(), command).await?;
        }
        Commands::Credentials { command } => {
            handle_credentials(settings, command).await?;
        }
        Commands::Config { command } => {
            handle_config(&settings, command)?;
        }
    }

    Ok(())
}
