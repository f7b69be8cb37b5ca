//! CLI argument parsing for catalog-sync.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

use sync_types::EntityKind;

/// Catalog search index sync
///
/// Pushes catalog entities to the search engine, directly or through the
/// persistent job queue.
#[derive(Parser, Debug)]
#[command(name = "catalog-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/catalog-sync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which entity kinds a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitySelector {
    All,
    One(EntityKind),
}

impl EntitySelector {
    pub fn kinds(&self) -> Vec<EntityKind> {
        match self {
            EntitySelector::All => EntityKind::ALL.to_vec(),
            EntitySelector::One(kind) => vec![*kind],
        }
    }
}

fn parse_entity_selector(value: &str) -> Result<EntitySelector, String> {
    if value.eq_ignore_ascii_case("all") {
        return Ok(EntitySelector::All);
    }
    value.parse().map(EntitySelector::One)
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild or update search indexes
    Reindex {
        /// Entity kind (product, category, page, suggestion) or "all"
        #[arg(short, long, value_parser = parse_entity_selector, default_value = "all")]
        entity: EntitySelector,

        /// Only this store (default: every configured store)
        #[arg(short, long)]
        store: Option<u32>,

        /// Comma-separated entity ids; omit for a full rebuild
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<u64>>,

        /// Enqueue the work instead of running it now
        #[arg(long)]
        queue: bool,

        /// Build against an in-memory engine; nothing is sent
        #[arg(long, conflicts_with = "queue")]
        dry_run: bool,
    },

    /// Job queue commands
    Queue {
        /// Database path (default from config)
        #[arg(long)]
        db_path: Option<String>,

        #[command(subcommand)]
        command: QueueCommands,
    },

    /// Credential commands
    Credentials {
        #[command(subcommand)]
        command: CredentialsCommands,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Queue subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum QueueCommands {
    /// Run one pass over the queue
    Run {
        /// Override how many jobs the pass claims
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Show queue counts
    Status,

    /// Show health advisories
    Health,

    /// Delete queued jobs
    Clear {
        /// Also delete the archive
        #[arg(long)]
        archive: bool,
    },

    /// Drop archived jobs past the retention window
    PruneArchive,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CredentialsCommands {
    /// Validate the search credentials of stores
    Check {
        /// Only this store
        #[arg(short, long)]
        store: Option<u32>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective settings as TOML, keys redacted
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reindex_defaults() {
        let cli = Cli::parse_from(["catalog-sync", "reindex"]);
        match cli.command {
            Commands::Reindex {
                entity,
                store,
                ids,
                queue,
                dry_run,
            } => {
                assert_eq!(entity, EntitySelector::All);
                assert_eq!(store, None);
                assert_eq!(ids, None);
                assert!(!queue);
                assert!(!dry_run);
            }
            _ => panic!("Expected Reindex command"),
        }
    }

    #[test]
    fn test_reindex_incremental() {
        let cli = Cli::parse_from([
            "catalog-sync",
            "reindex",
            "--entity",
            "products",
            "--store",
            "2",
            "--ids",
            "1,2,30",
            "--queue",
        ]);
        match cli.command {
            Commands::Reindex {
                entity,
                store,
                ids,
                queue,
                ..
            } => {
                assert_eq!(entity, EntitySelector::One(EntityKind::Product));
                assert_eq!(store, Some(2));
                assert_eq!(ids, Some(vec![1, 2, 30]));
                assert!(queue);
            }
            _ => panic!("Expected Reindex command"),
        }
    }

    #[test]
    fn test_reindex_rejects_unknown_entity() {
        let result = Cli::try_parse_from(["catalog-sync", "reindex", "--entity", "orders"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dry_run_conflicts_with_queue() {
        let result = Cli::try_parse_from(["catalog-sync", "reindex", "--queue", "--dry-run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_selector_kinds() {
        assert_eq!(EntitySelector::All.kinds().len(), 4);
        assert_eq!(
            EntitySelector::One(EntityKind::Page).kinds(),
            vec![EntityKind::Page]
        );
    }

    #[test]
    fn test_queue_run_with_jobs() {
        let cli = Cli::parse_from(["catalog-sync", "queue", "run", "--jobs", "25"]);
        match cli.command {
            Commands::Queue { command, .. } => {
                assert!(matches!(command, QueueCommands::Run { jobs: Some(25) }));
            }
            _ => panic!("Expected Queue command"),
        }
    }

    #[test]
    fn test_queue_clear_archive() {
        let cli = Cli::parse_from(["catalog-sync", "queue", "clear", "--archive"]);
        match cli.command {
            Commands::Queue { command, .. } => {
                assert!(matches!(command, QueueCommands::Clear { archive: true }));
            }
            _ => panic!("Expected Queue command"),
        }
    }

    #[test]
    fn test_queue_prune_archive() {
        let cli = Cli::parse_from(["catalog-sync", "queue", "prune-archive"]);
        assert!(matches!(
            cli.command,
            Commands::Queue {
                command: QueueCommands::PruneArchive,
                ..
            }
        ));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "catalog-sync",
            "--config",
            "/etc/catalog-sync.toml",
            "--log-level",
            "debug",
            "queue",
            "status",
        ]);
        assert_eq!(cli.config, Some("/etc/catalog-sync.toml".to_string()));
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_credentials_check() {
        let cli = Cli::parse_from(["catalog-sync", "credentials", "check", "-s", "3"]);
        match cli.command {
            Commands::Credentials {
                command: CredentialsCommands::Check { store },
            } => assert_eq!(store, Some(3)),
            _ => panic!("Expected Credentials command"),
        }
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["catalog-sync", "config", "show"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Show
            }
        ));
    }
}
