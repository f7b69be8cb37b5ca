//! catalog-sync CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (reindex, queue, credentials, config)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, ConfigCommands, CredentialsCommands, EntitySelector, QueueCommands};
pub use commands::{
    handle_config, handle_credentials, handle_queue, handle_reindex, init_logging, load_settings,
};
