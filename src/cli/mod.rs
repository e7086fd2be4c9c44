//! CLI module for vaultseed.
//!
//! This module provides the command-line interface for seeding a Vault
//! server from a manifest.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, Selection};
pub use output::OutputFormatter;
