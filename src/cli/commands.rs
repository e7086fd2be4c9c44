//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::archive::DEFAULT_ICE_PREFIX;
use crate::config::{DEFAULT_SECRETFILE, SeedOptions};

/// Vaultseed - Declarative Vault provisioning.
#[derive(Parser, Debug)]
#[command(name = "vaultseed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Manifest and directory selection.
    #[command(flatten)]
    pub selection: Selection,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct Selection {
    /// Path to the manifest.
    #[arg(long, global = true, env = "VAULTSEED_SECRETFILE", default_value = DEFAULT_SECRETFILE)]
    pub secretfile: PathBuf,

    /// Directory holding local secret files.
    #[arg(long, global = true)]
    pub secrets: Option<PathBuf>,

    /// Directory holding policy templates.
    #[arg(long, global = true)]
    pub policies: Option<PathBuf>,

    /// Only act on entries carrying every one of these tags.
    #[arg(long, global = true, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Only act on these paths.
    #[arg(long, global = true)]
    pub include: Vec<String>,

    /// Never act on these paths.
    #[arg(long, global = true)]
    pub exclude: Vec<String>,

    /// Template variable as key=value.
    #[arg(long, global = true)]
    pub extra_vars: Vec<String>,

    /// YAML file of template variables.
    #[arg(long, global = true)]
    pub extra_vars_file: Vec<PathBuf>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Converge Vault onto the manifest.
    Seed {
        /// Unmount secret engines the manifest does not declare.
        #[arg(long)]
        remove_unknown: bool,

        /// Stop after mount points have been synced.
        #[arg(long)]
        mount_only: bool,

        /// Use the supplied token as is.
        #[arg(long)]
        reuse_token: bool,

        /// Thaw secrets from this ice file before seeding.
        #[arg(long)]
        thaw_from: Option<PathBuf>,
    },

    /// Show what a seed would change.
    Diff,

    /// Bundle referenced secret files into an encrypted ice file.
    Freeze {
        /// Directory the ice file is written to.
        #[arg(default_value = ".")]
        dest_dir: PathBuf,

        /// Ice file name prefix.
        #[arg(long, default_value = DEFAULT_ICE_PREFIX)]
        prefix: String,
    },

    /// Restore referenced secret files from an ice file.
    Thaw {
        /// Ice file to read.
        icefile: PathBuf,

        /// Warn instead of failing on missing files.
        #[arg(long)]
        ignore_missing: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Builds run options from the arguments, environment overrides applied.
    #[must_use]
    pub fn seed_options(&self) -> SeedOptions {
        let selection = self.selection.clone();
        let mut options = SeedOptions {
            secretfile: selection.secretfile,
            secrets: selection.secrets,
            policies: selection.policies,
            tags: selection.tags,
            include: selection.include,
            exclude: selection.exclude,
            extra_vars: selection.extra_vars,
            extra_vars_file: selection.extra_vars_file,
            ..SeedOptions::default()
        };

        match &self.command {
            Commands::Seed {
                remove_unknown,
                mount_only,
                reuse_token,
                thaw_from,
            } => {
                options.remove_unknown = *remove_unknown;
                options.mount_only = *mount_only;
                options.reuse_token = *reuse_token;
                options.thaw_from.clone_from(thaw_from);
            }
            Commands::Thaw { ignore_missing, .. } => options.ignore_missing = *ignore_missing,
            Commands::Diff | Commands::Freeze { .. } => {}
        }

        options.with_env_overrides()
    }
}
