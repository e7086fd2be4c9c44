//! Vaultseed CLI entrypoint.
//!
//! This is the main entrypoint for the vaultseed command-line tool.
//! Reports go to stdout. Logs and errors go to stderr.

use std::path::Path;
use std::process::ExitCode;

use vaultseed::archive::GpgEncryptor;
use vaultseed::cli::{Cli, Commands, OutputFormatter};
use vaultseed::config::{Manifest, SeedEnv, SeedOptions};
use vaultseed::context::Context;
use vaultseed::error::Result;
use vaultseed::reconciler::Reconciler;
use vaultseed::vault::authenticate;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let verbose = cli.verbose;
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if verbose {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. `RUST_LOG` wins when set.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let options = cli.seed_options();
    options.load_dotenv()?;

    match cli.command {
        Commands::Seed { .. } => cmd_seed(&options, &formatter).await,
        Commands::Diff => cmd_diff(&options, &formatter).await,
        Commands::Freeze { dest_dir, prefix } => cmd_freeze(&options, &dest_dir, &prefix, &formatter),
        Commands::Thaw { icefile, .. } => cmd_thaw(&options, &icefile, &formatter),
    }
}

/// Loads the manifest and builds the selected context.
fn load(options: &SeedOptions) -> Result<(SeedEnv, Manifest, Context)> {
    let env = SeedEnv::new(options)?;
    info!("Loading manifest: {}", options.secretfile.display());
    let manifest = Manifest::load_file(&options.secretfile, &env)?;
    let ctx = Context::load(&manifest, options, &env)?;
    debug!("{} resources selected", ctx.len());
    Ok((env, manifest, ctx))
}

/// Converge Vault onto the manifest.
async fn cmd_seed(options: &SeedOptions, formatter: &OutputFormatter) -> Result<()> {
    let (mut env, _manifest, mut ctx) = load(options)?;

    let thawed = match &options.thaw_from {
        Some(icefile) => {
            let scratch = tempfile::tempdir()?;
            env.set_secrets_dir(scratch.path());
            ctx.thaw(icefile, &env, &GpgEncryptor::default(), options.ignore_missing)?;
            Some(scratch)
        }
        None => None,
    };

    let client = authenticate(options.reuse_token)?;
    let reconciler = Reconciler::new(&client, &env, options);
    let report = reconciler.seed(&mut ctx).await?;
    drop(thawed);

    println!("{}", formatter.format_seed(&report));
    Ok(())
}

/// Show what a seed would change.
async fn cmd_diff(options: &SeedOptions, formatter: &OutputFormatter) -> Result<()> {
    let (env, _manifest, mut ctx) = load(options)?;

    let client = authenticate(true)?;
    let reconciler = Reconciler::new(&client, &env, options);
    reconciler.fetch(&mut ctx).await?;
    let report = reconciler.diff(&ctx)?;

    println!("{}", formatter.format_diff(&report));
    Ok(())
}

/// Bundle referenced secret files into an ice file.
fn cmd_freeze(
    options: &SeedOptions,
    dest_dir: &Path,
    prefix: &str,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (env, manifest, ctx) = load(options)?;

    let handle = ice_handle(options.secretfile_dir());
    let icefile = ctx.freeze(
        dest_dir,
        &env,
        &GpgEncryptor::default(),
        &manifest.pgp_keys(),
        prefix,
        &handle,
    )?;

    println!("{}", formatter.format_freeze(&icefile, ctx.secrets().len()));
    Ok(())
}

/// Restore referenced secret files from an ice file.
fn cmd_thaw(options: &SeedOptions, icefile: &Path, formatter: &OutputFormatter) -> Result<()> {
    let (env, _manifest, ctx) = load(options)?;

    let thawed = ctx.thaw(icefile, &env, &GpgEncryptor::default(), options.ignore_missing)?;

    println!("{}", formatter.format_thaw(&thawed));
    Ok(())
}

/// Names an ice file after the directory holding the manifest.
fn ice_handle(dir: &Path) -> String {
    dir.canonicalize()
        .ok()
        .and_then(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| String::from("secrets"))
}
