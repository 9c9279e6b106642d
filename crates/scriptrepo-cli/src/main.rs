//! scriptrepo - upload scripts to the TRiBot script repository.
//!
//! Lists a scripter's published scripts and pushes new script archives,
//! logging in through the external login prompt when needed.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scriptrepo_core::{Config, RepoScript, RepositoryClient, VersionPolicy};

#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Repository URL (overrides config and SCRIPTREPO_URL).
    #[arg(long, global = true, value_name = "url")]
    url: Option<String>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List your published scripts.
    List,

    /// Upload a new archive for a published script.
    Upload(UploadOptions),

    /// Forget the saved login.
    Logout,
}

#[derive(Debug, Args)]
struct UploadOptions {
    /// Script id or name as shown by `list`.
    #[arg(value_name = "script")]
    script: String,

    /// Zip archive to upload.
    #[arg(value_name = "archive")]
    archive: PathBuf,

    /// Upload exactly this version.
    #[arg(long, value_name = "version")]
    version: Option<String>,

    /// Minimum version to upload.
    #[arg(long, value_name = "version")]
    base: Option<String>,

    /// Amount to add to the current version.
    #[arg(long, value_name = "amount")]
    increment: Option<String>,

    /// Work out the version but don't upload.
    #[arg(long)]
    dry_run: bool,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(verbose: bool) {
    // RUST_LOG wins over --verbose when set
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = cli.url {
        config.repository_url = Some(url);
    }
    let client = RepositoryClient::from_config(&config)?;
    info!(url = client.base_url(), "Using repository");

    match cli.command {
        Command::List => run_list(&client).await,
        Command::Upload(opts) => run_upload(&client, opts).await,
        Command::Logout => {
            client.reset_login().await;
            println!("Saved login removed");
            Ok(())
        }
    }
}

async fn run_list(client: &RepositoryClient) -> Result<()> {
    let scripts = client.list_scripts().await?;
    if scripts.is_empty() {
        println!("No published scripts");
        return Ok(());
    }
    let id_width = scripts.iter().map(|s| s.id.len()).max().unwrap_or(2).max(2);
    let name_width = scripts.iter().map(|s| s.name.len()).max().unwrap_or(4).max(4);
    println!("{:<id_width$}  {:<name_width$}  VERSION", "ID", "NAME");
    for script in &scripts {
        println!(
            "{:<id_width$}  {:<name_width$}  {}",
            script.id, script.name, script.version
        );
    }
    Ok(())
}

async fn run_upload(client: &RepositoryClient, opts: UploadOptions) -> Result<()> {
    if !opts.archive.is_file() {
        anyhow::bail!("Archive not found: {}", opts.archive.display());
    }

    let scripts = client.list_scripts().await?;
    let script = find_script(&scripts, &opts.script)
        .ok_or_else(|| anyhow::anyhow!("No published script matches {:?}", opts.script))?;

    let policy = VersionPolicy {
        version: opts.version,
        base: opts.base,
        increment: opts.increment,
    };
    let version = policy.effective_version(&script.version);
    info!(id = %script.id, current = %script.version, version = %version, "Resolved upload version");

    if opts.dry_run {
        println!("Would upload {} ({}) as version {}", script.name, script.id, version);
        return Ok(());
    }

    client
        .update_script(&script.id, &version, &opts.archive)
        .await
        .with_context(|| format!("Failed to update {} ({})", script.name, script.id))?;
    println!("Uploaded {} ({}) version {}", script.name, script.id, version);
    Ok(())
}

/// Match by exact id first, then by case-insensitive name.
fn find_script<'a>(scripts: &'a [RepoScript], selector: &str) -> Option<&'a RepoScript> {
    scripts
        .iter()
        .find(|s| s.id == selector)
        .or_else(|| scripts.iter().find(|s| s.name.eq_ignore_ascii_case(selector)))
}
