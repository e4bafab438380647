use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use s3sync::{
    list_contents, run_download, run_upload, ConfigError, ConflictPolicy, Overrides, RunReport,
    S3Store, StdinPrompter, SyncConfig, SyncError,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_ABORTED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "s3sync")]
#[command(about = "Upload and download directories to and from Amazon S3", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local directory to S3
    Upload(SyncArgs),
    /// Download an S3 prefix into a local directory
    Download(SyncArgs),
    /// List the keys under a prefix
    Ls(ListArgs),
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Local directory to synchronize
    #[arg(long, default_value = ".")]
    directory: PathBuf,

    /// S3 bucket
    #[arg(long, alias = "s3-bucket")]
    bucket: Option<String>,

    /// Prefix for S3 object keys
    #[arg(long, alias = "s3-prefix")]
    prefix: Option<String>,

    /// Exclude files or directories whose name contains this string (repeatable)
    #[arg(long, num_args = 1..)]
    exclude: Vec<String>,

    /// Simulate the transfer without moving any data
    #[arg(long)]
    dry_run: bool,

    /// Display progress statistics
    #[arg(long)]
    progress: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Number of files transferred at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retries per file after a failed transfer
    #[arg(long)]
    retries: Option<usize>,

    /// Conflict policy: prompt, local, remote or skip
    #[arg(long)]
    conflict: Option<ConflictPolicy>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Custom S3-compatible endpoint
    #[arg(long)]
    endpoint: Option<String>,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Directory whose configuration file supplies defaults
    #[arg(long, default_value = ".")]
    directory: PathBuf,

    #[arg(long, alias = "s3-bucket")]
    bucket: Option<String>,

    /// Prefix to list
    #[arg(long, alias = "path")]
    prefix: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    endpoint: Option<String>,
}

impl SyncArgs {
    fn into_parts(self) -> (PathBuf, Overrides) {
        let overrides = Overrides {
            bucket: self.bucket,
            prefix: self.prefix,
            excludes: self.exclude,
            dry_run: self.dry_run,
            progress: self.progress,
            verbose: self.verbose,
            assume_yes: self.yes,
            concurrency: self.concurrency,
            retries: self.retries,
            conflict: self.conflict,
            region: self.region,
            endpoint: self.endpoint,
        };
        (self.directory, overrides)
    }
}

impl ListArgs {
    fn into_parts(self) -> (PathBuf, Overrides) {
        let overrides = Overrides {
            bucket: self.bucket,
            prefix: self.prefix,
            verbose: self.verbose,
            region: self.region,
            endpoint: self.endpoint,
            ..Default::default()
        };
        (self.directory, overrides)
    }
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("s3sync={}", log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

fn open_store(config: &SyncConfig) -> anyhow::Result<S3Store> {
    S3Store::new(
        &config.bucket,
        config.region.as_deref(),
        config.endpoint.as_deref(),
        config.chunk_size as usize,
    )
    .with_context(|| format!("Failed to configure S3 client for bucket {}", config.bucket))
}

fn report_outcome(report: &RunReport) {
    if !report.confirmed {
        return;
    }
    if report.failed() > 0 {
        warn!("{} file(s) failed to transfer", report.failed());
    }
    info!(
        "Finished {} of {} objects",
        report.transferred() + report.skipped() + report.simulated(),
        report.summary.total_objects
    );
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let prompter = Arc::new(StdinPrompter);

    match cli.command {
        Command::Upload(args) => {
            let (directory, overrides) = args.into_parts();
            let config = SyncConfig::resolve(directory, overrides)?;
            let store = open_store(&config)?;
            let report = run_upload(&config, Arc::new(store), prompter).await?;
            report_outcome(&report);
        }
        Command::Download(args) => {
            let (directory, overrides) = args.into_parts();
            let config = SyncConfig::resolve(directory, overrides)?;
            let store = open_store(&config)?;
            let report = run_download(&config, Arc::new(store), prompter).await?;
            report_outcome(&report);
        }
        Command::Ls(args) => {
            let (directory, overrides) = args.into_parts();
            let config = SyncConfig::resolve(directory, overrides)?;
            let store = open_store(&config)?;
            list_contents(&store, &config.prefix).await?;
        }
    }
    Ok(())
}

/// How a command ended, as seen by `main`.
enum Finish {
    Completed(anyhow::Result<()>),
    Interrupted,
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let is_config = err.downcast_ref::<ConfigError>().is_some()
        || matches!(err.downcast_ref::<SyncError>(), Some(SyncError::ConfigError(_)));
    if is_config {
        EXIT_CONFIG
    } else {
        EXIT_ABORTED
    }
}

fn exit_status(finish: &Finish) -> u8 {
    match finish {
        Finish::Completed(Ok(())) => 0,
        Finish::Completed(Err(e)) => exit_code_for(e),
        Finish::Interrupted => EXIT_INTERRUPTED,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbose = match &cli.command {
        Command::Upload(args) | Command::Download(args) => args.verbose,
        Command::Ls(args) => args.verbose,
    };
    init_tracing(verbose);

    let finish = tokio::select! {
        result = run(cli) => Finish::Completed(result),
        _ = tokio::signal::ctrl_c() => Finish::Interrupted,
    };
    let status = exit_status(&finish);

    match finish {
        Finish::Completed(Ok(())) => {}
        Finish::Completed(Err(e)) => eprintln!("Error: {:#}", e),
        Finish::Interrupted => {
            println!("\nOperation interrupted by the user.");
            // Exit without waiting on a pending stdin read.
            std::process::exit(i32::from(status));
        }
    }
    ExitCode::from(status)
}
