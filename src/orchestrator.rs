//! Run driver for upload, download and listing.
//!
//! A run validates its configuration, builds the inventory it needs, shows
//! the pre-flight summary, waits for confirmation, plans, executes, and only
//! then persists the state file.

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, Prompter};
use crate::error::SyncError;
use crate::filter::ExcludeSet;
use crate::plan::{plan_downloads, plan_uploads};
use crate::progress::{format_size, ProgressReporter};
use crate::scan::{scan_local_async, scan_remote, InventoryTotals};
use crate::state::SyncState;
use crate::store::ObjectStore;
use crate::transfer::{Executor, ItemReport, TransferSettings};
use crate::types::{Direction, ObjectRecord, Outcome, WorkItem};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, Instrument, Span};

/// What the user is shown before anything moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightSummary {
    pub direction: Direction,
    pub bucket: String,
    pub prefix: String,
    pub total_objects: usize,
    pub total_bytes: u64,
}

impl PreflightSummary {
    pub fn lines(&self) -> Vec<String> {
        let (heading, target, size_label) = match self.direction {
            Direction::Upload => ("Uploading to S3:", "Uploading To", "Total upload size"),
            Direction::Download => ("Downloading from S3:", "Downloading From", "Total download size"),
        };
        vec![
            heading.to_string(),
            format!("Bucket: {}", self.bucket),
            format!("{}: {}", target, self.prefix),
            format!("Total Objects: {}", self.total_objects),
            format!("{}: {}", size_label, format_size(self.total_bytes)),
        ]
    }

    pub fn confirmation_question(&self) -> String {
        format!("Proceed with {}? (yes/no): ", self.direction)
    }
}

/// Result of one sync run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: PreflightSummary,
    /// False when the user declined the confirmation prompt.
    pub confirmed: bool,
    pub items: Vec<ItemReport>,
    pub elapsed: Duration,
}

impl RunReport {
    fn count(&self, predicate: impl Fn(&Outcome) -> bool) -> usize {
        self.items.iter().filter(|r| predicate(&r.outcome)).count()
    }

    pub fn transferred(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Transferred(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped))
    }

    pub fn simulated(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Simulated))
    }

    pub fn conflicted(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Conflicted))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }
}

/// Uploads the configured directory to `bucket/prefix`.
pub async fn run_upload(
    config: &SyncConfig,
    store: Arc<dyn ObjectStore>,
    prompter: Arc<dyn Prompter>,
) -> Result<RunReport, SyncError> {
    config.validate()?;
    let started = Instant::now();
    let span = info_span!("sync", direction = "upload", bucket = %config.bucket, prefix = %config.prefix);

    let filter = config.exclude_set();
    let files = scan_local_async(config.directory.clone(), filter.clone())
        .instrument(span.clone())
        .await?;

    let summary = PreflightSummary {
        direction: Direction::Upload,
        bucket: config.bucket.clone(),
        prefix: config.prefix.clone(),
        total_objects: files.total_count(),
        total_bytes: files.total_size_bytes(),
    };
    if !confirm(config, &summary, prompter.as_ref()).await? {
        println!("Upload operation canceled.");
        return Ok(declined(summary, started));
    }

    let state = SyncState::load(config.state_path());
    let items = plan_uploads(files, &config.prefix, &state, &filter)
        .instrument(span.clone())
        .await?;

    execute(config, store, prompter, state, items, summary, span, started).await
}

/// Downloads `bucket/prefix` into the configured directory.
pub async fn run_download(
    config: &SyncConfig,
    store: Arc<dyn ObjectStore>,
    prompter: Arc<dyn Prompter>,
) -> Result<RunReport, SyncError> {
    config.validate()?;
    let started = Instant::now();
    let span = info_span!("sync", direction = "download", bucket = %config.bucket, prefix = %config.prefix);

    let filter = config.exclude_set();
    let objects = scan_remote(store.as_ref(), &config.prefix, &filter)
        .instrument(span.clone())
        .await?;

    let summary = PreflightSummary {
        direction: Direction::Download,
        bucket: config.bucket.clone(),
        prefix: config.prefix.clone(),
        total_objects: objects.total_count(),
        total_bytes: objects.total_size_bytes(),
    };
    if !confirm(config, &summary, prompter.as_ref()).await? {
        println!("Download operation canceled.");
        return Ok(declined(summary, started));
    }

    let state = SyncState::load(config.state_path());
    let items = plan_downloads(objects, &config.prefix, &config.directory, &state, &filter).await;

    execute(config, store, prompter, state, items, summary, span, started).await
}

/// Lists every key under `prefix`, printing them the way `ls` shows them.
pub async fn list_contents(
    store: &dyn ObjectStore,
    prefix: &str,
) -> Result<Vec<ObjectRecord>, SyncError> {
    let objects = scan_remote(store, prefix, &ExcludeSet::default()).await?;

    if objects.is_empty() {
        println!("No contents found in '{}' in bucket '{}'.", prefix, store.bucket());
    } else {
        println!("Contents of '{}' in bucket '{}':", prefix, store.bucket());
        for object in &objects {
            println!("{}", object.key);
        }
    }
    Ok(objects)
}

/// Prints the summary and asks for a literal `yes` unless pre-approved.
async fn confirm(
    config: &SyncConfig,
    summary: &PreflightSummary,
    prompter: &dyn Prompter,
) -> Result<bool, SyncError> {
    for line in summary.lines() {
        println!("{}", line);
    }
    if config.assume_yes {
        return Ok(true);
    }

    let answer = prompter.ask(&summary.confirmation_question()).await?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

fn declined(summary: PreflightSummary, started: Instant) -> RunReport {
    RunReport {
        summary,
        confirmed: false,
        items: Vec::new(),
        elapsed: started.elapsed(),
    }
}

fn settings(config: &SyncConfig) -> TransferSettings {
    TransferSettings {
        multipart_threshold: config.multipart_threshold,
        chunk_size: config.chunk_size,
        concurrency: config.concurrency,
        retries: config.retries,
        retry_delay: config.retry_delay,
        dry_run: config.dry_run,
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    config: &SyncConfig,
    store: Arc<dyn ObjectStore>,
    prompter: Arc<dyn Prompter>,
    state: SyncState,
    items: Vec<WorkItem>,
    summary: PreflightSummary,
    span: Span,
    started: Instant,
) -> Result<RunReport, SyncError> {
    let render = config.progress && atty::is(atty::Stream::Stdout);
    let reporter = Arc::new(ProgressReporter::new(summary.direction, items.len(), render));
    let resolver = ConflictResolver::new(config.conflict_policy, prompter);

    let executor = Executor::new(
        store,
        state,
        resolver,
        Arc::clone(&reporter),
        settings(config),
        span.clone(),
    );
    let items = executor.run(items).await?;

    let state = executor.into_state();
    if !config.dry_run {
        state.persist()?;
    }

    let report = RunReport {
        summary,
        confirmed: true,
        items,
        elapsed: started.elapsed(),
    };

    let verb = match report.summary.direction {
        Direction::Upload => "Upload",
        Direction::Download => "Download",
    };
    reporter.println(format!("{} completed.", verb));
    span.in_scope(|| {
        info!(
            "{} transferred, {} skipped, {} simulated, {} conflicted, {} failed in {}",
            report.transferred(),
            report.skipped(),
            report.simulated(),
            report.conflicted(),
            report.failed(),
            humantime::format_duration(Duration::from_secs(report.elapsed.as_secs()))
        )
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_lines() {
        let summary = PreflightSummary {
            direction: Direction::Upload,
            bucket: "my-bucket".to_string(),
            prefix: "backups".to_string(),
            total_objects: 2,
            total_bytes: 2048,
        };

        assert_eq!(
            summary.lines(),
            vec![
                "Uploading to S3:",
                "Bucket: my-bucket",
                "Uploading To: backups",
                "Total Objects: 2",
                "Total upload size: 2.00 KB",
            ]
        );
        assert_eq!(summary.confirmation_question(), "Proceed with upload? (yes/no): ");
    }

    #[test]
    fn test_download_preflight_wording() {
        let summary = PreflightSummary {
            direction: Direction::Download,
            bucket: "b".to_string(),
            prefix: "p".to_string(),
            total_objects: 0,
            total_bytes: 0,
        };

        let lines = summary.lines();
        assert_eq!(lines[0], "Downloading from S3:");
        assert_eq!(lines[2], "Downloading From: p");
        assert_eq!(lines[3], "Total Objects: 0");
        assert_eq!(lines[4], "Total download size: 0 bytes");
    }
}
