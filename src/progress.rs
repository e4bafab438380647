//! Progress/ETA reporting and human-readable size and time formatting.

use crate::types::Direction;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const KIB: f64 = 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Formats a byte count in base-1024 units with two decimals above bytes.
pub fn format_size(bytes: u64) -> String {
    let size = bytes as f64;
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if size < MIB {
        format!("{:.2} KB", size / KIB)
    } else if size < GIB {
        format!("{:.2} MB", size / MIB)
    } else {
        format!("{:.2} GB", size / GIB)
    }
}

/// Formats whole seconds as `HH:MM:SS`. Hours are not capped at 24.
pub fn format_time(duration: Duration) -> String {
    let total = duration.as_secs();
    let (h, rest) = (total / 3600, total % 3600);
    format!("{:02}:{:02}:{:02}", h, rest / 60, rest % 60)
}

/// Counters at one instant, with the percentage and ETA arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    fn is_degenerate(&self) -> bool {
        self.completed == 0 || self.completed <= self.skipped || self.total <= self.skipped
    }

    /// `completed / (total - skipped) * 100`, or 0 before the first real
    /// completion.
    pub fn percentage(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        self.completed as f64 / (self.total - self.skipped) as f64 * 100.0
    }

    /// Remaining time at the observed throughput, `None` when undefined.
    pub fn eta(&self) -> Option<Duration> {
        if self.is_degenerate() {
            return None;
        }
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let per_second = self.completed as f64 / elapsed;
        let remaining = self.total.saturating_sub(self.completed) as f64;
        Some(Duration::from_secs_f64(remaining / per_second))
    }

    /// The single-line status rendering.
    pub fn render(&self, direction: Direction) -> String {
        let remaining = self
            .eta()
            .map(format_time)
            .unwrap_or_else(|| "N/A".to_string());
        format!(
            "Progress: {:.2}% | {}: {}/{} | Remaining: {}",
            self.percentage(),
            direction.past_tense(),
            self.completed,
            self.total,
            remaining
        )
    }
}

/// Thread-safe progress counters with an optional status line.
///
/// Counters are atomics so concurrent transfers can report without a lock.
/// When rendering is enabled the status line is an indicatif bar used as a
/// single overwritten message; user-facing lines are printed above it.
pub struct ProgressReporter {
    direction: Direction,
    total: usize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    started: Instant,
    bar: ProgressBar,
    render: bool,
    finished: AtomicBool,
}

impl ProgressReporter {
    pub fn new(direction: Direction, total: usize, render: bool) -> Self {
        let bar = if render {
            let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stdout());
            if let Ok(style) = ProgressStyle::default_bar().template("{msg}") {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            direction,
            total,
            completed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            started: Instant::now(),
            bar,
            render,
            finished: AtomicBool::new(false),
        }
    }

    /// A reporter that never draws, for tests and piped output.
    pub fn hidden(direction: Direction, total: usize) -> Self {
        Self::new(direction, total, false)
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.refresh();
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total,
            skipped: self.skipped.load(Ordering::SeqCst),
            elapsed: self.started.elapsed(),
        }
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Prints a line without corrupting the status line.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.render && !self.finished.load(Ordering::SeqCst) && !self.bar.is_hidden() {
            self.bar.println(line.as_ref());
        } else {
            println!("{}", line.as_ref());
        }
    }

    fn refresh(&self) {
        if self.render {
            let snapshot = self.snapshot();
            self.bar.set_position((snapshot.completed + snapshot.skipped) as u64);
            self.bar.set_message(snapshot.render(self.direction));
        }
    }

    /// Leaves the last status line on screen.
    pub fn finish(&self) {
        if self.render && !self.finished.swap(true, Ordering::SeqCst) {
            self.bar.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(0), "0 bytes");
        assert_eq!(format_size(1023), "1023 bytes");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(150_000_000), "143.05 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_time(Duration::from_secs(3725)), "01:02:05");
        assert_eq!(format_time(Duration::from_secs(90_000)), "25:00:00");
    }

    #[test]
    fn test_degenerate_progress() {
        let snapshot = ProgressSnapshot {
            completed: 0,
            total: 10,
            skipped: 0,
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(snapshot.percentage(), 0.0);
        assert_eq!(snapshot.eta(), None);
        assert_eq!(
            snapshot.render(Direction::Upload),
            "Progress: 0.00% | Uploaded: 0/10 | Remaining: N/A"
        );

        let all_skipped = ProgressSnapshot {
            completed: 3,
            total: 5,
            skipped: 3,
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(all_skipped.percentage(), 0.0);
        assert_eq!(all_skipped.eta(), None);
    }

    #[test]
    fn test_percentage_and_eta() {
        let snapshot = ProgressSnapshot {
            completed: 4,
            total: 10,
            skipped: 2,
            elapsed: Duration::from_secs(8),
        };
        assert_eq!(snapshot.percentage(), 50.0);
        // 2 s per item, 6 items left
        assert_eq!(snapshot.eta(), Some(Duration::from_secs(12)));
        assert_eq!(
            snapshot.render(Direction::Download),
            "Progress: 50.00% | Downloaded: 4/10 | Remaining: 00:00:12"
        );
    }

    #[test]
    fn test_reporter_counts() {
        let reporter = ProgressReporter::hidden(Direction::Upload, 3);
        reporter.record_completed();
        reporter.record_skipped();
        reporter.record_failed();

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(reporter.failed(), 1);
    }
}
