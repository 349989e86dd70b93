//! Progress reporting.
//!
//! This module provides [`ProgressCallback`] for monitoring a transcoding
//! run and [`ProgressInfo`] for detailed progress snapshots. Callbacks
//! observe the run; they cannot stop it. A run ends only when its input is
//! exhausted or its retry budget reaches zero.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use transpipe::{ProgressCallback, ProgressInfo, TranscodeOptions};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("{pct:.1}% ({} packets muxed)", info.packets_muxed);
//!         }
//!     }
//! }
//!
//! let options = TranscodeOptions::new("input.mkv", "output.mp4")
//!     .with_progress(Arc::new(PrintProgress));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A snapshot of a transcoding run.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Packets read from the input so far.
    pub packets_read: u64,
    /// Packets written to the output so far.
    pub packets_muxed: u64,
    /// Packets waiting for the container header.
    pub cached_packets: usize,
    /// Duration written for the main (video, else audio) stream.
    pub muxed_duration: Option<Duration>,
    /// Configured duration ceiling, if any.
    pub target_duration: Option<Duration>,
    /// Completion percentage (0.0 – 100.0) against the ceiling.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the run started.
    pub elapsed: Duration,
    /// Retries left in the run's budget.
    pub retries_remaining: u32,
}

/// Trait for receiving progress updates during a run.
///
/// Implementations must be [`Send`] and [`Sync`] so options carrying them
/// can be shared freely.
pub trait ProgressCallback: Send + Sync {
    /// Called at regular intervals during a run.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Counters reported through a [`ProgressTracker`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ProgressCounters {
    pub packets_read: u64,
    pub packets_muxed: u64,
    pub cached_packets: usize,
    pub muxed_duration: Option<Duration>,
    pub retries_remaining: u32,
}

/// Tracks run timing and emits callbacks every `batch_size` packets.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    target: Option<Duration>,
    batch_size: u64,
    start_time: Instant,
    since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        target: Option<Duration>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            target,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            since_last_report: 0,
        }
    }

    /// Wall-clock time since the tracker was created.
    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record one read packet and report if the batch threshold is reached.
    pub(crate) fn advance(&mut self, counters: ProgressCounters) {
        self.since_last_report += 1;
        if self.since_last_report >= self.batch_size {
            self.report(counters);
            self.since_last_report = 0;
        }
    }

    /// Unconditionally emit a final report.
    pub(crate) fn finish(&mut self, counters: ProgressCounters) {
        self.report(counters);
    }

    fn report(&self, counters: ProgressCounters) {
        let percentage = match (counters.muxed_duration, self.target) {
            (Some(muxed), Some(target)) if !target.is_zero() => {
                Some((muxed.as_secs_f32() / target.as_secs_f32() * 100.0).min(100.0))
            }
            _ => None,
        };

        let info = ProgressInfo {
            packets_read: counters.packets_read,
            packets_muxed: counters.packets_muxed,
            cached_packets: counters.cached_packets,
            muxed_duration: counters.muxed_duration,
            target_duration: self.target,
            percentage,
            elapsed: self.elapsed(),
            retries_remaining: counters.retries_remaining,
        };

        self.callback.on_progress(&info);
    }
}
