//! Run-wide state shared by every transcoder.
//!
//! A [`PipelineContext`] is created per run and handed explicitly to each
//! transcoder call. It owns the demuxer, the muxer, the packet cache, and
//! the [`RetryBudget`], the single termination predicate of a run.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::cache::PacketCache;
use crate::config::TranscodeOptions;
use crate::engine::{Demuxer, MediaEngine, MediaPacket};
use crate::error::EngineError;
use crate::timestamp::NO_TIMESTAMP;

/// Why a run stopped pumping packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The input was read to the end.
    EndOfInput,
    /// The demuxer failed while reading.
    ReadError(String),
    /// Every stream reached the duration ceiling.
    DurationReached,
    /// The retry budget was spent on recoverable failures, or a fatal
    /// failure zeroed it.
    RetriesExhausted,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StopReason::EndOfInput => f.write_str("end of input"),
            StopReason::ReadError(reason) => write!(f, "read error ({reason})"),
            StopReason::DurationReached => f.write_str("duration reached"),
            StopReason::RetriesExhausted => f.write_str("retries exhausted"),
        }
    }
}

/// Countdown of tolerated failures.
///
/// The budget only decreases. Reaching zero ends the run: every loop of
/// the pipeline checks [`is_exhausted`](RetryBudget::is_exhausted) before
/// doing more work.
///
/// ```
/// use transpipe::{EngineError, RetryBudget, StopReason};
///
/// let mut budget = RetryBudget::new(3);
/// budget.charge(&EngineError::other("write failed"));
/// assert_eq!(budget.remaining(), 2);
///
/// budget.charge(&EngineError::InvalidArgument);
/// assert!(budget.is_exhausted());
/// assert_eq!(budget.reason(), Some(&StopReason::RetriesExhausted));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
    reason: Option<StopReason>,
}

impl RetryBudget {
    /// A budget allowing `retries` recoverable failures.
    pub fn new(retries: u32) -> Self {
        Self {
            remaining: retries,
            reason: None,
        }
    }

    /// Failures still tolerated.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Returns `true` once the run must stop.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// What exhausted the budget, once exhausted.
    pub fn reason(&self) -> Option<&StopReason> {
        self.reason.as_ref()
    }

    /// Spend one retry on a recoverable failure.
    pub fn fail(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 && self.reason.is_none() {
            self.reason = Some(StopReason::RetriesExhausted);
        }
    }

    /// Stop the run now. The first reason recorded wins.
    pub fn abort(&mut self, reason: StopReason) {
        self.remaining = 0;
        if self.reason.is_none() {
            self.reason = Some(reason);
        }
    }

    /// Charge an engine failure: fatal errors abort, others cost one retry.
    pub fn charge(&mut self, error: &EngineError) {
        if error.is_fatal() {
            self.abort(StopReason::RetriesExhausted);
        } else {
            self.fail();
        }
    }
}

/// Everything a run shares between transcoders.
pub(crate) struct PipelineContext<E: MediaEngine> {
    pub(crate) engine: E,
    pub(crate) options: TranscodeOptions,
    pub(crate) demuxer: E::Demuxer,
    pub(crate) muxer: E::Muxer,
    pub(crate) budget: RetryBudget,
    pub(crate) cache: PacketCache<E::Packet>,
    /// The header has been written; packets go straight to the muxer.
    pub(crate) mux_ready: bool,
    /// The cache overflowed; waiting encoders must be set up eagerly.
    pub(crate) force_setup: bool,
    /// Container start time in microseconds (0 when unknown).
    pub(crate) start_time_us: i64,
    /// User seek offset in microseconds.
    pub(crate) seek_us: i64,
    /// Duration ceiling in microseconds.
    pub(crate) duration_us: Option<i64>,
    pub(crate) packets_muxed: u64,
}

impl<E: MediaEngine> PipelineContext<E> {
    pub(crate) fn new(
        engine: E,
        options: TranscodeOptions,
        demuxer: E::Demuxer,
        muxer: E::Muxer,
    ) -> Self {
        let start = demuxer.start_time();
        let start_time_us = if start == NO_TIMESTAMP { 0 } else { start };
        let seek_us = options.start_time_us();
        let duration_us = options.duration_us();
        let budget = RetryBudget::new(options.retries);

        Self {
            engine,
            options,
            demuxer,
            muxer,
            budget,
            cache: PacketCache::new(),
            mux_ready: false,
            force_setup: false,
            start_time_us,
            seek_us,
            duration_us,
            packets_muxed: 0,
        }
    }

    /// Park an encoded packet until the header is written, tagged with the
    /// input stream it belongs to.
    pub(crate) fn cache_packet(&mut self, tag: &str, stream: usize, mut packet: E::Packet) {
        packet.set_stream_index(stream);
        self.cache.insert(packet);

        if self.cache.len() > self.options.max_cached_packets && !self.force_setup {
            log::info!(
                "{tag} {} packets cached without a header; forcing encoder setup",
                self.cache.len()
            );
            self.force_setup = true;
        }
    }

    /// Disable an input stream after it hit its ceiling, and stop the run
    /// when nothing but thumbnail streams is left.
    pub(crate) fn disable_source(&mut self, tag: &str, stream: usize) {
        if self.demuxer.is_enabled(stream) {
            log::info!("{tag} Duration ceiling reached; disabling input stream");
            self.demuxer.set_enabled(stream, false);
        }

        let thumbnails = &self.options.thumbnail_codecs;
        let only_thumbnails_left = self
            .demuxer
            .streams()
            .iter()
            .filter(|descriptor| self.demuxer.is_enabled(descriptor.index))
            .all(|descriptor| thumbnails.iter().any(|codec| *codec == descriptor.codec));

        if only_thumbnails_left {
            log::info!("{tag} Every stream reached the duration ceiling");
            self.budget.abort(StopReason::DurationReached);
        }
    }
}
