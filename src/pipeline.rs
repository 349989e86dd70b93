//! The transcoding run.
//!
//! [`Pipeline`] opens the input and output, builds one transcoder per
//! selected stream, and pumps packets until the input ends, reading fails,
//! or the retry budget is spent:
//!
//! 1. read one packet and hand it to the transcoder owning its stream;
//! 2. after each hand-off, coordinate: force eager encoder setup when the
//!    packet cache overflowed, and write the header once every encoder is
//!    configured, replaying the cached packets in arrival order;
//! 3. at end of input, drain video, then audio, then subtitle transcoders;
//! 4. write the trailer if the header was written.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # fn main() -> Result<(), transpipe::TranscodeError> {
//! use std::time::Duration;
//!
//! use transpipe::{FfmpegEngine, Pipeline, TranscodeOptions};
//!
//! let options = TranscodeOptions::new("input.mkv", "output.mp4")
//!     .with_duration(Some(Duration::from_secs(10)));
//! let summary = Pipeline::new(FfmpegEngine::new()?, options).run()?;
//! println!("stopped: {}", summary.stop_reason);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "ffmpeg"))]
//! # fn main() {}
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::config::TranscodeOptions;
use crate::context::{PipelineContext, StopReason};
use crate::engine::{Demuxer, MediaEngine, MediaKind, MediaPacket, Muxer};
use crate::error::{EngineError, TranscodeError};
use crate::progress::{ProgressCounters, ProgressTracker};
use crate::timestamp::Rational;
use crate::transcoder::{Transcoder, TranscoderState};

/// Order in which output streams are registered and transcoders drained.
const PRIORITY: [MediaKind; 3] = [MediaKind::Video, MediaKind::Audio, MediaKind::Subtitle];

/// How far (in milliseconds) the output may run ahead of real time in
/// streaming mode.
const STREAMING_LEAD_MS: i128 = 2_000;
const STREAMING_PAUSE: Duration = Duration::from_millis(500);

/// Outcome of one output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    /// Input stream index.
    pub input_index: usize,
    /// Output stream index, once registered.
    pub output_index: Option<usize>,
    /// Media kind.
    pub kind: MediaKind,
    /// Final transcoder state.
    pub state: TranscoderState,
    /// Packets written to the output.
    pub packets_written: u64,
    /// Duration written to the output.
    pub muxed_duration: Option<Duration>,
    /// Output time base, once registered.
    pub output_time_base: Option<Rational>,
}

/// Outcome of a run that got as far as pumping packets.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeSummary {
    /// Why the run stopped.
    pub stop_reason: StopReason,
    /// Packets read from the input.
    pub packets_read: u64,
    /// Packets written to the output.
    pub packets_muxed: u64,
    /// Per-stream results, in input order.
    pub streams: Vec<StreamSummary>,
    /// Whether the container header was written.
    pub header_written: bool,
    /// Whether the container trailer was written.
    pub trailer_written: bool,
    /// Retries left when the run ended.
    pub retries_remaining: u32,
    /// Duration written for the main (video, else audio) stream.
    pub muxed_duration: Option<Duration>,
}

impl TranscodeSummary {
    /// Returns `true` when the run stopped because the retry budget ran
    /// out rather than on its own terms.
    pub fn retries_exhausted(&self) -> bool {
        self.stop_reason == StopReason::RetriesExhausted
    }
}

/// A configured transcoding run.
pub struct Pipeline<E: MediaEngine> {
    engine: E,
    options: TranscodeOptions,
}

impl<E: MediaEngine> Pipeline<E> {
    /// Prepare a run of `options` on `engine`.
    pub fn new(engine: E, options: TranscodeOptions) -> Self {
        Self { engine, options }
    }

    /// Run to completion.
    ///
    /// # Errors
    ///
    /// Setup failures are returned before any packet is read:
    /// [`TranscodeError::InvalidOptions`], [`TranscodeError::InputOpen`],
    /// [`TranscodeError::OutputOpen`], [`TranscodeError::StreamSetup`] for
    /// an audio or video stream, [`TranscodeError::NoAudioVideo`], and
    /// [`TranscodeError::Seek`]. A late encoder setup failure, a header
    /// failure, or a trailer failure stops the run with an error too.
    /// Recoverable failures never surface here; they are charged to the
    /// retry budget and reflected in the summary.
    pub fn run(self) -> Result<TranscodeSummary, TranscodeError> {
        let Pipeline { mut engine, options } = self;
        options.validate()?;

        log::info!("Opening input {}", options.input);
        let mut demuxer = engine
            .open_input(&options.input, &options.demuxer_options)
            .map_err(|error| TranscodeError::InputOpen {
                path: PathBuf::from(&options.input),
                reason: error.to_string(),
            })?;

        let indices: Vec<usize> = demuxer.streams().iter().map(|stream| stream.index).collect();
        for index in indices {
            demuxer.set_enabled(index, false);
        }

        log::info!("Opening output {}", options.output);
        let muxer = engine
            .open_output(&options.output, options.output_format.as_deref())
            .map_err(|error| TranscodeError::OutputOpen {
                path: PathBuf::from(&options.output),
                reason: error.to_string(),
            })?;

        let ctx = PipelineContext::new(engine, options, demuxer, muxer);
        Run::new(ctx)?.execute()
    }
}

struct Run<E: MediaEngine> {
    ctx: PipelineContext<E>,
    transcoders: Vec<Transcoder<E>>,
    by_stream: HashMap<usize, usize>,
    main: usize,
    packets_read: u64,
    trailer_written: bool,
}

impl<E: MediaEngine> Run<E> {
    fn new(mut ctx: PipelineContext<E>) -> Result<Self, TranscodeError> {
        let streams = ctx.demuxer.streams().to_vec();
        let mut transcoders = Vec::new();
        let mut by_stream = HashMap::new();

        for stream in &streams {
            if !ctx.options.selects(stream.index) {
                log::debug!("[#{}{}] Excluded", stream.kind.tag(), stream.index);
                continue;
            }

            if let Some(transcoder) = Transcoder::create(&mut ctx, stream)? {
                ctx.demuxer.set_enabled(stream.index, true);
                by_stream.insert(stream.index, transcoders.len());
                transcoders.push(transcoder);
            }
        }

        let main = [MediaKind::Video, MediaKind::Audio]
            .iter()
            .find_map(|kind| transcoders.iter().position(|t: &Transcoder<E>| t.kind() == *kind))
            .ok_or(TranscodeError::NoAudioVideo)?;

        if ctx.seek_us != 0 {
            let target = ctx.start_time_us.saturating_add(ctx.seek_us);
            log::info!("Seeking to {target} us");
            ctx.demuxer.seek(target).map_err(TranscodeError::Seek)?;
        }

        Ok(Self {
            ctx,
            transcoders,
            by_stream,
            main,
            packets_read: 0,
            trailer_written: false,
        })
    }

    fn execute(mut self) -> Result<TranscodeSummary, TranscodeError> {
        let mut tracker = ProgressTracker::new(
            self.ctx.options.progress.clone(),
            self.ctx.options.duration,
            self.ctx.options.batch_size,
        );

        let stop = self.pump(&mut tracker)?;

        if !self.ctx.budget.is_exhausted() {
            self.drain_all()?;
        }

        let trailer = if self.ctx.mux_ready {
            self.ctx.muxer.write_trailer().map(|()| {
                self.trailer_written = true;
                log::info!("Trailer written");
            })
        } else {
            log::warn!("No packet reached the output; header and trailer not written");
            Ok(())
        };

        for transcoder in &mut self.transcoders {
            transcoder.close(&mut self.ctx);
        }
        trailer.map_err(TranscodeError::Trailer)?;

        tracker.finish(self.counters());

        let stop_reason = match self.ctx.budget.reason() {
            Some(reason) => reason.clone(),
            None => stop,
        };
        log::info!("Run finished: {stop_reason}");
        Ok(self.summary(stop_reason))
    }

    /// The read loop. Returns why reading stopped when the input did.
    fn pump(&mut self, tracker: &mut ProgressTracker) -> Result<StopReason, TranscodeError> {
        let mut packet = E::Packet::empty();

        loop {
            if self.ctx.budget.is_exhausted() {
                return Ok(StopReason::RetriesExhausted);
            }

            match self.ctx.demuxer.read_packet(&mut packet) {
                Ok(()) => {}
                Err(EngineError::Eof) => return Ok(StopReason::EndOfInput),
                Err(error) => {
                    log::warn!("Demuxer stopped with errors ({error})");
                    return Ok(StopReason::ReadError(error.to_string()));
                }
            }
            self.packets_read += 1;

            if let Some(&position) = self.by_stream.get(&packet.stream_index()) {
                self.transcoders[position].transcode(&packet, &mut self.ctx)?;
                self.coordinate()?;
            }

            if self.ctx.options.streaming && self.ctx.mux_ready {
                self.pace(tracker);
            }

            tracker.advance(self.counters());
        }
    }

    fn pace(&self, tracker: &ProgressTracker) {
        let muxed_ms = self.transcoders[self.main]
            .core()
            .muxed_duration()
            .map_or(0, |duration| duration.as_millis() as i128);
        let elapsed_ms = tracker.elapsed().as_millis() as i128;

        if muxed_ms - elapsed_ms > STREAMING_LEAD_MS {
            thread::sleep(STREAMING_PAUSE);
        }
    }

    fn drain_all(&mut self) -> Result<(), TranscodeError> {
        for kind in PRIORITY {
            for position in self.positions(kind) {
                if self.ctx.budget.is_exhausted() {
                    return Ok(());
                }
                self.transcoders[position].drain(&mut self.ctx)?;
                self.coordinate()?;
            }
        }

        // Some stream never produced a frame: configure it from metadata so
        // the packets already encoded still reach the output.
        if !self.ctx.mux_ready && !self.ctx.cache.is_empty() && !self.ctx.budget.is_exhausted() {
            log::warn!(
                "{} packets cached at end of input; forcing encoder setup",
                self.ctx.cache.len()
            );
            self.ctx.force_setup = true;
            self.coordinate()?;
        }

        Ok(())
    }

    /// Force pending setups and write the header once every encoder is
    /// configured.
    fn coordinate(&mut self) -> Result<(), TranscodeError> {
        if self.ctx.mux_ready {
            return Ok(());
        }

        if self.ctx.force_setup {
            for transcoder in &mut self.transcoders {
                transcoder.finalize_from_descriptor(&mut self.ctx)?;
            }
        }

        if self.transcoders.iter().all(Transcoder::is_encoding_ready) {
            self.finalize_mux()?;
        }
        Ok(())
    }

    fn finalize_mux(&mut self) -> Result<(), TranscodeError> {
        if self.ctx.seek_us != 0 {
            self.ctx.muxer.avoid_negative_timestamps();
        }

        for kind in PRIORITY {
            for position in self.positions(kind) {
                self.transcoders[position].register_output(&mut self.ctx)?;
            }
        }

        self.ctx
            .muxer
            .write_header(&self.ctx.options.muxer_options)
            .map_err(TranscodeError::Header)?;
        self.ctx.mux_ready = true;
        self.ctx.force_setup = false;
        log::info!("Header written ({} streams)", self.transcoders.len());

        for transcoder in &mut self.transcoders {
            transcoder.on_header_written(&self.ctx);
        }

        let cached = self.ctx.cache.drain_in_order();
        log::debug!("Muxing {} cached packets", cached.len());
        for packet in cached {
            if self.ctx.budget.is_exhausted() {
                break;
            }
            if let Some(&position) = self.by_stream.get(&packet.stream_index()) {
                self.transcoders[position].mux(packet, &mut self.ctx);
            }
        }
        Ok(())
    }

    fn positions(&self, kind: MediaKind) -> Vec<usize> {
        self.transcoders
            .iter()
            .enumerate()
            .filter(|(_, transcoder)| transcoder.kind() == kind)
            .map(|(position, _)| position)
            .collect()
    }

    fn counters(&self) -> ProgressCounters {
        ProgressCounters {
            packets_read: self.packets_read,
            packets_muxed: self.ctx.packets_muxed,
            cached_packets: self.ctx.cache.len(),
            muxed_duration: self.transcoders[self.main].core().muxed_duration(),
            retries_remaining: self.ctx.budget.remaining(),
        }
    }

    fn summary(&self, stop_reason: StopReason) -> TranscodeSummary {
        let streams = self
            .transcoders
            .iter()
            .map(|transcoder| {
                let core = transcoder.core();
                StreamSummary {
                    input_index: core.stream.index,
                    output_index: core.output.map(|output| output.index),
                    kind: transcoder.kind(),
                    state: core.state,
                    packets_written: core.packets_written,
                    muxed_duration: core.muxed_duration(),
                    output_time_base: core.output.map(|output| output.time_base),
                }
            })
            .collect();

        TranscodeSummary {
            stop_reason,
            packets_read: self.packets_read,
            packets_muxed: self.ctx.packets_muxed,
            streams,
            header_written: self.ctx.mux_ready,
            trailer_written: self.trailer_written,
            retries_remaining: self.ctx.budget.remaining(),
            muxed_duration: self.transcoders[self.main].core().muxed_duration(),
        }
    }
}
