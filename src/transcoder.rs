//! Per-stream transcoders.
//!
//! One [`Transcoder`] exists per selected input stream. The three variants
//! share a lifecycle:
//!
//! ```text
//! Created -> DecodingConfigured -> EncodingReady -> Draining -> Closed
//! ```
//!
//! with `Failed` reachable from any state. Video and audio encoders are
//! configured lazily from the first decoded frame ([`LazySetup`]) or,
//! when the packet cache overflows, eagerly from the stream metadata.
//! Subtitle encoders are configured eagerly at creation.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::mem;
use std::time::Duration;

use crate::audio::AudioTranscoder;
use crate::context::{PipelineContext, StopReason};
use crate::engine::{
    Decoder, Demuxer, Encoder, MediaEngine, MediaFrame, MediaKind, MediaPacket, Muxer,
    StreamDescriptor,
};
use crate::error::{EngineError, TranscodeError};
use crate::subtitle::SubtitleTranscoder;
use crate::timestamp::{NO_TIMESTAMP, Rational, TimestampRescaler, format_timestamp, rescale};
use crate::video::VideoTranscoder;

/// Lifecycle state of a transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranscoderState {
    /// Constructed, decoder not open yet.
    Created,
    /// Decoder open; waiting for a sample to configure the encoder.
    DecodingConfigured,
    /// Encoder open; packets can be produced.
    EncodingReady,
    /// Flushing decoder and encoder at end of input.
    Draining,
    /// Resources released.
    Closed,
    /// Stopped by a fatal condition.
    Failed,
}

impl Display for TranscoderState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            TranscoderState::Created => "created",
            TranscoderState::DecodingConfigured => "decoding configured",
            TranscoderState::EncodingReady => "encoding ready",
            TranscoderState::Draining => "draining",
            TranscoderState::Closed => "closed",
            TranscoderState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An output stream registered with the muxer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OutputStream {
    pub(crate) index: usize,
    pub(crate) time_base: Rational,
}

/// Bookkeeping shared by every transcoder variant.
#[derive(Debug)]
pub(crate) struct StreamCore {
    pub(crate) stream: StreamDescriptor,
    /// Diagnostic prefix, e.g. `[#V0]`.
    pub(crate) tag: String,
    pub(crate) state: TranscoderState,
    /// Run start offset in the decoder time base (microseconds for
    /// subtitles).
    pub(crate) start_pts: i64,
    /// Duration ceiling in the output time base.
    pub(crate) max_duration: i64,
    /// Muxed duration in the output time base.
    pub(crate) duration: i64,
    pub(crate) output: Option<OutputStream>,
    pub(crate) packets_written: u64,
}

impl StreamCore {
    pub(crate) fn new(stream: StreamDescriptor, start_pts: i64) -> Self {
        let tag = format!("[#{}{}]", stream.kind.tag(), stream.index);
        Self {
            stream,
            tag,
            state: TranscoderState::Created,
            start_pts,
            max_duration: i64::MAX,
            duration: 0,
            output: None,
            packets_written: 0,
        }
    }

    /// Recompute the ceiling once the output time base is final.
    pub(crate) fn set_ceiling(&mut self, ceiling_us: Option<i64>, time_base: Rational) {
        self.max_duration = match ceiling_us {
            Some(ceiling) => rescale(ceiling, Rational::MICROSECONDS, time_base),
            None => i64::MAX,
        };
    }

    /// Muxed duration as wall-clock time.
    pub(crate) fn muxed_duration(&self) -> Option<Duration> {
        let output = self.output?;
        let micros = rescale(self.duration, output.time_base, Rational::MICROSECONDS);
        u64::try_from(micros).ok().map(Duration::from_micros)
    }

    pub(crate) fn log_mux(&self, packet: &impl MediaPacket, time_base: Rational) {
        log::debug!(
            "{} [Muxer-final] dts: {} pts: {} | {} <> {}",
            self.tag,
            format_timestamp(packet.dts(), time_base),
            format_timestamp(packet.pts(), time_base),
            format_timestamp(self.duration, time_base),
            format_timestamp(self.max_duration, time_base),
        );
    }

    /// Write a packet already in the output time base, charging a failure
    /// to the budget.
    pub(crate) fn write<E: MediaEngine>(
        &mut self,
        packet: &mut E::Packet,
        ctx: &mut PipelineContext<E>,
    ) {
        match ctx.muxer.write_interleaved(packet) {
            Ok(()) => {
                self.packets_written += 1;
                ctx.packets_muxed += 1;
            }
            Err(error) => {
                log::warn!("{} Muxing failed ({error})", self.tag);
                ctx.budget.fail();
            }
        }
    }
}

/// Configures an encoder from the first decoded frame.
pub(crate) trait LazySetup<E: MediaEngine> {
    /// Open the encoder from the frame currently held by `chain`.
    fn finalize_from_sample(
        &self,
        core: &mut StreamCore,
        chain: &mut AvChain<E>,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError>;
}

/// Decoder, encoder, and scratch buffers of an audio or video transcoder.
pub(crate) struct AvChain<E: MediaEngine> {
    pub(crate) decoder: E::Decoder,
    pub(crate) encoder: Option<E::Encoder>,
    pub(crate) frame: E::Frame,
    system_frame: E::Frame,
    packet: E::Packet,
    rescaler: Option<TimestampRescaler>,
    /// Frames live in device memory and must be downloaded before encoding.
    pub(crate) hardware_download: bool,
}

impl<E: MediaEngine> AvChain<E> {
    pub(crate) fn new(decoder: E::Decoder) -> Self {
        Self {
            decoder,
            encoder: None,
            frame: E::Frame::empty(),
            system_frame: E::Frame::empty(),
            packet: E::Packet::empty(),
            rescaler: None,
            hardware_download: false,
        }
    }

    /// Adopt a freshly opened encoder.
    pub(crate) fn install_encoder(&mut self, core: &mut StreamCore, encoder: E::Encoder) {
        self.rescaler = Some(TimestampRescaler::new(
            core.start_pts,
            self.decoder.time_base(),
            encoder.time_base(),
        ));
        log::info!(
            "{} Encoding {} with {} (time base {})",
            core.tag,
            encoder.spec().codec,
            encoder.spec().name,
            encoder.time_base()
        );
        self.encoder = Some(encoder);
        if core.state != TranscoderState::Draining {
            core.state = TranscoderState::EncodingReady;
        }
    }

    pub(crate) fn encoder_time_base(&self) -> Option<Rational> {
        self.encoder.as_ref().map(Encoder::time_base)
    }

    /// Feed one compressed packet and push everything it yields onward.
    pub(crate) fn transcode<S: LazySetup<E>>(
        &mut self,
        setup: &S,
        core: &mut StreamCore,
        packet: &E::Packet,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        if let Err(error) = self.decoder.send_packet(packet) {
            log::warn!("{} Decoding send error ({error})", core.tag);
            ctx.budget.charge(&error);
            return Ok(());
        }

        self.decode_encode_mux(setup, core, ctx)
    }

    /// Flush the decoder, then the encoder.
    pub(crate) fn drain<S: LazySetup<E>>(
        &mut self,
        setup: &S,
        core: &mut StreamCore,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        core.state = TranscoderState::Draining;

        if let Err(error) = self.decoder.send_eof() {
            log::error!("{} Decoding send error while draining ({error})", core.tag);
            ctx.budget.abort(StopReason::RetriesExhausted);
            core.state = TranscoderState::Failed;
            return Ok(());
        }

        self.decode_encode_mux(setup, core, ctx)?;

        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("{} Drained without a single decoded frame", core.tag);
            return Ok(());
        };

        if let Err(error) = encoder.send_eof() {
            log::error!("{} Encoding send error while draining ({error})", core.tag);
            ctx.budget.abort(StopReason::RetriesExhausted);
            core.state = TranscoderState::Failed;
            return Ok(());
        }

        self.encode_mux(core, ctx);
        Ok(())
    }

    fn decode_encode_mux<S: LazySetup<E>>(
        &mut self,
        setup: &S,
        core: &mut StreamCore,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        while !ctx.budget.is_exhausted() {
            match self.decoder.receive_frame(&mut self.frame) {
                Ok(()) => {}
                Err(EngineError::TryAgain) => return Ok(()),
                Err(EngineError::Eof) => {
                    if core.state == TranscoderState::Draining {
                        log::debug!("{} Decoding completed", core.tag);
                    } else {
                        log::warn!("{} Decoding completed unexpectedly", core.tag);
                    }
                    return Ok(());
                }
                Err(error) => {
                    log::warn!("{} Decoding recv error ({error})", core.tag);
                    ctx.budget.fail();
                    return Ok(());
                }
            }

            if self.encoder.is_none() {
                setup.finalize_from_sample(core, self, ctx)?;
            }

            if !self.send_frame(core, ctx) {
                return Ok(());
            }

            self.encode_mux(core, ctx);
        }

        Ok(())
    }

    fn retime_frame(&mut self) {
        let Some(rescaler) = self.rescaler.as_mut() else {
            return;
        };
        let Some(pts) = rescaler.rescale_pts(self.frame.pts()) else {
            return;
        };

        let duration = rescaler.rescale_duration(self.frame.duration());
        self.frame.set_pts(pts);
        self.frame.set_duration(duration);
    }

    /// Returns `false` when the frame could not be handed to the encoder.
    fn send_frame(&mut self, core: &StreamCore, ctx: &mut PipelineContext<E>) -> bool {
        self.retime_frame();
        self.frame.clear_picture_type();

        let Some(encoder) = self.encoder.as_mut() else {
            return false;
        };

        let result = if self.hardware_download {
            if let Err(error) = self.frame.transfer_to_system(&mut self.system_frame) {
                log::warn!("{} Hardware frame download failed ({error})", core.tag);
                ctx.budget.charge(&error);
                return false;
            }
            encoder.send_frame(&self.system_frame)
        } else {
            encoder.send_frame(&self.frame)
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                log::warn!("{} Encoding send error ({error})", core.tag);
                ctx.budget.charge(&error);
                false
            }
        }
    }

    fn encode_mux(&mut self, core: &mut StreamCore, ctx: &mut PipelineContext<E>) {
        while !ctx.budget.is_exhausted() {
            let Some(encoder) = self.encoder.as_mut() else {
                return;
            };

            match encoder.receive_packet(&mut self.packet) {
                Ok(()) => {}
                Err(EngineError::TryAgain) => return,
                Err(EngineError::Eof) => {
                    if core.state == TranscoderState::Draining {
                        log::debug!("{} Encoding completed", core.tag);
                    } else {
                        log::warn!("{} Encoding completed unexpectedly", core.tag);
                    }
                    return;
                }
                Err(error) => {
                    log::warn!("{} Encoding recv error ({error})", core.tag);
                    ctx.budget.fail();
                    return;
                }
            }

            let time_base = encoder.time_base();
            if ctx.mux_ready {
                mux_av(core, time_base, &mut self.packet, ctx);
            } else {
                let packet = mem::replace(&mut self.packet, E::Packet::empty());
                ctx.cache_packet(&core.tag, core.stream.index, packet);
            }
        }
    }
}

/// Move an encoded audio/video packet into its output stream.
///
/// Packets past the duration ceiling are dropped and the source stream is
/// disabled.
pub(crate) fn mux_av<E: MediaEngine>(
    core: &mut StreamCore,
    encoder_time_base: Rational,
    packet: &mut E::Packet,
    ctx: &mut PipelineContext<E>,
) {
    let Some(output) = core.output else {
        log::warn!("{} Packet dropped: no output stream registered", core.tag);
        return;
    };

    packet.rescale_timestamps(encoder_time_base, output.time_base);
    packet.set_stream_index(output.index);
    core.log_mux(packet, output.time_base);

    if core.duration > core.max_duration {
        ctx.disable_source(&core.tag, core.stream.index);
        return;
    }

    core.duration = core.duration.saturating_add(packet.duration().max(0));
    core.write(packet, ctx);
}

/// Register an audio or video output stream with the muxer.
pub(crate) fn register_av<E: MediaEngine>(
    core: &mut StreamCore,
    chain: &AvChain<E>,
    ctx: &mut PipelineContext<E>,
    codec_tag: Option<u32>,
) -> Result<(), TranscodeError> {
    let Some(encoder) = chain.encoder.as_ref() else {
        return Err(TranscodeError::setup(
            core.stream.index,
            core.stream.kind,
            "encoder was never configured",
        ));
    };

    let language = core.stream.language.as_deref();
    let index = ctx
        .muxer
        .add_stream(&encoder.parameters(), encoder.time_base(), codec_tag, language)
        .map_err(|error| {
            TranscodeError::setup(core.stream.index, core.stream.kind, error.to_string())
        })?;

    core.output = Some(OutputStream {
        index,
        time_base: encoder.time_base(),
    });
    Ok(())
}

/// A per-stream transcoder.
pub(crate) enum Transcoder<E: MediaEngine> {
    Video(VideoTranscoder<E>),
    Audio(AudioTranscoder<E>),
    Subtitle(SubtitleTranscoder<E>),
}

impl<E: MediaEngine> Transcoder<E> {
    /// Build the transcoder matching the stream's media type.
    ///
    /// Returns `Ok(None)` for streams that are skipped (subtitles without a
    /// usable codec, data, attachments). Audio and video setup failures
    /// are errors.
    pub(crate) fn create(
        ctx: &mut PipelineContext<E>,
        stream: &StreamDescriptor,
    ) -> Result<Option<Self>, TranscodeError> {
        match stream.kind {
            MediaKind::Video => {
                VideoTranscoder::create(ctx, stream).map(|t| Some(Transcoder::Video(t)))
            }
            MediaKind::Audio => {
                AudioTranscoder::create(ctx, stream).map(|t| Some(Transcoder::Audio(t)))
            }
            MediaKind::Subtitle => {
                Ok(SubtitleTranscoder::create(ctx, stream).map(Transcoder::Subtitle))
            }
            _ => {
                log::debug!(
                    "[#{}{}] Ignoring {} stream",
                    stream.kind.tag(),
                    stream.index,
                    stream.kind
                );
                Ok(None)
            }
        }
    }

    pub(crate) fn core(&self) -> &StreamCore {
        match self {
            Transcoder::Video(t) => &t.core,
            Transcoder::Audio(t) => &t.core,
            Transcoder::Subtitle(t) => &t.core,
        }
    }

    fn core_mut(&mut self) -> &mut StreamCore {
        match self {
            Transcoder::Video(t) => &mut t.core,
            Transcoder::Audio(t) => &mut t.core,
            Transcoder::Subtitle(t) => &mut t.core,
        }
    }

    pub(crate) fn kind(&self) -> MediaKind {
        match self {
            Transcoder::Video(_) => MediaKind::Video,
            Transcoder::Audio(_) => MediaKind::Audio,
            Transcoder::Subtitle(_) => MediaKind::Subtitle,
        }
    }

    /// Whether the encoder parameters are final.
    pub(crate) fn is_encoding_ready(&self) -> bool {
        match self {
            Transcoder::Video(t) => t.chain.encoder.is_some(),
            Transcoder::Audio(t) => t.chain.encoder.is_some(),
            Transcoder::Subtitle(_) => true,
        }
    }

    /// Configure the encoder from stream metadata alone.
    pub(crate) fn finalize_from_descriptor(
        &mut self,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        if self.is_encoding_ready() {
            return Ok(());
        }
        log::info!("{} Configuring encoder without a decoded sample", self.core().tag);
        match self {
            Transcoder::Video(t) => t.finalize_from_descriptor(ctx),
            Transcoder::Audio(t) => t.finalize_from_descriptor(ctx),
            Transcoder::Subtitle(_) => Ok(()),
        }
    }

    pub(crate) fn transcode(
        &mut self,
        packet: &E::Packet,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        let result = match self {
            Transcoder::Video(t) => t.transcode(packet, ctx),
            Transcoder::Audio(t) => t.transcode(packet, ctx),
            Transcoder::Subtitle(t) => {
                t.transcode(packet, ctx);
                Ok(())
            }
        };
        self.fail_on_error(result)
    }

    pub(crate) fn drain(&mut self, ctx: &mut PipelineContext<E>) -> Result<(), TranscodeError> {
        let result = match self {
            Transcoder::Video(t) => t.drain(ctx),
            Transcoder::Audio(t) => t.drain(ctx),
            Transcoder::Subtitle(t) => {
                t.drain();
                Ok(())
            }
        };
        self.fail_on_error(result)
    }

    /// Mux a packet that was cached before the header was written.
    pub(crate) fn mux(&mut self, mut packet: E::Packet, ctx: &mut PipelineContext<E>) {
        match self {
            Transcoder::Video(t) => {
                if let Some(time_base) = t.chain.encoder_time_base() {
                    mux_av(&mut t.core, time_base, &mut packet, ctx);
                }
            }
            Transcoder::Audio(t) => {
                if let Some(time_base) = t.chain.encoder_time_base() {
                    mux_av(&mut t.core, time_base, &mut packet, ctx);
                }
            }
            Transcoder::Subtitle(t) => t.mux(packet, ctx),
        }
    }

    /// Add this transcoder's stream to the output.
    pub(crate) fn register_output(
        &mut self,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        match self {
            Transcoder::Video(t) => t.register_output(ctx),
            Transcoder::Audio(t) => register_av(&mut t.core, &t.chain, ctx, None),
            Transcoder::Subtitle(t) => t.register_output(ctx),
        }
    }

    /// Pick up the final output time base and recompute the ceiling.
    pub(crate) fn on_header_written(&mut self, ctx: &PipelineContext<E>) {
        let ceiling = match self {
            Transcoder::Subtitle(_) => ctx
                .duration_us
                .map(|duration| duration.saturating_add(ctx.seek_us)),
            _ => ctx.duration_us,
        };

        let core = self.core_mut();
        let Some(output) = core.output.as_mut() else {
            return;
        };
        output.time_base = ctx.muxer.stream_time_base(output.index);
        let (index, time_base) = (output.index, output.time_base);
        core.set_ceiling(ceiling, time_base);

        log::debug!(
            "{} Output stream #{index} time base {time_base} ceiling {}",
            core.tag,
            format_timestamp(core.max_duration, time_base)
        );
    }

    /// Release the stream: the demuxer stops delivering its packets.
    pub(crate) fn close(&mut self, ctx: &mut PipelineContext<E>) {
        let core = self.core_mut();
        ctx.demuxer.set_enabled(core.stream.index, false);
        if core.state != TranscoderState::Failed {
            core.state = TranscoderState::Closed;
        }
    }

    fn fail_on_error(&mut self, result: Result<(), TranscodeError>) -> Result<(), TranscodeError> {
        if result.is_err() {
            self.core_mut().state = TranscoderState::Failed;
        }
        result
    }
}

/// Start offset in a stream's own time base.
pub(crate) fn start_pts(start_time_us: i64, time_base: Rational) -> i64 {
    if start_time_us == NO_TIMESTAMP {
        return 0;
    }
    rescale(start_time_us, Rational::MICROSECONDS, time_base)
}
