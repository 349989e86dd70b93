//! Subtitle transcoding.
//!
//! Subtitle encoders need no decoded sample, so they are configured as soon
//! as the stream is opened. The target codec is picked by what the output
//! container accepts:
//!
//! 1. the source codec, when the container carries it;
//! 2. DVD subtitles for PGS sources, when the container is Matroska or
//!    carries DVD subtitles;
//! 3. the container's preferred text codec, for text sources.
//!
//! Streams matching none of these are skipped. Subtitle timestamps are in
//! microseconds throughout the encoder.

use crate::context::PipelineContext;
use crate::engine::{
    DecoderSpec, MediaEngine, MediaKind, MediaPacket, MediaSubtitle, Muxer, StreamDescriptor,
    SubtitleDecoder, SubtitleEncoder, SubtitleEncoderParameters,
};
use crate::error::TranscodeError;
use crate::timestamp::{NO_TIMESTAMP, Rational};
use crate::transcoder::{OutputStream, StreamCore, TranscoderState};

const PGS: &str = "hdmv_pgs_subtitle";
const DVD_SUBTITLE: &str = "dvd_subtitle";

pub(crate) struct SubtitleTranscoder<E: MediaEngine> {
    pub(crate) core: StreamCore,
    decoder: E::SubtitleDecoder,
    encoder: E::SubtitleEncoder,
    subtitle: E::Subtitle,
}

impl<E: MediaEngine> SubtitleTranscoder<E> {
    /// Returns `None` when the stream cannot be carried; the reason is
    /// logged.
    pub(crate) fn create(ctx: &mut PipelineContext<E>, stream: &StreamDescriptor) -> Option<Self> {
        let mut core = StreamCore::new(stream.clone(), ctx.start_time_us);

        let Some(spec) = ctx.engine.find_decoder(stream) else {
            log::warn!("{} No decoder for {}; skipping stream", core.tag, stream.codec);
            return None;
        };

        let decoder = match ctx.engine.open_subtitle_decoder(&spec, stream) {
            Ok(decoder) => decoder,
            Err(error) => {
                log::warn!("{} Could not open {} ({error}); skipping stream", core.tag, spec.name);
                return None;
            }
        };
        core.state = TranscoderState::DecodingConfigured;

        let codec = select_codec(ctx, &core, &spec, &decoder)?;
        let (width, height) = decoder.dimensions();
        let parameters = SubtitleEncoderParameters {
            width,
            height,
            time_base: Rational::MICROSECONDS,
            global_header: ctx.muxer.requires_global_header(),
        };

        let encoder = match ctx.engine.open_subtitle_encoder(&codec, &parameters, &decoder) {
            Ok(encoder) => encoder,
            Err(error) => {
                log::warn!(
                    "{} Could not open {codec} encoder ({error}); skipping stream",
                    core.tag
                );
                return None;
            }
        };

        log::info!("{} Transcoding {} to {codec}", core.tag, stream.codec);
        core.state = TranscoderState::EncodingReady;

        Some(Self {
            core,
            decoder,
            encoder,
            subtitle: E::Subtitle::empty(),
        })
    }

    /// Decode one packet and encode the subtitle it carries, if any.
    ///
    /// Failures cost one retry (or all of them when fatal) and drop the
    /// packet.
    pub(crate) fn transcode(&mut self, packet: &E::Packet, ctx: &mut PipelineContext<E>) {
        self.subtitle = E::Subtitle::empty();

        match self.decoder.decode(packet, &mut self.subtitle) {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                log::warn!("{} Decoding error ({error})", self.core.tag);
                ctx.budget.charge(&error);
                return;
            }
        }

        if self.subtitle.pts() == NO_TIMESTAMP {
            return;
        }

        // A PGS clear event has no rectangles; DVD subtitles cannot say that.
        if self.subtitle.rect_count() == 0 && self.encoder.codec() == DVD_SUBTITLE {
            return;
        }

        let mut encoded = E::Packet::empty();
        if let Err(error) = self.encoder.encode(&self.subtitle, &mut encoded) {
            log::warn!("{} Encoding error ({error})", self.core.tag);
            ctx.budget.charge(&error);
            return;
        }

        let pts = encoded.pts().saturating_sub(self.core.start_pts);
        encoded.set_pts(pts);
        encoded.set_dts(pts);

        if ctx.mux_ready {
            self.mux(encoded, ctx);
        } else {
            ctx.cache_packet(&self.core.tag, self.core.stream.index, encoded);
        }
    }

    /// Subtitles hold no frames back.
    pub(crate) fn drain(&mut self) {
        self.core.state = TranscoderState::Draining;
    }

    /// Write a packet, cutting the last one short at the ceiling.
    pub(crate) fn mux(&mut self, mut packet: E::Packet, ctx: &mut PipelineContext<E>) {
        let Some(output) = self.core.output else {
            log::warn!("{} Packet dropped: no output stream registered", self.core.tag);
            return;
        };

        packet.rescale_timestamps(self.encoder.time_base(), output.time_base);
        packet.set_stream_index(output.index);
        self.core.log_mux(&packet, output.time_base);

        let max = self.core.max_duration;
        let pts = packet.pts();
        let end = pts.saturating_add(packet.duration().max(0));

        if pts != NO_TIMESTAMP && end > max {
            if pts < max {
                packet.set_duration(max - pts);
                self.core.duration = max;
                self.core.write(&mut packet, ctx);
            }
            ctx.disable_source(&self.core.tag, self.core.stream.index);
            return;
        }

        if pts != NO_TIMESTAMP {
            self.core.duration = self.core.duration.max(end);
        }
        self.core.write(&mut packet, ctx);
    }

    pub(crate) fn register_output(
        &mut self,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        let time_base = self.encoder.time_base();
        let language = self.core.stream.language.as_deref();
        let index = ctx
            .muxer
            .add_stream(&self.encoder.parameters(), time_base, None, language)
            .map_err(|error| {
                TranscodeError::setup(
                    self.core.stream.index,
                    MediaKind::Subtitle,
                    error.to_string(),
                )
            })?;

        self.core.output = Some(OutputStream { index, time_base });
        Ok(())
    }
}

fn select_codec<E: MediaEngine>(
    ctx: &PipelineContext<E>,
    core: &StreamCore,
    spec: &DecoderSpec,
    decoder: &E::SubtitleDecoder,
) -> Option<String> {
    let source = decoder.codec();
    let muxer = &ctx.muxer;

    if muxer.supports_codec(source) && ctx.engine.has_subtitle_encoder(source) {
        return Some(source.to_string());
    }

    if spec.codec == PGS
        && (muxer.format_name() == "matroska" || muxer.supports_codec(DVD_SUBTITLE))
        && ctx.engine.has_subtitle_encoder(DVD_SUBTITLE)
    {
        log::info!("{} {source} not supported for output; using {DVD_SUBTITLE} instead", core.tag);
        return Some(DVD_SUBTITLE.to_string());
    }

    if decoder.is_text() {
        if let Some(codec) = muxer
            .best_text_subtitle_codec()
            .filter(|codec| ctx.engine.has_subtitle_encoder(codec))
        {
            return Some(codec);
        }
    }

    log::warn!("{} {source} not supported for output; skipping stream", core.tag);
    None
}
