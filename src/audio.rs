//! Audio transcoding.
//!
//! [`AudioTranscoder`] decodes one audio stream and re-encodes it without
//! resampling: the encoder must accept the decoded sample format, and its
//! frame size must match the decoded frames.

use crate::context::PipelineContext;
use crate::engine::{
    AudioEncoderParameters, AudioProperties, Decoder, DecoderConfig, Encoder, EncoderParameters,
    MediaEngine, MediaFrame, MediaKind, Muxer, StreamDescriptor,
};
use crate::error::TranscodeError;
use crate::timestamp::Rational;
use crate::transcoder::{AvChain, LazySetup, StreamCore, TranscoderState, start_pts};

pub(crate) struct AudioTranscoder<E: MediaEngine> {
    pub(crate) core: StreamCore,
    pub(crate) chain: AvChain<E>,
}

struct AudioSetup;

impl<E: MediaEngine> LazySetup<E> for AudioSetup {
    fn finalize_from_sample(
        &self,
        core: &mut StreamCore,
        chain: &mut AvChain<E>,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        let Some(properties) = chain.frame.audio_properties() else {
            return Err(TranscodeError::setup(
                core.stream.index,
                MediaKind::Audio,
                "decoded frame carries no audio properties",
            ));
        };

        let samples = properties.samples;
        open_encoder(core, chain, ctx, properties, samples)
    }
}

impl<E: MediaEngine> AudioTranscoder<E> {
    pub(crate) fn create(
        ctx: &mut PipelineContext<E>,
        stream: &StreamDescriptor,
    ) -> Result<Self, TranscodeError> {
        let start = start_pts(ctx.start_time_us, stream.time_base);
        let mut core = StreamCore::new(stream.clone(), start);

        let spec = ctx.engine.find_decoder(stream).ok_or_else(|| {
            TranscodeError::setup(
                stream.index,
                MediaKind::Audio,
                format!("no decoder for {}", stream.codec),
            )
        })?;

        let config = DecoderConfig::software(ctx.options.audio_decoder_options.clone());
        let decoder = ctx.engine.open_decoder(&spec, stream, config).map_err(|error| {
            TranscodeError::setup(
                stream.index,
                MediaKind::Audio,
                format!("could not open {} ({error})", spec.name),
            )
        })?;

        log::info!("{} Decoding {} with {}", core.tag, stream.codec, spec.name);
        core.state = TranscoderState::DecodingConfigured;

        Ok(Self {
            core,
            chain: AvChain::new(decoder),
        })
    }

    /// Open the encoder from decoder state, falling back to stream
    /// metadata.
    pub(crate) fn finalize_from_descriptor(
        &mut self,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        let stream = &self.core.stream;
        let properties = match self.chain.decoder.audio_properties() {
            Some(properties) => properties,
            None => AudioProperties {
                sample_format: stream.sample_format.clone().ok_or_else(|| {
                    TranscodeError::setup(stream.index, MediaKind::Audio, "sample format unknown")
                })?,
                sample_rate: stream.sample_rate,
                channel_layout: stream.channel_layout,
                samples: 0,
            },
        };

        let frame_size = match self.chain.decoder.frame_size() {
            0 => stream.frame_size,
            size => size,
        };
        open_encoder(&mut self.core, &mut self.chain, ctx, properties, frame_size)
    }

    pub(crate) fn transcode(
        &mut self,
        packet: &E::Packet,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        self.chain.transcode(&AudioSetup, &mut self.core, packet, ctx)
    }

    pub(crate) fn drain(&mut self, ctx: &mut PipelineContext<E>) -> Result<(), TranscodeError> {
        self.chain.drain(&AudioSetup, &mut self.core, ctx)
    }
}

/// `decoded_frame_size` is the sample count the encoder will be fed (0
/// when unknown).
fn open_encoder<E: MediaEngine>(
    core: &mut StreamCore,
    chain: &mut AvChain<E>,
    ctx: &mut PipelineContext<E>,
    properties: AudioProperties,
    decoded_frame_size: u32,
) -> Result<(), TranscodeError> {
    let index = core.stream.index;
    let codec = ctx
        .options
        .audio_codec
        .clone()
        .unwrap_or_else(|| chain.decoder.codec().to_string());

    // Encoder input is the decoder's own sample format.
    let sample_format = chain
        .decoder
        .audio_properties()
        .map_or_else(|| properties.sample_format.clone(), |decoder| decoder.sample_format);

    let spec = ctx
        .engine
        .find_encoders(&codec, MediaKind::Audio)
        .into_iter()
        .find(|spec| spec.accepts_sample_format(&sample_format))
        .ok_or_else(|| {
            TranscodeError::setup(
                index,
                MediaKind::Audio,
                format!("no {codec} encoder accepts {sample_format}"),
            )
        })?;

    if properties.sample_rate == 0 {
        return Err(TranscodeError::setup(index, MediaKind::Audio, "sample rate unknown"));
    }
    let sample_rate = i32::try_from(properties.sample_rate).map_err(|_| {
        TranscodeError::setup(index, MediaKind::Audio, "sample rate out of range")
    })?;

    let parameters = EncoderParameters::Audio(AudioEncoderParameters {
        sample_format,
        sample_rate: properties.sample_rate,
        channel_layout: properties.channel_layout,
        time_base: Rational::new(1, sample_rate),
        global_header: ctx.muxer.requires_global_header(),
    });

    let encoder = ctx
        .engine
        .open_encoder(&spec, &parameters, &ctx.options.audio_encoder_options, None)
        .map_err(|error| {
            TranscodeError::setup(
                index,
                MediaKind::Audio,
                format!("could not open {} ({error})", spec.name),
            )
        })?;

    // Variable frame size encoders (PCM) take whatever they are given.
    let encoder_frame_size = encoder.frame_size();
    if encoder_frame_size != 0
        && decoded_frame_size != 0
        && encoder_frame_size != decoded_frame_size
    {
        return Err(TranscodeError::FrameSizeMismatch {
            stream: index,
            encoder: encoder_frame_size,
            decoded: decoded_frame_size,
        });
    }

    chain.install_encoder(core, encoder);
    Ok(())
}
