//! Video transcoding.
//!
//! [`VideoTranscoder`] decodes one video stream, optionally on a hardware
//! device, and re-encodes it. The encoder is chosen among the
//! implementations of the target codec that accept the decoder's pixel
//! format and belong to an allowed [`HardwareWrapper`](crate::HardwareWrapper).
//! When frames live in device memory and no allowed encoder takes them,
//! frames are downloaded to the pool's system-memory format first.

use std::num::NonZeroUsize;
use std::thread;

use crate::context::PipelineContext;
use crate::engine::{
    Decoder, DecoderConfig, Encoder, EncoderParameters, EncoderSpec, MediaEngine, MediaFrame,
    MediaKind, MediaPacket, Muxer, PixelFormat, StreamDescriptor, VideoEncoderParameters,
    VideoProperties,
};
use crate::error::TranscodeError;
use crate::hardware::{HardwareFrameSharing, HardwareNegotiator};
use crate::timestamp::Rational;
use crate::transcoder::{
    AvChain, LazySetup, StreamCore, TranscoderState, register_av, start_pts,
};

/// Extra hardware frames AV1 decoders need on top of the pool default.
const AV1_EXTRA_HARDWARE_FRAMES: u32 = 20;
/// H.264 Constrained Baseline profile.
const H264_PROFILE_BASELINE: i32 = 66;
/// Decoder threads in software mode.
const SOFTWARE_DECODER_THREADS: usize = 2;

pub(crate) struct VideoTranscoder<E: MediaEngine> {
    pub(crate) core: StreamCore,
    pub(crate) chain: AvChain<E>,
}

struct VideoSetup;

impl<E: MediaEngine> LazySetup<E> for VideoSetup {
    fn finalize_from_sample(
        &self,
        core: &mut StreamCore,
        chain: &mut AvChain<E>,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        let decoder_properties = chain.decoder.video_properties();
        let Some(mut properties) = chain
            .frame
            .video_properties()
            .or_else(|| decoder_properties.clone())
        else {
            return Err(TranscodeError::setup(
                core.stream.index,
                MediaKind::Video,
                "decoded frame carries no picture properties",
            ));
        };

        if !properties.sample_aspect_ratio.is_some_and(Rational::is_valid) {
            properties.sample_aspect_ratio =
                decoder_properties.and_then(|decoder| decoder.sample_aspect_ratio);
        }

        let bits = core.stream.bits_per_raw_sample;
        open_encoder(core, chain, ctx, properties, bits)
    }
}

impl<E: MediaEngine> VideoTranscoder<E> {
    pub(crate) fn create(
        ctx: &mut PipelineContext<E>,
        stream: &StreamDescriptor,
    ) -> Result<Self, TranscodeError> {
        let start = start_pts(ctx.start_time_us, stream.time_base);
        let mut core = StreamCore::new(stream.clone(), start);

        let spec = ctx.engine.find_decoder(stream).ok_or_else(|| {
            TranscodeError::setup(
                stream.index,
                MediaKind::Video,
                format!("no decoder for {}", stream.codec),
            )
        })?;

        let mut config = DecoderConfig::software(ctx.options.video_decoder_options.clone());
        match ctx.options.hardware_device {
            Some(device_type) => {
                let format = ctx.engine.hardware_pixel_format(device_type).ok_or_else(|| {
                    TranscodeError::setup(
                        stream.index,
                        MediaKind::Video,
                        format!("{device_type} has no hardware pixel format"),
                    )
                })?;
                let device = ctx
                    .engine
                    .create_hardware_device(device_type)
                    .map_err(|error| {
                        TranscodeError::setup(
                            stream.index,
                            MediaKind::Video,
                            format!("could not create {device_type} device ({error})"),
                        )
                    })?;

                config.hardware =
                    Some(HardwareNegotiator::new(core.tag.clone(), device, format));
                if spec.codec == "av1" {
                    config.extra_hardware_frames = AV1_EXTRA_HARDWARE_FRAMES;
                }
                if spec.codec == "h264" && stream.profile == Some(H264_PROFILE_BASELINE) {
                    config.allow_profile_mismatch = true;
                }
            }
            None => config.threads = Some(SOFTWARE_DECODER_THREADS),
        }

        let decoder = ctx
            .engine
            .open_decoder(&spec, stream, config)
            .map_err(|error| {
                TranscodeError::setup(
                    stream.index,
                    MediaKind::Video,
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

    /// Open the encoder from decoder state and stream metadata.
    pub(crate) fn finalize_from_descriptor(
        &mut self,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        let stream = &self.core.stream;
        let decoder = self.chain.decoder.video_properties();

        let pixel_format = decoder
            .as_ref()
            .map(|properties| properties.pixel_format.clone())
            .or_else(|| stream.pixel_format.clone())
            .ok_or_else(|| {
                TranscodeError::setup(stream.index, MediaKind::Video, "pixel format unknown")
            })?;

        let (width, height) = match &decoder {
            Some(properties) if properties.width > 0 && properties.height > 0 => {
                (properties.width, properties.height)
            }
            _ => (stream.width, stream.height),
        };

        let properties = VideoProperties {
            width,
            height,
            pixel_format,
            sample_aspect_ratio: stream.sample_aspect_ratio,
            color: stream.color,
        };
        let bits = stream.bits_per_raw_sample;

        open_encoder(&mut self.core, &mut self.chain, ctx, properties, bits)
    }

    pub(crate) fn transcode(
        &mut self,
        packet: &E::Packet,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        if packet.size() == 0 {
            return Ok(());
        }
        self.chain.transcode(&VideoSetup, &mut self.core, packet, ctx)
    }

    pub(crate) fn drain(&mut self, ctx: &mut PipelineContext<E>) -> Result<(), TranscodeError> {
        self.chain.drain(&VideoSetup, &mut self.core, ctx)
    }

    /// Containers that do not list the codec can still carry it under a
    /// codec tag (e.g. HEVC in AVI).
    pub(crate) fn register_output(
        &mut self,
        ctx: &mut PipelineContext<E>,
    ) -> Result<(), TranscodeError> {
        let codec = match self.chain.encoder.as_ref() {
            Some(encoder) => encoder.spec().codec.clone(),
            None => self.chain.decoder.codec().to_string(),
        };

        let codec_tag = if ctx.muxer.supports_codec(&codec) {
            None
        } else {
            let tag = ctx.muxer.codec_tag(&codec).ok_or_else(|| {
                TranscodeError::UnsupportedOutputCodec {
                    stream: self.core.stream.index,
                    codec: codec.clone(),
                }
            })?;
            log::info!("{} {codec} carried with codec tag {tag:#010x}", self.core.tag);
            Some(tag)
        };

        register_av(&mut self.core, &self.chain, ctx, codec_tag)
    }
}

fn open_encoder<E: MediaEngine>(
    core: &mut StreamCore,
    chain: &mut AvChain<E>,
    ctx: &mut PipelineContext<E>,
    properties: VideoProperties,
    bits_per_raw_sample: u32,
) -> Result<(), TranscodeError> {
    let index = core.stream.index;
    let codec = ctx
        .options
        .video_codec
        .clone()
        .unwrap_or_else(|| chain.decoder.codec().to_string());

    let encoders = ctx.engine.find_encoders(&codec, MediaKind::Video);
    if encoders.is_empty() {
        return Err(TranscodeError::setup(
            index,
            MediaKind::Video,
            format!("no encoder for {codec}"),
        ));
    }

    let wrappers = &ctx.options.hardware_wrappers;
    let pick = |format: &PixelFormat| -> Option<EncoderSpec> {
        encoders
            .iter()
            .find(|spec| spec.accepts_pixel_format(format) && wrappers.contains(&spec.wrapper))
            .cloned()
    };

    let mut pixel_format = properties.pixel_format.clone();
    let mut download = false;
    let spec = match pick(&pixel_format) {
        Some(spec) => spec,
        None => {
            let software = match chain.decoder.hardware_software_format() {
                Some(software) if pixel_format.hardware => software,
                _ => {
                    return Err(TranscodeError::setup(
                        index,
                        MediaKind::Video,
                        format!("no allowed {codec} encoder accepts {pixel_format}"),
                    ));
                }
            };

            log::info!(
                "{} No allowed {codec} encoder accepts {pixel_format}; downloading frames as {software}",
                core.tag
            );
            let spec = pick(&software).ok_or_else(|| {
                TranscodeError::setup(
                    index,
                    MediaKind::Video,
                    format!("no allowed {codec} encoder accepts {software}"),
                )
            })?;
            pixel_format = software;
            download = true;
            spec
        }
    };

    let stream = &core.stream;
    let (frame_rate, time_base) = match stream.frame_rate.filter(|rate| rate.is_valid()) {
        Some(rate) => (Some(rate), rate.invert()),
        None => {
            let guessed = stream.guessed_frame_rate.filter(|rate| rate.is_valid());
            (None, guessed.map_or(stream.time_base, Rational::invert))
        }
    };

    let hardware_decoding = chain.decoder.hardware_software_format().is_some();
    let share_hardware_frames = !download
        && hardware_decoding
        && ctx.options.hardware_frame_sharing == HardwareFrameSharing::ShareDecoderFrames;

    let parameters = EncoderParameters::Video(VideoEncoderParameters {
        width: properties.width,
        height: properties.height,
        pixel_format,
        sample_aspect_ratio: properties.sample_aspect_ratio,
        color: properties.color,
        bits_per_raw_sample,
        frame_rate,
        time_base,
        threads: thread::available_parallelism().map_or(1, NonZeroUsize::get),
        global_header: ctx.muxer.requires_global_header(),
        share_hardware_frames,
    });

    let hardware_source = share_hardware_frames.then_some(&chain.decoder);
    let encoder = ctx
        .engine
        .open_encoder(
            &spec,
            &parameters,
            &ctx.options.video_encoder_options,
            hardware_source,
        )
        .map_err(|error| {
            TranscodeError::setup(
                index,
                MediaKind::Video,
                format!("could not open {} ({error})", spec.name),
            )
        })?;

    chain.hardware_download = download;
    chain.install_encoder(core, encoder);
    Ok(())
}
