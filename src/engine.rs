//! The media-engine seam.
//!
//! The pipeline never parses containers or runs codecs itself. It drives an
//! implementation of [`MediaEngine`], which hands out demuxers, muxers,
//! decoders, and encoders with non-blocking send/receive semantics:
//! `receive_*` returns [`EngineError::TryAgain`] when more input is needed
//! and [`EngineError::Eof`] once a drained codec has nothing left.
//!
//! With the `ffmpeg` feature, [`FfmpegEngine`](crate::FfmpegEngine)
//! implements these traits on top of `ffmpeg-next`.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};

use crate::error::EngineError;
use crate::hardware::{HardwareDeviceType, HardwareNegotiator, HardwareWrapper};
use crate::timestamp::{NO_TIMESTAMP, Rational, rescale};

/// Key/value options forwarded verbatim to an engine component.
pub type OptionMap = BTreeMap<String, String>;

/// The kind of media a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Pictures.
    Video,
    /// Sound.
    Audio,
    /// Text or bitmap subtitles.
    Subtitle,
    /// Opaque data streams.
    Data,
    /// Attached files (fonts, cover art containers).
    Attachment,
    /// Anything the engine could not classify.
    Unknown,
}

impl MediaKind {
    /// Single-letter tag used in diagnostics (`V`, `A`, `S`, ...).
    pub fn tag(self) -> char {
        match self {
            MediaKind::Video => 'V',
            MediaKind::Audio => 'A',
            MediaKind::Subtitle => 'S',
            MediaKind::Data => 'D',
            MediaKind::Attachment => 'T',
            MediaKind::Unknown => 'U',
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Subtitle => "subtitle",
            MediaKind::Data => "data",
            MediaKind::Attachment => "attachment",
            MediaKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A pixel format, identified by its engine name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// Engine name, e.g. `yuv420p` or `cuda`.
    pub name: String,
    /// `true` when frames of this format live in device memory.
    pub hardware: bool,
}

impl PixelFormat {
    /// A system-memory pixel format.
    pub fn software(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hardware: false,
        }
    }

    /// A device-memory pixel format.
    pub fn hardware(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hardware: true,
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.name)
    }
}

/// Audio channel layout. A zero `mask` means "default order for
/// `channels`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelLayout {
    /// Number of channels.
    pub channels: u32,
    /// Channel bit mask, when the layout is a native one.
    pub mask: u64,
}

impl ChannelLayout {
    /// Default layout for a channel count.
    pub fn with_channels(channels: u32) -> Self {
        Self { channels, mask: 0 }
    }
}

/// Colour metadata carried from decoded pictures to the encoder.
///
/// Values are the engine's raw enumeration codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ColorProperties {
    /// Colour primaries.
    pub primaries: i32,
    /// Transfer characteristic.
    pub transfer: i32,
    /// Matrix coefficients.
    pub space: i32,
    /// Full or limited range.
    pub range: i32,
    /// Chroma sample location.
    pub chroma_location: i32,
}

/// Immutable metadata of one input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    /// Stable index within the input.
    pub index: usize,
    /// Media kind.
    pub kind: MediaKind,
    /// Codec name, e.g. `h264` or `aac`.
    pub codec: String,
    /// Time base of the stream's packets.
    pub time_base: Rational,
    /// First timestamp in `time_base`, or [`NO_TIMESTAMP`].
    pub start_time: i64,
    /// Declared constant frame rate (video).
    pub frame_rate: Option<Rational>,
    /// Frame rate guessed from the packets (video).
    pub guessed_frame_rate: Option<Rational>,
    /// Picture width (video, bitmap subtitles).
    pub width: u32,
    /// Picture height (video, bitmap subtitles).
    pub height: u32,
    /// Pixel format declared by the container (video).
    pub pixel_format: Option<PixelFormat>,
    /// Sample aspect ratio (video).
    pub sample_aspect_ratio: Option<Rational>,
    /// Colour metadata (video).
    pub color: ColorProperties,
    /// Bits per raw sample.
    pub bits_per_raw_sample: u32,
    /// Codec profile, when known.
    pub profile: Option<i32>,
    /// Sample format name (audio).
    pub sample_format: Option<String>,
    /// Sample rate in Hz (audio).
    pub sample_rate: u32,
    /// Channel layout (audio).
    pub channel_layout: ChannelLayout,
    /// Samples per frame (audio).
    pub frame_size: u32,
    /// `language` metadata tag.
    pub language: Option<String>,
}

impl StreamDescriptor {
    /// A descriptor with the given identity and empty media parameters.
    pub fn new(
        index: usize,
        kind: MediaKind,
        codec: impl Into<String>,
        time_base: Rational,
    ) -> Self {
        Self {
            index,
            kind,
            codec: codec.into(),
            time_base,
            start_time: NO_TIMESTAMP,
            frame_rate: None,
            guessed_frame_rate: None,
            width: 0,
            height: 0,
            pixel_format: None,
            sample_aspect_ratio: None,
            color: ColorProperties::default(),
            bits_per_raw_sample: 0,
            profile: None,
            sample_format: None,
            sample_rate: 0,
            channel_layout: ChannelLayout::default(),
            frame_size: 0,
            language: None,
        }
    }
}

/// Properties of a decoded picture or of a video decoder's output.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoProperties {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub pixel_format: PixelFormat,
    /// Sample aspect ratio, if set.
    pub sample_aspect_ratio: Option<Rational>,
    /// Colour metadata.
    pub color: ColorProperties,
}

/// Properties of a decoded audio buffer or of an audio decoder's output.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioProperties {
    /// Sample format name.
    pub sample_format: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel layout.
    pub channel_layout: ChannelLayout,
    /// Samples per channel in this buffer (0 for a decoder).
    pub samples: u32,
}

/// A decoder the engine can open for a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderSpec {
    /// Decoder implementation name.
    pub name: String,
    /// Codec it decodes.
    pub codec: String,
}

/// An encoder implementation and its capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSpec {
    /// Encoder implementation name, e.g. `libx264` or `h264_nvenc`.
    pub name: String,
    /// Codec it produces.
    pub codec: String,
    /// Accepted pixel formats. Empty means any.
    pub pixel_formats: Vec<PixelFormat>,
    /// Accepted sample formats. Empty means any.
    pub sample_formats: Vec<String>,
    /// Hardware vendor wrapper this encoder belongs to.
    pub wrapper: HardwareWrapper,
}

impl EncoderSpec {
    /// Whether frames of `format` can be sent to this encoder as-is.
    pub fn accepts_pixel_format(&self, format: &PixelFormat) -> bool {
        self.pixel_formats.is_empty() || self.pixel_formats.iter().any(|f| f.name == format.name)
    }

    /// Whether samples of `format` can be sent to this encoder as-is.
    pub fn accepts_sample_format(&self, format: &str) -> bool {
        self.sample_formats.is_empty() || self.sample_formats.iter().any(|f| f == format)
    }
}

/// Finalized parameters for a video encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderParameters {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format frames will arrive in.
    pub pixel_format: PixelFormat,
    /// Sample aspect ratio.
    pub sample_aspect_ratio: Option<Rational>,
    /// Colour metadata.
    pub color: ColorProperties,
    /// Bits per raw sample.
    pub bits_per_raw_sample: u32,
    /// Constant frame rate, when the source declares one.
    pub frame_rate: Option<Rational>,
    /// Encoder time base.
    pub time_base: Rational,
    /// Worker threads for the encoder.
    pub threads: usize,
    /// Put codec headers in extradata (container requirement).
    pub global_header: bool,
    /// Attach the decoder's hardware frame pool to the encoder.
    pub share_hardware_frames: bool,
}

/// Finalized parameters for an audio encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderParameters {
    /// Sample format name.
    pub sample_format: String,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel layout.
    pub channel_layout: ChannelLayout,
    /// Encoder time base (1 / sample rate).
    pub time_base: Rational,
    /// Put codec headers in extradata (container requirement).
    pub global_header: bool,
}

/// Finalized parameters for a video or audio encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderParameters {
    /// Video encoder parameters.
    Video(VideoEncoderParameters),
    /// Audio encoder parameters.
    Audio(AudioEncoderParameters),
}

impl EncoderParameters {
    /// The encoder time base.
    pub fn time_base(&self) -> Rational {
        match self {
            EncoderParameters::Video(video) => video.time_base,
            EncoderParameters::Audio(audio) => audio.time_base,
        }
    }
}

/// Parameters for a subtitle encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEncoderParameters {
    /// Canvas width (bitmap subtitles).
    pub width: u32,
    /// Canvas height (bitmap subtitles).
    pub height: u32,
    /// Encoder time base.
    pub time_base: Rational,
    /// Put codec headers in extradata (container requirement).
    pub global_header: bool,
}

/// How a decoder should be opened.
pub struct DecoderConfig<D, F> {
    /// Options forwarded to the decoder.
    pub options: OptionMap,
    /// Decoder worker threads; `None` leaves the engine default.
    pub threads: Option<usize>,
    /// Hardware format negotiation, for hardware-accelerated decoding.
    pub hardware: Option<HardwareNegotiator<D, F>>,
    /// Extra frames to allocate in the hardware pool.
    pub extra_hardware_frames: u32,
    /// Let the hardware decoder accept mismatching codec profiles.
    pub allow_profile_mismatch: bool,
}

impl<D, F> DecoderConfig<D, F> {
    /// A software decoder configuration with the given options.
    pub fn software(options: OptionMap) -> Self {
        Self {
            options,
            threads: None,
            hardware: None,
            extra_hardware_frames: 0,
            allow_profile_mismatch: false,
        }
    }
}

/// A compressed packet.
pub trait MediaPacket {
    /// An empty, reusable packet.
    fn empty() -> Self;
    /// Index of the stream this packet belongs to.
    fn stream_index(&self) -> usize;
    /// Re-tag the packet with another stream index.
    fn set_stream_index(&mut self, index: usize);
    /// Presentation timestamp.
    fn pts(&self) -> i64;
    /// Set the presentation timestamp.
    fn set_pts(&mut self, pts: i64);
    /// Decoding timestamp.
    fn dts(&self) -> i64;
    /// Set the decoding timestamp.
    fn set_dts(&mut self, dts: i64);
    /// Duration in the packet's time base.
    fn duration(&self) -> i64;
    /// Set the duration.
    fn set_duration(&mut self, duration: i64);
    /// Payload size in bytes.
    fn size(&self) -> usize;

    /// Convert pts, dts, and a positive duration between time bases.
    fn rescale_timestamps(&mut self, from: Rational, to: Rational) {
        self.set_pts(rescale(self.pts(), from, to));
        self.set_dts(rescale(self.dts(), from, to));
        if self.duration() > 0 {
            self.set_duration(rescale(self.duration(), from, to));
        }
    }
}

/// A decoded picture or audio buffer, reused across iterations.
pub trait MediaFrame {
    /// An empty, reusable frame.
    fn empty() -> Self;
    /// Presentation timestamp.
    fn pts(&self) -> i64;
    /// Set the presentation timestamp.
    fn set_pts(&mut self, pts: i64);
    /// Duration.
    fn duration(&self) -> i64;
    /// Set the duration.
    fn set_duration(&mut self, duration: i64);
    /// Drop any picture-type hint so the encoder chooses I/P/B itself.
    fn clear_picture_type(&mut self);
    /// Picture properties, for video frames.
    fn video_properties(&self) -> Option<VideoProperties>;
    /// Buffer properties, for audio frames.
    fn audio_properties(&self) -> Option<AudioProperties>;
    /// Download a device-memory frame into `target`, copying timing and
    /// colour metadata along with the pixels.
    fn transfer_to_system(&self, target: &mut Self) -> Result<(), EngineError>;
}

/// A decoded subtitle.
pub trait MediaSubtitle {
    /// An empty, reusable subtitle.
    fn empty() -> Self;
    /// Presentation time in microseconds, or [`NO_TIMESTAMP`].
    fn pts(&self) -> i64;
    /// Number of bitmap/text rectangles.
    fn rect_count(&self) -> usize;
}

/// Container reader.
pub trait Demuxer {
    /// Packet type produced by the reader.
    type Packet: MediaPacket;

    /// Stream descriptors, ordered by index.
    fn streams(&self) -> &[StreamDescriptor];
    /// Container start time in microseconds, or [`NO_TIMESTAMP`].
    fn start_time(&self) -> i64;
    /// Whether packets of this stream are delivered.
    fn is_enabled(&self, index: usize) -> bool;
    /// Enable or discard a stream.
    fn set_enabled(&mut self, index: usize, enabled: bool);
    /// Read the next packet of any enabled stream. [`EngineError::Eof`]
    /// marks the end of input.
    fn read_packet(&mut self, packet: &mut Self::Packet) -> Result<(), EngineError>;
    /// Seek all streams to `timestamp` (microseconds), landing on a frame
    /// at or before it.
    fn seek(&mut self, timestamp: i64) -> Result<(), EngineError>;
}

/// Container writer.
pub trait Muxer {
    /// Packet type accepted by the writer.
    type Packet: MediaPacket;
    /// Codec parameters handed over by encoders when adding streams.
    type Parameters;

    /// Short name of the container format, e.g. `matroska`.
    fn format_name(&self) -> &str;
    /// Whether encoders must put codec headers in extradata.
    fn requires_global_header(&self) -> bool;
    /// Whether the container natively carries `codec`.
    fn supports_codec(&self, codec: &str) -> bool;
    /// A codec tag that lets the container carry `codec` anyway.
    fn codec_tag(&self, codec: &str) -> Option<u32>;
    /// Preferred text subtitle codec of the container.
    fn best_text_subtitle_codec(&self) -> Option<String>;
    /// Register an output stream; returns its index.
    fn add_stream(
        &mut self,
        parameters: &Self::Parameters,
        time_base: Rational,
        codec_tag: Option<u32>,
        language: Option<&str>,
    ) -> Result<usize, EngineError>;
    /// Shift output timestamps so the file starts at zero.
    fn avoid_negative_timestamps(&mut self);
    /// Write the container header. Stream time bases may change.
    fn write_header(&mut self, options: &OptionMap) -> Result<(), EngineError>;
    /// Time base of an output stream (final once the header is written).
    fn stream_time_base(&self, index: usize) -> Rational;
    /// Write a packet through the interleaving queue.
    fn write_interleaved(&mut self, packet: &mut Self::Packet) -> Result<(), EngineError>;
    /// Flush interleaving queues and write the trailer.
    fn write_trailer(&mut self) -> Result<(), EngineError>;
}

/// Audio or video decoder.
pub trait Decoder {
    /// Compressed input.
    type Packet: MediaPacket;
    /// Decoded output.
    type Frame: MediaFrame;

    /// Codec being decoded.
    fn codec(&self) -> &str;
    /// Time base of incoming packets and outgoing frame timestamps.
    fn time_base(&self) -> Rational;
    /// Feed one packet.
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<(), EngineError>;
    /// Signal end of input so buffered frames are released.
    fn send_eof(&mut self) -> Result<(), EngineError>;
    /// Pull one decoded frame.
    fn receive_frame(&mut self, frame: &mut Self::Frame) -> Result<(), EngineError>;
    /// Current picture output, for video decoders.
    fn video_properties(&self) -> Option<VideoProperties>;
    /// Current audio output, for audio decoders.
    fn audio_properties(&self) -> Option<AudioProperties>;
    /// Samples per frame, for audio decoders (0 when variable).
    fn frame_size(&self) -> u32;
    /// System-memory format paired with the hardware frame pool, when
    /// decoding into device memory.
    fn hardware_software_format(&self) -> Option<PixelFormat>;
}

/// Audio or video encoder.
pub trait Encoder {
    /// Compressed output.
    type Packet: MediaPacket;
    /// Raw input.
    type Frame: MediaFrame;
    /// Codec parameters for the muxer.
    type Parameters;

    /// The implementation that was opened.
    fn spec(&self) -> &EncoderSpec;
    /// Encoder time base (after opening).
    fn time_base(&self) -> Rational;
    /// Samples per frame the encoder expects (0 when variable).
    fn frame_size(&self) -> u32;
    /// Feed one frame.
    fn send_frame(&mut self, frame: &Self::Frame) -> Result<(), EngineError>;
    /// Signal end of input so buffered packets are released.
    fn send_eof(&mut self) -> Result<(), EngineError>;
    /// Pull one encoded packet.
    fn receive_packet(&mut self, packet: &mut Self::Packet) -> Result<(), EngineError>;
    /// Codec parameters describing the encoded stream.
    fn parameters(&self) -> Self::Parameters;
}

/// Subtitle decoder (one packet yields at most one subtitle).
pub trait SubtitleDecoder {
    /// Compressed input.
    type Packet: MediaPacket;
    /// Decoded output.
    type Subtitle: MediaSubtitle;

    /// Codec being decoded.
    fn codec(&self) -> &str;
    /// Whether the codec carries text rather than bitmaps.
    fn is_text(&self) -> bool;
    /// Canvas size for bitmap subtitles.
    fn dimensions(&self) -> (u32, u32);
    /// Decode a packet; returns `true` when `subtitle` was filled.
    fn decode(
        &mut self,
        packet: &Self::Packet,
        subtitle: &mut Self::Subtitle,
    ) -> Result<bool, EngineError>;
}

/// Subtitle encoder (one subtitle yields one packet).
pub trait SubtitleEncoder {
    /// Compressed output.
    type Packet: MediaPacket;
    /// Raw input.
    type Subtitle: MediaSubtitle;
    /// Codec parameters for the muxer.
    type Parameters;

    /// Codec being produced.
    fn codec(&self) -> &str;
    /// Encoder time base.
    fn time_base(&self) -> Rational;
    /// Encode a subtitle into `packet`, timed in the encoder time base.
    fn encode(
        &mut self,
        subtitle: &Self::Subtitle,
        packet: &mut Self::Packet,
    ) -> Result<(), EngineError>;
    /// Codec parameters describing the encoded stream.
    fn parameters(&self) -> Self::Parameters;
}

/// Factory tying together every component of a media engine.
pub trait MediaEngine {
    /// Compressed packet.
    type Packet: MediaPacket;
    /// Decoded picture or audio buffer.
    type Frame: MediaFrame;
    /// Decoded subtitle.
    type Subtitle: MediaSubtitle;
    /// Codec parameters passed from encoders to the muxer.
    type Parameters;
    /// Hardware device handle.
    type HardwareDevice;
    /// Hardware frame pool handle.
    type HardwareFrames;
    /// Container reader.
    type Demuxer: Demuxer<Packet = Self::Packet>;
    /// Container writer.
    type Muxer: Muxer<Packet = Self::Packet, Parameters = Self::Parameters>;
    /// Audio/video decoder.
    type Decoder: Decoder<Packet = Self::Packet, Frame = Self::Frame>;
    /// Audio/video encoder.
    type Encoder: Encoder<
        Packet = Self::Packet,
        Frame = Self::Frame,
        Parameters = Self::Parameters,
    >;
    /// Subtitle decoder.
    type SubtitleDecoder: SubtitleDecoder<Packet = Self::Packet, Subtitle = Self::Subtitle>;
    /// Subtitle encoder.
    type SubtitleEncoder: SubtitleEncoder<
            Packet = Self::Packet,
            Subtitle = Self::Subtitle,
            Parameters = Self::Parameters,
        >;

    /// Open and probe an input.
    fn open_input(&mut self, uri: &str, options: &OptionMap) -> Result<Self::Demuxer, EngineError>;
    /// Create an output; `format` overrides guessing from the name.
    fn open_output(&mut self, uri: &str, format: Option<&str>) -> Result<Self::Muxer, EngineError>;
    /// Find a decoder for a stream.
    fn find_decoder(&self, stream: &StreamDescriptor) -> Option<DecoderSpec>;
    /// Open an audio or video decoder.
    fn open_decoder(
        &mut self,
        spec: &DecoderSpec,
        stream: &StreamDescriptor,
        config: DecoderConfig<Self::HardwareDevice, Self::HardwareFrames>,
    ) -> Result<Self::Decoder, EngineError>;
    /// Every encoder producing `codec`, in preference order.
    fn find_encoders(&self, codec: &str, kind: MediaKind) -> Vec<EncoderSpec>;
    /// Open an audio or video encoder. `hardware_source` is the decoder
    /// whose hardware frame pool should be shared, if any.
    fn open_encoder(
        &mut self,
        spec: &EncoderSpec,
        parameters: &EncoderParameters,
        options: &OptionMap,
        hardware_source: Option<&Self::Decoder>,
    ) -> Result<Self::Encoder, EngineError>;
    /// Open a subtitle decoder for a stream.
    fn open_subtitle_decoder(
        &mut self,
        spec: &DecoderSpec,
        stream: &StreamDescriptor,
    ) -> Result<Self::SubtitleDecoder, EngineError>;
    /// Whether a subtitle encoder for `codec` exists.
    fn has_subtitle_encoder(&self, codec: &str) -> bool;
    /// Open a subtitle encoder, copying header and extradata from
    /// `decoder`.
    fn open_subtitle_encoder(
        &mut self,
        codec: &str,
        parameters: &SubtitleEncoderParameters,
        decoder: &Self::SubtitleDecoder,
    ) -> Result<Self::SubtitleEncoder, EngineError>;
    /// Create a hardware device.
    fn create_hardware_device(
        &mut self,
        device_type: HardwareDeviceType,
    ) -> Result<Self::HardwareDevice, EngineError>;
    /// The device-memory pixel format decoders produce on `device_type`.
    fn hardware_pixel_format(&self, device_type: HardwareDeviceType) -> Option<PixelFormat>;
}

impl<D, F> Debug for DecoderConfig<D, F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DecoderConfig")
            .field("options", &self.options)
            .field("threads", &self.threads)
            .field("hardware", &self.hardware.is_some())
            .field("extra_hardware_frames", &self.extra_hardware_frames)
            .field("allow_profile_mismatch", &self.allow_profile_mismatch)
            .finish()
    }
}
