//! FFmpeg-backed media engine and FFmpeg log level configuration.
//!
//! [`FfmpegEngine`] implements every [`MediaEngine`] component on top of
//! `ffmpeg-next`, dropping to `ffmpeg-sys-next` for the parts the safe
//! bindings do not cover (hardware frame pools, subtitle encoding, codec
//! tags, pixel-format negotiation).
//!
//! FFmpeg also has its own internal logging system, separate from the Rust
//! [`log`](https://crates.io/crates/log) crate. By default, FFmpeg prints
//! warnings and errors to stderr, which can be noisy in library usage.
//! [`set_ffmpeg_log_level`] tunes it without importing `ffmpeg-next`
//! directly.
//!
//! # Example
//!
//! ```no_run
//! use transpipe::{FfmpegEngine, FfmpegLogLevel, Pipeline, TranscodeOptions};
//!
//! // Silence all FFmpeg output except fatal errors.
//! transpipe::set_ffmpeg_log_level(FfmpegLogLevel::Fatal);
//!
//! let engine = FfmpegEngine::new()?;
//! let summary = Pipeline::new(engine, TranscodeOptions::new("input.mkv", "output.mkv")).run()?;
//! println!("{}", summary.stop_reason);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Note
//!
//! The log level controls **FFmpeg's own console output**, not the
//! Rust-side diagnostic messages emitted via the `log` crate. To configure
//! those, use a standard `log` subscriber such as `env_logger`.

use std::ffi::{CString, c_int, c_void};
use std::ptr::{self, NonNull};

use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::codec::{Id, Parameters};
use ffmpeg_next::format::context::{Input, Output};
use ffmpeg_next::format::{Flags as FormatFlags, Pixel, Sample};
use ffmpeg_next::packet::Mut as _;
use ffmpeg_next::util::error::{EAGAIN, EINVAL, ENOENT, ENOMEM};
use ffmpeg_next::util::log::Level;
use ffmpeg_next::{Dictionary, Error as FfmpegError, Frame, Packet, decoder, encoder, media};
use ffmpeg_sys_next::{
    AV_CODEC_FLAG_FRAME_DURATION, AV_CODEC_FLAG_GLOBAL_HEADER, AV_CODEC_PROP_TEXT_SUB,
    AV_HWACCEL_FLAG_ALLOW_PROFILE_MISMATCH, AV_PIX_FMT_FLAG_HWACCEL, AVBufferRef, AVChannelOrder,
    AVCodecContext, AVCodecID, AVDiscard, AVFMT_AVOID_NEG_TS_MAKE_ZERO, AVHWDeviceType,
    AVHWFramesContext, AVPictureType, AVPixelFormat, AVRational, AVSEEK_FLAG_BACKWARD,
    AVSampleFormat, AVSubtitle,
};

use crate::engine::{
    AudioProperties, ChannelLayout, ColorProperties, Decoder, DecoderConfig, DecoderSpec, Demuxer,
    Encoder, EncoderParameters, EncoderSpec, MediaEngine, MediaFrame, MediaKind, MediaPacket,
    MediaSubtitle, Muxer, OptionMap, PixelFormat, StreamDescriptor, SubtitleDecoder,
    SubtitleEncoder, SubtitleEncoderParameters, VideoProperties,
};
use crate::error::EngineError;
use crate::hardware::{HardwareDeviceType, HardwareNegotiator, HardwareWrapper};
use crate::timestamp::{NO_TIMESTAMP, Rational, rescale};

/// Largest encoded subtitle accepted, in bytes.
const SUBTITLE_BUFFER_SIZE: usize = 1024 * 1024;

/// Text subtitle codecs, in order of preference.
const TEXT_SUBTITLE_CODECS: [&str; 5] = ["ass", "subrip", "webvtt", "mov_text", "ttml"];

/// FFmpeg internal log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants. Setting a level causes
/// FFmpeg to suppress all messages below that severity.
///
/// # Ordering (most verbose → most quiet)
///
/// `Trace` > `Debug` > `Verbose` > `Info` > `Warning` > `Error` > `Fatal` > `Panic` > `Quiet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Only log when the process is about to abort.
    Panic,
    /// Only log unrecoverable errors.
    Fatal,
    /// Log recoverable errors.
    Error,
    /// Log warnings (default FFmpeg level).
    Warning,
    /// Log informational messages.
    Info,
    /// Log verbose informational messages.
    Verbose,
    /// Log debugging messages.
    Debug,
    /// Extremely verbose tracing output.
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }

    fn from_ffmpeg_level(level: Level) -> Self {
        match level {
            Level::Quiet => FfmpegLogLevel::Quiet,
            Level::Panic => FfmpegLogLevel::Panic,
            Level::Fatal => FfmpegLogLevel::Fatal,
            Level::Error => FfmpegLogLevel::Error,
            Level::Warning => FfmpegLogLevel::Warning,
            Level::Info => FfmpegLogLevel::Info,
            Level::Verbose => FfmpegLogLevel::Verbose,
            Level::Debug => FfmpegLogLevel::Debug,
            Level::Trace => FfmpegLogLevel::Trace,
        }
    }
}

/// Set the FFmpeg internal log verbosity level.
///
/// This controls what FFmpeg prints to stderr. It does **not** affect
/// Rust-side `log` crate output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// Get the current FFmpeg internal log verbosity level.
///
/// Returns `None` if the current level does not map to a known variant.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    ffmpeg_next::util::log::get_level()
        .ok()
        .map(FfmpegLogLevel::from_ffmpeg_level)
}

// ── Error and value conversions ────────────────────────────────────

fn engine_error(error: FfmpegError) -> EngineError {
    match error {
        FfmpegError::Eof => EngineError::Eof,
        FfmpegError::Other { errno } if errno == EAGAIN => EngineError::TryAgain,
        FfmpegError::Other { errno } if errno == EINVAL => EngineError::InvalidArgument,
        FfmpegError::Other { errno } if errno == ENOMEM => EngineError::OutOfMemory,
        FfmpegError::Other { errno } if errno == ENOENT => EngineError::NotFound(error.to_string()),
        FfmpegError::DecoderNotFound
        | FfmpegError::EncoderNotFound
        | FfmpegError::DemuxerNotFound
        | FfmpegError::MuxerNotFound
        | FfmpegError::StreamNotFound
        | FfmpegError::ProtocolNotFound
        | FfmpegError::OptionNotFound => EngineError::NotFound(error.to_string()),
        other => EngineError::Other {
            code: c_int::from(other),
            message: other.to_string(),
        },
    }
}

/// Turn a raw FFmpeg return code into a `Result`.
fn check(code: c_int) -> Result<c_int, EngineError> {
    if code < 0 {
        Err(engine_error(FfmpegError::from(code)))
    } else {
        Ok(code)
    }
}

fn rational(value: AVRational) -> Rational {
    Rational::new(value.num, value.den)
}

fn av_rational(value: Rational) -> AVRational {
    AVRational {
        num: value.num,
        den: value.den,
    }
}

fn optional_rational(value: AVRational) -> Option<Rational> {
    Some(rational(value)).filter(|rate| rate.is_valid())
}

fn c_string(value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::InvalidArgument)
}

fn dictionary(options: &OptionMap) -> Dictionary<'static> {
    let mut dictionary = Dictionary::new();
    for (key, value) in options {
        dictionary.set(key, value);
    }
    dictionary
}

/// Free an option dictionary after an open call, warning about any
/// option the component did not consume.
///
/// # Safety
///
/// `remaining` must be null or a dictionary owned by the caller.
unsafe fn report_unused_options(component: &str, remaining: *mut ffmpeg_sys_next::AVDictionary) {
    if remaining.is_null() {
        return;
    }
    let remaining = unsafe { Dictionary::own(remaining) };
    for (key, _) in remaining.iter() {
        log::warn!("Option {key} was not used by {component}");
    }
}

fn pixel_format(format: AVPixelFormat) -> Option<PixelFormat> {
    let pixel = Pixel::from(format);
    let descriptor = pixel.descriptor()?;
    let flags = unsafe { (*descriptor.as_ptr()).flags };
    let hardware = flags & AV_PIX_FMT_FLAG_HWACCEL as u64 != 0;

    Some(PixelFormat {
        name: descriptor.name().to_string(),
        hardware,
    })
}

fn av_pixel_format(format: &PixelFormat) -> Result<AVPixelFormat, EngineError> {
    format
        .name
        .parse::<Pixel>()
        .map(AVPixelFormat::from)
        .map_err(|_| EngineError::NotFound(format!("pixel format {}", format.name)))
}

fn sample_format_name(format: AVSampleFormat) -> Option<String> {
    if format == AVSampleFormat::AV_SAMPLE_FMT_NONE {
        return None;
    }
    Some(Sample::from(format).name().to_string())
}

fn av_sample_format(name: &str) -> Result<AVSampleFormat, EngineError> {
    let name_c = c_string(name)?;
    let format = unsafe { ffmpeg_sys_next::av_get_sample_fmt(name_c.as_ptr()) };
    if format == AVSampleFormat::AV_SAMPLE_FMT_NONE {
        return Err(EngineError::NotFound(format!("sample format {name}")));
    }
    Ok(format)
}

fn codec_id(name: &str) -> Option<AVCodecID> {
    let name_c = CString::new(name).ok()?;
    let descriptor = unsafe { ffmpeg_sys_next::avcodec_descriptor_get_by_name(name_c.as_ptr()) };
    if descriptor.is_null() {
        None
    } else {
        Some(unsafe { (*descriptor).id })
    }
}

fn media_kind(medium: media::Type) -> MediaKind {
    match medium {
        media::Type::Video => MediaKind::Video,
        media::Type::Audio => MediaKind::Audio,
        media::Type::Subtitle => MediaKind::Subtitle,
        media::Type::Data => MediaKind::Data,
        media::Type::Attachment => MediaKind::Attachment,
        media::Type::Unknown => MediaKind::Unknown,
    }
}

/// # Safety
///
/// `layout` must point to a valid `AVChannelLayout`.
unsafe fn channel_layout(layout: *const ffmpeg_sys_next::AVChannelLayout) -> ChannelLayout {
    let layout = unsafe { &*layout };
    let mask = if layout.order == AVChannelOrder::AV_CHANNEL_ORDER_NATIVE {
        unsafe { layout.u.mask }
    } else {
        0
    };

    ChannelLayout {
        channels: u32::try_from(layout.nb_channels).unwrap_or(0),
        mask,
    }
}

/// Write a raw enumeration code into an FFmpeg enum field.
///
/// # Safety
///
/// `field` must point to a C enum field of `c_int` size, and `value` must be
/// a code FFmpeg understands for it.
unsafe fn write_enum<T>(field: *mut T, value: i32) {
    unsafe { ptr::write(field.cast::<c_int>(), value) };
}

/// An owned `AVBufferRef`.
struct BufferRef(NonNull<AVBufferRef>);

impl BufferRef {
    fn new(pointer: *mut AVBufferRef) -> Result<Self, EngineError> {
        NonNull::new(pointer)
            .map(BufferRef)
            .ok_or(EngineError::OutOfMemory)
    }

    fn as_ptr(&self) -> *mut AVBufferRef {
        self.0.as_ptr()
    }

    /// A new reference to the same buffer.
    fn new_ref(&self) -> *mut AVBufferRef {
        unsafe { ffmpeg_sys_next::av_buffer_ref(self.as_ptr()) }
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        let mut pointer = self.as_ptr();
        unsafe { ffmpeg_sys_next::av_buffer_unref(&mut pointer) };
    }
}

/// A hardware device context created by [`FfmpegEngine`].
pub struct FfmpegHardwareDevice(BufferRef);

/// A hardware frame pool bound to a decoder.
pub struct FfmpegHardwareFrames(BufferRef);

// ── Packets, frames, subtitles ─────────────────────────────────────

impl MediaPacket for Packet {
    fn empty() -> Self {
        Packet::empty()
    }

    fn stream_index(&self) -> usize {
        self.stream()
    }

    fn set_stream_index(&mut self, index: usize) {
        self.set_stream(index);
    }

    fn pts(&self) -> i64 {
        Packet::pts(self).unwrap_or(NO_TIMESTAMP)
    }

    fn set_pts(&mut self, pts: i64) {
        Packet::set_pts(self, (pts != NO_TIMESTAMP).then_some(pts));
    }

    fn dts(&self) -> i64 {
        Packet::dts(self).unwrap_or(NO_TIMESTAMP)
    }

    fn set_dts(&mut self, dts: i64) {
        Packet::set_dts(self, (dts != NO_TIMESTAMP).then_some(dts));
    }

    fn duration(&self) -> i64 {
        Packet::duration(self)
    }

    fn set_duration(&mut self, duration: i64) {
        Packet::set_duration(self, duration);
    }

    fn size(&self) -> usize {
        Packet::size(self)
    }
}

impl MediaFrame for Frame {
    fn empty() -> Self {
        unsafe { Frame::empty() }
    }

    fn pts(&self) -> i64 {
        unsafe { (*self.as_ptr()).pts }
    }

    fn set_pts(&mut self, pts: i64) {
        unsafe { (*self.as_mut_ptr()).pts = pts };
    }

    fn duration(&self) -> i64 {
        unsafe { (*self.as_ptr()).duration }
    }

    fn set_duration(&mut self, duration: i64) {
        unsafe { (*self.as_mut_ptr()).duration = duration };
    }

    fn clear_picture_type(&mut self) {
        unsafe { (*self.as_mut_ptr()).pict_type = AVPictureType::AV_PICTURE_TYPE_NONE };
    }

    fn video_properties(&self) -> Option<VideoProperties> {
        let raw = unsafe { &*self.as_ptr() };
        if raw.width <= 0 || raw.height <= 0 {
            return None;
        }

        let format: AVPixelFormat =
            unsafe { std::mem::transmute::<c_int, AVPixelFormat>(raw.format) };
        Some(VideoProperties {
            width: raw.width.unsigned_abs(),
            height: raw.height.unsigned_abs(),
            pixel_format: pixel_format(format)?,
            sample_aspect_ratio: optional_rational(raw.sample_aspect_ratio),
            color: ColorProperties {
                primaries: raw.color_primaries as i32,
                transfer: raw.color_trc as i32,
                space: raw.colorspace as i32,
                range: raw.color_range as i32,
                chroma_location: raw.chroma_location as i32,
            },
        })
    }

    fn audio_properties(&self) -> Option<AudioProperties> {
        let raw = unsafe { &*self.as_ptr() };
        if raw.nb_samples <= 0 || raw.sample_rate <= 0 {
            return None;
        }

        let format: AVSampleFormat =
            unsafe { std::mem::transmute::<c_int, AVSampleFormat>(raw.format) };
        Some(AudioProperties {
            sample_format: sample_format_name(format)?,
            sample_rate: raw.sample_rate.unsigned_abs(),
            channel_layout: unsafe { channel_layout(&raw.ch_layout) },
            samples: raw.nb_samples.unsigned_abs(),
        })
    }

    fn transfer_to_system(&self, target: &mut Self) -> Result<(), EngineError> {
        unsafe {
            ffmpeg_sys_next::av_frame_unref(target.as_mut_ptr());
            check(ffmpeg_sys_next::av_hwframe_transfer_data(
                target.as_mut_ptr(),
                self.as_ptr(),
                0,
            ))?;
            check(ffmpeg_sys_next::av_frame_copy_props(target.as_mut_ptr(), self.as_ptr()))?;
        }
        Ok(())
    }
}

/// A decoded subtitle. Frees its rectangles when reset or dropped.
pub struct FfmpegSubtitle(ffmpeg_next::Subtitle);

impl FfmpegSubtitle {
    fn raw(&self) -> &AVSubtitle {
        unsafe { &*self.0.as_ptr() }
    }
}

impl MediaSubtitle for FfmpegSubtitle {
    fn empty() -> Self {
        FfmpegSubtitle(ffmpeg_next::Subtitle::new())
    }

    fn pts(&self) -> i64 {
        self.raw().pts
    }

    fn rect_count(&self) -> usize {
        self.raw().num_rects as usize
    }
}

impl Drop for FfmpegSubtitle {
    fn drop(&mut self) {
        unsafe { ffmpeg_sys_next::avsubtitle_free(self.0.as_mut_ptr()) };
    }
}

// ── Demuxer ────────────────────────────────────────────────────────

/// Container reader backed by an `AVFormatContext`.
pub struct FfmpegDemuxer {
    input: Input,
    streams: Vec<StreamDescriptor>,
}

impl FfmpegDemuxer {
    fn describe(input: &Input) -> Vec<StreamDescriptor> {
        input
            .streams()
            .map(|stream| {
                let parameters = stream.parameters();
                let raw = unsafe { &*parameters.as_ptr() };
                let kind = media_kind(parameters.medium());

                let mut descriptor = StreamDescriptor::new(
                    stream.index(),
                    kind,
                    parameters.id().name(),
                    Rational::new(stream.time_base().numerator(), stream.time_base().denominator()),
                );
                descriptor.start_time = stream.start_time();
                descriptor.bits_per_raw_sample = raw.bits_per_raw_sample.unsigned_abs();
                descriptor.profile = (raw.profile >= 0).then_some(raw.profile);
                descriptor.language = stream.metadata().get("language").map(str::to_string);

                match kind {
                    MediaKind::Video => {
                        let av_stream = unsafe { &*stream.as_ptr() };
                        let declared = optional_rational(av_stream.r_frame_rate);
                        let average = optional_rational(av_stream.avg_frame_rate);
                        descriptor.frame_rate = declared.filter(|rate| Some(*rate) == average);
                        descriptor.guessed_frame_rate = optional_rational(unsafe {
                            ffmpeg_sys_next::av_guess_frame_rate(
                                input.as_ptr().cast_mut(),
                                stream.as_ptr().cast_mut(),
                                ptr::null_mut(),
                            )
                        });
                        descriptor.width = raw.width.unsigned_abs();
                        descriptor.height = raw.height.unsigned_abs();
                        let format: AVPixelFormat =
                            unsafe { std::mem::transmute::<c_int, AVPixelFormat>(raw.format) };
                        descriptor.pixel_format = pixel_format(format);
                        descriptor.sample_aspect_ratio = optional_rational(raw.sample_aspect_ratio);
                        descriptor.color = ColorProperties {
                            primaries: raw.color_primaries as i32,
                            transfer: raw.color_trc as i32,
                            space: raw.color_space as i32,
                            range: raw.color_range as i32,
                            chroma_location: raw.chroma_location as i32,
                        };
                    }
                    MediaKind::Audio => {
                        let format: AVSampleFormat =
                            unsafe { std::mem::transmute::<c_int, AVSampleFormat>(raw.format) };
                        descriptor.sample_format = sample_format_name(format);
                        descriptor.sample_rate = raw.sample_rate.unsigned_abs();
                        descriptor.channel_layout = unsafe { channel_layout(&raw.ch_layout) };
                        descriptor.frame_size = raw.frame_size.unsigned_abs();
                    }
                    MediaKind::Subtitle => {
                        descriptor.width = raw.width.unsigned_abs();
                        descriptor.height = raw.height.unsigned_abs();
                    }
                    _ => {}
                }

                descriptor
            })
            .collect()
    }

    fn parameters(&self, index: usize) -> Option<Parameters> {
        self.input.stream(index).map(|stream| stream.parameters().clone())
    }
}

impl Demuxer for FfmpegDemuxer {
    type Packet = Packet;

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn start_time(&self) -> i64 {
        unsafe { (*self.input.as_ptr()).start_time }
    }

    fn is_enabled(&self, index: usize) -> bool {
        self.input
            .stream(index)
            .is_some_and(|stream| unsafe { (*stream.as_ptr()).discard } != AVDiscard::AVDISCARD_ALL)
    }

    fn set_enabled(&mut self, index: usize, enabled: bool) {
        let Some(mut stream) = self.input.stream_mut(index) else {
            return;
        };
        let discard = if enabled {
            AVDiscard::AVDISCARD_DEFAULT
        } else {
            AVDiscard::AVDISCARD_ALL
        };
        unsafe { (*stream.as_mut_ptr()).discard = discard };
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<(), EngineError> {
        unsafe { ffmpeg_sys_next::av_packet_unref(packet.as_mut_ptr()) };
        packet.read(&mut self.input).map_err(engine_error)
    }

    fn seek(&mut self, timestamp: i64) -> Result<(), EngineError> {
        check(unsafe {
            ffmpeg_sys_next::av_seek_frame(
                self.input.as_mut_ptr(),
                -1,
                timestamp,
                AVSEEK_FLAG_BACKWARD as c_int,
            )
        })?;
        Ok(())
    }
}

// ── Muxer ──────────────────────────────────────────────────────────

/// Container writer backed by an output `AVFormatContext`.
pub struct FfmpegMuxer {
    output: Output,
    format_name: String,
}

impl FfmpegMuxer {
    fn query_codec(&self, id: AVCodecID) -> bool {
        unsafe {
            let format = (*self.output.as_ptr()).oformat;
            !format.is_null() && ffmpeg_sys_next::avformat_query_codec(format, id, 0) == 1
        }
    }
}

impl Muxer for FfmpegMuxer {
    type Packet = Packet;
    type Parameters = Parameters;

    fn format_name(&self) -> &str {
        &self.format_name
    }

    fn requires_global_header(&self) -> bool {
        self.output
            .format()
            .flags()
            .contains(FormatFlags::GLOBAL_HEADER)
    }

    fn supports_codec(&self, codec: &str) -> bool {
        codec_id(codec).is_some_and(|id| self.query_codec(id))
    }

    fn codec_tag(&self, codec: &str) -> Option<u32> {
        let id = codec_id(codec)?;
        let tag = unsafe {
            let format = (*self.output.as_ptr()).oformat;
            if format.is_null() || (*format).codec_tag.is_null() {
                return None;
            }
            ffmpeg_sys_next::av_codec_get_tag((*format).codec_tag, id)
        };
        (tag != 0).then_some(tag)
    }

    fn best_text_subtitle_codec(&self) -> Option<String> {
        TEXT_SUBTITLE_CODECS
            .iter()
            .find(|codec| self.supports_codec(codec))
            .map(|codec| (*codec).to_string())
    }

    fn add_stream(
        &mut self,
        parameters: &Parameters,
        time_base: Rational,
        codec_tag: Option<u32>,
        language: Option<&str>,
    ) -> Result<usize, EngineError> {
        let mut stream = self
            .output
            .add_stream(encoder::find(Id::None))
            .map_err(engine_error)?;

        stream.set_time_base(ffmpeg_next::Rational::new(time_base.num, time_base.den));
        unsafe {
            let raw = stream.as_mut_ptr();
            check(ffmpeg_sys_next::avcodec_parameters_copy(
                (*raw).codecpar,
                parameters.as_ptr(),
            ))?;
            (*(*raw).codecpar).codec_tag = codec_tag.unwrap_or(0);
        }

        if let Some(language) = language {
            let mut metadata = Dictionary::new();
            metadata.set("language", language);
            stream.set_metadata(metadata);
        }

        Ok(stream.index())
    }

    fn avoid_negative_timestamps(&mut self) {
        unsafe {
            (*self.output.as_mut_ptr()).avoid_negative_ts = AVFMT_AVOID_NEG_TS_MAKE_ZERO as c_int;
        }
    }

    fn write_header(&mut self, options: &OptionMap) -> Result<(), EngineError> {
        let remaining = self
            .output
            .write_header_with(dictionary(options))
            .map_err(engine_error)?;
        for (key, _) in remaining.iter() {
            log::warn!("Option {key} was not used by the {} muxer", self.format_name);
        }
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Rational {
        self.output.stream(index).map_or(Rational::new(0, 1), |stream| {
            Rational::new(stream.time_base().numerator(), stream.time_base().denominator())
        })
    }

    fn write_interleaved(&mut self, packet: &mut Packet) -> Result<(), EngineError> {
        packet.set_position(-1);
        packet
            .write_interleaved(&mut self.output)
            .map_err(engine_error)
    }

    fn write_trailer(&mut self) -> Result<(), EngineError> {
        self.output.write_trailer().map_err(engine_error)
    }
}

// ── Decoders ───────────────────────────────────────────────────────

/// State reachable from the `get_format` callback through `opaque`.
struct HardwareState {
    negotiator: HardwareNegotiator<FfmpegHardwareDevice, FfmpegHardwareFrames>,
    extra_frames: u32,
}

/// Audio or video decoder.
pub struct FfmpegDecoder {
    decoder: decoder::Opened,
    codec: String,
    time_base: Rational,
    hardware: Option<NonNull<HardwareState>>,
}

impl FfmpegDecoder {
    fn context(&self) -> &AVCodecContext {
        unsafe { &*self.decoder.as_ptr() }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if let Some(state) = self.hardware.take() {
            unsafe {
                (*self.decoder.as_mut_ptr()).opaque = ptr::null_mut();
                drop(Box::from_raw(state.as_ptr()));
            }
        }
    }
}

unsafe extern "C" fn negotiate_format(
    context: *mut AVCodecContext,
    formats: *const AVPixelFormat,
) -> AVPixelFormat {
    let state = unsafe { (*context).opaque.cast::<HardwareState>() };
    if state.is_null() {
        return unsafe { ffmpeg_sys_next::avcodec_default_get_format(context, formats) };
    }
    let state = unsafe { &mut *state };

    let mut offered = Vec::new();
    let mut cursor = formats;
    unsafe {
        while *cursor != AVPixelFormat::AV_PIX_FMT_NONE {
            offered.extend(pixel_format(*cursor));
            cursor = cursor.add(1);
        }
    }

    let extra_frames = state.extra_frames;
    let decision = state.negotiator.negotiate(
        &offered,
        || {
            let fallback = unsafe { ffmpeg_sys_next::avcodec_default_get_format(context, formats) };
            pixel_format(fallback).unwrap_or_else(|| PixelFormat::software("none"))
        },
        |device, format| unsafe { init_hardware_frames(context, device, format, extra_frames) },
    );

    if let Some(frames) = state.negotiator.frames() {
        unsafe {
            if (*context).hw_frames_ctx.is_null() {
                (*context).hw_frames_ctx = frames.0.new_ref();
            }
        }
    }

    av_pixel_format(&decision).unwrap_or(AVPixelFormat::AV_PIX_FMT_NONE)
}

/// Build and bind a hardware frame pool for a decoder.
///
/// # Safety
///
/// `context` must be a decoder context inside its `get_format` callback.
unsafe fn init_hardware_frames(
    context: *mut AVCodecContext,
    device: &FfmpegHardwareDevice,
    format: &PixelFormat,
    extra_frames: u32,
) -> Result<FfmpegHardwareFrames, EngineError> {
    let hardware_format = av_pixel_format(format)?;
    let mut frames: *mut AVBufferRef = ptr::null_mut();

    unsafe {
        check(ffmpeg_sys_next::avcodec_get_hw_frames_parameters(
            context,
            device.0.as_ptr(),
            hardware_format,
            &mut frames,
        ))?;
    }
    let frames = BufferRef::new(frames)?;

    unsafe {
        let pool = (*frames.as_ptr()).data.cast::<AVHWFramesContext>();
        (*pool).initial_pool_size += c_int::try_from(extra_frames).unwrap_or(0);
        check(ffmpeg_sys_next::av_hwframe_ctx_init(frames.as_ptr()))?;
        (*context).hw_frames_ctx = frames.new_ref();
    }

    Ok(FfmpegHardwareFrames(frames))
}

impl Decoder for FfmpegDecoder {
    type Packet = Packet;
    type Frame = Frame;

    fn codec(&self) -> &str {
        &self.codec
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<(), EngineError> {
        self.decoder.send_packet(packet).map_err(engine_error)
    }

    fn send_eof(&mut self) -> Result<(), EngineError> {
        self.decoder.send_eof().map_err(engine_error)
    }

    fn receive_frame(&mut self, frame: &mut Frame) -> Result<(), EngineError> {
        self.decoder.receive_frame(frame).map_err(engine_error)
    }

    fn video_properties(&self) -> Option<VideoProperties> {
        let raw = self.context();
        if raw.codec_type != ffmpeg_sys_next::AVMediaType::AVMEDIA_TYPE_VIDEO {
            return None;
        }

        Some(VideoProperties {
            width: raw.width.unsigned_abs(),
            height: raw.height.unsigned_abs(),
            pixel_format: pixel_format(raw.pix_fmt)?,
            sample_aspect_ratio: optional_rational(raw.sample_aspect_ratio),
            color: ColorProperties {
                primaries: raw.color_primaries as i32,
                transfer: raw.color_trc as i32,
                space: raw.colorspace as i32,
                range: raw.color_range as i32,
                chroma_location: raw.chroma_sample_location as i32,
            },
        })
    }

    fn audio_properties(&self) -> Option<AudioProperties> {
        let raw = self.context();
        if raw.codec_type != ffmpeg_sys_next::AVMediaType::AVMEDIA_TYPE_AUDIO {
            return None;
        }

        Some(AudioProperties {
            sample_format: sample_format_name(raw.sample_fmt)?,
            sample_rate: raw.sample_rate.unsigned_abs(),
            channel_layout: unsafe { channel_layout(&raw.ch_layout) },
            samples: 0,
        })
    }

    fn frame_size(&self) -> u32 {
        self.context().frame_size.unsigned_abs()
    }

    fn hardware_software_format(&self) -> Option<PixelFormat> {
        let frames = self.context().hw_frames_ctx;
        if frames.is_null() {
            return None;
        }
        let software = unsafe { (*(*frames).data.cast::<AVHWFramesContext>()).sw_format };
        pixel_format(software)
    }
}

/// Subtitle decoder.
pub struct FfmpegSubtitleDecoder {
    decoder: decoder::Subtitle,
    codec: String,
    text: bool,
}

impl SubtitleDecoder for FfmpegSubtitleDecoder {
    type Packet = Packet;
    type Subtitle = FfmpegSubtitle;

    fn codec(&self) -> &str {
        &self.codec
    }

    fn is_text(&self) -> bool {
        self.text
    }

    fn dimensions(&self) -> (u32, u32) {
        let raw = unsafe { &*self.decoder.as_ptr() };
        (raw.width.unsigned_abs(), raw.height.unsigned_abs())
    }

    fn decode(
        &mut self,
        packet: &Packet,
        subtitle: &mut FfmpegSubtitle,
    ) -> Result<bool, EngineError> {
        unsafe { ffmpeg_sys_next::avsubtitle_free(subtitle.0.as_mut_ptr()) };
        self.decoder
            .decode(packet, &mut subtitle.0)
            .map_err(engine_error)
    }
}

// ── Encoders ───────────────────────────────────────────────────────

/// Audio or video encoder.
pub struct FfmpegEncoder {
    encoder: encoder::Encoder,
    spec: EncoderSpec,
}

impl Encoder for FfmpegEncoder {
    type Packet = Packet;
    type Frame = Frame;
    type Parameters = Parameters;

    fn spec(&self) -> &EncoderSpec {
        &self.spec
    }

    fn time_base(&self) -> Rational {
        rational(unsafe { (*self.encoder.as_ptr()).time_base })
    }

    fn frame_size(&self) -> u32 {
        unsafe { (*self.encoder.as_ptr()).frame_size.unsigned_abs() }
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), EngineError> {
        self.encoder.send_frame(frame).map_err(engine_error)
    }

    fn send_eof(&mut self) -> Result<(), EngineError> {
        self.encoder.send_eof().map_err(engine_error)
    }

    fn receive_packet(&mut self, packet: &mut Packet) -> Result<(), EngineError> {
        self.encoder.receive_packet(packet).map_err(engine_error)
    }

    fn parameters(&self) -> Parameters {
        Parameters::from(&self.encoder)
    }
}

/// Subtitle encoder.
pub struct FfmpegSubtitleEncoder {
    context: encoder::Encoder,
    codec: String,
    buffer: Vec<u8>,
}

impl SubtitleEncoder for FfmpegSubtitleEncoder {
    type Packet = Packet;
    type Subtitle = FfmpegSubtitle;
    type Parameters = Parameters;

    fn codec(&self) -> &str {
        &self.codec
    }

    fn time_base(&self) -> Rational {
        rational(unsafe { (*self.context.as_ptr()).time_base })
    }

    /// Display times are folded into the pts, so the packet starts when the
    /// subtitle shows and lasts as long as it stays on screen.
    fn encode(
        &mut self,
        subtitle: &FfmpegSubtitle,
        packet: &mut Packet,
    ) -> Result<(), EngineError> {
        let mut raw: AVSubtitle = *subtitle.raw();
        let start_ms = i64::from(raw.start_display_time);
        let duration_ms = i64::from(raw.end_display_time.saturating_sub(raw.start_display_time));

        raw.pts = raw.pts.saturating_add(start_ms * 1_000);
        raw.end_display_time = raw.end_display_time.saturating_sub(raw.start_display_time);
        raw.start_display_time = 0;

        let size = c_int::try_from(self.buffer.len()).map_err(|_| EngineError::InvalidArgument)?;
        let written = check(unsafe {
            ffmpeg_sys_next::avcodec_encode_subtitle(
                self.context.as_mut_ptr(),
                self.buffer.as_mut_ptr(),
                size,
                &raw,
            )
        })?;

        let time_base = self.time_base();
        let written = usize::try_from(written).unwrap_or(0);
        *packet = Packet::copy(&self.buffer[..written]);
        MediaPacket::set_pts(packet, rescale(raw.pts, Rational::MICROSECONDS, time_base));
        MediaPacket::set_dts(packet, MediaPacket::pts(packet));
        packet.set_duration(rescale(duration_ms, Rational::new(1, 1_000), time_base));
        Ok(())
    }

    fn parameters(&self) -> Parameters {
        Parameters::from(&self.context)
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// [`MediaEngine`] implementation backed by the FFmpeg libraries.
///
/// One engine serves one run: it keeps a copy of the input's codec
/// parameters so decoders can be opened from a [`StreamDescriptor`].
pub struct FfmpegEngine {
    input_parameters: Vec<Parameters>,
}

impl FfmpegEngine {
    /// Initialise FFmpeg and create an engine.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if FFmpeg cannot be initialised.
    pub fn new() -> Result<Self, EngineError> {
        ffmpeg_next::init().map_err(engine_error)?;
        Ok(Self {
            input_parameters: Vec::new(),
        })
    }

    fn stream_parameters(&self, index: usize) -> Result<&Parameters, EngineError> {
        self.input_parameters
            .get(index)
            .ok_or_else(|| EngineError::NotFound(format!("input stream #{index}")))
    }

    /// Open a codec context with options, reporting unused ones.
    fn open_context(
        context: &mut CodecContext,
        codec: &ffmpeg_next::Codec,
        options: &OptionMap,
    ) -> Result<(), EngineError> {
        let mut options = unsafe { dictionary(options).disown() };
        let result = unsafe {
            ffmpeg_sys_next::avcodec_open2(context.as_mut_ptr(), codec.as_ptr(), &mut options)
        };
        unsafe { report_unused_options(codec.name(), options) };
        check(result)?;
        Ok(())
    }
}

impl MediaEngine for FfmpegEngine {
    type Packet = Packet;
    type Frame = Frame;
    type Subtitle = FfmpegSubtitle;
    type Parameters = Parameters;
    type HardwareDevice = FfmpegHardwareDevice;
    type HardwareFrames = FfmpegHardwareFrames;
    type Demuxer = FfmpegDemuxer;
    type Muxer = FfmpegMuxer;
    type Decoder = FfmpegDecoder;
    type Encoder = FfmpegEncoder;
    type SubtitleDecoder = FfmpegSubtitleDecoder;
    type SubtitleEncoder = FfmpegSubtitleEncoder;

    fn open_input(&mut self, uri: &str, options: &OptionMap) -> Result<FfmpegDemuxer, EngineError> {
        let input = ffmpeg_next::format::input_with_dictionary(uri, dictionary(options))
            .map_err(engine_error)?;

        let streams = FfmpegDemuxer::describe(&input);
        let demuxer = FfmpegDemuxer { input, streams };
        self.input_parameters = (0..demuxer.streams.len())
            .filter_map(|index| demuxer.parameters(index))
            .collect();

        Ok(demuxer)
    }

    fn open_output(&mut self, uri: &str, format: Option<&str>) -> Result<FfmpegMuxer, EngineError> {
        let output = match format {
            Some(format) => ffmpeg_next::format::output_as(uri, format),
            None => ffmpeg_next::format::output(uri),
        }
        .map_err(engine_error)?;

        let format_name = output.format().name().to_string();
        Ok(FfmpegMuxer {
            output,
            format_name,
        })
    }

    fn find_decoder(&self, stream: &StreamDescriptor) -> Option<DecoderSpec> {
        let parameters = self.input_parameters.get(stream.index)?;
        let codec = decoder::find(parameters.id())?;
        Some(DecoderSpec {
            name: codec.name().to_string(),
            codec: parameters.id().name().to_string(),
        })
    }

    fn open_decoder(
        &mut self,
        spec: &DecoderSpec,
        stream: &StreamDescriptor,
        config: DecoderConfig<FfmpegHardwareDevice, FfmpegHardwareFrames>,
    ) -> Result<FfmpegDecoder, EngineError> {
        let codec = decoder::find_by_name(&spec.name)
            .ok_or_else(|| EngineError::NotFound(format!("decoder {}", spec.name)))?;
        let parameters = self.stream_parameters(stream.index)?.clone();
        let mut context = CodecContext::from_parameters(parameters).map_err(engine_error)?;

        let mut hardware = None;
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).pkt_timebase = av_rational(stream.time_base);
            if let Some(threads) = config.threads {
                (*raw).thread_count = c_int::try_from(threads).unwrap_or(0);
            }
            if config.allow_profile_mismatch {
                (*raw).hwaccel_flags |= AV_HWACCEL_FLAG_ALLOW_PROFILE_MISMATCH as c_int;
            }

            if let Some(negotiator) = config.hardware {
                if let Some(device) = negotiator.device() {
                    (*raw).hw_device_ctx = device.0.new_ref();
                }
                let state = Box::new(HardwareState {
                    negotiator,
                    extra_frames: config.extra_hardware_frames,
                });
                let state = NonNull::from(Box::leak(state));
                (*raw).opaque = state.as_ptr().cast::<c_void>();
                (*raw).get_format = Some(negotiate_format);
                hardware = Some(state);
            }
        }

        let opened = Self::open_context(&mut context, &codec, &config.options);
        let decoder = FfmpegDecoder {
            decoder: decoder::Opened(context.decoder()),
            codec: spec.codec.clone(),
            time_base: stream.time_base,
            hardware,
        };
        opened?;

        Ok(decoder)
    }

    fn find_encoders(&self, codec: &str, kind: MediaKind) -> Vec<EncoderSpec> {
        let Some(id) = codec_id(codec) else {
            return Vec::new();
        };

        let mut specs = Vec::new();
        let mut opaque: *mut c_void = ptr::null_mut();
        loop {
            let raw = unsafe { ffmpeg_sys_next::av_codec_iterate(&mut opaque) };
            if raw.is_null() {
                break;
            }
            let is_encoder = unsafe { ffmpeg_sys_next::av_codec_is_encoder(raw) } != 0;
            if !is_encoder || unsafe { (*raw).id } != id {
                continue;
            }

            let found = unsafe { ffmpeg_next::Codec::wrap(raw) };
            if media_kind(found.medium()) != kind {
                continue;
            }

            let pixel_formats = found
                .video()
                .ok()
                .and_then(|video| video.formats())
                .map(|formats| formats.filter_map(|pixel| pixel_format(pixel.into())).collect())
                .unwrap_or_default();
            let sample_formats = found
                .audio()
                .ok()
                .and_then(|audio| audio.formats())
                .map(|formats| formats.map(|sample| sample.name().to_string()).collect())
                .unwrap_or_default();

            specs.push(EncoderSpec {
                name: found.name().to_string(),
                codec: codec.to_string(),
                pixel_formats,
                sample_formats,
                wrapper: HardwareWrapper::from_encoder_name(found.name()),
            });
        }

        specs
    }

    fn open_encoder(
        &mut self,
        spec: &EncoderSpec,
        parameters: &EncoderParameters,
        options: &OptionMap,
        hardware_source: Option<&FfmpegDecoder>,
    ) -> Result<FfmpegEncoder, EngineError> {
        let codec = encoder::find_by_name(&spec.name)
            .ok_or_else(|| EngineError::NotFound(format!("encoder {}", spec.name)))?;
        let mut context = CodecContext::new_with_codec(codec);

        unsafe {
            let raw = context.as_mut_ptr();
            match parameters {
                EncoderParameters::Video(video) => {
                    (*raw).width =
                        c_int::try_from(video.width).map_err(|_| EngineError::InvalidArgument)?;
                    (*raw).height =
                        c_int::try_from(video.height).map_err(|_| EngineError::InvalidArgument)?;
                    (*raw).pix_fmt = av_pixel_format(&video.pixel_format)?;
                    if let Some(aspect) = video.sample_aspect_ratio {
                        (*raw).sample_aspect_ratio = av_rational(aspect);
                    }
                    write_enum(ptr::addr_of_mut!((*raw).color_primaries), video.color.primaries);
                    write_enum(ptr::addr_of_mut!((*raw).color_trc), video.color.transfer);
                    write_enum(ptr::addr_of_mut!((*raw).colorspace), video.color.space);
                    write_enum(ptr::addr_of_mut!((*raw).color_range), video.color.range);
                    write_enum(
                        ptr::addr_of_mut!((*raw).chroma_sample_location),
                        video.color.chroma_location,
                    );
                    (*raw).bits_per_raw_sample =
                        c_int::try_from(video.bits_per_raw_sample).unwrap_or(0);
                    if let Some(rate) = video.frame_rate {
                        (*raw).framerate = av_rational(rate);
                    }
                    (*raw).time_base = av_rational(video.time_base);
                    (*raw).thread_count = c_int::try_from(video.threads).unwrap_or(0);
                    (*raw).flags |= AV_CODEC_FLAG_FRAME_DURATION as c_int;
                    if video.global_header {
                        (*raw).flags |= AV_CODEC_FLAG_GLOBAL_HEADER as c_int;
                    }

                    if video.share_hardware_frames {
                        if let Some(source) = hardware_source {
                            let frames = source.context().hw_frames_ctx;
                            if !frames.is_null() {
                                (*raw).hw_frames_ctx = ffmpeg_sys_next::av_buffer_ref(frames);
                            }
                        }
                    }
                }
                EncoderParameters::Audio(audio) => {
                    (*raw).sample_fmt = av_sample_format(&audio.sample_format)?;
                    (*raw).sample_rate = c_int::try_from(audio.sample_rate)
                        .map_err(|_| EngineError::InvalidArgument)?;
                    let layout = ptr::addr_of_mut!((*raw).ch_layout);
                    if audio.channel_layout.mask != 0 {
                        let mask = audio.channel_layout.mask;
                        check(ffmpeg_sys_next::av_channel_layout_from_mask(layout, mask))?;
                    } else {
                        let channels = c_int::try_from(audio.channel_layout.channels).unwrap_or(0);
                        ffmpeg_sys_next::av_channel_layout_default(layout, channels);
                    }
                    (*raw).time_base = av_rational(audio.time_base);
                    if audio.global_header {
                        (*raw).flags |= AV_CODEC_FLAG_GLOBAL_HEADER as c_int;
                    }
                }
            }
        }

        Self::open_context(&mut context, &codec, options)?;
        Ok(FfmpegEncoder {
            encoder: context.encoder(),
            spec: spec.clone(),
        })
    }

    fn open_subtitle_decoder(
        &mut self,
        spec: &DecoderSpec,
        stream: &StreamDescriptor,
    ) -> Result<FfmpegSubtitleDecoder, EngineError> {
        let codec = decoder::find_by_name(&spec.name)
            .ok_or_else(|| EngineError::NotFound(format!("decoder {}", spec.name)))?;
        let parameters = self.stream_parameters(stream.index)?.clone();
        let mut context = CodecContext::from_parameters(parameters).map_err(engine_error)?;
        unsafe { (*context.as_mut_ptr()).pkt_timebase = av_rational(stream.time_base) };

        Self::open_context(&mut context, &codec, &OptionMap::new())?;

        let text = unsafe {
            let descriptor = ffmpeg_sys_next::avcodec_descriptor_get((*codec.as_ptr()).id);
            !descriptor.is_null() && (*descriptor).props & AV_CODEC_PROP_TEXT_SUB as c_int != 0
        };

        Ok(FfmpegSubtitleDecoder {
            decoder: decoder::Subtitle(decoder::Opened(context.decoder())),
            codec: spec.codec.clone(),
            text,
        })
    }

    fn has_subtitle_encoder(&self, codec: &str) -> bool {
        codec_id(codec).is_some_and(|id| encoder::find(Id::from(id)).is_some())
    }

    fn open_subtitle_encoder(
        &mut self,
        codec: &str,
        parameters: &SubtitleEncoderParameters,
        decoder: &FfmpegSubtitleDecoder,
    ) -> Result<FfmpegSubtitleEncoder, EngineError> {
        let id = codec_id(codec).ok_or_else(|| EngineError::NotFound(format!("codec {codec}")))?;
        let found = encoder::find(Id::from(id))
            .ok_or_else(|| EngineError::NotFound(format!("{codec} encoder")))?;
        let mut context = CodecContext::new_with_codec(found);

        unsafe {
            let raw = context.as_mut_ptr();
            let source = &*decoder.decoder.as_ptr();
            (*raw).width = c_int::try_from(parameters.width).unwrap_or(0);
            (*raw).height = c_int::try_from(parameters.height).unwrap_or(0);
            (*raw).time_base = av_rational(parameters.time_base);

            copy_side_buffer(
                source.subtitle_header,
                source.subtitle_header_size,
                &mut (*raw).subtitle_header,
                &mut (*raw).subtitle_header_size,
            )?;
            copy_side_buffer(
                source.extradata,
                source.extradata_size,
                &mut (*raw).extradata,
                &mut (*raw).extradata_size,
            )?;

            if parameters.global_header {
                (*raw).flags |= AV_CODEC_FLAG_GLOBAL_HEADER as c_int;
            }
            (*raw).flags |= AV_CODEC_FLAG_FRAME_DURATION as c_int;
        }

        Self::open_context(&mut context, &found, &OptionMap::new())?;
        Ok(FfmpegSubtitleEncoder {
            context: context.encoder(),
            codec: codec.to_string(),
            buffer: vec![0; SUBTITLE_BUFFER_SIZE],
        })
    }

    fn create_hardware_device(
        &mut self,
        device_type: HardwareDeviceType,
    ) -> Result<FfmpegHardwareDevice, EngineError> {
        let name = c_string(device_type.name())?;
        let av_type = unsafe { ffmpeg_sys_next::av_hwdevice_find_type_by_name(name.as_ptr()) };
        if av_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            return Err(EngineError::NotFound(format!("hardware device {device_type}")));
        }

        let mut device: *mut AVBufferRef = ptr::null_mut();
        check(unsafe {
            ffmpeg_sys_next::av_hwdevice_ctx_create(
                &mut device,
                av_type,
                ptr::null(),
                ptr::null_mut(),
                0,
            )
        })?;

        Ok(FfmpegHardwareDevice(BufferRef::new(device)?))
    }

    fn hardware_pixel_format(&self, device_type: HardwareDeviceType) -> Option<PixelFormat> {
        let name = match device_type {
            HardwareDeviceType::Cuda => "cuda",
            HardwareDeviceType::Vaapi => "vaapi",
            HardwareDeviceType::Dxva2 => "dxva2_vld",
            HardwareDeviceType::D3d11va => "d3d11",
            HardwareDeviceType::D3d12va => "d3d12",
            HardwareDeviceType::VideoToolbox => "videotoolbox_vld",
            HardwareDeviceType::Qsv => "qsv",
        };
        name.parse::<Pixel>()
            .ok()
            .and_then(|pixel| pixel_format(pixel.into()))
    }
}

/// Copy a codec side buffer (extradata, subtitle header) into freshly
/// allocated, padded memory owned by `target`.
///
/// # Safety
///
/// `source` must be null or valid for `size` bytes; `target` must be an
/// unset codec context field.
unsafe fn copy_side_buffer(
    source: *const u8,
    size: c_int,
    target: *mut *mut u8,
    target_size: *mut c_int,
) -> Result<(), EngineError> {
    let Ok(length) = usize::try_from(size) else {
        return Ok(());
    };
    if source.is_null() || length == 0 {
        return Ok(());
    }

    let padded = length + ffmpeg_sys_next::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    unsafe {
        let buffer = ffmpeg_sys_next::av_mallocz(padded).cast::<u8>();
        if buffer.is_null() {
            return Err(EngineError::OutOfMemory);
        }
        ptr::copy_nonoverlapping(source, buffer, length);
        *target = buffer;
        *target_size = size;
    }
    Ok(())
}

impl std::fmt::Debug for FfmpegEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegEngine")
            .field("input_streams", &self.input_parameters.len())
            .finish()
    }
}
