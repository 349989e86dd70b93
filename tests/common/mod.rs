//! Scripted in-memory media engine shared by the integration tests.
//!
//! Every muxer call is recorded in a [`Recorder`] so tests can check what
//! reached the container and in which order. Decoders hold back a
//! configurable number of frames and can fail on chosen packets.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use transpipe::{
    AudioProperties, ChannelLayout, Decoder, DecoderConfig, DecoderSpec, Demuxer, Encoder,
    EncoderParameters, EncoderSpec, EngineError, HardwareDeviceType, HardwareWrapper, MediaEngine,
    MediaFrame, MediaKind, MediaPacket, MediaSubtitle, Muxer, NO_TIMESTAMP, OptionMap, PixelFormat,
    Rational, StreamDescriptor, SubtitleDecoder, SubtitleEncoder, SubtitleEncoderParameters,
    VideoProperties, rescale,
};

pub const VIDEO_TIME_BASE: Rational = Rational::new(1, 90_000);
pub const AUDIO_TIME_BASE: Rational = Rational::new(1, 48_000);
pub const SUBTITLE_TIME_BASE: Rational = Rational::new(1, 1_000);

/// Ticks per frame of the 25 fps video fixture.
pub const VIDEO_FRAME_TICKS: i64 = 3_600;
/// Samples per frame of the audio fixture.
pub const AUDIO_FRAME_SAMPLES: i64 = 1_024;

// ── Recording ──────────────────────────────────────────────────────

/// A call that reached the muxer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AvoidNegativeTimestamps,
    AddStream {
        index: usize,
        codec: String,
        time_base: Rational,
        codec_tag: Option<u32>,
        language: Option<String>,
    },
    Header,
    Packet {
        stream: usize,
        pts: i64,
        dts: i64,
        duration: i64,
    },
    Trailer,
}

/// How a decoder was opened.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedDecoder {
    pub stream: usize,
    pub threads: Option<usize>,
    pub hardware: bool,
    pub extra_hardware_frames: u32,
    pub allow_profile_mismatch: bool,
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    pub seeks: Vec<i64>,
    pub decoders: Vec<OpenedDecoder>,
    pub encoders: Vec<(String, EncoderParameters)>,
    /// Packets handed to each input stream's decoder, failed sends included.
    pub sends: BTreeMap<usize, usize>,
    pub frames_encoded: usize,
}

impl Recorder {
    /// `(pts, duration)` of every packet written to an output stream.
    pub fn packets(&self, stream: usize) -> Vec<(i64, i64)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Packet {
                    stream: s,
                    pts,
                    duration,
                    ..
                } if *s == stream => Some((*pts, *duration)),
                _ => None,
            })
            .collect()
    }

    pub fn packet_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, Event::Packet { .. }))
            .count()
    }

    pub fn position(&self, wanted: &Event) -> Option<usize> {
        self.events.iter().position(|event| event == wanted)
    }

    pub fn header_position(&self) -> Option<usize> {
        self.position(&Event::Header)
    }

    pub fn added_streams(&self) -> Vec<(usize, String)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::AddStream { index, codec, .. } => Some((*index, codec.clone())),
                _ => None,
            })
            .collect()
    }

    /// Packets written after the header, as `(stream, pts)`.
    pub fn packets_after_header(&self) -> Vec<(usize, i64)> {
        let start = self.header_position().map_or(self.events.len(), |position| position + 1);
        self.events[start..]
            .iter()
            .filter_map(|event| match event {
                Event::Packet { stream, pts, .. } => Some((*stream, *pts)),
                _ => None,
            })
            .collect()
    }

    pub fn sends_to(&self, stream: usize) -> usize {
        self.sends.get(&stream).copied().unwrap_or(0)
    }
}

pub type SharedRecorder = Rc<RefCell<Recorder>>;

/// Asserts that every output stream's presentation timestamps strictly
/// increase.
pub fn assert_strictly_increasing(recorder: &Recorder) {
    let mut last: BTreeMap<usize, i64> = BTreeMap::new();
    for event in &recorder.events {
        if let Event::Packet { stream, pts, .. } = event {
            if let Some(previous) = last.get(stream) {
                assert!(pts > previous, "stream #{stream}: pts {pts} after {previous}");
            }
            last.insert(*stream, *pts);
        }
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

/// 1280x720 yuv420p H.264 at 25 fps.
pub fn video_stream(index: usize) -> StreamDescriptor {
    let mut stream = StreamDescriptor::new(index, MediaKind::Video, "h264", VIDEO_TIME_BASE);
    stream.start_time = 0;
    stream.frame_rate = Some(Rational::new(25, 1));
    stream.guessed_frame_rate = Some(Rational::new(25, 1));
    stream.width = 1280;
    stream.height = 720;
    stream.pixel_format = Some(PixelFormat::software("yuv420p"));
    stream.sample_aspect_ratio = Some(Rational::new(1, 1));
    stream.bits_per_raw_sample = 8;
    stream.profile = Some(100);
    stream
}

/// 48 kHz stereo AAC with 1024-sample frames.
pub fn audio_stream(index: usize) -> StreamDescriptor {
    let mut stream = StreamDescriptor::new(index, MediaKind::Audio, "aac", AUDIO_TIME_BASE);
    stream.start_time = 0;
    stream.sample_format = Some("fltp".to_string());
    stream.sample_rate = 48_000;
    stream.channel_layout = ChannelLayout {
        channels: 2,
        mask: 0x3,
    };
    stream.frame_size = AUDIO_FRAME_SAMPLES as u32;
    stream.language = Some("eng".to_string());
    stream
}

pub fn subtitle_stream(index: usize, codec: &str) -> StreamDescriptor {
    let mut stream = StreamDescriptor::new(index, MediaKind::Subtitle, codec, SUBTITLE_TIME_BASE);
    stream.start_time = 0;
    stream.width = 1920;
    stream.height = 1080;
    stream.language = Some("fre".to_string());
    stream
}

pub fn video_packets(stream: usize, count: usize) -> Vec<MockPacket> {
    (0..count as i64)
        .map(|i| MockPacket::new(stream, i * VIDEO_FRAME_TICKS, VIDEO_FRAME_TICKS))
        .collect()
}

pub fn audio_packets(stream: usize, count: usize) -> Vec<MockPacket> {
    (0..count as i64)
        .map(|i| MockPacket::new(stream, i * AUDIO_FRAME_SAMPLES, AUDIO_FRAME_SAMPLES))
        .collect()
}

// ── Script ─────────────────────────────────────────────────────────

/// Everything the mock engine does, decided up front.
#[derive(Debug, Clone)]
pub struct Script {
    pub streams: Vec<StreamDescriptor>,
    pub packets: Vec<MockPacket>,
    pub start_time: i64,
    pub fail_open_input: bool,
    pub read_error_at: Option<usize>,
    pub format_name: String,
    pub supported_codecs: BTreeSet<String>,
    pub codec_tags: BTreeMap<String, u32>,
    pub text_subtitle_codec: Option<String>,
    /// Time base the muxer imposes on every stream when writing the header.
    pub header_time_base: Option<Rational>,
    pub failing_writes: usize,
    pub encoders: Vec<EncoderSpec>,
    pub subtitle_encoders: BTreeSet<String>,
    pub audio_encoder_frame_size: u32,
    /// Frames each decoder holds back before releasing one, by stream.
    pub decoder_delay: BTreeMap<usize, usize>,
    /// Errors returned by a decoder's n-th `send_packet` (1-based), by stream.
    pub decode_errors: BTreeMap<(usize, usize), EngineError>,
    pub offer_hardware: bool,
    pub hardware_frames_fail: bool,
    pub hardware_device_fails: bool,
}

impl Script {
    /// A Matroska output with software H.264 and AAC encoders.
    pub fn new(streams: Vec<StreamDescriptor>) -> Self {
        Self {
            streams,
            packets: Vec::new(),
            start_time: 0,
            fail_open_input: false,
            read_error_at: None,
            format_name: "matroska".to_string(),
            supported_codecs: ["h264", "hevc", "aac", "opus", "subrip", "ass", "dvd_subtitle"]
                .into_iter()
                .map(String::from)
                .collect(),
            codec_tags: BTreeMap::new(),
            text_subtitle_codec: Some("ass".to_string()),
            header_time_base: None,
            failing_writes: 0,
            encoders: vec![
                encoder("libx264", "h264", &["yuv420p", "yuv444p", "nv12"], &[]),
                encoder("aac", "aac", &[], &["fltp"]),
            ],
            subtitle_encoders: ["subrip", "ass", "dvd_subtitle", "mov_text"]
                .into_iter()
                .map(String::from)
                .collect(),
            audio_encoder_frame_size: AUDIO_FRAME_SAMPLES as u32,
            decoder_delay: BTreeMap::new(),
            decode_errors: BTreeMap::new(),
            offer_hardware: true,
            hardware_frames_fail: false,
            hardware_device_fails: false,
        }
    }

    /// Merge packet lists into one file, ordered by presentation time.
    pub fn with_packets(mut self, groups: Vec<Vec<MockPacket>>) -> Self {
        let mut packets: Vec<MockPacket> = groups.into_iter().flatten().collect();
        let streams = self.streams.clone();
        packets.sort_by_key(|packet| {
            let time_base = streams
                .iter()
                .find(|stream| stream.index == packet.stream)
                .map_or(Rational::MICROSECONDS, |stream| stream.time_base);
            rescale(packet.pts, time_base, Rational::MICROSECONDS)
        });
        self.packets = packets;
        self
    }

    pub fn with_encoders(mut self, encoders: Vec<EncoderSpec>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn with_decoder_delay(mut self, stream: usize, frames: usize) -> Self {
        self.decoder_delay.insert(stream, frames);
        self
    }

    pub fn with_decode_error(mut self, stream: usize, send: usize, error: EngineError) -> Self {
        self.decode_errors.insert((stream, send), error);
        self
    }
}

pub fn encoder(
    name: &str,
    codec: &str,
    pixel_formats: &[&str],
    sample_formats: &[&str],
) -> EncoderSpec {
    EncoderSpec {
        name: name.to_string(),
        codec: codec.to_string(),
        pixel_formats: pixel_formats.iter().map(|format| pixel_format(format)).collect(),
        sample_formats: sample_formats.iter().map(|format| format.to_string()).collect(),
        wrapper: HardwareWrapper::from_encoder_name(name),
    }
}

fn pixel_format(name: &str) -> PixelFormat {
    match name {
        "cuda" | "vaapi" | "qsv" | "videotoolbox_vld" => PixelFormat::hardware(name),
        _ => PixelFormat::software(name),
    }
}

// ── Media units ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MockPacket {
    pub stream: usize,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub size: usize,
}

impl MockPacket {
    pub fn new(stream: usize, pts: i64, duration: i64) -> Self {
        Self {
            stream,
            pts,
            dts: pts,
            duration,
            size: 1_000,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

impl MediaPacket for MockPacket {
    fn empty() -> Self {
        Self {
            stream: 0,
            pts: NO_TIMESTAMP,
            dts: NO_TIMESTAMP,
            duration: 0,
            size: 0,
        }
    }

    fn stream_index(&self) -> usize {
        self.stream
    }

    fn set_stream_index(&mut self, index: usize) {
        self.stream = index;
    }

    fn pts(&self) -> i64 {
        self.pts
    }

    fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    fn dts(&self) -> i64 {
        self.dts
    }

    fn set_dts(&mut self, dts: i64) {
        self.dts = dts;
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    fn size(&self) -> usize {
        self.size
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockFrame {
    pub pts: i64,
    pub duration: i64,
    pub video: Option<VideoProperties>,
    pub audio: Option<AudioProperties>,
    pub picture_type_cleared: bool,
}

impl MediaFrame for MockFrame {
    fn empty() -> Self {
        Self {
            pts: NO_TIMESTAMP,
            duration: 0,
            video: None,
            audio: None,
            picture_type_cleared: false,
        }
    }

    fn pts(&self) -> i64 {
        self.pts
    }

    fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    fn clear_picture_type(&mut self) {
        self.picture_type_cleared = true;
    }

    fn video_properties(&self) -> Option<VideoProperties> {
        self.video.clone()
    }

    fn audio_properties(&self) -> Option<AudioProperties> {
        self.audio.clone()
    }

    fn transfer_to_system(&self, target: &mut Self) -> Result<(), EngineError> {
        let Some(video) = self.video.as_ref().filter(|video| video.pixel_format.hardware) else {
            return Err(EngineError::InvalidArgument);
        };

        *target = self.clone();
        target.video = Some(VideoProperties {
            pixel_format: PixelFormat::software("nv12"),
            ..video.clone()
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockSubtitle {
    pub pts: i64,
    pub duration: i64,
    pub rects: usize,
}

impl MediaSubtitle for MockSubtitle {
    fn empty() -> Self {
        Self {
            pts: NO_TIMESTAMP,
            duration: 0,
            rects: 0,
        }
    }

    fn pts(&self) -> i64 {
        self.pts
    }

    fn rect_count(&self) -> usize {
        self.rects
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockParameters {
    pub codec: String,
}

#[derive(Debug)]
pub struct MockDevice(pub HardwareDeviceType);

#[derive(Debug)]
pub struct MockFrames;

// ── Container ──────────────────────────────────────────────────────

pub struct MockDemuxer {
    streams: Vec<StreamDescriptor>,
    packets: Vec<MockPacket>,
    position: usize,
    enabled: BTreeSet<usize>,
    start_time: i64,
    read_error_at: Option<usize>,
    recorder: SharedRecorder,
}

impl MockDemuxer {
    fn time_us(&self, packet: &MockPacket) -> i64 {
        let time_base = self
            .streams
            .iter()
            .find(|stream| stream.index == packet.stream)
            .map_or(Rational::MICROSECONDS, |stream| stream.time_base);
        rescale(packet.pts, time_base, Rational::MICROSECONDS)
    }
}

impl Demuxer for MockDemuxer {
    type Packet = MockPacket;

    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn start_time(&self) -> i64 {
        self.start_time
    }

    fn is_enabled(&self, index: usize) -> bool {
        self.enabled.contains(&index)
    }

    fn set_enabled(&mut self, index: usize, enabled: bool) {
        if enabled {
            self.enabled.insert(index);
        } else {
            self.enabled.remove(&index);
        }
    }

    fn read_packet(&mut self, packet: &mut MockPacket) -> Result<(), EngineError> {
        loop {
            if self.read_error_at == Some(self.position) {
                return Err(EngineError::Other {
                    code: -5,
                    message: "Input/output error".to_string(),
                });
            }

            let Some(next) = self.packets.get(self.position) else {
                return Err(EngineError::Eof);
            };
            self.position += 1;

            if self.enabled.contains(&next.stream) {
                *packet = next.clone();
                return Ok(());
            }
        }
    }

    fn seek(&mut self, timestamp: i64) -> Result<(), EngineError> {
        self.recorder.borrow_mut().seeks.push(timestamp);
        self.position = self
            .packets
            .iter()
            .position(|packet| self.time_us(packet) >= timestamp)
            .unwrap_or(self.packets.len());
        Ok(())
    }
}

pub struct MockMuxer {
    format_name: String,
    supported_codecs: BTreeSet<String>,
    codec_tags: BTreeMap<String, u32>,
    text_subtitle_codec: Option<String>,
    header_time_base: Option<Rational>,
    time_bases: Vec<Rational>,
    failing_writes: usize,
    recorder: SharedRecorder,
}

impl Muxer for MockMuxer {
    type Packet = MockPacket;
    type Parameters = MockParameters;

    fn format_name(&self) -> &str {
        &self.format_name
    }

    fn requires_global_header(&self) -> bool {
        false
    }

    fn supports_codec(&self, codec: &str) -> bool {
        self.supported_codecs.contains(codec)
    }

    fn codec_tag(&self, codec: &str) -> Option<u32> {
        self.codec_tags.get(codec).copied()
    }

    fn best_text_subtitle_codec(&self) -> Option<String> {
        self.text_subtitle_codec.clone()
    }

    fn add_stream(
        &mut self,
        parameters: &MockParameters,
        time_base: Rational,
        codec_tag: Option<u32>,
        language: Option<&str>,
    ) -> Result<usize, EngineError> {
        let index = self.time_bases.len();
        self.time_bases.push(time_base);
        self.recorder.borrow_mut().events.push(Event::AddStream {
            index,
            codec: parameters.codec.clone(),
            time_base,
            codec_tag,
            language: language.map(String::from),
        });
        Ok(index)
    }

    fn avoid_negative_timestamps(&mut self) {
        self.recorder
            .borrow_mut()
            .events
            .push(Event::AvoidNegativeTimestamps);
    }

    fn write_header(&mut self, _options: &OptionMap) -> Result<(), EngineError> {
        if let Some(time_base) = self.header_time_base {
            for stream_time_base in &mut self.time_bases {
                *stream_time_base = time_base;
            }
        }
        self.recorder.borrow_mut().events.push(Event::Header);
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Rational {
        self.time_bases
            .get(index)
            .copied()
            .unwrap_or(Rational::MICROSECONDS)
    }

    fn write_interleaved(&mut self, packet: &mut MockPacket) -> Result<(), EngineError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(EngineError::Other {
                code: -32,
                message: "Broken pipe".to_string(),
            });
        }

        self.recorder.borrow_mut().events.push(Event::Packet {
            stream: packet.stream,
            pts: packet.pts,
            dts: packet.dts,
            duration: packet.duration,
        });
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), EngineError> {
        self.recorder.borrow_mut().events.push(Event::Trailer);
        Ok(())
    }
}

// ── Codecs ─────────────────────────────────────────────────────────

pub struct MockDecoder {
    stream: StreamDescriptor,
    delay: usize,
    queue: VecDeque<MockFrame>,
    eof: bool,
    sends: usize,
    errors: BTreeMap<usize, EngineError>,
    pixel_format: Option<PixelFormat>,
    hardware_software_format: Option<PixelFormat>,
    recorder: SharedRecorder,
}

impl MockDecoder {
    fn picture(&self) -> Option<VideoProperties> {
        if self.stream.kind != MediaKind::Video {
            return None;
        }
        Some(VideoProperties {
            width: self.stream.width,
            height: self.stream.height,
            pixel_format: self.pixel_format.clone()?,
            sample_aspect_ratio: self.stream.sample_aspect_ratio,
            color: self.stream.color,
        })
    }

    fn sound(&self, samples: u32) -> Option<AudioProperties> {
        if self.stream.kind != MediaKind::Audio {
            return None;
        }
        Some(AudioProperties {
            sample_format: self.stream.sample_format.clone()?,
            sample_rate: self.stream.sample_rate,
            channel_layout: self.stream.channel_layout,
            samples,
        })
    }
}

impl Decoder for MockDecoder {
    type Packet = MockPacket;
    type Frame = MockFrame;

    fn codec(&self) -> &str {
        &self.stream.codec
    }

    fn time_base(&self) -> Rational {
        self.stream.time_base
    }

    fn send_packet(&mut self, packet: &MockPacket) -> Result<(), EngineError> {
        self.sends += 1;
        *self
            .recorder
            .borrow_mut()
            .sends
            .entry(self.stream.index)
            .or_default() += 1;

        if let Some(error) = self.errors.get(&self.sends) {
            return Err(error.clone());
        }

        let frame = MockFrame {
            pts: packet.pts,
            duration: packet.duration,
            video: self.picture(),
            audio: self.sound(self.stream.frame_size),
            picture_type_cleared: false,
        };
        self.queue.push_back(frame);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), EngineError> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut MockFrame) -> Result<(), EngineError> {
        if self.queue.len() > self.delay || (self.eof && !self.queue.is_empty()) {
            if let Some(next) = self.queue.pop_front() {
                *frame = next;
                return Ok(());
            }
        }

        if self.eof {
            Err(EngineError::Eof)
        } else {
            Err(EngineError::TryAgain)
        }
    }

    fn video_properties(&self) -> Option<VideoProperties> {
        self.picture()
    }

    fn audio_properties(&self) -> Option<AudioProperties> {
        self.sound(0)
    }

    fn frame_size(&self) -> u32 {
        self.stream.frame_size
    }

    fn hardware_software_format(&self) -> Option<PixelFormat> {
        self.hardware_software_format.clone()
    }
}

pub struct MockEncoder {
    spec: EncoderSpec,
    time_base: Rational,
    frame_size: u32,
    pixel_format: Option<PixelFormat>,
    queue: VecDeque<MockPacket>,
    eof: bool,
    recorder: SharedRecorder,
}

impl Encoder for MockEncoder {
    type Packet = MockPacket;
    type Frame = MockFrame;
    type Parameters = MockParameters;

    fn spec(&self) -> &EncoderSpec {
        &self.spec
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn frame_size(&self) -> u32 {
        self.frame_size
    }

    fn send_frame(&mut self, frame: &MockFrame) -> Result<(), EngineError> {
        if let (Some(expected), Some(video)) = (&self.pixel_format, &frame.video) {
            if expected.name != video.pixel_format.name {
                return Err(EngineError::InvalidArgument);
            }
        }

        self.queue.push_back(MockPacket {
            stream: 0,
            pts: frame.pts,
            dts: frame.pts,
            duration: frame.duration,
            size: 100,
        });
        self.recorder.borrow_mut().frames_encoded += 1;
        Ok(())
    }

    fn send_eof(&mut self) -> Result<(), EngineError> {
        self.eof = true;
        Ok(())
    }

    fn receive_packet(&mut self, packet: &mut MockPacket) -> Result<(), EngineError> {
        match self.queue.pop_front() {
            Some(next) => {
                *packet = next;
                Ok(())
            }
            None if self.eof => Err(EngineError::Eof),
            None => Err(EngineError::TryAgain),
        }
    }

    fn parameters(&self) -> MockParameters {
        MockParameters {
            codec: self.spec.codec.clone(),
        }
    }
}

pub struct MockSubtitleDecoder {
    stream: StreamDescriptor,
}

impl SubtitleDecoder for MockSubtitleDecoder {
    type Packet = MockPacket;
    type Subtitle = MockSubtitle;

    fn codec(&self) -> &str {
        &self.stream.codec
    }

    fn is_text(&self) -> bool {
        matches!(
            self.stream.codec.as_str(),
            "subrip" | "ass" | "webvtt" | "mov_text" | "text"
        )
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.stream.width, self.stream.height)
    }

    fn decode(
        &mut self,
        packet: &MockPacket,
        subtitle: &mut MockSubtitle,
    ) -> Result<bool, EngineError> {
        let time_base = self.stream.time_base;
        *subtitle = MockSubtitle {
            pts: rescale(packet.pts, time_base, Rational::MICROSECONDS),
            duration: rescale(packet.duration, time_base, Rational::MICROSECONDS),
            rects: usize::from(packet.size > 0),
        };
        Ok(true)
    }
}

pub struct MockSubtitleEncoder {
    codec: String,
    time_base: Rational,
}

impl SubtitleEncoder for MockSubtitleEncoder {
    type Packet = MockPacket;
    type Subtitle = MockSubtitle;
    type Parameters = MockParameters;

    fn codec(&self) -> &str {
        &self.codec
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn encode(
        &mut self,
        subtitle: &MockSubtitle,
        packet: &mut MockPacket,
    ) -> Result<(), EngineError> {
        *packet = MockPacket {
            stream: 0,
            pts: subtitle.pts,
            dts: subtitle.pts,
            duration: subtitle.duration,
            size: 10,
        };
        Ok(())
    }

    fn parameters(&self) -> MockParameters {
        MockParameters {
            codec: self.codec.clone(),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct MockEngine {
    script: Script,
    recorder: SharedRecorder,
}

impl MockEngine {
    /// The engine and the recorder it writes to.
    pub fn new(script: Script) -> (Self, SharedRecorder) {
        let recorder = SharedRecorder::default();
        let engine = Self {
            script,
            recorder: Rc::clone(&recorder),
        };
        (engine, recorder)
    }
}

impl MediaEngine for MockEngine {
    type Packet = MockPacket;
    type Frame = MockFrame;
    type Subtitle = MockSubtitle;
    type Parameters = MockParameters;
    type HardwareDevice = MockDevice;
    type HardwareFrames = MockFrames;
    type Demuxer = MockDemuxer;
    type Muxer = MockMuxer;
    type Decoder = MockDecoder;
    type Encoder = MockEncoder;
    type SubtitleDecoder = MockSubtitleDecoder;
    type SubtitleEncoder = MockSubtitleEncoder;

    fn open_input(&mut self, uri: &str, _options: &OptionMap) -> Result<MockDemuxer, EngineError> {
        if self.script.fail_open_input {
            return Err(EngineError::NotFound(uri.to_string()));
        }

        Ok(MockDemuxer {
            streams: self.script.streams.clone(),
            packets: self.script.packets.clone(),
            position: 0,
            enabled: self.script.streams.iter().map(|stream| stream.index).collect(),
            start_time: self.script.start_time,
            read_error_at: self.script.read_error_at,
            recorder: Rc::clone(&self.recorder),
        })
    }

    fn open_output(&mut self, _uri: &str, format: Option<&str>) -> Result<MockMuxer, EngineError> {
        Ok(MockMuxer {
            format_name: format.unwrap_or(&self.script.format_name).to_string(),
            supported_codecs: self.script.supported_codecs.clone(),
            codec_tags: self.script.codec_tags.clone(),
            text_subtitle_codec: self.script.text_subtitle_codec.clone(),
            header_time_base: self.script.header_time_base,
            time_bases: Vec::new(),
            failing_writes: self.script.failing_writes,
            recorder: Rc::clone(&self.recorder),
        })
    }

    fn find_decoder(&self, stream: &StreamDescriptor) -> Option<DecoderSpec> {
        Some(DecoderSpec {
            name: stream.codec.clone(),
            codec: stream.codec.clone(),
        })
    }

    fn open_decoder(
        &mut self,
        _spec: &DecoderSpec,
        stream: &StreamDescriptor,
        config: DecoderConfig<MockDevice, MockFrames>,
    ) -> Result<MockDecoder, EngineError> {
        let software = stream.pixel_format.clone();
        let mut pixel_format = software.clone();
        let mut hardware_software_format = None;

        if let Some(mut negotiator) = config.hardware {
            let hardware = negotiator.hardware_format().clone();
            let mut offered: Vec<PixelFormat> = software.iter().cloned().collect();
            if self.script.offer_hardware {
                offered.insert(0, hardware);
            }

            let frames_fail = self.script.hardware_frames_fail;
            let fallback = software.clone().unwrap_or_else(|| PixelFormat::software("yuv420p"));
            let decision = negotiator.negotiate(
                &offered,
                || fallback,
                |_, _| {
                    if frames_fail {
                        Err(EngineError::OutOfMemory)
                    } else {
                        Ok(MockFrames)
                    }
                },
            );

            if negotiator.is_hardware() {
                hardware_software_format = Some(PixelFormat::software("nv12"));
            }
            pixel_format = Some(decision);
        }

        self.recorder.borrow_mut().decoders.push(OpenedDecoder {
            stream: stream.index,
            threads: config.threads,
            hardware: hardware_software_format.is_some(),
            extra_hardware_frames: config.extra_hardware_frames,
            allow_profile_mismatch: config.allow_profile_mismatch,
        });

        let errors = self
            .script
            .decode_errors
            .iter()
            .filter(|((index, _), _)| *index == stream.index)
            .map(|((_, send), error)| (*send, error.clone()))
            .collect();

        Ok(MockDecoder {
            stream: stream.clone(),
            delay: self.script.decoder_delay.get(&stream.index).copied().unwrap_or(0),
            queue: VecDeque::new(),
            eof: false,
            sends: 0,
            errors,
            pixel_format,
            hardware_software_format,
            recorder: Rc::clone(&self.recorder),
        })
    }

    fn find_encoders(&self, codec: &str, _kind: MediaKind) -> Vec<EncoderSpec> {
        self.script
            .encoders
            .iter()
            .filter(|spec| spec.codec == codec)
            .cloned()
            .collect()
    }

    fn open_encoder(
        &mut self,
        spec: &EncoderSpec,
        parameters: &EncoderParameters,
        _options: &OptionMap,
        _hardware_source: Option<&MockDecoder>,
    ) -> Result<MockEncoder, EngineError> {
        self.recorder
            .borrow_mut()
            .encoders
            .push((spec.name.clone(), parameters.clone()));

        let (frame_size, pixel_format) = match parameters {
            EncoderParameters::Video(video) => (0, Some(video.pixel_format.clone())),
            EncoderParameters::Audio(_) => (self.script.audio_encoder_frame_size, None),
        };

        Ok(MockEncoder {
            spec: spec.clone(),
            time_base: parameters.time_base(),
            frame_size,
            pixel_format,
            queue: VecDeque::new(),
            eof: false,
            recorder: Rc::clone(&self.recorder),
        })
    }

    fn open_subtitle_decoder(
        &mut self,
        _spec: &DecoderSpec,
        stream: &StreamDescriptor,
    ) -> Result<MockSubtitleDecoder, EngineError> {
        Ok(MockSubtitleDecoder {
            stream: stream.clone(),
        })
    }

    fn has_subtitle_encoder(&self, codec: &str) -> bool {
        self.script.subtitle_encoders.contains(codec)
    }

    fn open_subtitle_encoder(
        &mut self,
        codec: &str,
        parameters: &SubtitleEncoderParameters,
        _decoder: &MockSubtitleDecoder,
    ) -> Result<MockSubtitleEncoder, EngineError> {
        Ok(MockSubtitleEncoder {
            codec: codec.to_string(),
            time_base: parameters.time_base,
        })
    }

    fn create_hardware_device(
        &mut self,
        device_type: HardwareDeviceType,
    ) -> Result<MockDevice, EngineError> {
        if self.script.hardware_device_fails {
            return Err(EngineError::NotFound(device_type.name().to_string()));
        }
        Ok(MockDevice(device_type))
    }

    fn hardware_pixel_format(&self, device_type: HardwareDeviceType) -> Option<PixelFormat> {
        Some(PixelFormat::hardware(device_type.name()))
    }
}
