//! Transcoding configuration.
//!
//! [`TranscodeOptions`] is a builder carrying everything a run needs:
//! input and output locations, the time window, stream selection, codec
//! overrides, hardware settings, and per-component option dictionaries
//! that are forwarded verbatim to the media engine.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use transpipe::TranscodeOptions;
//!
//! let options = TranscodeOptions::new("input.mkv", "output.mp4")
//!     .with_start_time(Duration::from_secs(2))
//!     .with_duration(Some(Duration::from_secs(5)))
//!     .with_excluded_streams([2])
//!     .with_video_codec("h264");
//!
//! assert!(options.validate().is_ok());
//! ```

use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::OptionMap;
use crate::error::TranscodeError;
use crate::hardware::{HardwareDeviceType, HardwareFrameSharing, HardwareWrapper};
use crate::progress::{NoOpProgress, ProgressCallback};

/// Default duration ceiling.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);
/// Default retry budget.
pub const DEFAULT_RETRIES: u32 = 50;
/// Default number of cached packets that forces encoder setup.
pub const DEFAULT_MAX_CACHED_PACKETS: usize = 50;

/// Settings for one transcoding run.
///
/// Every field has a default except the input and output locations.
/// Fields are read by the pipeline; use the `with_*` methods to change
/// them.
#[derive(Clone)]
pub struct TranscodeOptions {
    pub(crate) input: String,
    pub(crate) output: String,
    pub(crate) output_format: Option<String>,
    pub(crate) start_time: Duration,
    pub(crate) duration: Option<Duration>,
    pub(crate) retries: u32,
    pub(crate) max_cached_packets: usize,
    pub(crate) streaming: bool,
    pub(crate) include_streams: Option<BTreeSet<usize>>,
    pub(crate) exclude_streams: Option<BTreeSet<usize>>,
    pub(crate) video_codec: Option<String>,
    pub(crate) audio_codec: Option<String>,
    pub(crate) hardware_device: Option<HardwareDeviceType>,
    pub(crate) hardware_wrappers: Vec<HardwareWrapper>,
    pub(crate) hardware_frame_sharing: HardwareFrameSharing,
    pub(crate) thumbnail_codecs: Vec<String>,
    pub(crate) demuxer_options: OptionMap,
    pub(crate) muxer_options: OptionMap,
    pub(crate) video_decoder_options: OptionMap,
    pub(crate) video_encoder_options: OptionMap,
    pub(crate) audio_decoder_options: OptionMap,
    pub(crate) audio_encoder_options: OptionMap,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) batch_size: u64,
}

impl Debug for TranscodeOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("TranscodeOptions")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("output_format", &self.output_format)
            .field("start_time", &self.start_time)
            .field("duration", &self.duration)
            .field("retries", &self.retries)
            .field("max_cached_packets", &self.max_cached_packets)
            .field("streaming", &self.streaming)
            .field("include_streams", &self.include_streams)
            .field("exclude_streams", &self.exclude_streams)
            .field("video_codec", &self.video_codec)
            .field("audio_codec", &self.audio_codec)
            .field("hardware_device", &self.hardware_device)
            .field("hardware_wrappers", &self.hardware_wrappers)
            .field("hardware_frame_sharing", &self.hardware_frame_sharing)
            .field("thumbnail_codecs", &self.thumbnail_codecs)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl TranscodeOptions {
    /// Options reading `input` and writing `output` with every default.
    ///
    /// Defaults: no seek, a 30 second duration ceiling, 50 retries, 50
    /// cached packets before encoders are forced, no pacing, every stream,
    /// source codecs, software decoding, and the `mjpeg` thumbnail codec.
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            output_format: None,
            start_time: Duration::ZERO,
            duration: Some(DEFAULT_DURATION),
            retries: DEFAULT_RETRIES,
            max_cached_packets: DEFAULT_MAX_CACHED_PACKETS,
            streaming: false,
            include_streams: None,
            exclude_streams: None,
            video_codec: None,
            audio_codec: None,
            hardware_device: None,
            hardware_wrappers: HardwareWrapper::DEFAULT_ALLOWED.to_vec(),
            hardware_frame_sharing: HardwareFrameSharing::default(),
            thumbnail_codecs: vec!["mjpeg".to_string()],
            demuxer_options: OptionMap::new(),
            muxer_options: OptionMap::new(),
            video_decoder_options: OptionMap::new(),
            video_encoder_options: OptionMap::new(),
            audio_decoder_options: OptionMap::new(),
            audio_encoder_options: OptionMap::new(),
            progress: Arc::new(NoOpProgress),
            batch_size: 1,
        }
    }

    /// Force the output container format instead of guessing it from the
    /// output name.
    #[must_use]
    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    /// Seek this far past the container start before transcoding.
    #[must_use]
    pub fn with_start_time(mut self, start: Duration) -> Self {
        self.start_time = start;
        self
    }

    /// Stop once this much has been muxed per stream. `None` removes the
    /// ceiling.
    ///
    /// The ceiling is per stream; when video starts later than audio the
    /// output grows by the difference.
    #[must_use]
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Number of recoverable failures tolerated before the run stops.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Packets cached before the header is written that force every
    /// waiting encoder to be set up from stream metadata.
    #[must_use]
    pub fn with_max_cached_packets(mut self, packets: usize) -> Self {
        self.max_cached_packets = packets;
        self
    }

    /// Pace the run to real time once the output is being written.
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Transcode only these input streams.
    #[must_use]
    pub fn with_included_streams(mut self, streams: impl IntoIterator<Item = usize>) -> Self {
        self.include_streams = Some(streams.into_iter().collect());
        self
    }

    /// Skip these input streams.
    #[must_use]
    pub fn with_excluded_streams(mut self, streams: impl IntoIterator<Item = usize>) -> Self {
        self.exclude_streams = Some(streams.into_iter().collect());
        self
    }

    /// Encode video to `codec` instead of the source codec.
    #[must_use]
    pub fn with_video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = Some(codec.into());
        self
    }

    /// Encode audio to `codec` instead of the source codec.
    #[must_use]
    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    /// Decode video on a hardware device.
    #[must_use]
    pub fn with_hardware_device(mut self, device: HardwareDeviceType) -> Self {
        self.hardware_device = Some(device);
        self
    }

    /// Encoder wrappers that may be chosen for video.
    #[must_use]
    pub fn with_hardware_wrappers(
        mut self,
        wrappers: impl IntoIterator<Item = HardwareWrapper>,
    ) -> Self {
        self.hardware_wrappers = wrappers.into_iter().collect();
        self
    }

    /// Whether video encoders reuse the decoder's hardware frame pool.
    #[must_use]
    pub fn with_hardware_frame_sharing(mut self, sharing: HardwareFrameSharing) -> Self {
        self.hardware_frame_sharing = sharing;
        self
    }

    /// Codecs treated as cover art: once only these streams remain
    /// enabled, the run ends.
    #[must_use]
    pub fn with_thumbnail_codecs(
        mut self,
        codecs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.thumbnail_codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    /// Options passed when opening the input.
    #[must_use]
    pub fn with_demuxer_options(mut self, options: OptionMap) -> Self {
        self.demuxer_options = options;
        self
    }

    /// Options passed when writing the container header.
    #[must_use]
    pub fn with_muxer_options(mut self, options: OptionMap) -> Self {
        self.muxer_options = options;
        self
    }

    /// Options passed to video decoders.
    #[must_use]
    pub fn with_video_decoder_options(mut self, options: OptionMap) -> Self {
        self.video_decoder_options = options;
        self
    }

    /// Options passed to video encoders.
    #[must_use]
    pub fn with_video_encoder_options(mut self, options: OptionMap) -> Self {
        self.video_encoder_options = options;
        self
    }

    /// Options passed to audio decoders.
    #[must_use]
    pub fn with_audio_decoder_options(mut self, options: OptionMap) -> Self {
        self.audio_decoder_options = options;
        self
    }

    /// Options passed to audio encoders.
    #[must_use]
    pub fn with_audio_encoder_options(mut self, options: OptionMap) -> Self {
        self.audio_encoder_options = options;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Set how often the progress callback fires.
    ///
    /// A value of 1 means after every read packet; 10 means every 10th.
    /// Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Input path or URL.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Output path or URL.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Seek offset past the container start.
    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    /// Duration ceiling, if any.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Retry budget.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Check the options for inconsistencies.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError::InvalidOptions`] when a location is empty,
    /// the retry budget is zero, the duration ceiling is zero, or a stream
    /// is both included and excluded.
    pub fn validate(&self) -> Result<(), TranscodeError> {
        if self.input.trim().is_empty() {
            return Err(TranscodeError::InvalidOptions("input location is empty".to_string()));
        }
        if self.output.trim().is_empty() {
            return Err(TranscodeError::InvalidOptions("output location is empty".to_string()));
        }
        if self.retries == 0 {
            return Err(TranscodeError::InvalidOptions("retry budget must be positive".to_string()));
        }
        if self.duration.is_some_and(|duration| duration.is_zero()) {
            return Err(TranscodeError::InvalidOptions(
                "duration ceiling must be positive (use no limit instead)".to_string(),
            ));
        }
        if let (Some(include), Some(exclude)) = (&self.include_streams, &self.exclude_streams) {
            if let Some(index) = include.intersection(exclude).next() {
                return Err(TranscodeError::InvalidOptions(format!(
                    "stream #{index} is both included and excluded"
                )));
            }
        }
        Ok(())
    }

    /// Whether the stream at `index` passes the include/exclude filters.
    pub(crate) fn selects(&self, index: usize) -> bool {
        let included = self
            .include_streams
            .as_ref()
            .is_none_or(|streams| streams.contains(&index));
        let excluded = self
            .exclude_streams
            .as_ref()
            .is_some_and(|streams| streams.contains(&index));
        included && !excluded
    }

    pub(crate) fn start_time_us(&self) -> i64 {
        i64::try_from(self.start_time.as_micros()).unwrap_or(i64::MAX)
    }

    pub(crate) fn duration_us(&self) -> Option<i64> {
        self.duration
            .map(|duration| i64::try_from(duration.as_micros()).unwrap_or(i64::MAX))
    }
}

