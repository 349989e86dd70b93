//! # transpipe
//!
//! Transcode a time window of a media file into a new container, stream by
//! stream, without letting one misbehaving stream take the whole run down.
//!
//! `transpipe` reads a container, re-encodes its audio, video, and subtitle
//! streams to the codecs the output accepts, and writes them interleaved.
//! The container header is only written once every encoder is configured;
//! packets produced before that are cached and replayed in arrival order.
//! Recoverable codec failures are charged to a retry budget instead of
//! aborting the run.
//!
//! Media work goes through the [`MediaEngine`] traits. With the `ffmpeg`
//! feature, [`FfmpegEngine`] implements them on top of
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next).
//!
//! ## Quick Start
//!
//! ### Transcode the first 30 seconds
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # fn main() -> Result<(), transpipe::TranscodeError> {
//! use transpipe::{FfmpegEngine, Pipeline, TranscodeOptions};
//!
//! let options = TranscodeOptions::new("input.mkv", "output.mkv");
//! let summary = Pipeline::new(FfmpegEngine::new()?, options).run()?;
//! println!("{} packets written, stopped: {}", summary.packets_muxed, summary.stop_reason);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "ffmpeg"))]
//! # fn main() {}
//! ```
//!
//! ### Seek, bound, and filter streams
//!
//! ```
//! use std::time::Duration;
//!
//! use transpipe::TranscodeOptions;
//!
//! let options = TranscodeOptions::new("input.mkv", "clip.mp4")
//!     .with_start_time(Duration::from_secs(120))
//!     .with_duration(Some(Duration::from_secs(15)))
//!     .with_excluded_streams([2, 3])
//!     .with_retries(10);
//! assert!(options.validate().is_ok());
//! ```
//!
//! ## Features
//!
//! - **Deferred header** — packets are cached until every stream's encoder
//!   is configured, then replayed in arrival order
//! - **Forced setup** — a bounded packet cache forces eager encoder setup
//!   from stream metadata when decoders are slow to produce samples
//! - **Monotonic timestamps** — per-stream rescaling keeps presentation
//!   timestamps strictly increasing
//! - **Duration ceiling** — output stops at a configurable length, subtitle
//!   cues are cut exactly at the boundary
//! - **Retry budget** — transient codec errors cost one retry, fatal ones
//!   end the run
//! - **Hardware decoding** — negotiated per decoder with silent fallback to
//!   software, and encoder filtering by vendor wrapper
//! - **Subtitle conversion** — PGS to DVD subtitles, text subtitles to the
//!   container's preferred text codec
//! - **Progress** — [`ProgressCallback`] snapshots of read, muxed, and
//!   cached packets
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | [`FfmpegEngine`] and the `transpipe-cli` binary |
//!
//! ## Requirements
//!
//! The `ffmpeg` feature needs the FFmpeg development libraries installed on
//! your system.

mod audio;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod hardware;
pub mod pipeline;
pub mod progress;
mod subtitle;
pub mod timestamp;
pub mod transcoder;
mod video;

pub use cache::{PacketCache, PacketHandle};
pub use config::{DEFAULT_DURATION, DEFAULT_MAX_CACHED_PACKETS, DEFAULT_RETRIES, TranscodeOptions};
pub use context::{RetryBudget, StopReason};
pub use engine::{
    AudioEncoderParameters, AudioProperties, ChannelLayout, ColorProperties, Decoder,
    DecoderConfig, DecoderSpec, Demuxer, Encoder, EncoderParameters, EncoderSpec, MediaEngine,
    MediaFrame, MediaKind, MediaPacket, MediaSubtitle, Muxer, OptionMap, PixelFormat,
    StreamDescriptor, SubtitleDecoder, SubtitleEncoder, SubtitleEncoderParameters,
    VideoEncoderParameters, VideoProperties,
};
pub use error::{EngineError, TranscodeError};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{
    FfmpegDecoder, FfmpegDemuxer, FfmpegEncoder, FfmpegEngine, FfmpegHardwareDevice,
    FfmpegHardwareFrames, FfmpegLogLevel, FfmpegMuxer, FfmpegSubtitle, FfmpegSubtitleDecoder,
    FfmpegSubtitleEncoder, get_ffmpeg_log_level, set_ffmpeg_log_level,
};
pub use hardware::{HardwareDeviceType, HardwareFrameSharing, HardwareNegotiator, HardwareWrapper};
pub use pipeline::{Pipeline, StreamSummary, TranscodeSummary};
pub use progress::{ProgressCallback, ProgressInfo};
pub use timestamp::{NO_TIMESTAMP, Rational, TimestampRescaler, format_timestamp, rescale};
pub use transcoder::TranscoderState;
