//! Error types for the `transpipe` crate.
//!
//! Two layers exist. [`EngineError`] is the discriminated result of every
//! media-engine call (decode, encode, demux, mux) and includes the
//! non-error signals `TryAgain` and `Eof` that drive the codec state
//! machines. [`TranscodeError`] is what a run returns when it cannot go on:
//! setup failures and hard stops. Recoverable engine failures never become
//! a `TranscodeError`; they are logged and charged to the run's retry
//! budget instead.

use std::{io::Error as IoError, path::PathBuf};

use thiserror::Error;

use crate::engine::MediaKind;

/// Result of a media-engine operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// No output is available yet; send more input first.
    #[error("Resource temporarily unavailable (try again)")]
    TryAgain,

    /// The codec or demuxer has been fully drained.
    #[error("End of stream")]
    Eof,

    /// The engine rejected an argument. Unrecoverable.
    #[error("Invalid argument")]
    InvalidArgument,

    /// The engine ran out of memory. Unrecoverable.
    #[error("Out of memory")]
    OutOfMemory,

    /// The requested codec, format, or device is not available.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other failure, with the engine's error code when known.
    #[error("{message} (code {code})")]
    Other {
        /// Engine-specific error code (negative errno for FFmpeg).
        code: i32,
        /// Human-readable description.
        message: String,
    },
}

impl EngineError {
    /// Build an [`EngineError::Other`] without a meaningful code.
    pub fn other(message: impl Into<String>) -> Self {
        EngineError::Other {
            code: 0,
            message: message.into(),
        }
    }

    /// Returns `true` for failures that must stop the whole run at once.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvalidArgument | EngineError::OutOfMemory)
    }
}

/// The error type returned when a transcoding run cannot continue.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TranscodeError {
    /// The input could not be opened.
    #[error("Failed to open input {path}: {reason}")]
    InputOpen {
        /// Path or URL passed as input.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The output container could not be created.
    #[error("Failed to open output {path}: {reason}")]
    OutputOpen {
        /// Path or URL passed as output.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// Neither an audio nor a video stream could be set up.
    #[error("No audio or video stream available for transcoding")]
    NoAudioVideo,

    /// A stream's decoder or encoder could not be set up.
    #[error("Setup failed for {kind} stream #{stream}: {reason}")]
    StreamSetup {
        /// Input stream index.
        stream: usize,
        /// Media kind of the stream.
        kind: MediaKind,
        /// What went wrong.
        reason: String,
    },

    /// The output container cannot carry the encoded codec.
    #[error("Codec {codec} of stream #{stream} is not supported by the output container")]
    UnsupportedOutputCodec {
        /// Input stream index.
        stream: usize,
        /// Codec name.
        codec: String,
    },

    /// The audio encoder expects a different number of samples per frame.
    /// Resampling is not performed.
    #[error("Audio stream #{stream}: encoder frame size {encoder} does not match decoded frame size {decoded}")]
    FrameSizeMismatch {
        /// Input stream index.
        stream: usize,
        /// Samples per frame expected by the encoder.
        encoder: u32,
        /// Samples per frame produced by the decoder.
        decoded: u32,
    },

    /// Seeking to the requested start offset failed.
    #[error("Seek failed: {0}")]
    Seek(EngineError),

    /// The container header could not be written.
    #[error("Failed to write container header: {0}")]
    Header(EngineError),

    /// The container trailer could not be written.
    #[error("Failed to write container trailer: {0}")]
    Trailer(EngineError),

    /// The supplied options are inconsistent.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// An engine failure with no more specific context.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl TranscodeError {
    pub(crate) fn setup(stream: usize, kind: MediaKind, reason: impl Into<String>) -> Self {
        TranscodeError::StreamSetup {
            stream,
            kind,
            reason: reason.into(),
        }
    }
}
