//! Hardware-accelerated video decoding.
//!
//! This module provides [`HardwareDeviceType`] for selecting a decode
//! device, [`HardwareWrapper`] for classifying encoders by GPU vendor (so a
//! run can allow-list or block vendors), and [`HardwareNegotiator`], which
//! the decoder consults during pixel-format negotiation to either commit to
//! a hardware frame pool or fall back to software decoding.
//!
//! # Platform Support
//!
//! Hardware acceleration availability depends on both the engine build and
//! the host system's GPU drivers. When the decoder does not offer the
//! device's pixel format, decoding silently falls back to software.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::engine::PixelFormat;
use crate::error::EngineError;

/// Supported hardware device types for accelerated decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareDeviceType {
    /// NVIDIA CUDA (Linux, Windows).
    Cuda,
    /// Video Acceleration API (Linux).
    Vaapi,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 Video Acceleration (Windows).
    D3d11va,
    /// Direct3D 12 Video Acceleration (Windows).
    D3d12va,
    /// Apple VideoToolbox (macOS, iOS).
    VideoToolbox,
    /// Intel Quick Sync Video (cross-platform).
    Qsv,
}

impl HardwareDeviceType {
    /// Lower-case device name as used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            HardwareDeviceType::Cuda => "cuda",
            HardwareDeviceType::Vaapi => "vaapi",
            HardwareDeviceType::Dxva2 => "dxva2",
            HardwareDeviceType::D3d11va => "d3d11va",
            HardwareDeviceType::D3d12va => "d3d12va",
            HardwareDeviceType::VideoToolbox => "videotoolbox",
            HardwareDeviceType::Qsv => "qsv",
        }
    }
}

impl Display for HardwareDeviceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for HardwareDeviceType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cuda" => Ok(HardwareDeviceType::Cuda),
            "vaapi" => Ok(HardwareDeviceType::Vaapi),
            "dxva2" => Ok(HardwareDeviceType::Dxva2),
            "d3d11va" => Ok(HardwareDeviceType::D3d11va),
            "d3d12va" => Ok(HardwareDeviceType::D3d12va),
            "videotoolbox" => Ok(HardwareDeviceType::VideoToolbox),
            "qsv" => Ok(HardwareDeviceType::Qsv),
            other => Err(format!("unsupported hardware device: {other}")),
        }
    }
}

/// The vendor wrapper an encoder implementation belongs to.
///
/// The device actually used by a hardware context cannot be queried, so
/// runs filter encoders by wrapper instead (e.g. to keep a vendor's
/// encoders out when decoding happens on another vendor's GPU).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareWrapper {
    /// Plain software encoder.
    None,
    /// NVENC / CUVID.
    Nvidia,
    /// Quick Sync.
    Intel,
    /// AMF.
    Amd,
    /// Direct3D 12.
    D3d12,
    /// Media Foundation.
    MediaFoundation,
    /// VideoToolbox.
    VideoToolbox,
    /// VA-API.
    Vaapi,
    /// Any other hardware wrapper (V4L2, Vulkan, MediaCodec, ...).
    Other,
}

impl HardwareWrapper {
    /// The wrappers allowed by default.
    pub const DEFAULT_ALLOWED: [HardwareWrapper; 4] = [
        HardwareWrapper::None,
        HardwareWrapper::Other,
        HardwareWrapper::D3d12,
        HardwareWrapper::Nvidia,
    ];

    /// Classify an encoder by its implementation name suffix.
    pub fn from_encoder_name(name: &str) -> Self {
        let Some((_, suffix)) = name.rsplit_once('_') else {
            return HardwareWrapper::None;
        };

        match suffix {
            "nvenc" | "cuvid" => HardwareWrapper::Nvidia,
            "qsv" => HardwareWrapper::Intel,
            "amf" => HardwareWrapper::Amd,
            "d3d12va" => HardwareWrapper::D3d12,
            "mf" => HardwareWrapper::MediaFoundation,
            "videotoolbox" => HardwareWrapper::VideoToolbox,
            "vaapi" => HardwareWrapper::Vaapi,
            "v4l2m2m" | "vulkan" | "mediacodec" | "omx" | "rkmpp" | "oh" => HardwareWrapper::Other,
            _ => HardwareWrapper::None,
        }
    }
}

impl FromStr for HardwareWrapper {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "none" | "software" | "sw" => Ok(HardwareWrapper::None),
            "nvidia" | "nvenc" => Ok(HardwareWrapper::Nvidia),
            "intel" | "qsv" => Ok(HardwareWrapper::Intel),
            "amd" | "amf" => Ok(HardwareWrapper::Amd),
            "d3d12" => Ok(HardwareWrapper::D3d12),
            "mf" | "mediafoundation" => Ok(HardwareWrapper::MediaFoundation),
            "videotoolbox" => Ok(HardwareWrapper::VideoToolbox),
            "vaapi" => Ok(HardwareWrapper::Vaapi),
            "other" => Ok(HardwareWrapper::Other),
            other => Err(format!("unsupported hardware wrapper: {other}")),
        }
    }
}

/// Whether a video encoder reuses the decoder's hardware frame pool.
///
/// Sharing the decoder's pool is what a zero-copy GPU transcode needs, but
/// the pool is then referenced by two codec contexts at once. `Separate`
/// keeps the encoder off it; the engine gives the encoder no pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwareFrameSharing {
    /// Attach the decoder's frame pool to the encoder (unless frames are
    /// downloaded to system memory).
    #[default]
    ShareDecoderFrames,
    /// Never attach the decoder's pool to the encoder.
    Separate,
}

/// Pixel-format negotiation for a hardware-accelerated decoder.
///
/// The decoder calls [`negotiate`](HardwareNegotiator::negotiate) with the
/// formats it is willing to output. If the device's format is among them,
/// the frame pool is built lazily on the first call and the hardware format
/// is chosen. Otherwise the device and any pool are released and the
/// decoder's default software format is used. The decision is taken once
/// and replayed on later calls.
pub struct HardwareNegotiator<D, F> {
    tag: String,
    hardware_format: PixelFormat,
    device: Option<D>,
    frames: Option<F>,
    decision: Option<PixelFormat>,
}

impl<D, F> HardwareNegotiator<D, F> {
    /// Create a negotiator for `device`, whose decoders output
    /// `hardware_format`. `tag` prefixes diagnostics.
    pub fn new(tag: impl Into<String>, device: D, hardware_format: PixelFormat) -> Self {
        Self {
            tag: tag.into(),
            hardware_format,
            device: Some(device),
            frames: None,
            decision: None,
        }
    }

    /// Choose the decoder's output format.
    ///
    /// `software_default` is the decoder's own pick among `offered`;
    /// `init_frames` builds the frame pool from the device.
    pub fn negotiate<S, I>(
        &mut self,
        offered: &[PixelFormat],
        software_default: S,
        init_frames: I,
    ) -> PixelFormat
    where
        S: FnOnce() -> PixelFormat,
        I: FnOnce(&D, &PixelFormat) -> Result<F, EngineError>,
    {
        if let Some(decision) = &self.decision {
            return decision.clone();
        }

        let offered_hardware = offered
            .iter()
            .any(|format| format.name == self.hardware_format.name);
        if offered_hardware && self.frames.is_none() {
            if let Some(device) = &self.device {
                match init_frames(device, &self.hardware_format) {
                    Ok(frames) => self.frames = Some(frames),
                    Err(error) => {
                        log::warn!(
                            "{} Hardware frame pool for {} could not be created ({error})",
                            self.tag,
                            self.hardware_format
                        );
                    }
                }
            }
        }

        let decision = if offered_hardware && self.frames.is_some() {
            log::info!("{} Hardware decoding with {}", self.tag, self.hardware_format);
            self.hardware_format.clone()
        } else {
            let software = software_default();
            log::info!(
                "{} Hardware decoding with {} failed. Falling back to software decoding with {}.",
                self.tag,
                self.hardware_format,
                software
            );
            self.device = None;
            self.frames = None;
            software
        };

        self.decision = Some(decision.clone());
        decision
    }

    /// The format chosen by the first negotiation, if any happened yet.
    pub fn decision(&self) -> Option<&PixelFormat> {
        self.decision.as_ref()
    }

    /// Returns `true` once hardware decoding has been committed to.
    pub fn is_hardware(&self) -> bool {
        self.decision.as_ref().is_some_and(|format| format.hardware) && self.frames.is_some()
    }

    /// The device-memory format this negotiator asks for.
    pub fn hardware_format(&self) -> &PixelFormat {
        &self.hardware_format
    }

    /// The hardware device, until a fallback releases it.
    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// The frame pool bound to the decoder, once built.
    pub fn frames(&self) -> Option<&F> {
        self.frames.as_ref()
    }
}
