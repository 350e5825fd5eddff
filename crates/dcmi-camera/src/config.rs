//! Sensor configuration and the staging store

use crate::error::CameraError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pixel format produced by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Colorspace {
    #[default]
    Rgb565 = 0,
    Rgb555 = 1,
    /// YUV 4:2:2, interleaved
    Yuv = 2,
}

impl Colorspace {
    pub const ALL: [Colorspace; 3] = [Colorspace::Rgb565, Colorspace::Rgb555, Colorspace::Yuv];

    /// Bytes transferred per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Colorspace::Rgb565 | Colorspace::Rgb555 | Colorspace::Yuv => 2,
        }
    }
}

impl TryFrom<u8> for Colorspace {
    type Error = CameraError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Colorspace::Rgb565),
            1 => Ok(Colorspace::Rgb555),
            2 => Ok(Colorspace::Yuv),
            _ => Err(CameraError::InvalidConfigValue { field: "colorspace", value }),
        }
    }
}

/// Acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CaptureMode {
    /// One frame per explicit trigger
    #[default]
    Snapshot = 0,
    /// Back-to-back frames without per-frame triggering
    Continuous = 1,
}

impl CaptureMode {
    pub const ALL: [CaptureMode; 2] = [CaptureMode::Snapshot, CaptureMode::Continuous];
}

impl TryFrom<u8> for CaptureMode {
    type Error = CameraError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CaptureMode::Snapshot),
            1 => Ok(CaptureMode::Continuous),
            _ => Err(CameraError::InvalidConfigValue { field: "mode", value }),
        }
    }
}

/// Output resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Resolution {
    /// 640x480
    #[default]
    Vga = 0,
    /// 320x240
    Qvga = 1,
    /// 160x120
    Qqvga = 2,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Vga, Resolution::Qvga, Resolution::Qqvga];

    /// Width and height in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Vga => (640, 480),
            Resolution::Qvga => (320, 240),
            Resolution::Qqvga => (160, 120),
        }
    }

    pub fn pixels(&self) -> usize {
        let (w, h) = self.dimensions();
        (w * h) as usize
    }
}

impl TryFrom<u8> for Resolution {
    type Error = CameraError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Resolution::Vga),
            1 => Ok(Resolution::Qvga),
            2 => Ok(Resolution::Qqvga),
            _ => Err(CameraError::InvalidConfigValue { field: "resolution", value }),
        }
    }
}

/// Sensor frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Framerate {
    #[default]
    Fps15 = 0,
    Fps30 = 1,
}

impl Framerate {
    pub const ALL: [Framerate; 2] = [Framerate::Fps15, Framerate::Fps30];

    pub fn fps(&self) -> u32 {
        match self {
            Framerate::Fps15 => 15,
            Framerate::Fps30 => 30,
        }
    }

    /// Time between two start-of-frame signals
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps() as u64)
    }
}

impl TryFrom<u8> for Framerate {
    type Error = CameraError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Framerate::Fps15),
            1 => Ok(Framerate::Fps30),
            _ => Err(CameraError::InvalidConfigValue { field: "framerate", value }),
        }
    }
}

/// Parallel bus width sampled by the capture peripheral per pixel clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DataWidth {
    #[default]
    Bits8 = 0,
    Bits10 = 1,
    Bits12 = 2,
    Bits14 = 3,
}

impl DataWidth {
    pub const ALL: [DataWidth; 4] = [
        DataWidth::Bits8,
        DataWidth::Bits10,
        DataWidth::Bits12,
        DataWidth::Bits14,
    ];

    pub fn bits(&self) -> u8 {
        match self {
            DataWidth::Bits8 => 8,
            DataWidth::Bits10 => 10,
            DataWidth::Bits12 => 12,
            DataWidth::Bits14 => 14,
        }
    }
}

impl TryFrom<u8> for DataWidth {
    type Error = CameraError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataWidth::Bits8),
            1 => Ok(DataWidth::Bits10),
            2 => Ok(DataWidth::Bits12),
            3 => Ok(DataWidth::Bits14),
            _ => Err(CameraError::InvalidConfigValue { field: "data_width", value }),
        }
    }
}

/// Complete sensor configuration
///
/// The default is the power-on configuration: RGB565, snapshot, VGA, 15 fps
/// on an 8-bit bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub colorspace: Colorspace,
    pub mode: CaptureMode,
    pub resolution: Resolution,
    pub framerate: Framerate,
    /// Capture bus width, programmed into the peripheral on arm
    pub data_width: DataWidth,
}

impl CameraConfig {
    /// Size of one frame in bytes
    pub fn frame_bytes(&self) -> usize {
        self.resolution.pixels() * self.colorspace.bytes_per_pixel()
    }

    /// Size of one frame in 32-bit DMA words, rounded up
    pub fn frame_words(&self) -> usize {
        self.frame_bytes().div_ceil(4)
    }
}

/// Holds the current configuration plus changes that arrived mid-capture.
///
/// `committed` mirrors what the sensor last acknowledged; `None` after a
/// reset, when the sensor is back at its own register defaults.
#[derive(Debug, Default)]
pub(crate) struct ConfigStore {
    current: CameraConfig,
    staged: Option<CameraConfig>,
    committed: Option<CameraConfig>,
}

impl ConfigStore {
    pub fn current(&self) -> CameraConfig {
        self.current
    }

    /// Configuration the next frame boundary will produce
    pub fn pending(&self) -> CameraConfig {
        self.staged.unwrap_or(self.current)
    }

    /// Stage a change. When `apply_now` is set it becomes current immediately.
    pub fn stage(&mut self, apply_now: bool, update: impl FnOnce(&mut CameraConfig)) {
        let mut next = self.pending();
        update(&mut next);
        if apply_now {
            self.current = next;
            self.staged = None;
        } else {
            self.staged = Some(next);
        }
    }

    /// Fold queued changes into the current configuration as one unit.
    /// Returns true if anything changed.
    pub fn fold_staged(&mut self) -> bool {
        match self.staged.take() {
            Some(next) if next != self.current => {
                self.current = next;
                true
            }
            _ => false,
        }
    }

    pub fn needs_commit(&self) -> bool {
        self.committed != Some(self.current)
    }

    pub fn mark_committed(&mut self) {
        self.committed = Some(self.current);
    }

    pub fn invalidate_commit(&mut self) {
        self.committed = None;
    }

    pub fn restore_defaults(&mut self) {
        *self = Self::default();
    }
}
