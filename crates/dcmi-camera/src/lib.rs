//! DCMI Camera Capture
//!
//! Control and data-capture interface for a camera sensor attached to a
//! parallel capture peripheral. Provides:
//! - Sensor configuration staging (resolution, color format, frame rate, mode,
//!   bus width)
//! - Clamped exposure adjustment (brightness, contrast, night mode)
//! - A single capture buffer with write-lease / read-view discipline
//! - The frame acquisition state machine driven by API calls and interrupts
//! - Exactly-once frame and DMA completion callbacks

mod bsp;
mod buffer;
mod camera;
mod config;
mod dispatch;
mod error;
mod exposure;
pub mod mock;

pub use bsp::{BoardSupport, CaptureInterface, HardwareFault, Peripherals, SensorControl};
pub use buffer::{
    BufferManager, BufferState, DmaTarget, FrameInfo, ReadView, WriteLease, CAPTURE_BUFFER_WORDS,
};
pub use camera::{AcquisitionState, Camera, CaptureStats};
pub use config::{CameraConfig, CaptureMode, Colorspace, DataWidth, Framerate, Resolution};
pub use dispatch::{Callback, Dispatcher};
pub use error::{CameraError, Result};
pub use exposure::ExposureState;

/// Metric names recorded through the `metrics` facade
pub mod metric {
    /// Frames completed by the DMA engine
    pub const FRAMES_CAPTURED: &str = "dcmi_frames_captured_total";
    /// Completed frames overwritten before anyone read them
    pub const FRAMES_DROPPED: &str = "dcmi_frames_dropped_total";
    /// Events raised with no handler registered
    pub const CALLBACKS_DROPPED: &str = "dcmi_callbacks_dropped_total";
    /// Interrupts received in a state that does not expect them
    pub const SPURIOUS_INTERRUPTS: &str = "dcmi_spurious_interrupts_total";
    /// Configuration writes acknowledged by the sensor
    pub const SENSOR_COMMITS: &str = "dcmi_sensor_commits_total";
}
