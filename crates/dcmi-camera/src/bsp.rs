//! Board support capabilities
//!
//! Pin setup, power sequencing, sensor register programming and capture
//! peripheral programming are board specific. The camera reaches them only
//! through these traits, supplied once at construction.

use crate::buffer::DmaTarget;
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::exposure::ExposureState;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by a board or sensor primitive
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {reason}")]
pub struct HardwareFault {
    pub operation: &'static str,
    pub reason: String,
}

impl HardwareFault {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

/// Power and pin primitives for the camera connector
pub trait BoardSupport: Send {
    fn init_pins(&mut self) -> Result<(), HardwareFault>;
    fn power_up(&mut self) -> Result<(), HardwareFault>;
    fn power_down(&mut self) -> Result<(), HardwareFault>;
}

/// Register-level control of a specific sensor part (SCCB/I2C)
pub trait SensorControl: Send {
    /// Soft reset; registers return to the sensor's own defaults
    fn reset(&mut self) -> Result<(), HardwareFault>;
    fn apply_config(&mut self, config: &CameraConfig) -> Result<(), HardwareFault>;
    fn apply_exposure(&mut self, exposure: &ExposureState) -> Result<(), HardwareFault>;
}

/// The parallel capture peripheral and its DMA stream
pub trait CaptureInterface: Send {
    /// Program the peripheral to transfer the next frame into `target`
    fn arm(&mut self, target: DmaTarget, config: &CameraConfig) -> Result<(), HardwareFault>;
    /// Stop the peripheral; the target region is no longer written
    fn disarm(&mut self);
}

/// Capabilities bundle handed to [`crate::Camera::new`]
pub struct Peripherals {
    pub board: Box<dyn BoardSupport>,
    pub sensor: Box<dyn SensorControl>,
    pub capture: Box<dyn CaptureInterface>,
}

impl Peripherals {
    pub fn new(
        board: impl BoardSupport + 'static,
        sensor: impl SensorControl + 'static,
        capture: impl CaptureInterface + 'static,
    ) -> Self {
        Self {
            board: Box::new(board),
            sensor: Box::new(sensor),
            capture: Box::new(capture),
        }
    }

    /// Pins, then power, then sensor reset. On failure after power-up the
    /// board is powered down again before the error is returned.
    pub(crate) fn bring_up(&mut self) -> Result<(), CameraError> {
        self.board.init_pins().map_err(bsp_failure)?;
        self.board.power_up().map_err(bsp_failure)?;
        debug!("Camera powered, resetting sensor");

        if let Err(fault) = self.sensor.reset() {
            self.shut_down_quietly();
            return Err(sensor_nak(fault));
        }
        Ok(())
    }

    pub(crate) fn shut_down(&mut self) -> Result<(), CameraError> {
        self.board.power_down().map_err(bsp_failure)
    }

    /// Power down on an error path; the original error wins.
    pub(crate) fn shut_down_quietly(&mut self) {
        if let Err(fault) = self.board.power_down() {
            warn!("Camera power down failed: {}", fault);
        }
    }

    pub(crate) fn reset_sensor(&mut self) -> Result<(), CameraError> {
        self.sensor.reset().map_err(sensor_nak)
    }

    pub(crate) fn commit_config(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        debug!("Committing sensor config: {:?}", config);
        self.sensor.apply_config(config).map_err(sensor_nak)
    }

    pub(crate) fn commit_exposure(&mut self, exposure: &ExposureState) -> Result<(), CameraError> {
        debug!("Committing exposure: {:?}", exposure);
        self.sensor.apply_exposure(exposure).map_err(sensor_nak)
    }

    pub(crate) fn arm_capture(
        &mut self,
        target: DmaTarget,
        config: &CameraConfig,
    ) -> Result<(), CameraError> {
        self.capture.arm(target, config).map_err(bsp_failure)
    }

    pub(crate) fn disarm_capture(&mut self) {
        self.capture.disarm();
    }
}

fn bsp_failure(fault: HardwareFault) -> CameraError {
    CameraError::BspInitFailure(fault.to_string())
}

fn sensor_nak(fault: HardwareFault) -> CameraError {
    CameraError::SensorNak(fault.to_string())
}
