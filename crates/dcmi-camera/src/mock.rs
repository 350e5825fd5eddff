//! Mock board for testing without hardware
//!
//! [`MockBoard`] implements every board capability, records each call and
//! can be told to fail. Clones share one call log, so a test keeps a handle
//! while the camera owns the others.

use crate::bsp::{BoardSupport, CaptureInterface, HardwareFault, Peripherals, SensorControl};
use crate::buffer::DmaTarget;
use crate::camera::Camera;
use crate::config::CameraConfig;
use crate::error::Result;
use crate::exposure::ExposureState;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// One recorded board interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardCall {
    InitPins,
    PowerUp,
    PowerDown,
    SensorReset,
    ApplyConfig(CameraConfig),
    ApplyExposure(ExposureState),
    /// Capture armed for this many words
    Arm(CameraConfig, usize),
    Disarm,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<BoardCall>,
    fail_init_pins: bool,
    fail_power_up: bool,
    nak_sensor: bool,
    fail_arm: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MockBoard {
    state: Arc<Mutex<MockState>>,
}

impl MockBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capability bundle backed by this board
    pub fn peripherals(&self) -> Peripherals {
        Peripherals::new(self.clone(), self.clone(), self.clone())
    }

    /// Camera wired to this board
    pub fn camera(&self) -> Camera {
        Camera::new(self.peripherals())
    }

    pub fn fail_init_pins(&self, fail: bool) {
        self.state().fail_init_pins = fail;
    }

    pub fn fail_power_up(&self, fail: bool) {
        self.state().fail_power_up = fail;
    }

    /// Sensor stops acknowledging register writes
    pub fn nak_sensor(&self, nak: bool) {
        self.state().nak_sensor = nak;
    }

    pub fn fail_arm(&self, fail: bool) {
        self.state().fail_arm = fail;
    }

    pub fn calls(&self) -> Vec<BoardCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&BoardCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| matches(*c)).count()
    }

    /// Configuration most recently written to the sensor
    pub fn last_config(&self) -> Option<CameraConfig> {
        self.state().calls.iter().rev().find_map(|c| match c {
            BoardCall::ApplyConfig(config) => Some(*config),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: BoardCall) {
        debug!("Mock board: {:?}", call);
        self.state().calls.push(call);
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sensor_result(&self, operation: &'static str) -> std::result::Result<(), HardwareFault> {
        if self.state().nak_sensor {
            Err(HardwareFault::new(operation, "no ACK from sensor"))
        } else {
            Ok(())
        }
    }
}

impl BoardSupport for MockBoard {
    fn init_pins(&mut self) -> std::result::Result<(), HardwareFault> {
        self.record(BoardCall::InitPins);
        if self.state().fail_init_pins {
            return Err(HardwareFault::new("init_pins", "GPIO bank unavailable"));
        }
        Ok(())
    }

    fn power_up(&mut self) -> std::result::Result<(), HardwareFault> {
        self.record(BoardCall::PowerUp);
        if self.state().fail_power_up {
            return Err(HardwareFault::new("power_up", "regulator fault"));
        }
        Ok(())
    }

    fn power_down(&mut self) -> std::result::Result<(), HardwareFault> {
        self.record(BoardCall::PowerDown);
        Ok(())
    }
}

impl SensorControl for MockBoard {
    fn reset(&mut self) -> std::result::Result<(), HardwareFault> {
        self.record(BoardCall::SensorReset);
        self.sensor_result("reset")
    }

    fn apply_config(&mut self, config: &CameraConfig) -> std::result::Result<(), HardwareFault> {
        self.sensor_result("apply_config")?;
        self.record(BoardCall::ApplyConfig(*config));
        Ok(())
    }

    fn apply_exposure(&mut self, exposure: &ExposureState) -> std::result::Result<(), HardwareFault> {
        self.sensor_result("apply_exposure")?;
        self.record(BoardCall::ApplyExposure(*exposure));
        Ok(())
    }
}

impl CaptureInterface for MockBoard {
    fn arm(&mut self, target: DmaTarget, config: &CameraConfig) -> std::result::Result<(), HardwareFault> {
        if self.state().fail_arm {
            return Err(HardwareFault::new("arm", "DMA stream busy"));
        }
        self.record(BoardCall::Arm(*config, target.words));
        Ok(())
    }

    fn disarm(&mut self) {
        self.record(BoardCall::Disarm);
    }
}

/// Play the hardware side of one frame: start of frame, fill the DMA target
/// with `pattern` plus the word index, transfer complete.
///
/// Returns false when the camera was not armed.
pub fn run_frame(camera: &Camera, pattern: u32) -> Result<bool> {
    if !camera.on_frame_start() {
        return Ok(false);
    }
    let words = camera.config().frame_words();
    let written = camera.with_dma_target(|target| {
        let len = words.min(target.len());
        for (i, word) in target[..len].iter_mut().enumerate() {
            *word = pattern.wrapping_add(i as u32);
        }
        len
    })?;
    camera.on_transfer_complete(written)?;
    Ok(true)
}
