//! Frame acquisition state machine
//!
//! ```text
//!  UNINITIALIZED ──init()──> IDLE ──take_snapshot()──> ARMED ──on_frame_start()──> CAPTURING
//!        ▲                    ▲ │ (continuous: automatic)                           │
//!        │                    │ └───────────────────────────────┐                   │ on_transfer_complete()
//!        └──power_down()──────┤                                  ▼                   ▼
//!                             └──────── snapshot ───────── FRAME_READY <─────────────┘
//!                                                              │ continuous: re-arm
//! ```
//!
//! API calls and interrupt entry points contend for one short critical
//! section. Callbacks always run with the lock released.

use crate::bsp::Peripherals;
use crate::buffer::{BufferManager, FrameInfo, ReadView, WriteLease};
use crate::config::{
    CameraConfig, CaptureMode, Colorspace, ConfigStore, DataWidth, Framerate, Resolution,
};
use crate::dispatch::{Callback, Dispatcher};
use crate::error::{CameraError, Result};
use crate::exposure::ExposureState;
use crate::metric;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of the acquisition state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    Uninitialized,
    Idle,
    /// Capture peripheral programmed, waiting for start of frame
    Armed,
    /// DMA transfer in flight
    Capturing,
    /// Frame complete, callbacks running or re-arm deferred
    FrameReady,
}

/// Counters accumulated over the camera's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub frames_captured: u64,
    /// Frames overwritten before they were released
    pub frames_dropped: u64,
    /// Events with no handler registered
    pub callbacks_dropped: u64,
    pub spurious_interrupts: u64,
    pub sensor_commits: u64,
}

struct Machine {
    state: AcquisitionState,
    peripherals: Peripherals,
    store: ConfigStore,
    exposure: ExposureState,
    exposure_committed: bool,
    /// Held from arm until the transfer completes
    lease: Option<WriteLease>,
    /// Configuration the armed frame was programmed with
    armed: CameraConfig,
    /// Continuous re-arm waiting for the consumer's release
    parked: bool,
    fault: Option<CameraError>,
    dispatcher: Arc<Dispatcher>,
    sequence: u64,
    stats: CaptureStats,
}

impl Machine {
    fn ensure_ready(&self) -> Result<()> {
        if self.state == AcquisitionState::Uninitialized {
            return Err(self.fault.clone().unwrap_or(CameraError::NotInitialized));
        }
        Ok(())
    }
}

/// Camera sensor behind a DCMI-style capture peripheral
///
/// Share it between the API context and the interrupt context, e.g. in an
/// `Arc`. If the hardware never raises transfer-complete the camera stays in
/// `Capturing`; no timeout is applied at this layer.
pub struct Camera {
    machine: Mutex<Machine>,
    buffer: BufferManager,
}

impl Camera {
    /// Camera with a buffer sized for the largest supported frame
    pub fn new(peripherals: Peripherals) -> Self {
        Self::with_buffer(peripherals, BufferManager::with_default_capacity())
    }

    /// Camera with a capture buffer of `words` 32-bit words
    pub fn with_capacity(peripherals: Peripherals, words: usize) -> Self {
        Self::with_buffer(peripherals, BufferManager::new(words))
    }

    fn with_buffer(peripherals: Peripherals, buffer: BufferManager) -> Self {
        Self {
            machine: Mutex::new(Machine {
                state: AcquisitionState::Uninitialized,
                peripherals,
                store: ConfigStore::default(),
                exposure: ExposureState::default(),
                exposure_committed: false,
                lease: None,
                armed: CameraConfig::default(),
                parked: false,
                fault: None,
                dispatcher: Arc::new(Dispatcher::default()),
                sequence: 0,
                stats: CaptureStats::default(),
            }),
            buffer,
        }
    }

    /// Power the sensor up and register the completion handlers.
    ///
    /// Configuration and exposure return to power-on defaults. Calling it on
    /// a running camera cycles power first.
    pub fn init(&self, on_frame: Option<Callback>, on_dma: Option<Callback>) -> Result<()> {
        let mut m = self.machine();
        match m.state {
            AcquisitionState::Uninitialized => {}
            AcquisitionState::Capturing => return Err(CameraError::CaptureInProgress),
            _ => {
                info!("Re-initializing camera, cycling power");
                self.teardown(&mut m)?;
            }
        }

        self.buffer.discard();
        m.store.restore_defaults();
        m.exposure = ExposureState::default();
        m.exposure_committed = false;
        m.parked = false;
        m.fault = None;

        if let Err(e) = m.peripherals.bring_up() {
            error!("Camera initialization failed: {}", e);
            m.fault = Some(e.clone());
            return Err(e);
        }

        let dropped = m.dispatcher.dropped();
        m.stats.callbacks_dropped += dropped;
        m.dispatcher = Arc::new(Dispatcher::new(on_frame, on_dma));
        m.state = AcquisitionState::Idle;
        info!("Camera initialized: {:?}", m.store.current());
        Ok(())
    }

    /// Re-issue the sensor reset. Only allowed while idle.
    pub fn reset(&self) -> Result<()> {
        let mut m = self.machine();
        m.ensure_ready()?;
        if m.state != AcquisitionState::Idle {
            return Err(CameraError::CaptureInProgress);
        }
        if let Err(e) = m.peripherals.reset_sensor() {
            return Err(self.fail(&mut m, e));
        }
        m.store.invalidate_commit();
        m.exposure_committed = false;
        info!("Sensor reset");
        Ok(())
    }

    /// Disarm and power the sensor down. Not possible while a transfer is
    /// in flight: there is no way to cancel one.
    pub fn power_down(&self) -> Result<()> {
        let mut m = self.machine();
        m.ensure_ready()?;
        self.teardown(&mut m)?;
        info!("Camera powered down");
        Ok(())
    }

    pub fn set_framerate(&self, framerate: Framerate) -> Result<()> {
        self.configure(|c| c.framerate = framerate)
    }

    pub fn set_color(&self, colorspace: Colorspace) -> Result<()> {
        self.configure(|c| c.colorspace = colorspace)
    }

    pub fn set_resolution(&self, resolution: Resolution) -> Result<()> {
        self.configure(|c| c.resolution = resolution)
    }

    pub fn set_data_width(&self, data_width: DataWidth) -> Result<()> {
        self.configure(|c| c.data_width = data_width)
    }

    /// Switching an idle camera to continuous mode starts acquisition.
    pub fn set_mode(&self, mode: CaptureMode) -> Result<()> {
        self.configure(|c| c.mode = mode)
    }

    /// Apply a whole configuration as one staged change
    pub fn set_config(&self, config: CameraConfig) -> Result<()> {
        self.configure(|c| *c = config)
    }

    pub fn set_night_mode(&self, level: u8) -> Result<()> {
        self.adjust(|e| e.set_night_mode(level))
    }

    pub fn increase_brightness(&self) -> Result<()> {
        self.adjust(ExposureState::increase_brightness)
    }

    pub fn decrease_brightness(&self) -> Result<()> {
        self.adjust(ExposureState::decrease_brightness)
    }

    pub fn increase_contrast(&self) -> Result<()> {
        self.adjust(ExposureState::increase_contrast)
    }

    pub fn decrease_contrast(&self) -> Result<()> {
        self.adjust(ExposureState::decrease_contrast)
    }

    /// Arm the capture peripheral for one frame. Rejected, never queued,
    /// unless the camera is idle.
    pub fn take_snapshot(&self) -> Result<()> {
        let mut m = self.machine();
        m.ensure_ready()?;
        if m.state != AcquisitionState::Idle {
            return Err(CameraError::CaptureInProgress);
        }
        self.arm(&mut m)
    }

    /// Borrow the most recent completed frame
    pub fn acquire_for_read(&self) -> Result<ReadView<'_>> {
        self.machine().ensure_ready()?;
        self.buffer.acquire_for_read()
    }

    /// Hand the frame back. In continuous mode a deferred re-arm happens here.
    pub fn release(&self) -> Result<()> {
        let mut m = self.machine();
        m.ensure_ready()?;
        self.buffer.release()?;
        if m.parked && m.state == AcquisitionState::FrameReady {
            m.parked = false;
            debug!("Frame released, resuming continuous capture");
            return self.enter_idle(&mut m);
        }
        Ok(())
    }

    /// Start-of-frame (VSYNC) from the capture peripheral.
    /// Returns false if the camera was not armed.
    pub fn on_frame_start(&self) -> bool {
        let mut m = self.machine();
        if m.state != AcquisitionState::Armed {
            Self::spurious(&mut m, "frame start");
            return false;
        }
        m.state = AcquisitionState::Capturing;
        trace!("Frame {} capturing", m.sequence + 1);
        true
    }

    /// Transfer-complete from the DMA engine after `words` words were written.
    ///
    /// Fires the DMA handler, publishes the frame, fires the frame handler,
    /// then goes idle (snapshot) or re-arms (continuous).
    pub fn on_transfer_complete(&self, words: usize) -> Result<()> {
        let (dispatcher, lease, frame) = {
            let mut m = self.machine();
            if m.state != AcquisitionState::Capturing {
                Self::spurious(&mut m, "transfer complete");
                return Ok(());
            }
            m.sequence = m.sequence.wrapping_add(1);
            m.state = AcquisitionState::FrameReady;
            m.stats.frames_captured += 1;
            metrics::counter!(metric::FRAMES_CAPTURED).increment(1);

            let frame = FrameInfo {
                sequence: m.sequence,
                resolution: m.armed.resolution,
                colorspace: m.armed.colorspace,
                words: words.min(m.armed.frame_words()),
            };
            (m.dispatcher.clone(), m.lease.take(), frame)
        };

        dispatcher.notify_dma(frame.sequence);
        if let Some(lease) = lease {
            if self.buffer.mark_complete(lease, frame).is_err() {
                debug!("Frame {} discarded before publication", frame.sequence);
                return Ok(());
            }
        }
        dispatcher.notify_frame(frame.sequence);

        let mut m = self.machine();
        // A handler may have powered the camera down or re-initialized it.
        if m.state != AcquisitionState::FrameReady || m.sequence != frame.sequence {
            return Ok(());
        }
        // In continuous mode the frame handler was the consumer's turn; a
        // view still alive keeps the frame and parks the re-arm.
        if m.store.pending().mode == CaptureMode::Continuous {
            if let Err(e) = self.buffer.release() {
                trace!("Frame {} kept past handler: {}", frame.sequence, e);
            }
        }
        self.enter_idle(&mut m)
    }

    /// Software access to the DMA target while armed or capturing
    pub fn with_dma_target<R>(&self, write: impl FnOnce(&mut [u32]) -> R) -> Result<R> {
        let m = self.machine();
        m.ensure_ready()?;
        match &m.lease {
            Some(lease) => self.buffer.with_dma_target(lease, write),
            None => Err(CameraError::BufferBusy),
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.machine().state
    }

    /// Configuration in effect for the current or next frame
    pub fn config(&self) -> CameraConfig {
        self.machine().store.current()
    }

    /// Configuration after queued changes fold in
    pub fn pending_config(&self) -> CameraConfig {
        self.machine().store.pending()
    }

    pub fn exposure(&self) -> ExposureState {
        self.machine().exposure
    }

    /// Error that ended the last session, if any
    pub fn fault(&self) -> Option<CameraError> {
        self.machine().fault.clone()
    }

    pub fn buffer(&self) -> &BufferManager {
        &self.buffer
    }

    pub fn stats(&self) -> CaptureStats {
        let m = self.machine();
        CaptureStats {
            frames_dropped: self.buffer.dropped_frames(),
            callbacks_dropped: m.stats.callbacks_dropped + m.dispatcher.dropped(),
            ..m.stats
        }
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn configure(&self, update: impl FnOnce(&mut CameraConfig)) -> Result<()> {
        let mut m = self.machine();
        m.ensure_ready()?;
        let idle = m.state == AcquisitionState::Idle;
        m.store.stage(idle, update);
        if idle {
            debug!("Config applied: {:?}", m.store.current());
            if m.store.current().mode == CaptureMode::Continuous {
                return self.enter_idle(&mut m);
            }
        } else {
            debug!("Config queued until frame boundary: {:?}", m.store.pending());
        }
        Ok(())
    }

    fn adjust(&self, change: impl FnOnce(&mut ExposureState) -> bool) -> Result<()> {
        let mut m = self.machine();
        m.ensure_ready()?;
        if change(&mut m.exposure) {
            m.exposure_committed = false;
            debug!("Exposure adjusted: {:?}", m.exposure);
        }
        Ok(())
    }

    /// Frame boundary: fold queued config, then idle or re-arm by mode
    fn enter_idle(&self, m: &mut Machine) -> Result<()> {
        m.store.fold_staged();
        m.state = AcquisitionState::Idle;
        if m.store.current().mode != CaptureMode::Continuous {
            return Ok(());
        }
        match self.arm(m) {
            Err(CameraError::BufferBusy) => {
                m.state = AcquisitionState::FrameReady;
                m.parked = true;
                debug!("Frame {} still being read, re-arm deferred", m.sequence);
                Ok(())
            }
            other => other,
        }
    }

    /// Commit configuration and lend the buffer to the capture peripheral
    fn arm(&self, m: &mut Machine) -> Result<()> {
        m.store.fold_staged();
        let config = m.store.current();
        let words = config.frame_words();
        if words > self.buffer.capacity() {
            return Err(CameraError::FrameTooLarge {
                required: words,
                capacity: self.buffer.capacity(),
            });
        }

        let lease = self.buffer.acquire_for_write()?;
        if let Err(e) = self.program(m, &lease, &config, words) {
            self.buffer.abandon(lease);
            return Err(if e.is_fatal() { self.fail(m, e) } else { e });
        }

        m.lease = Some(lease);
        m.armed = config;
        m.state = AcquisitionState::Armed;
        debug!("Armed frame {} ({} words)", m.sequence + 1, words);
        Ok(())
    }

    fn program(
        &self,
        m: &mut Machine,
        lease: &WriteLease,
        config: &CameraConfig,
        words: usize,
    ) -> Result<()> {
        if m.store.needs_commit() {
            m.peripherals.commit_config(config)?;
            m.store.mark_committed();
            m.stats.sensor_commits += 1;
            metrics::counter!(metric::SENSOR_COMMITS).increment(1);
        }
        if !m.exposure_committed {
            m.peripherals.commit_exposure(&m.exposure)?;
            m.exposure_committed = true;
        }
        let target = self.buffer.dma_target(lease, words)?;
        m.peripherals.arm_capture(target, config)
    }

    /// Leave any initialized, non-capturing state for UNINITIALIZED
    fn teardown(&self, m: &mut Machine) -> Result<()> {
        match m.state {
            AcquisitionState::Capturing => return Err(CameraError::CaptureInProgress),
            AcquisitionState::Armed => m.peripherals.disarm_capture(),
            _ => {}
        }
        m.lease = None;
        m.parked = false;
        self.buffer.discard();
        m.state = AcquisitionState::Uninitialized;

        if let Err(e) = m.peripherals.shut_down() {
            error!("Camera power down failed: {}", e);
            m.fault = Some(e.clone());
            return Err(e);
        }
        Ok(())
    }

    /// End the session on a fatal error; later calls fail with the same error
    fn fail(&self, m: &mut Machine, e: CameraError) -> CameraError {
        error!("Camera session failed: {}", e);
        if m.state == AcquisitionState::Armed || m.state == AcquisitionState::Capturing {
            m.peripherals.disarm_capture();
        }
        m.lease = None;
        m.parked = false;
        self.buffer.discard();
        m.peripherals.shut_down_quietly();
        m.state = AcquisitionState::Uninitialized;
        m.fault = Some(e.clone());
        e
    }

    fn spurious(m: &mut Machine, event: &str) {
        m.stats.spurious_interrupts += 1;
        metrics::counter!(metric::SPURIOUS_INTERRUPTS).increment(1);
        warn!("Spurious {} interrupt in state {:?}", event, m.state);
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let m = self.machine();
        f.debug_struct("Camera")
            .field("state", &m.state)
            .field("config", &m.store.current())
            .field("exposure", &m.exposure)
            .field("buffer", &self.buffer)
            .finish()
    }
}
