//! Capture session: snapshot phase, then continuous phase

use crate::settings::{DemoSettings, ExposureSettings};
use crate::vsync::VsyncGenerator;
use dcmi_camera::mock::MockBoard;
use dcmi_camera::{
    AcquisitionState, Callback, Camera, CameraConfig, CameraError, CaptureMode, CaptureStats,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace};

/// How many frame intervals to wait for a frame before giving up
const FRAME_TIMEOUT_INTERVALS: u32 = 10;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No frame within {0:?}")]
    FrameTimeout(Duration),

    #[error(transparent)]
    Camera(#[from] CameraError),
}

/// One snapshot as seen by the consumer
#[derive(Debug, Clone, Serialize)]
pub struct FrameSummary {
    pub sequence: u64,
    pub words: usize,
    /// Wrapping sum of the frame words
    pub checksum: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub config: CameraConfig,
    pub snapshots: Vec<FrameSummary>,
    pub continuous_frames: u64,
    pub dma_notifications: u64,
    pub stats: CaptureStats,
}

/// Run both phases against a simulated board
pub async fn run(settings: &DemoSettings) -> Result<SessionSummary, SessionError> {
    let board = MockBoard::new();
    let camera = Arc::new(match settings.buffer_words {
        Some(words) => Camera::with_capacity(board.peripherals(), words),
        None => Camera::new(board.peripherals()),
    });

    let (frame_tx, mut frame_rx) = mpsc::channel::<()>(16);
    let dma_count = Arc::new(AtomicU64::new(0));
    let dma_seen = dma_count.clone();
    let on_frame = Callback::new(move || {
        notify_consumer(&frame_tx);
    });
    let on_dma = Callback::new(move || {
        dma_seen.fetch_add(1, Ordering::Relaxed);
    });

    camera.init(Some(on_frame), Some(on_dma))?;
    camera.set_config(CameraConfig {
        mode: CaptureMode::Snapshot,
        ..settings.camera
    })?;
    apply_exposure(&camera, settings.exposure)?;

    let interval = settings.camera.framerate.frame_interval();
    let frame_timeout = interval * FRAME_TIMEOUT_INTERVALS;
    let mut vsync = VsyncGenerator::spawn(camera.clone(), interval);

    info!("Taking {} snapshots", settings.snapshots);
    let mut snapshots = Vec::with_capacity(settings.snapshots as usize);
    for _ in 0..settings.snapshots {
        arm_snapshot(&camera).await?;
        wait_frame(&mut frame_rx, frame_timeout).await?;

        let summary = {
            let view = camera.acquire_for_read()?;
            FrameSummary {
                sequence: view.sequence(),
                words: view.words().len(),
                checksum: view.words().iter().fold(0u32, |acc, w| acc.wrapping_add(*w)),
            }
        };
        camera.release()?;
        debug!("Snapshot {:?}", summary);
        snapshots.push(summary);
    }

    let mut continuous_frames = 0;
    if settings.continuous_ms > 0 {
        info!("Continuous capture for {} ms", settings.continuous_ms);
        wait_for_idle(&camera, frame_timeout).await?;
        camera.set_mode(CaptureMode::Continuous)?;

        let deadline = Instant::now() + Duration::from_millis(settings.continuous_ms);
        while let Ok(Some(())) = tokio::time::timeout_at(deadline, frame_rx.recv()).await {
            continuous_frames += 1;
        }

        // Takes effect at the next frame boundary
        camera.set_mode(CaptureMode::Snapshot)?;
    }

    wait_for_idle(&camera, frame_timeout).await?;
    vsync.stop();
    info!("Simulated hardware produced {} frames", vsync.frames());
    camera.power_down()?;

    Ok(SessionSummary {
        config: camera.config(),
        snapshots,
        continuous_frames,
        dma_notifications: dma_count.load(Ordering::Relaxed),
        stats: camera.stats(),
    })
}

/// Never blocks the interrupt context. Returns false when the notification
/// was not queued: a full queue means the consumer is behind and the
/// notification is coalesced.
fn notify_consumer(tx: &mpsc::Sender<()>) -> bool {
    match tx.try_send(()) {
        Ok(()) => true,
        Err(TrySendError::Full(())) => {
            trace!("Frame notification coalesced");
            false
        }
        Err(TrySendError::Closed(())) => {
            trace!("Frame consumer gone");
            false
        }
    }
}

/// Step the exposure controls until they reach the targets (or clamp)
fn apply_exposure(camera: &Camera, target: ExposureSettings) -> Result<(), CameraError> {
    let target = dcmi_camera::ExposureState::new(target.brightness, target.contrast, target.night_mode);
    while camera.exposure().brightness() < target.brightness() {
        camera.increase_brightness()?;
    }
    while camera.exposure().brightness() > target.brightness() {
        camera.decrease_brightness()?;
    }
    while camera.exposure().contrast() < target.contrast() {
        camera.increase_contrast()?;
    }
    while camera.exposure().contrast() > target.contrast() {
        camera.decrease_contrast()?;
    }
    camera.set_night_mode(target.night_mode())
}

/// The frame handler fires just before the camera returns to idle, so a
/// snapshot request can briefly race the tail of the previous frame.
async fn arm_snapshot(camera: &Camera) -> Result<(), CameraError> {
    loop {
        match camera.take_snapshot() {
            Err(CameraError::CaptureInProgress) => sleep(Duration::from_millis(1)).await,
            other => return other,
        }
    }
}

async fn wait_frame(rx: &mut mpsc::Receiver<()>, limit: Duration) -> Result<(), SessionError> {
    match timeout(limit, rx.recv()).await {
        Ok(Some(())) => Ok(()),
        _ => Err(SessionError::FrameTimeout(limit)),
    }
}

async fn wait_for_idle(camera: &Camera, limit: Duration) -> Result<(), SessionError> {
    let poll = async {
        while camera.state() != AcquisitionState::Idle {
            sleep(Duration::from_millis(1)).await;
        }
    };
    timeout(limit, poll)
        .await
        .map_err(|_| SessionError::FrameTimeout(limit))
}
