//! Simulated capture hardware
//!
//! A background thread plays the sensor and DMA engine: every frame
//! interval it raises start-of-frame, writes a test pattern into the lent
//! buffer and raises transfer-complete.

use dcmi_camera::Camera;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

pub struct VsyncGenerator {
    shutdown: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl VsyncGenerator {
    /// Start raising frame signals every `interval`
    pub fn spawn(camera: Arc<Camera>, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));
        let (shutdown_clone, frames_clone) = (shutdown.clone(), frames.clone());

        let handle = std::thread::spawn(move || {
            debug!("Vsync generator running every {:?}", interval);
            while !shutdown_clone.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                if !camera.on_frame_start() {
                    continue;
                }

                let seed = frames_clone.fetch_add(1, Ordering::SeqCst) as u32;
                let words = camera.config().frame_words();
                let written = match camera.with_dma_target(|target| fill_pattern(target, words, seed)) {
                    Ok(written) => written,
                    Err(e) => {
                        warn!("DMA target unavailable: {}", e);
                        0
                    }
                };
                if let Err(e) = camera.on_transfer_complete(written) {
                    warn!("Transfer complete handling failed: {}", e);
                }
            }
            debug!("Vsync generator stopped");
        });

        Self {
            shutdown,
            frames,
            handle: Some(handle),
        }
    }

    /// Frames transferred so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Vsync generator thread panicked");
            }
        }
    }
}

impl Drop for VsyncGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Horizontal gradient keyed by `seed`; returns the words written
fn fill_pattern(target: &mut [u32], words: usize, seed: u32) -> usize {
    let len = words.min(target.len());
    for (i, word) in target[..len].iter_mut().enumerate() {
        *word = seed.rotate_left(16) ^ (i as u32);
    }
    len
}
