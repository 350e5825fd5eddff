//! Capture buffer ownership
//!
//! One fixed region of 32-bit words is shared between the DMA engine and
//! frame consumers. Access follows a strict discipline:
//!
//! ```text
//!   EMPTY ──acquire_for_write()──> WRITE_LOCKED ──mark_complete()──> READY
//!     ▲                                 ▲                              │
//!     │                                 └──acquire_for_write()─────────┤ (unread frame dropped)
//!     └──────────────release()──────────── READING(n) <─acquire_for_read()
//! ```
//!
//! At most one writer or one set of readers exists at any time. The write
//! side is a move-only [`WriteLease`]; a frame becomes readable only once the
//! lease has been handed back through [`BufferManager::mark_complete`].

use crate::config::{Colorspace, Resolution};
use crate::error::{CameraError, Result};
use std::sync::{
    Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};
use tracing::{debug, trace, warn};

/// Default capacity: VGA at 2 bytes per pixel, the largest supported frame
pub const CAPTURE_BUFFER_WORDS: usize = 640 * 480 * 2 / 4;

/// Externally visible buffer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Writable, no frame pending
    Empty,
    /// Lent to the DMA engine
    WriteLocked,
    /// Holds a completed frame nobody is reading
    Ready,
    /// Completed frame with this many live read views
    Reading(usize),
}

/// Metadata of a completed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Monotonic frame counter, starting at 1
    pub sequence: u64,
    pub resolution: Resolution,
    pub colorspace: Colorspace,
    /// Number of valid words at the start of the buffer
    pub words: usize,
}

/// Exclusive right to have the buffer written. Not `Clone`: there is one
/// writer, and it gives the lease back to publish the frame.
#[derive(Debug, PartialEq, Eq)]
pub struct WriteLease {
    generation: u64,
}

/// Memory region handed to a DMA controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTarget {
    /// Start address of the region
    pub address: usize,
    /// Words the transfer may write
    pub words: usize,
}

#[derive(Debug, Default)]
struct LeaseTable {
    writer: Option<u64>,
    next_generation: u64,
    readers: usize,
    frame: Option<FrameInfo>,
    dropped: u64,
}

/// Owner of the single capture region
pub struct BufferManager {
    storage: RwLock<Box<[u32]>>,
    leases: Mutex<LeaseTable>,
    capacity: usize,
}

impl BufferManager {
    /// Allocate a zeroed buffer of `capacity` words
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: RwLock::new(vec![0u32; capacity].into_boxed_slice()),
            leases: Mutex::new(LeaseTable::default()),
            capacity,
        }
    }

    /// Buffer sized for the largest supported frame
    pub fn with_default_capacity() -> Self {
        Self::new(CAPTURE_BUFFER_WORDS)
    }

    /// Capacity in words
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> BufferState {
        let leases = self.leases();
        if leases.writer.is_some() {
            BufferState::WriteLocked
        } else if leases.readers > 0 {
            BufferState::Reading(leases.readers)
        } else if leases.frame.is_some() {
            BufferState::Ready
        } else {
            BufferState::Empty
        }
    }

    /// Completed frames overwritten before anyone read them
    pub fn dropped_frames(&self) -> u64 {
        self.leases().dropped
    }

    /// Take the write side. Fails with `BufferBusy` while a write is in
    /// flight or any read view is alive. An unread frame is discarded.
    pub fn acquire_for_write(&self) -> Result<WriteLease> {
        let mut leases = self.leases();
        if leases.writer.is_some() || leases.readers > 0 {
            return Err(CameraError::BufferBusy);
        }
        if let Some(unread) = leases.frame.take() {
            leases.dropped += 1;
            debug!("Overwriting unread frame {}", unread.sequence);
            metrics::counter!(crate::metric::FRAMES_DROPPED).increment(1);
        }

        leases.next_generation += 1;
        let generation = leases.next_generation;
        leases.writer = Some(generation);
        trace!("Buffer write-locked (lease {})", generation);
        Ok(WriteLease { generation })
    }

    /// Describe the leased region for a DMA controller, limited to `words`
    pub fn dma_target(&self, lease: &WriteLease, words: usize) -> Result<DmaTarget> {
        self.check_lease(lease)?;
        if words > self.capacity {
            return Err(CameraError::FrameTooLarge {
                required: words,
                capacity: self.capacity,
            });
        }
        let mut storage = self.write_storage()?;
        Ok(DmaTarget {
            address: storage[..].as_mut_ptr() as usize,
            words,
        })
    }

    /// Write into the leased region from software (simulated DMA, tests)
    pub fn with_dma_target<R>(
        &self,
        lease: &WriteLease,
        write: impl FnOnce(&mut [u32]) -> R,
    ) -> Result<R> {
        self.check_lease(lease)?;
        let mut storage = self.write_storage()?;
        Ok(write(&mut storage[..]))
    }

    /// Downgrade the write lease: the frame becomes readable
    pub fn mark_complete(&self, lease: WriteLease, mut info: FrameInfo) -> Result<()> {
        let mut leases = self.leases();
        if leases.writer != Some(lease.generation) {
            warn!("Stale write lease {} completed", lease.generation);
            return Err(CameraError::BufferBusy);
        }
        info.words = info.words.min(self.capacity);
        leases.writer = None;
        leases.frame = Some(info);
        trace!("Frame {} ready ({} words)", info.sequence, info.words);
        Ok(())
    }

    /// Give the lease back without publishing a frame (arming failed)
    pub fn abandon(&self, lease: WriteLease) {
        let mut leases = self.leases();
        if leases.writer == Some(lease.generation) {
            leases.writer = None;
        }
    }

    /// Borrow the completed frame. Several views may coexist.
    pub fn acquire_for_read(&self) -> Result<ReadView<'_>> {
        let mut leases = self.leases();
        let info = match (leases.writer, leases.frame) {
            (None, Some(info)) => info,
            _ => return Err(CameraError::NoFrameReady),
        };
        let guard = match self.storage.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(CameraError::BufferBusy),
        };
        leases.readers += 1;
        Ok(ReadView {
            guard: Some(guard),
            manager: self,
            info,
        })
    }

    /// Return the buffer to the writable pool, discarding the frame.
    /// Every read view must have been dropped first.
    pub fn release(&self) -> Result<()> {
        let mut leases = self.leases();
        if leases.writer.is_some() || leases.readers > 0 {
            return Err(CameraError::BufferBusy);
        }
        match leases.frame.take() {
            Some(info) => {
                trace!("Frame {} released", info.sequence);
                Ok(())
            }
            None => Err(CameraError::NoFrameReady),
        }
    }

    /// Revoke any write lease and forget the pending frame. Live read views
    /// stay valid and keep the buffer from being written until dropped.
    pub fn discard(&self) {
        let mut leases = self.leases();
        leases.writer = None;
        leases.frame = None;
    }

    fn check_lease(&self, lease: &WriteLease) -> Result<()> {
        if self.leases().writer == Some(lease.generation) {
            Ok(())
        } else {
            Err(CameraError::BufferBusy)
        }
    }

    /// The lease table already guarantees exclusivity; contention here
    /// means a view outlived its bookkeeping.
    fn write_storage(&self) -> Result<RwLockWriteGuard<'_, Box<[u32]>>> {
        match self.storage.try_write() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(CameraError::BufferBusy),
        }
    }

    fn leases(&self) -> MutexGuard<'_, LeaseTable> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl std::fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManager")
            .field("capacity", &self.capacity)
            .field("state", &self.state())
            .finish()
    }
}

/// Read-only view of a completed frame
pub struct ReadView<'a> {
    guard: Option<RwLockReadGuard<'a, Box<[u32]>>>,
    manager: &'a BufferManager,
    info: FrameInfo,
}

impl ReadView<'_> {
    pub fn info(&self) -> FrameInfo {
        self.info
    }

    pub fn sequence(&self) -> u64 {
        self.info.sequence
    }

    /// Valid frame words
    pub fn words(&self) -> &[u32] {
        match &self.guard {
            Some(guard) => &guard[..self.info.words],
            None => &[],
        }
    }

    /// Frame data as bytes, in memory order
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.words())
    }
}

impl Drop for ReadView<'_> {
    fn drop(&mut self) {
        // Release the storage before the reader count so a writer that sees
        // zero readers never finds the lock held.
        self.guard.take();
        let mut leases = self.manager.leases();
        leases.readers = leases.readers.saturating_sub(1);
    }
}

impl std::fmt::Debug for ReadView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadView").field("info", &self.info).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(sequence: u64, words: usize) -> FrameInfo {
        FrameInfo {
            sequence,
            resolution: Resolution::Qqvga,
            colorspace: Colorspace::Rgb565,
            words,
        }
    }

    #[test]
    fn test_second_writer_is_busy() {
        let buffer = BufferManager::new(16);
        let _lease = buffer.acquire_for_write().unwrap();
        assert_eq!(buffer.acquire_for_write(), Err(CameraError::BufferBusy));
        assert_eq!(buffer.acquire_for_write(), Err(CameraError::BufferBusy));
        assert_eq!(buffer.state(), BufferState::WriteLocked);
    }

    #[test]
    fn test_no_read_while_writing() {
        let buffer = BufferManager::new(16);
        let lease = buffer.acquire_for_write().unwrap();
        assert!(matches!(buffer.acquire_for_read(), Err(CameraError::NoFrameReady)));

        buffer.mark_complete(lease, info(1, 8)).unwrap();
        let view = buffer.acquire_for_read().unwrap();
        assert_eq!(view.words().len(), 8);
        assert_eq!(view.bytes().len(), 32);
    }

    #[test]
    fn test_write_then_read_contents() {
        let buffer = BufferManager::new(4);
        let lease = buffer.acquire_for_write().unwrap();
        buffer
            .with_dma_target(&lease, |words| words.copy_from_slice(&[1, 2, 3, 4]))
            .unwrap();
        buffer.mark_complete(lease, info(1, 4)).unwrap();

        let view = buffer.acquire_for_read().unwrap();
        assert_eq!(view.words(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_readers_block_writer_and_release() {
        let buffer = BufferManager::new(16);
        let lease = buffer.acquire_for_write().unwrap();
        buffer.mark_complete(lease, info(1, 16)).unwrap();

        let a = buffer.acquire_for_read().unwrap();
        let b = buffer.acquire_for_read().unwrap();
        assert_eq!(buffer.state(), BufferState::Reading(2));
        assert_eq!(buffer.acquire_for_write(), Err(CameraError::BufferBusy));
        assert_eq!(buffer.release(), Err(CameraError::BufferBusy));

        drop(a);
        drop(b);
        assert_eq!(buffer.state(), BufferState::Ready);
        buffer.release().unwrap();
        assert_eq!(buffer.state(), BufferState::Empty);
        assert!(matches!(buffer.acquire_for_read(), Err(CameraError::NoFrameReady)));
        assert_eq!(buffer.release(), Err(CameraError::NoFrameReady));
    }

    #[test]
    fn test_unread_frame_dropped_on_rewrite() {
        let buffer = BufferManager::new(16);
        let lease = buffer.acquire_for_write().unwrap();
        buffer.mark_complete(lease, info(1, 16)).unwrap();

        let _next = buffer.acquire_for_write().unwrap();
        assert_eq!(buffer.dropped_frames(), 1);
    }

    #[test]
    fn test_dma_target_bounds() {
        let buffer = BufferManager::new(16);
        let lease = buffer.acquire_for_write().unwrap();
        let target = buffer.dma_target(&lease, 16).unwrap();
        assert_eq!(target.words, 16);
        assert_ne!(target.address, 0);
        assert_eq!(
            buffer.dma_target(&lease, 17),
            Err(CameraError::FrameTooLarge { required: 17, capacity: 16 })
        );
    }

    #[test]
    fn test_discard_revokes_lease() {
        let buffer = BufferManager::new(16);
        let lease = buffer.acquire_for_write().unwrap();
        buffer.discard();
        assert_eq!(buffer.state(), BufferState::Empty);
        assert_eq!(buffer.mark_complete(lease, info(1, 16)), Err(CameraError::BufferBusy));
    }

    #[test]
    fn test_completed_words_clamped_to_capacity() {
        let buffer = BufferManager::new(4);
        let lease = buffer.acquire_for_write().unwrap();
        buffer.mark_complete(lease, info(1, 100)).unwrap();
        assert_eq!(buffer.acquire_for_read().unwrap().words().len(), 4);
    }
}
