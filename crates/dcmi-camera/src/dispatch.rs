//! Frame and DMA completion notification

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Signal-only notification handler. The closure carries its own context.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn() + Send + Sync>);

impl Callback {
    pub fn new(handler: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    fn invoke(&self) {
        (self.0)()
    }
}

impl<F> From<F> for Callback
where
    F: Fn() + Send + Sync + 'static,
{
    fn from(handler: F) -> Self {
        Self::new(handler)
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback")
    }
}

/// Delivers each completion event at most once per frame sequence.
///
/// The dispatcher holds no lock while a handler runs, so handlers may call
/// back into the camera.
#[derive(Debug, Default)]
pub struct Dispatcher {
    on_frame: Option<Callback>,
    on_dma: Option<Callback>,
    last_dma: AtomicU64,
    last_frame: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher {
    pub fn new(on_frame: Option<Callback>, on_dma: Option<Callback>) -> Self {
        Self {
            on_frame,
            on_dma,
            ..Default::default()
        }
    }

    /// Transfer-complete notification for frame `sequence`
    pub fn notify_dma(&self, sequence: u64) {
        if Self::claim(&self.last_dma, sequence) {
            trace!("DMA complete for frame {}", sequence);
            self.deliver(self.on_dma.as_ref());
        }
    }

    /// Frame-ready notification for frame `sequence`
    pub fn notify_frame(&self, sequence: u64) {
        if Self::claim(&self.last_frame, sequence) {
            trace!("Frame {} ready", sequence);
            self.deliver(self.on_frame.as_ref());
        }
    }

    /// Events raised with no handler registered
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A sequence equal to the last one delivered is a repeat. Any other
    /// value, including one past a counter wrap, is a new frame.
    fn claim(last: &AtomicU64, sequence: u64) -> bool {
        let previous = last.swap(sequence, Ordering::AcqRel);
        if previous == sequence {
            warn!("Duplicate notification for frame {} suppressed", sequence);
            return false;
        }
        true
    }

    fn deliver(&self, callback: Option<&Callback>) {
        match callback {
            Some(callback) => callback.invoke(),
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(crate::metric::CALLBACKS_DROPPED).increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_each_sequence_delivered_once() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        let dispatcher = Dispatcher::new(
            Some(Callback::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        );

        dispatcher.notify_frame(1);
        dispatcher.notify_frame(1);
        dispatcher.notify_frame(2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delivery_continues_across_sequence_wrap() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        let dispatcher = Dispatcher::new(
            None,
            Some(Callback::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        dispatcher.notify_dma(u64::MAX);
        dispatcher.notify_dma(0);
        dispatcher.notify_dma(1);
        dispatcher.notify_dma(1);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_missing_handler_is_dropped_silently() {
        let dispatcher = Dispatcher::new(None, None);
        dispatcher.notify_dma(1);
        dispatcher.notify_frame(1);
        assert_eq!(dispatcher.dropped(), 2);
    }

    #[test]
    fn test_handlers_carry_context() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (frame_log, dma_log) = (log.clone(), log.clone());
        let dispatcher = Dispatcher::new(
            Some((move || frame_log.lock().unwrap().push("frame")).into()),
            Some((move || dma_log.lock().unwrap().push("dma")).into()),
        );

        dispatcher.notify_dma(1);
        dispatcher.notify_frame(1);
        assert_eq!(*log.lock().unwrap(), vec!["dma", "frame"]);
    }
}
