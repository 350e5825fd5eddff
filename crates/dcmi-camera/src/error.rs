//! Camera Error Types

use thiserror::Error;

/// Errors raised by the capture state machine and its collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    /// Raw value does not name a member of the configuration enum
    #[error("Invalid {field} value: {value}")]
    InvalidConfigValue { field: &'static str, value: u8 },

    /// A DMA write is in flight or read views are still alive
    #[error("Capture buffer busy")]
    BufferBusy,

    /// No completed frame is waiting to be read
    #[error("No frame ready")]
    NoFrameReady,

    /// The request conflicts with an acquisition that has not finished
    #[error("Capture in progress")]
    CaptureInProgress,

    /// Sensor did not acknowledge a register write
    #[error("Sensor did not acknowledge: {0}")]
    SensorNak(String),

    /// Board power or pin initialisation failed
    #[error("Board support initialisation failed: {0}")]
    BspInitFailure(String),

    /// `init` has never been called on this camera
    #[error("Camera not initialized")]
    NotInitialized,

    /// The configured frame does not fit into the capture buffer
    #[error("Frame of {required} words exceeds buffer capacity of {capacity} words")]
    FrameTooLarge { required: usize, capacity: usize },
}

impl CameraError {
    /// Fatal errors end the session until `init` succeeds again
    pub fn is_fatal(&self) -> bool {
        matches!(self, CameraError::SensorNak(_) | CameraError::BspInitFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
