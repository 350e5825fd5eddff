//! DCMI Capture Demo
//!
//! Runs the capture state machine against a simulated board: a snapshot
//! phase followed by a continuous phase, then reports what was captured.

pub mod session;
pub mod settings;
pub mod vsync;

pub use session::{run, SessionError, SessionSummary};
pub use settings::DemoSettings;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging at `level` (falls back to INFO if unparsable)
pub fn init_logging(level: &str) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
