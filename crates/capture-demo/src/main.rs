//! DCMI Capture Demo - Main Entry Point

use anyhow::Context;
use capture_demo::{init_logging, run, DemoSettings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let settings = DemoSettings::load(path.as_deref()).context("Failed to load settings")?;
    init_logging(&settings.log_level).context("Failed to set tracing subscriber")?;

    info!("=== DCMI Capture Demo v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Settings: {:?}", settings);

    let summary = run(&settings).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
