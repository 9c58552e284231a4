#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use bridgefw_sim::{Board, SimSettings};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let settings = SimSettings::from_env()?;
    let config = settings.load_config()?;
    let script = settings.load_script()?;

    let mut board = Board::new(config).context("failed to link firmware image")?;
    board.power_on();
    let summaries = board.run_script(&script, settings.passes());
    let busy = summaries.iter().filter(|s| !s.events.is_empty()).count();
    tracing::info!(busy, idle = summaries.len() - busy, "passes finished");

    let report = board.report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
