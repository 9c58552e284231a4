#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use bridgefw_core::FirmwareConfig;
use bridgefw_sim::Board;

/// Routes `tracing` output through the test harness; `RUST_LOG` is ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A powered-on board with the startup calls dropped from its activity log.
pub fn booted(config: FirmwareConfig) -> Board {
    init_tracing();
    let mut board = Board::new(config).expect("standard table links");
    board.power_on();
    board.activity().clear();
    board
}

/// Writes `contents` to a fresh file under the system temp dir.
pub fn scratch_file(stem: &str, contents: &str) -> Result<PathBuf> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!(
        "bridgefw-{}-{n}-{stem}.json",
        std::process::id()
    ));
    std::fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
