//! Build-time calibration and layout for one firmware image.

use bridgefw_regs::map::{WORK_RAM_LEN, WORK_RAM_START};
use serde::{Deserialize, Serialize};

use crate::endpoint::MAX_SCAN_STEPS;
use crate::error::ConfigError;
use crate::irq::IrqLine;

/// Busy-wait thresholds, in poll iterations.
///
/// These were measured against one silicon revision's poll-loop timing. A host build counts
/// iterations of its own loop body, so the numbers bound work, not wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Outer NVMe wait: queue status busy.
    pub nvme_queue: u32,
    /// Inner NVMe wait: doorbell trigger accepted.
    pub nvme_doorbell: u32,
    pub flash: u32,
    pub phy_settle: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            nvme_queue: 0x0005_D000,
            nvme_doorbell: 0x0002_0000,
            flash: 0x0002_0000,
            phy_settle: 0x0002_0000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// First internal-RAM byte of the hardware stack; it grows up to 0xFF.
    pub base: u8,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self { base: 0x72 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkRam {
    pub start: u16,
    pub len: u16,
}

impl Default for WorkRam {
    fn default() -> Self {
        Self {
            start: WORK_RAM_START,
            len: WORK_RAM_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    pub timeouts: Timeouts,
    pub stack: StackConfig,
    /// Upper bound on endpoint scheduler steps per invocation.
    pub endpoint_scan_limit: u8,
    /// The line placed at high priority. The other runs low.
    pub interrupt_priority: IrqLine,
    pub work_ram: WorkRam,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            stack: StackConfig::default(),
            endpoint_scan_limit: MAX_SCAN_STEPS,
            interrupt_priority: IrqLine::System,
            work_ram: WorkRam::default(),
        }
    }
}

impl FirmwareConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timeouts;
        for (name, value) in [
            ("nvme_queue", t.nvme_queue),
            ("nvme_doorbell", t.nvme_doorbell),
            ("flash", t.flash),
            ("phy_settle", t.phy_settle),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }

        if !(1..=MAX_SCAN_STEPS).contains(&self.endpoint_scan_limit) {
            return Err(ConfigError::ScanLimit(self.endpoint_scan_limit));
        }

        // R0-R7 of register bank 0 sit below 0x08; keep at least 8 bytes of stack.
        if !(0x08..=0xF8).contains(&self.stack.base) {
            return Err(ConfigError::StackBase(self.stack.base));
        }

        let WorkRam { start, len } = self.work_ram;
        if u32::from(start) + u32::from(len) > 0x8000 {
            return Err(ConfigError::WorkRam { start, len });
        }

        Ok(())
    }
}
