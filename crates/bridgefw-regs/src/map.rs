//! XDATA register map.
//!
//! Only the registers the dispatch core touches are named here. Collaborator blocks (USB
//! descriptors, SCSI, flash layout, UART) own their own maps.

use bitflags::bitflags;

// --- Firmware working memory (zeroed at boot) ---------------------------------------------------

/// Default start of XDATA working memory cleared by the boot sequence.
pub const WORK_RAM_START: u16 = 0x0000;
/// Default length of XDATA working memory cleared by the boot sequence.
pub const WORK_RAM_LEN: u16 = 0x2000;

/// Aggregate event byte polled by the main loop.
pub const G_EVENT_FLAGS: u16 = 0x09F9;
/// System-state byte shared between interrupt handlers and the main loop.
pub const G_SYSTEM_STATE: u16 = 0x0AE2;

/// Latched primary endpoint index written by the scheduler and re-read before use.
pub const G_EP_INDEX: u16 = 0x0A7B;
/// Combined endpoint dispatch parameter (bit offset + secondary index).
pub const G_EP_DISPATCH_OFFSET: u16 = 0x0A7C;

/// 3-bit rolling command-state counter.
pub const G_CMD_STATE: u16 = 0x0A60;
/// Queue slot index claimed by the in-flight command; cleared on completion.
pub const G_CMD_SLOT_INDEX: u16 = 0x0A61;
/// Circular NVMe submission queue tail (32 entries).
pub const G_NVME_SQ_TAIL: u16 = 0x0A62;

/// Big-endian timeout counters, one per wait so nested waits never share storage.
pub const G_NVME_QUEUE_COUNTER: u16 = 0x0A64;
pub const G_NVME_DOORBELL_COUNTER: u16 = 0x0A68;
pub const G_FLASH_COUNTER: u16 = 0x0A6C;
pub const G_PHY_COUNTER: u16 = 0x0A70;

/// Number of recovery sequences executed since boot (wrapping).
pub const G_RECOVERY_COUNT: u16 = 0x0A74;

/// Command request block posted by collaborators and consumed by the command service.
pub const G_CMD_REQ_KIND: u16 = 0x0A80;
pub const G_CMD_REQ_OPCODE: u16 = 0x0A81;
pub const G_CMD_REQ_PARAM: u16 = 0x0A82;
pub const G_CMD_REQ_TAG: u16 = 0x0A83;
/// Big-endian 32-bit address field of the request block.
pub const G_CMD_REQ_ADDR: u16 = 0x0A84;

/// `G_CMD_REQ_KIND` values.
pub const CMD_REQ_NONE: u8 = 0x00;
pub const CMD_REQ_NVME: u8 = 0x01;
pub const CMD_REQ_FLASH: u8 = 0x02;
pub const CMD_REQ_PHY: u8 = 0x03;

bitflags! {
    /// Bits of [`G_EVENT_FLAGS`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct EventFlags: u8 {
        const ENDPOINT = 1 << 0;
        const HOST = 1 << 1;
        /// Link state changed; consumed by the link poller, not the pass logic.
        const LINK_CHANGE = 1 << 4;
    }
}

bitflags! {
    /// Bits of [`G_SYSTEM_STATE`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct SystemState: u8 {
        /// Posted by interrupt handlers; the main loop moves it into [`EventFlags::HOST`].
        const DEFERRED_HOST = 1 << 0;
        /// Posted by interrupt handlers; the main loop moves it into [`EventFlags::ENDPOINT`].
        const DEFERRED_ENDPOINT = 1 << 1;
        const LINK_UP = 1 << 4;
    }
}

// --- Interrupt status -----------------------------------------------------------------------------

/// Endpoint-class (USB) interrupt status, sampled once on INT0 entry.
pub const REG_INT_USB_STATUS: u16 = 0xC802;
/// System interrupt status; re-read by both lines.
pub const REG_INT_SYSTEM: u16 = 0xC806;
/// NVMe/PCIe interrupt status, sampled once on INT1 entry.
pub const REG_INT_PCIE_NVME: u16 = 0xC80A;
/// Timer interrupt status (write 1 to clear).
pub const REG_TIMER_STATUS: u16 = 0xCC33;

pub const INT_USB_MASTER: u8 = 1 << 0;
pub const INT_USB_CBW: u8 = 1 << 2;
pub const INT_USB_LINK: u8 = 1 << 4;

pub const INT_SYSTEM_EVENT: u8 = 1 << 0;
pub const INT_SYSTEM_POWER: u8 = 1 << 4;

pub const INT_PCIE_LINK: u8 = 1 << 4;
pub const INT_PCIE_EVENT: u8 = 1 << 5;
pub const INT_NVME_QUEUE: u8 = 1 << 6;

pub const TIMER_STATUS_TICK: u8 = 1 << 2;

// --- USB endpoints --------------------------------------------------------------------------------

/// Number of hardware endpoints/queues.
pub const ENDPOINT_COUNT: usize = 8;
/// Primary endpoint status bitmap: bit N set when endpoint N has secondary status pending.
pub const REG_EP_STATUS: u16 = 0x9118;
/// Per-endpoint secondary status registers, `REG_EP_SECONDARY_BASE + primary_index`.
pub const REG_EP_SECONDARY_BASE: u16 = 0x9096;
/// USB peripheral status; bit 0 is the master-dispatch-ready flag.
pub const REG_USB_PERIPH_STATUS: u16 = 0x9101;
pub const USB_PERIPH_MASTER_READY: u8 = 1 << 0;
pub const USB_PERIPH_BUS_EVENT: u8 = 1 << 5;

// --- Command blocks -------------------------------------------------------------------------------

/// Layout shared by the NVMe, flash and PHY command blocks.
///
/// Each block is `COMMAND_BLOCK_LEN` bytes starting at its base.
pub const CMD_OFF_OPCODE: u16 = 0x00;
pub const CMD_OFF_PARAM: u16 = 0x01;
pub const CMD_OFF_TAG: u16 = 0x02;
/// Big-endian 32-bit address, offsets 0x04..=0x07.
pub const CMD_OFF_ADDR: u16 = 0x04;
pub const CMD_OFF_TRIGGER: u16 = 0x08;
pub const CMD_OFF_STATUS: u16 = 0x09;
pub const CMD_OFF_CTRL: u16 = 0x0A;
pub const COMMAND_BLOCK_LEN: u16 = 0x10;

pub const NVME_CMD_BLOCK: u16 = 0xC420;
pub const FLASH_CMD_BLOCK: u16 = 0xC8A0;
pub const PHY_CMD_BLOCK: u16 = 0xE710;

bitflags! {
    /// Trigger register bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Trigger: u8 {
        const START = 1 << 0;
    }
}

bitflags! {
    /// Status register bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CommandStatus: u8 {
        const BUSY = 1 << 0;
        const ERROR = 1 << 1;
    }
}

bitflags! {
    /// Control register bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CommandCtrl: u8 {
        const ENABLE = 1 << 0;
        const ABORT = 1 << 1;
    }
}

// --- Power / PHY / timer control (recovery targets) -----------------------------------------------

pub const REG_POWER_CTRL: u16 = 0x92C0;
pub const POWER_CTRL_NVME_RAIL: u8 = 1 << 0;
pub const POWER_CTRL_PHY_RAIL: u8 = 1 << 1;

pub const REG_PHY_CTRL: u16 = 0xE7E3;
pub const PHY_CTRL_LANE_RESET: u8 = 1 << 6;
pub const PHY_CTRL_PLL_HOLD: u8 = 1 << 7;

pub const REG_TIMER_CTRL: u16 = 0xCC11;
pub const TIMER_CTRL_CLEAR: u8 = 1 << 1;

pub const REG_FLASH_MODE: u16 = 0xC8B8;
pub const FLASH_MODE_SOFT_RESET: u8 = 1 << 0;
