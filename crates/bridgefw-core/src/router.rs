//! Interrupt router: the ordered status tests each line runs on entry.
//!
//! Each line samples its own status register once at entry. Most tests check that snapshot;
//! a few re-read a register at the moment they run, because an earlier handler in the same
//! invocation may have changed it. Every test that fires calls exactly one slot directly and
//! evaluation moves on to the next test.

use bridgefw_regs::map::{
    INT_NVME_QUEUE, INT_PCIE_EVENT, INT_PCIE_LINK, INT_SYSTEM_EVENT, INT_SYSTEM_POWER,
    INT_USB_CBW, INT_USB_LINK, INT_USB_MASTER, REG_EP_STATUS, REG_INT_PCIE_NVME, REG_INT_SYSTEM,
    REG_INT_USB_STATUS, REG_TIMER_STATUS, REG_USB_PERIPH_STATUS, TIMER_STATUS_TICK,
    USB_PERIPH_BUS_EVENT,
};
use tracing::trace;

use crate::dispatch::SlotId;
use crate::firmware::Firmware;
use crate::irq::IrqLine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The value sampled at entry.
    Snapshot,
    /// A fresh read of this register.
    Reread(u16),
}

/// Who clears the bit once the slot has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The handler clears it.
    Handler,
    /// The router writes the mask back (write-1-to-clear register).
    W1c(u16),
    /// The router clears the mask with a read-modify-write.
    Rmw(u16),
}

#[derive(Debug, Clone, Copy)]
pub struct StatusTest {
    pub source: Source,
    pub mask: u8,
    pub slot: SlotId,
    pub ack: Ack,
}

impl StatusTest {
    const fn new(source: Source, mask: u8, slot: SlotId, ack: Ack) -> Self {
        Self {
            source,
            mask,
            slot,
            ack,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LineRoute {
    /// Register sampled on entry.
    pub status: u16,
    pub tests: &'static [StatusTest],
}

pub const ENDPOINT_ROUTE: LineRoute = LineRoute {
    status: REG_INT_USB_STATUS,
    tests: &[
        StatusTest::new(Source::Snapshot, INT_USB_MASTER, SlotId::USB_MASTER, Ack::Handler),
        // Any endpoint with work pending in the primary bitmap. The scan clears what it services.
        StatusTest::new(
            Source::Reread(REG_EP_STATUS),
            0xFF,
            SlotId::ENDPOINT_SCAN,
            Ack::Handler,
        ),
        StatusTest::new(
            Source::Reread(REG_USB_PERIPH_STATUS),
            USB_PERIPH_BUS_EVENT,
            SlotId::USB_BUS_EVENT,
            Ack::Rmw(REG_USB_PERIPH_STATUS),
        ),
        StatusTest::new(Source::Snapshot, INT_USB_CBW, SlotId::CBW_RECEIVED, Ack::Handler),
        StatusTest::new(
            Source::Reread(REG_INT_SYSTEM),
            INT_SYSTEM_EVENT,
            SlotId::SYSTEM_EVENT,
            Ack::Handler,
        ),
        StatusTest::new(
            Source::Snapshot,
            INT_USB_LINK,
            SlotId::USB_LINK_EVENT,
            Ack::W1c(REG_INT_USB_STATUS),
        ),
    ],
};

pub const SYSTEM_ROUTE: LineRoute = LineRoute {
    status: REG_INT_PCIE_NVME,
    tests: &[
        StatusTest::new(Source::Snapshot, INT_NVME_QUEUE, SlotId::NVME_QUEUE_EVENT, Ack::Handler),
        StatusTest::new(Source::Snapshot, INT_PCIE_EVENT, SlotId::PCIE_EVENT, Ack::Handler),
        StatusTest::new(Source::Snapshot, INT_PCIE_LINK, SlotId::PCIE_LINK_EVENT, Ack::Handler),
        StatusTest::new(
            Source::Reread(REG_INT_SYSTEM),
            INT_SYSTEM_POWER,
            SlotId::POWER_EVENT,
            Ack::Handler,
        ),
        StatusTest::new(
            Source::Reread(REG_TIMER_STATUS),
            TIMER_STATUS_TICK,
            SlotId::TIMER_TICK,
            Ack::W1c(REG_TIMER_STATUS),
        ),
    ],
};

pub fn line_route(line: IrqLine) -> &'static LineRoute {
    match line {
        IrqLine::Endpoint => &ENDPOINT_ROUTE,
        IrqLine::System => &SYSTEM_ROUTE,
    }
}

/// Runs `line`'s tests against the current register state.
pub fn route(fw: &mut Firmware, line: IrqLine) {
    let route = line_route(line);
    let snapshot = fw.bus().read_u8(route.status);
    trace!(%line, snapshot, "route");

    for test in route.tests {
        let value = match test.source {
            Source::Snapshot => snapshot,
            Source::Reread(addr) => fw.bus().read_u8(addr),
        };
        if value & test.mask == 0 {
            continue;
        }
        fw.dispatch(test.slot);
        match test.ack {
            Ack::Handler => {}
            Ack::W1c(addr) => fw.bus().write_u8(addr, test.mask),
            Ack::Rmw(addr) => fw.bus().clear_bits(addr, test.mask),
        }
    }
}
