//! Endpoint scheduler.
//!
//! A step picks the highest-priority ready endpoint from the primary bitmap, then the
//! highest-priority pending condition from that endpoint's secondary status, and hands the
//! combined offset to the endpoint handler. Lower bit numbers win in both lookups.

use bridgefw_regs::map::{
    ENDPOINT_COUNT, G_EP_DISPATCH_OFFSET, G_EP_INDEX, REG_EP_SECONDARY_BASE, REG_EP_STATUS,
    REG_USB_PERIPH_STATUS, USB_PERIPH_MASTER_READY,
};
use tracing::{debug, trace};

use crate::dispatch::SlotId;
use crate::firmware::Firmware;

/// Lookup result meaning "no bit set".
pub const NO_ENDPOINT: u8 = ENDPOINT_COUNT as u8;

/// Status byte to index of its lowest set bit; [`NO_ENDPOINT`] for zero.
pub const EP_INDEX_TABLE: [u8; 256] = build_index_table();

/// Primary index to the base of its block of handler offsets.
pub const EP_OFFSET_TABLE: [u8; ENDPOINT_COUNT] = [0x00, 0x08, 0x10, 0x18, 0x20, 0x28, 0x30, 0x38];

/// Secondary index to the bit that clears it.
pub const EP_BIT_MASK: [u8; ENDPOINT_COUNT] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];

/// Most steps one scan may take.
pub const MAX_SCAN_STEPS: u8 = 32;

/// Handler offset for the out-of-band dispatch issued when the master flag is already set.
pub const FORCED_OFFSET: u8 = 0x40;

const fn build_index_table() -> [u8; 256] {
    let mut table = [NO_ENDPOINT; 256];
    let mut value = 1;
    while value < 256 {
        table[value] = (value as u8).trailing_zeros() as u8;
        value += 1;
    }
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStop {
    /// A lookup produced the sentinel.
    Idle,
    /// The step limit ran out with work possibly remaining.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Whether the forced 0x40 dispatch ran before the scan.
    pub forced: bool,
    /// Handler offsets, one per serviced step, in order.
    pub serviced: Vec<u8>,
    pub stop: ScanStop,
    pub master_dispatched: bool,
}

impl ScanReport {
    pub fn steps(&self) -> usize {
        self.serviced.len()
    }
}

fn master_ready(fw: &mut Firmware) -> bool {
    fw.bus().read_u8(REG_USB_PERIPH_STATUS) & USB_PERIPH_MASTER_READY != 0
}

/// Runs one bounded scan.
pub fn scan(fw: &mut Firmware) -> ScanReport {
    let forced = master_ready(fw);
    if forced {
        trace!("master ready on entry, forced endpoint dispatch");
        fw.dispatch_with(SlotId::ENDPOINT_HANDLER, FORCED_OFFSET);
    }

    let limit = fw.config().endpoint_scan_limit.min(MAX_SCAN_STEPS);
    let mut serviced = Vec::new();
    let mut stop = ScanStop::Exhausted;
    for _ in 0..limit {
        match step(fw) {
            Some(offset) => serviced.push(offset),
            None => {
                stop = ScanStop::Idle;
                break;
            }
        }
    }

    let master_dispatched = master_ready(fw);
    if master_dispatched {
        fw.dispatch(SlotId::MASTER_EVENT);
    }

    if stop == ScanStop::Exhausted {
        debug!(limit, "endpoint scan hit its step limit");
    }
    ScanReport {
        forced,
        serviced,
        stop,
        master_dispatched,
    }
}

/// One scheduler step. `None` when nothing is ready; nothing is dispatched or cleared then.
fn step(fw: &mut Firmware) -> Option<u8> {
    let primary = fw.bus().read_u8(REG_EP_STATUS);
    let index = EP_INDEX_TABLE[usize::from(primary)];
    fw.bus().write_u8(G_EP_INDEX, index);
    if index >= NO_ENDPOINT {
        return None;
    }

    // The latched copy is what the rest of the step trusts.
    let index = fw.bus().read_u8(G_EP_INDEX);
    if index >= NO_ENDPOINT {
        return None;
    }

    let secondary_reg = REG_EP_SECONDARY_BASE + u16::from(index);
    let secondary = fw.bus().read_u8(secondary_reg);
    let sub = EP_INDEX_TABLE[usize::from(secondary)];
    if sub >= NO_ENDPOINT {
        return None;
    }

    let offset = EP_OFFSET_TABLE[usize::from(index)] + sub;
    fw.bus().write_u8(G_EP_DISPATCH_OFFSET, offset);
    trace!(endpoint = index, sub, offset, "endpoint step");

    fw.dispatch_with(SlotId::ENDPOINT_HANDLER, offset);
    fw.bus().write_u8(secondary_reg, EP_BIT_MASK[usize::from(sub)]);
    Some(offset)
}

/// Dispatch-table entry for [`SlotId::ENDPOINT_SCAN`].
pub fn scan_routine(fw: &mut Firmware, _param: Option<u8>) {
    let report = scan(fw);
    trace!(
        steps = report.steps(),
        stop = ?report.stop,
        forced = report.forced,
        master = report.master_dispatched,
        "endpoint scan done"
    );
}
