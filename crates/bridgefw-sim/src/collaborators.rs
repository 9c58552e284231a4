//! Stand-ins for the subsystems the core dispatches into.
//!
//! Each routine acknowledges the condition it was dispatched for, the way the real handler's
//! first few instructions do, and records the call. The USB mass-storage path goes one step
//! further so a received CBW turns into an NVMe submission on the following pass.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bridgefw_core::command::{CommandRequest, OperationKind};
use bridgefw_core::{Bank, CodeImage, Firmware, SlotId, STANDARD_TABLE};
use bridgefw_regs::map::{
    SystemState, G_SYSTEM_STATE, INT_NVME_QUEUE, INT_PCIE_EVENT, INT_PCIE_LINK,
    INT_SYSTEM_EVENT, INT_SYSTEM_POWER, INT_USB_CBW, INT_USB_MASTER, REG_INT_PCIE_NVME,
    REG_INT_SYSTEM, REG_INT_USB_STATUS, REG_USB_PERIPH_STATUS, USB_PERIPH_MASTER_READY,
};

/// SCSI READ(10) translated to an NVMe read.
const NVME_OPCODE_READ: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    pub slot: SlotId,
    pub param: Option<u8>,
    pub bank: Bank,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Rc<RefCell<Vec<Activity>>>,
}

impl ActivityLog {
    fn record(&self, fw: &Firmware, slot: SlotId, param: Option<u8>) {
        self.entries.borrow_mut().push(Activity {
            slot,
            param,
            bank: fw.active_bank(),
        });
    }

    pub fn entries(&self) -> Vec<Activity> {
        self.entries.borrow().clone()
    }

    pub fn slots(&self) -> Vec<SlotId> {
        self.entries.borrow().iter().map(|a| a.slot).collect()
    }

    pub fn count(&self, slot: SlotId) -> usize {
        self.entries.borrow().iter().filter(|a| a.slot == slot).count()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

/// What a stand-in does beyond recording itself.
#[derive(Clone)]
enum Behaviour {
    Record,
    /// Write-1-to-clear `mask` at `reg`.
    AckStatus { reg: u16, mask: u8 },
    ClearMasterReady,
    LinkUp,
    /// Acknowledges the CBW, queues the translated command and defers host work to the loop.
    TranslateCbw { next_tag: Rc<Cell<u8>> },
}

fn behaviour(slot: SlotId) -> Behaviour {
    let ack = |reg, mask| Behaviour::AckStatus { reg, mask };
    match slot {
        SlotId::USB_MASTER => ack(REG_INT_USB_STATUS, INT_USB_MASTER),
        SlotId::CBW_RECEIVED => Behaviour::TranslateCbw {
            next_tag: Rc::new(Cell::new(0)),
        },
        SlotId::SYSTEM_EVENT => ack(REG_INT_SYSTEM, INT_SYSTEM_EVENT),
        SlotId::USB_LINK_EVENT => Behaviour::LinkUp,
        SlotId::NVME_QUEUE_EVENT => ack(REG_INT_PCIE_NVME, INT_NVME_QUEUE),
        SlotId::PCIE_EVENT => ack(REG_INT_PCIE_NVME, INT_PCIE_EVENT),
        SlotId::PCIE_LINK_EVENT => ack(REG_INT_PCIE_NVME, INT_PCIE_LINK),
        SlotId::POWER_EVENT => ack(REG_INT_SYSTEM, INT_SYSTEM_POWER),
        SlotId::MASTER_EVENT => Behaviour::ClearMasterReady,
        _ => Behaviour::Record,
    }
}

/// Places a stand-in at every collaborator address in the standard table.
pub(crate) fn install(image: &mut CodeImage, log: &ActivityLog) {
    for entry in STANDARD_TABLE.iter().filter(|e| !e.slot.is_core()) {
        let slot = entry.slot;
        let log = log.clone();
        let behaviour = behaviour(slot);

        image.place(entry.target(), slot.to_string(), move |fw, param| {
            log.record(fw, slot, param);
            match &behaviour {
                Behaviour::Record => {}
                Behaviour::AckStatus { reg, mask } => fw.bus().write_u8(*reg, *mask),
                Behaviour::ClearMasterReady => {
                    fw.bus().clear_bits(REG_USB_PERIPH_STATUS, USB_PERIPH_MASTER_READY)
                }
                Behaviour::LinkUp => fw.bus().set_bits(G_SYSTEM_STATE, SystemState::LINK_UP.bits()),
                Behaviour::TranslateCbw { next_tag } => {
                    fw.bus().write_u8(REG_INT_USB_STATUS, INT_USB_CBW);
                    let tag = next_tag.get();
                    next_tag.set(tag.wrapping_add(1));
                    CommandRequest {
                        kind: OperationKind::NvmeSubmit,
                        opcode: NVME_OPCODE_READ,
                        param: 0,
                        tag,
                        address: u32::from(tag) * 8,
                    }
                    .post(fw);
                    fw.bus()
                        .set_bits(G_SYSTEM_STATE, SystemState::DEFERRED_HOST.bits());
                }
            }
        });
    }
}
