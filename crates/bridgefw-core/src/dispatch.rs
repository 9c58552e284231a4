//! Dispatch table: logical slot identifiers bound to banked entry points.
//!
//! Every slot owns a three-byte stub in common code at `STUB_BASE + 3 * id`. Callers reach a
//! slot either by id or by that stub's logical address. The table is assembled once at startup
//! and never changes afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::bank::{Bank, CodeAddr, BANK_WINDOW_BASE};
use crate::error::DispatchError;
use crate::image::CodeImage;

/// Logical address of the stub for slot 0.
pub const STUB_BASE: u16 = 0x0300;
pub const STUB_SIZE: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u16);

macro_rules! slots {
    ($($name:ident = $id:expr,)*) => {
        impl SlotId {
            $(pub const $name: SlotId = SlotId($id);)*

            pub fn name(self) -> Option<&'static str> {
                match self {
                    $(SlotId::$name => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

slots! {
    // Startup sequence.
    HW_INIT = 0,
    USB_INIT = 1,
    NVME_INIT = 2,
    PHY_INIT = 3,
    // Main loop, always run.
    TIMER_POLL = 4,
    LINK_POLL = 5,
    PHY_POLL = 6,
    QUEUE_POLL = 7,
    // Main loop, gated by the event byte.
    HOST_EVENT = 8,
    ENDPOINT_SCAN = 9,
    COMMAND_SERVICE = 10,
    // Endpoint-class interrupt line.
    USB_MASTER = 11,
    USB_BUS_EVENT = 12,
    CBW_RECEIVED = 13,
    SYSTEM_EVENT = 14,
    USB_LINK_EVENT = 15,
    // System-class interrupt line.
    NVME_QUEUE_EVENT = 16,
    PCIE_EVENT = 17,
    PCIE_LINK_EVENT = 18,
    POWER_EVENT = 19,
    TIMER_TICK = 20,
    // Endpoint scheduler targets.
    ENDPOINT_HANDLER = 21,
    MASTER_EVENT = 22,
}

impl SlotId {
    /// Logical address of this slot's stub in common code.
    pub fn stub(self) -> u32 {
        u32::from(STUB_BASE) + u32::from(STUB_SIZE) * u32::from(self.0)
    }

    /// Inverse of [`SlotId::stub`].
    pub fn from_stub(addr: u16) -> Option<SlotId> {
        let rel = addr.checked_sub(STUB_BASE)?;
        (rel % STUB_SIZE == 0).then_some(SlotId(rel / STUB_SIZE))
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "slot#{}", self.0),
        }
    }
}

/// How control gets into, and back out of, a banked target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConvention {
    /// The stub calls the target; the target returns into the stub, which restores the bank.
    CallReturn,
    /// The stub jumps to the target and never sees control again; the target's return lands in
    /// the bank-restore epilogue the trampoline pushed before jumping.
    TailJump,
}

/// One row of the static table source: `(slot, bank, logical address, convention)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEntry {
    pub slot: SlotId,
    pub bank: Bank,
    pub address: u16,
    pub convention: CallConvention,
}

impl DispatchEntry {
    pub const fn new(slot: SlotId, bank: Bank, address: u16, convention: CallConvention) -> Self {
        Self {
            slot,
            bank,
            address,
            convention,
        }
    }

    pub fn target(&self) -> CodeAddr {
        CodeAddr::new(self.bank, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSlot {
    pub id: SlotId,
    pub stub: u16,
    pub target: CodeAddr,
    pub convention: CallConvention,
}

#[derive(Debug, Clone)]
pub struct DispatchTable {
    slots: BTreeMap<SlotId, DispatchSlot>,
    by_stub: HashMap<u16, SlotId>,
}

impl DispatchTable {
    /// Assembles the table and checks it against the image.
    ///
    /// Rejects duplicate ids, stubs that would not fit in common code, targets with no routine
    /// placed in their bank, and one target reached through two slots with different
    /// conventions.
    pub fn build(entries: &[DispatchEntry], image: &CodeImage) -> Result<Self, DispatchError> {
        let mut slots = BTreeMap::new();
        let mut by_stub = HashMap::new();
        let mut by_target: HashMap<CodeAddr, (SlotId, CallConvention)> = HashMap::new();

        for entry in entries {
            let id = entry.slot;
            let stub = id.stub();
            if stub + u32::from(STUB_SIZE) > u32::from(BANK_WINDOW_BASE) {
                return Err(DispatchError::StubOutsideCommon(id, stub));
            }
            let stub = stub as u16;

            let target = entry.target();
            if image.get(target).is_none() {
                return Err(DispatchError::UnresolvableTarget { slot: id, target });
            }

            if let Some(&(first, first_convention)) = by_target.get(&target) {
                if first_convention != entry.convention {
                    return Err(DispatchError::AmbiguousAlias {
                        first,
                        second: id,
                        target,
                        first_convention,
                        second_convention: entry.convention,
                    });
                }
            } else {
                by_target.insert(target, (id, entry.convention));
            }

            let slot = DispatchSlot {
                id,
                stub,
                target,
                convention: entry.convention,
            };
            if slots.insert(id, slot).is_some() {
                return Err(DispatchError::DuplicateSlot(id));
            }
            by_stub.insert(stub, id);
        }

        Ok(Self { slots, by_stub })
    }

    pub fn slot(&self, id: SlotId) -> Option<&DispatchSlot> {
        self.slots.get(&id)
    }

    /// Looks a slot up by the logical address of its stub.
    pub fn by_stub(&self, addr: u16) -> Option<&DispatchSlot> {
        self.by_stub.get(&addr).and_then(|id| self.slots.get(id))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DispatchSlot> {
        self.slots.values()
    }
}

use CallConvention::{CallReturn, TailJump};

/// The shipped table. Slots marked core are implemented in this crate; the rest belong to
/// collaborator subsystems and must be placed in the image by the integrator.
pub const STANDARD_TABLE: &[DispatchEntry] = &[
    DispatchEntry::new(SlotId::HW_INIT, Bank::Bank0, 0x4A20, CallReturn),
    DispatchEntry::new(SlotId::USB_INIT, Bank::Bank0, 0x8A3F, CallReturn),
    DispatchEntry::new(SlotId::NVME_INIT, Bank::Bank1, 0x8D0E, CallReturn),
    DispatchEntry::new(SlotId::PHY_INIT, Bank::Bank1, 0x9C52, CallReturn),
    DispatchEntry::new(SlotId::TIMER_POLL, Bank::Bank0, 0x8C2E, CallReturn),
    DispatchEntry::new(SlotId::LINK_POLL, Bank::Bank0, 0x9310, CallReturn),
    DispatchEntry::new(SlotId::PHY_POLL, Bank::Bank1, 0xA1B4, CallReturn),
    DispatchEntry::new(SlotId::QUEUE_POLL, Bank::Bank0, 0xB07A, CallReturn),
    DispatchEntry::new(SlotId::HOST_EVENT, Bank::Bank0, 0xC2D0, CallReturn),
    // core
    DispatchEntry::new(SlotId::ENDPOINT_SCAN, Bank::Bank1, 0x9A3C, CallReturn),
    // core
    DispatchEntry::new(SlotId::COMMAND_SERVICE, Bank::Bank1, 0xB410, TailJump),
    DispatchEntry::new(SlotId::USB_MASTER, Bank::Bank0, 0x9E66, CallReturn),
    DispatchEntry::new(SlotId::USB_BUS_EVENT, Bank::Bank0, 0xA022, CallReturn),
    DispatchEntry::new(SlotId::CBW_RECEIVED, Bank::Bank0, 0xA47C, TailJump),
    DispatchEntry::new(SlotId::SYSTEM_EVENT, Bank::Bank1, 0x8E9A, CallReturn),
    DispatchEntry::new(SlotId::USB_LINK_EVENT, Bank::Bank0, 0xA8C4, CallReturn),
    DispatchEntry::new(SlotId::NVME_QUEUE_EVENT, Bank::Bank1, 0xBE30, CallReturn),
    DispatchEntry::new(SlotId::PCIE_EVENT, Bank::Bank1, 0xC110, CallReturn),
    DispatchEntry::new(SlotId::PCIE_LINK_EVENT, Bank::Bank1, 0xC5F2, CallReturn),
    DispatchEntry::new(SlotId::POWER_EVENT, Bank::Bank0, 0xCB40, CallReturn),
    DispatchEntry::new(SlotId::TIMER_TICK, Bank::Bank0, 0x5118, CallReturn),
    DispatchEntry::new(SlotId::ENDPOINT_HANDLER, Bank::Bank0, 0xD27C, TailJump),
    DispatchEntry::new(SlotId::MASTER_EVENT, Bank::Bank0, 0xD6A0, CallReturn),
];

/// Slots whose targets live in this crate.
pub const CORE_SLOTS: &[SlotId] = &[SlotId::ENDPOINT_SCAN, SlotId::COMMAND_SERVICE];

impl SlotId {
    pub fn is_core(self) -> bool {
        CORE_SLOTS.contains(&self)
    }
}

/// Entry of `slot` in [`STANDARD_TABLE`].
pub fn standard_entry(slot: SlotId) -> Option<&'static DispatchEntry> {
    STANDARD_TABLE.iter().find(|e| e.slot == slot)
}
