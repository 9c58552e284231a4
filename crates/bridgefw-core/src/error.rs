use thiserror::Error;

use crate::bank::{Bank, CodeAddr};
use crate::dispatch::{CallConvention, SlotId};
use crate::stack::StackEntry;

/// Defects found while assembling the dispatch table.
///
/// Each of these would execute unrelated code on real silicon; here they stop the firmware from
/// being built at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("slot {0} registered twice")]
    DuplicateSlot(SlotId),

    #[error("slot {0} stub address {1:#06x} is outside the common region")]
    StubOutsideCommon(SlotId, u32),

    #[error("slot {slot} target {target} has no routine in the code image")]
    UnresolvableTarget { slot: SlotId, target: CodeAddr },

    #[error(
        "slots {first} and {second} alias {target} with different conventions ({first_convention:?} vs {second_convention:?})"
    )]
    AmbiguousAlias {
        first: SlotId,
        second: SlotId,
        target: CodeAddr,
        first_convention: CallConvention,
        second_convention: CallConvention,
    },
}

/// Runtime defects raised by the trampoline.
///
/// None of these occur with a table that passed validation and a stack sized per the
/// configuration; dispatch sites in the router and main loop log and drop them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("unknown dispatch slot {0}")]
    UnknownSlot(SlotId),

    #[error("no dispatch stub at logical address {0:#06x}")]
    UnknownStub(u16),

    #[error("logical address {addr:#06x} resolves to nothing with bank {bank} mapped")]
    Unresolved { addr: u16, bank: Bank },

    #[error("call stack overflow pushing {entry:?} ({used} of {capacity} bytes in use)")]
    StackOverflow {
        entry: StackEntry,
        used: usize,
        capacity: usize,
    },

    #[error("call stack underflow")]
    StackUnderflow,

    #[error("call stack corrupted: expected {expected:?}, popped {found:?}")]
    StackCorrupted {
        expected: StackEntry,
        found: StackEntry,
    },
}

/// Invalid [`crate::config::FirmwareConfig`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("timeout threshold `{0}` must be non-zero")]
    ZeroTimeout(&'static str),

    #[error("endpoint scan limit {0} is outside 1..=32")]
    ScanLimit(u8),

    #[error("stack base {0:#04x} is outside 0x08..=0xF8")]
    StackBase(u8),

    #[error("work RAM {start:#06x}+{len:#06x} runs past 0x8000")]
    WorkRam { start: u16, len: u16 },
}

/// Anything that stops [`crate::Firmware::new`] from producing a runnable image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type Result<T> = std::result::Result<T, CallError>;
