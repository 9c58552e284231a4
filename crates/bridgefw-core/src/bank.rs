//! Code banking.
//!
//! The CPU sees a 64KB logical code space. `0x0000..0x8000` always maps the common region;
//! `0x8000..=0xFFFF` is a window onto whichever physical bank is selected. The image is laid out
//! flat as common, bank 0, bank 1:
//!
//! ```text
//! physical 0x00000..0x08000  common
//! physical 0x08000..0x10000  bank 0  (logical 0x8000..=0xFFFF)
//! physical 0x10000..0x18000  bank 1  (logical 0x8000..=0xFFFF)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// First logical address served by the banked window.
pub const BANK_WINDOW_BASE: u16 = 0x8000;
pub const BANK_SIZE: u32 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bank {
    Bank0,
    Bank1,
}

impl Bank {
    /// Value written to the bank-select register.
    pub fn select_bits(self) -> u8 {
        match self {
            Bank::Bank0 => 0,
            Bank::Bank1 => 1,
        }
    }

    fn physical_base(self) -> u32 {
        match self {
            Bank::Bank0 => BANK_SIZE,
            Bank::Bank1 => 2 * BANK_SIZE,
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank{}", self.select_bits())
    }
}

/// A code location, tagged with the bank it lives in when it is above the window base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodeAddr {
    Common(u16),
    Banked { bank: Bank, offset: u16 },
}

impl CodeAddr {
    /// Tags a logical address with `bank`. Addresses below the window ignore the bank.
    pub fn new(bank: Bank, logical: u16) -> Self {
        if logical < BANK_WINDOW_BASE {
            CodeAddr::Common(logical)
        } else {
            CodeAddr::Banked {
                bank,
                offset: logical - BANK_WINDOW_BASE,
            }
        }
    }

    /// Resolves a logical address through the currently mapped bank.
    pub fn resolve(logical: u16, active: Bank) -> Self {
        Self::new(active, logical)
    }

    pub fn bank(self) -> Option<Bank> {
        match self {
            CodeAddr::Common(_) => None,
            CodeAddr::Banked { bank, .. } => Some(bank),
        }
    }

    /// Address as the CPU sees it while the owning bank is mapped.
    pub fn logical(self) -> u16 {
        match self {
            CodeAddr::Common(addr) => addr,
            CodeAddr::Banked { offset, .. } => BANK_WINDOW_BASE + offset,
        }
    }

    /// Offset into the flat firmware image.
    pub fn physical(self) -> u32 {
        match self {
            CodeAddr::Common(addr) => u32::from(addr),
            CodeAddr::Banked { bank, offset } => bank.physical_base() + u32::from(offset),
        }
    }
}

impl fmt::Display for CodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeAddr::Common(addr) => write!(f, "common:{addr:#06x}"),
            CodeAddr::Banked { bank, .. } => write!(f, "{bank}:{:#06x}", self.logical()),
        }
    }
}

/// The bank-select register.
///
/// One bank is mapped at any instant. There is no nesting here: callers that switch banks are
/// responsible for putting the previous selection back (see [`crate::trampoline`]).
#[derive(Debug, Clone)]
pub struct BankWindow {
    active: Bank,
    switches: u64,
}

impl BankWindow {
    pub fn new() -> Self {
        Self {
            active: Bank::Bank0,
            switches: 0,
        }
    }

    pub fn active(&self) -> Bank {
        self.active
    }

    /// Maps `bank` into the window. Idempotent.
    pub fn select(&mut self, bank: Bank) {
        if self.active != bank {
            trace!(from = %self.active, to = %bank, "bank switch");
            self.switches += 1;
        }
        self.active = bank;
    }

    /// Number of selections that actually changed the mapped bank.
    pub fn switches(&self) -> u64 {
        self.switches
    }
}

impl Default for BankWindow {
    fn default() -> Self {
        Self::new()
    }
}
