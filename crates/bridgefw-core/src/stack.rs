//! Model of the CPU return stack in internal RAM.
//!
//! The hardware stack holds two kinds of things the dispatch core cares about: return addresses
//! (two bytes) and saved bank selections (one byte). Keeping them as typed entries lets the
//! trampoline check that every pop finds what the matching push left behind.

use crate::bank::Bank;
use crate::error::{CallError, Result};

/// Where a popped return address sends control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnSite {
    /// Back into whoever invoked the dispatch stub.
    Caller,
    /// Back into the dispatch stub after a call-return target finishes.
    StubResume,
    /// Into the common bank-restore epilogue, for tail-jump targets.
    BankRestore,
    /// `RETI` out of an interrupt vector.
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackEntry {
    Return(ReturnSite),
    SavedBank(Bank),
}

impl StackEntry {
    pub fn size(self) -> usize {
        match self {
            StackEntry::Return(_) => 2,
            StackEntry::SavedBank(_) => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallStack {
    entries: Vec<StackEntry>,
    used: usize,
    capacity: usize,
    high_water: usize,
}

impl CallStack {
    /// A stack growing up from `base` towards the top of internal RAM (0xFF).
    pub fn new(base: u8) -> Self {
        Self {
            entries: Vec::new(),
            used: 0,
            capacity: 0x100 - usize::from(base),
            high_water: 0,
        }
    }

    pub fn push(&mut self, entry: StackEntry) -> Result<()> {
        let used = self.used + entry.size();
        if used > self.capacity {
            return Err(CallError::StackOverflow {
                entry,
                used: self.used,
                capacity: self.capacity,
            });
        }
        self.entries.push(entry);
        self.used = used;
        self.high_water = self.high_water.max(used);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<StackEntry> {
        let entry = self.entries.pop().ok_or(CallError::StackUnderflow)?;
        self.used -= entry.size();
        Ok(entry)
    }

    /// Pops and checks the entry against what the matching push should have left.
    pub fn pop_expect(&mut self, expected: StackEntry) -> Result<()> {
        let found = self.pop()?;
        if found != expected {
            return Err(CallError::StackCorrupted { expected, found });
        }
        Ok(())
    }

    /// Pops a saved bank selection.
    pub fn pop_bank(&mut self) -> Result<Bank> {
        match self.pop()? {
            StackEntry::SavedBank(bank) => Ok(bank),
            found => Err(CallError::StackCorrupted {
                expected: StackEntry::SavedBank(Bank::Bank0),
                found,
            }),
        }
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    /// Bytes in use.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Drops entries until only `depth` remain; used to unwind a failed call.
    pub fn truncate(&mut self, depth: usize) {
        while self.entries.len() > depth {
            if let Some(entry) = self.entries.pop() {
                self.used -= entry.size();
            }
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.used = 0;
        self.high_water = 0;
    }
}
