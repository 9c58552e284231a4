//! Cross-bank call primitive.
//!
//! Both conventions leave the same frame on the stack, innermost last:
//!
//! ```text
//! Return(Caller)        pushed by the caller's LCALL into the stub
//! SavedBank(caller)     pushed by the stub
//! Return(StubResume)    CallReturn: pushed by the stub's LCALL into the target
//! Return(BankRestore)   TailJump:   pushed by the stub before its LJMP into the target
//! ```
//!
//! The target's `RET` pops the last entry. For `CallReturn` that resumes the stub, which restores
//! the bank; for `TailJump` it lands in the shared bank-restore epilogue. Either way the saved
//! bank comes off before control reaches the caller, so restoration is LIFO with call depth.

use tracing::trace;

use crate::bank::Bank;
use crate::dispatch::{CallConvention, DispatchSlot};
use crate::error::{CallError, Result};
use crate::firmware::Firmware;
use crate::stack::{ReturnSite, StackEntry};

impl CallConvention {
    /// What the target's `RET` pops.
    pub fn return_site(self) -> ReturnSite {
        match self {
            CallConvention::CallReturn => ReturnSite::StubResume,
            CallConvention::TailJump => ReturnSite::BankRestore,
        }
    }
}

/// Where control enters the restore code after the target returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestoreEntry {
    /// Tail of the dispatch stub.
    Stub,
    /// Common epilogue reached by a tail-jump target's own `RET`.
    Epilogue,
}

/// Invokes `slot` through its stub and returns with the caller's bank mapped again.
///
/// On error the frame pushed here is unwound and the caller's bank reselected, so a failed call
/// leaves the stack and window as it found them.
pub fn far_call(fw: &mut Firmware, slot: &DispatchSlot, param: Option<u8>) -> Result<()> {
    let depth = fw.stack.depth();
    let caller_bank = fw.window.active();

    let result = enter(fw, slot, param, caller_bank);
    if result.is_err() {
        fw.stack.truncate(depth);
        fw.window.select(caller_bank);
    }
    result
}

fn enter(fw: &mut Firmware, slot: &DispatchSlot, param: Option<u8>, caller_bank: Bank) -> Result<()> {
    fw.stack.push(StackEntry::Return(ReturnSite::Caller))?;
    fw.stack.push(StackEntry::SavedBank(caller_bank))?;

    if let Some(bank) = slot.target.bank() {
        fw.window.select(bank);
    }

    let logical = slot.target.logical();
    let active = fw.window.active();
    let routine = fw
        .image
        .resolve(logical, active)
        .map(|placed| placed.routine.clone())
        .ok_or(CallError::Unresolved { addr: logical, bank: active })?;

    let site = slot.convention.return_site();
    fw.stack.push(StackEntry::Return(site))?;

    trace!(slot = %slot.id, target = %slot.target, ?param, depth = fw.stack.depth(), "far call");
    routine(fw, param);

    fw.stack.pop_expect(StackEntry::Return(site))?;
    let entry = match slot.convention {
        CallConvention::CallReturn => RestoreEntry::Stub,
        CallConvention::TailJump => RestoreEntry::Epilogue,
    };
    restore(fw, entry)
}

/// Pops the saved bank, maps it, and returns to the caller.
fn restore(fw: &mut Firmware, entry: RestoreEntry) -> Result<()> {
    let bank = fw.stack.pop_bank()?;
    fw.window.select(bank);
    trace!(?entry, %bank, "bank restored");
    fw.stack.pop_expect(StackEntry::Return(ReturnSite::Caller))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use bridgefw_regs::XdataBus;

    use super::*;
    use crate::bank::CodeAddr;
    use crate::config::FirmwareConfig;
    use crate::dispatch::{DispatchEntry, SlotId};
    use crate::image::CodeImage;

    const OUTER: SlotId = SlotId(100);
    const INNER: SlotId = SlotId(101);

    fn firmware(image: CodeImage, entries: &[DispatchEntry]) -> Firmware {
        Firmware::new(Box::new(XdataBus::new()), image, entries, FirmwareConfig::default()).unwrap()
    }

    #[test]
    fn nested_calls_restore_each_callers_bank() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut image = CodeImage::new();

        let s = seen.clone();
        image.place(CodeAddr::new(Bank::Bank1, 0x9000), "outer", move |fw, _| {
            s.borrow_mut().push(("outer", fw.active_bank()));
            fw.call_slot(INNER).unwrap();
            s.borrow_mut().push(("outer after", fw.active_bank()));
        });
        let s = seen.clone();
        image.place(CodeAddr::new(Bank::Bank0, 0x9000), "inner", move |fw, _| {
            s.borrow_mut().push(("inner", fw.active_bank()));
        });

        let entries = [
            DispatchEntry::new(OUTER, Bank::Bank1, 0x9000, CallConvention::CallReturn),
            DispatchEntry::new(INNER, Bank::Bank0, 0x9000, CallConvention::TailJump),
        ];
        let mut fw = firmware(image, &entries);
        fw.call_slot(OUTER).unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![
                ("outer", Bank::Bank1),
                ("inner", Bank::Bank0),
                ("outer after", Bank::Bank1),
            ]
        );
        assert_eq!(fw.active_bank(), Bank::Bank0);
        assert_eq!(fw.stack().depth(), 0);
        assert_eq!(fw.stack().high_water(), 10);
    }

    #[test]
    fn target_that_returns_through_the_wrong_site_is_stack_corruption() {
        let mut image = CodeImage::new();
        // Behaves as if it were entered by LCALL: swaps the epilogue address for a stub resume.
        image.place(CodeAddr::new(Bank::Bank1, 0xA000), "confused", |fw, _| {
            fw.stack_mut().pop().unwrap();
            fw.stack_mut()
                .push(StackEntry::Return(ReturnSite::StubResume))
                .unwrap();
        });
        let entries = [DispatchEntry::new(OUTER, Bank::Bank1, 0xA000, CallConvention::TailJump)];
        let mut fw = firmware(image, &entries);

        let err = fw.call_slot(OUTER).unwrap_err();
        assert_eq!(
            err,
            CallError::StackCorrupted {
                expected: StackEntry::Return(ReturnSite::BankRestore),
                found: StackEntry::Return(ReturnSite::StubResume),
            }
        );
        assert_eq!(fw.stack().depth(), 0);
        assert_eq!(fw.active_bank(), Bank::Bank0);
    }

    #[test]
    fn overflow_unwinds_and_restores() {
        let mut image = CodeImage::new();
        image.place(CodeAddr::new(Bank::Bank1, 0x9000), "recurse", |fw, _| {
            // Recursion only stops when the stack runs out.
            let _ = fw.call_slot(OUTER);
        });
        let entries = [DispatchEntry::new(OUTER, Bank::Bank1, 0x9000, CallConvention::CallReturn)];
        let mut cfg = FirmwareConfig::default();
        cfg.stack.base = 0xF0;
        let mut fw =
            Firmware::new(Box::new(XdataBus::new()), image, &entries, cfg).unwrap();

        fw.call_slot(OUTER).unwrap();
        assert_eq!(fw.stack().depth(), 0);
        assert_eq!(fw.active_bank(), Bank::Bank0);
        assert_eq!(fw.stack().high_water(), 15);
    }
}
