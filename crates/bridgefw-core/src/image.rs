//! The firmware image as seen by the dispatch core: routines placed at physical image addresses.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::bank::{Bank, CodeAddr};
use crate::firmware::Firmware;

/// A handler entry point. The byte parameter is the register-passed argument some entry points
/// take (`R7` on the real core); entry points without one receive `None`.
pub type Routine = Rc<dyn Fn(&mut Firmware, Option<u8>)>;

#[derive(Clone)]
pub struct Placed {
    pub name: String,
    pub addr: CodeAddr,
    pub routine: Routine,
}

impl fmt::Debug for Placed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Placed")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CodeImage {
    routines: BTreeMap<u32, Placed>,
}

impl CodeImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `routine` at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if something is already placed at the same physical address.
    pub fn place<F>(&mut self, addr: CodeAddr, name: impl Into<String>, routine: F)
    where
        F: Fn(&mut Firmware, Option<u8>) + 'static,
    {
        self.place_shared(addr, name, Rc::new(routine));
    }

    /// [`CodeImage::place`] for a routine that is already reference counted.
    pub fn place_shared(&mut self, addr: CodeAddr, name: impl Into<String>, routine: Routine) {
        let name = name.into();
        let physical = addr.physical();
        if let Some(existing) = self.routines.get(&physical) {
            panic!(
                "code image collision at {addr}: `{name}` overlaps `{}`",
                existing.name
            );
        }
        self.routines.insert(
            physical,
            Placed {
                name,
                addr,
                routine,
            },
        );
    }

    /// Looks a routine up by its tagged address.
    pub fn get(&self, addr: CodeAddr) -> Option<&Placed> {
        self.routines.get(&addr.physical())
    }

    /// Looks a logical address up through whichever bank is mapped, as the CPU would.
    pub fn resolve(&self, logical: u16, active: Bank) -> Option<&Placed> {
        self.get(CodeAddr::resolve(logical, active))
    }

    pub fn len(&self) -> usize {
        self.routines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Placed> {
        self.routines.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_depends_on_mapped_bank() {
        let mut image = CodeImage::new();
        image.place(CodeAddr::new(Bank::Bank0, 0x8C2E), "timer_poll", |_, _| {});
        image.place(CodeAddr::new(Bank::Bank1, 0x8C2E), "flash_erase", |_, _| {});

        assert_eq!(image.resolve(0x8C2E, Bank::Bank0).unwrap().name, "timer_poll");
        assert_eq!(image.resolve(0x8C2E, Bank::Bank1).unwrap().name, "flash_erase");
    }

    #[test]
    fn common_code_resolves_in_either_bank() {
        let mut image = CodeImage::new();
        image.place(CodeAddr::Common(0x1200), "memcpy", |_, _| {});
        assert!(image.resolve(0x1200, Bank::Bank0).is_some());
        assert!(image.resolve(0x1200, Bank::Bank1).is_some());
    }

    #[test]
    #[should_panic(expected = "code image collision")]
    fn placing_twice_panics() {
        let mut image = CodeImage::new();
        image.place(CodeAddr::Common(0x1200), "a", |_, _| {});
        image.place(CodeAddr::Common(0x1200), "b", |_, _| {});
    }
}
