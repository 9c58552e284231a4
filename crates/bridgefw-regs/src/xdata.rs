use std::cell::RefCell;
use std::rc::Rc;

use crate::bus::RegisterBus;

pub const XDATA_SIZE: usize = 0x1_0000;

/// A hardware block that claims a range of XDATA addresses.
///
/// `addr` is always the absolute XDATA address, not an offset into the range.
pub trait XdataDevice {
    fn read(&mut self, addr: u16) -> u8;
    fn write(&mut self, addr: u16, value: u8);

    /// Reset the device back to its power-on state.
    fn reset(&mut self) {}
}

/// Lets one device instance be mapped at several ranges and inspected by the harness.
impl<D: XdataDevice> XdataDevice for Rc<RefCell<D>> {
    fn read(&mut self, addr: u16) -> u8 {
        self.borrow_mut().read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.borrow_mut().write(addr, value)
    }

    fn reset(&mut self) {
        self.borrow_mut().reset()
    }
}

struct RangeDevice {
    start: u16,
    len: u16,
    dev: Box<dyn XdataDevice>,
}

impl RangeDevice {
    fn end_exclusive(&self) -> u32 {
        u32::from(self.start) + u32::from(self.len)
    }

    fn contains(&self, addr: u16) -> bool {
        let a = u32::from(addr);
        a >= u32::from(self.start) && a < self.end_exclusive()
    }
}

/// Flat 64KB XDATA space backed by RAM, with device ranges layered on top.
///
/// Unclaimed addresses behave as plain RAM; this covers firmware globals and any register the
/// harness does not care to model.
pub struct XdataBus {
    ram: Box<[u8]>,
    ranges: Vec<RangeDevice>,
}

impl XdataBus {
    pub fn new() -> Self {
        Self {
            ram: vec![0u8; XDATA_SIZE].into_boxed_slice(),
            ranges: Vec::new(),
        }
    }

    /// Registers a single device over a contiguous address range.
    ///
    /// # Panics
    ///
    /// Panics if the range is empty, wraps past 0xFFFF, or overlaps an existing range.
    pub fn register_range(&mut self, start: u16, len: u16, dev: Box<dyn XdataDevice>) {
        assert!(len != 0, "XDATA range length must be non-zero");

        let end_exclusive = u32::from(start) + u32::from(len);
        assert!(
            end_exclusive <= XDATA_SIZE as u32,
            "XDATA range wraps past 0xFFFF: start={start:#x} len={len:#x}"
        );

        let idx = self.ranges.partition_point(|r| r.start < start);

        if let Some(prev) = self.ranges.get(idx.wrapping_sub(1)) {
            assert!(
                u32::from(start) >= prev.end_exclusive(),
                "overlapping XDATA ranges: new=[{start:#x}..{end_exclusive:#x}) prev=[{:#x}..{:#x})",
                prev.start,
                prev.end_exclusive()
            );
        }
        if let Some(next) = self.ranges.get(idx) {
            assert!(
                end_exclusive <= u32::from(next.start),
                "overlapping XDATA ranges: new=[{start:#x}..{end_exclusive:#x}) next=[{:#x}..{:#x})",
                next.start,
                next.end_exclusive()
            );
        }

        self.ranges.insert(idx, RangeDevice { start, len, dev });
    }

    /// Maps a shared device at `start..start+len` and returns the handle back for inspection.
    pub fn register_shared<D>(&mut self, start: u16, len: u16, dev: Rc<RefCell<D>>) -> Rc<RefCell<D>>
    where
        D: XdataDevice + 'static,
    {
        self.register_range(start, len, Box::new(dev.clone()));
        dev
    }

    /// Unregister a range device previously registered at exactly `(start, len)`.
    pub fn unregister_range(&mut self, start: u16, len: u16) -> Option<Box<dyn XdataDevice>> {
        let idx = self.ranges.partition_point(|r| r.start < start);
        let cand = self.ranges.get(idx)?;
        if cand.start != start || cand.len != len {
            return None;
        }
        Some(self.ranges.remove(idx).dev)
    }

    fn find_range_index(&self, addr: u16) -> Option<usize> {
        let idx = self.ranges.partition_point(|r| r.start <= addr);
        if idx == 0 {
            return None;
        }
        let cand = idx - 1;
        self.ranges
            .get(cand)
            .is_some_and(|r| r.contains(addr))
            .then_some(cand)
    }

    /// Reset every mapped device and clear RAM.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        for range in &mut self.ranges {
            range.dev.reset();
        }
    }
}

impl Default for XdataBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for XdataBus {
    fn read_u8(&mut self, addr: u16) -> u8 {
        match self.find_range_index(addr) {
            Some(idx) => self.ranges[idx].dev.read(addr),
            None => self.ram[usize::from(addr)],
        }
    }

    fn write_u8(&mut self, addr: u16, value: u8) {
        match self.find_range_index(addr) {
            Some(idx) => self.ranges[idx].dev.write(addr, value),
            None => self.ram[usize::from(addr)] = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(u8);

    impl XdataDevice for Constant {
        fn read(&mut self, _addr: u16) -> u8 {
            self.0
        }

        fn write(&mut self, _addr: u16, value: u8) {
            self.0 = value;
        }
    }

    #[test]
    fn unclaimed_addresses_are_ram() {
        let mut bus = XdataBus::new();
        bus.write_u8(0x0123, 0xA5);
        assert_eq!(bus.read_u8(0x0123), 0xA5);
        assert_eq!(bus.read_u8(0x0124), 0x00);
    }

    #[test]
    fn range_device_shadows_ram() {
        let mut bus = XdataBus::new();
        bus.register_range(0xC800, 0x10, Box::new(Constant(0x5A)));
        assert_eq!(bus.read_u8(0xC800), 0x5A);
        assert_eq!(bus.read_u8(0xC80F), 0x5A);
        assert_eq!(bus.read_u8(0xC810), 0x00);

        bus.write_u8(0xC805, 0x11);
        assert_eq!(bus.read_u8(0xC800), 0x11);
    }

    #[test]
    fn big_endian_helpers_match_firmware_layout() {
        let mut bus = XdataBus::new();
        bus.write_u32_be(0x0A64, 0x0005_D000);
        assert_eq!(bus.read_u8(0x0A64), 0x00);
        assert_eq!(bus.read_u8(0x0A65), 0x05);
        assert_eq!(bus.read_u8(0x0A66), 0xD0);
        assert_eq!(bus.read_u8(0x0A67), 0x00);
        assert_eq!(bus.read_u32_be(0x0A64), 0x0005_D000);
    }

    #[test]
    #[should_panic(expected = "overlapping XDATA ranges")]
    fn overlapping_ranges_are_rejected() {
        let mut bus = XdataBus::new();
        bus.register_range(0x9000, 0x10, Box::new(Constant(0)));
        bus.register_range(0x900F, 0x02, Box::new(Constant(0)));
    }

    #[test]
    fn unregister_returns_exact_match_only() {
        let mut bus = XdataBus::new();
        bus.register_range(0x9000, 0x10, Box::new(Constant(7)));
        assert!(bus.unregister_range(0x9000, 0x08).is_none());
        assert!(bus.unregister_range(0x9000, 0x10).is_some());
        assert_eq!(bus.read_u8(0x9000), 0);
    }
}
