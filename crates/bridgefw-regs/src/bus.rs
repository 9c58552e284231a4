/// Abstraction for the controller's external data (XDATA) address space.
///
/// Hardware registers and firmware working memory share one 16-bit address space. Reads are
/// `&mut self` because many registers have side effects when read (status latches, busy counters).
///
/// Multi-byte helpers are big-endian, matching how the firmware lays out counters and addresses.
pub trait RegisterBus {
    fn read_u8(&mut self, addr: u16) -> u8;
    fn write_u8(&mut self, addr: u16, value: u8);

    fn read_u32_be(&mut self, addr: u16) -> u32 {
        let mut buf = [0u8; 4];
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_u8(addr.wrapping_add(i as u16));
        }
        u32::from_be_bytes(buf)
    }

    fn write_u32_be(&mut self, addr: u16, value: u32) {
        for (i, byte) in value.to_be_bytes().into_iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u16), byte);
        }
    }

    /// Read-modify-write: `reg |= mask`.
    fn set_bits(&mut self, addr: u16, mask: u8) {
        let v = self.read_u8(addr);
        self.write_u8(addr, v | mask);
    }

    /// Read-modify-write: `reg &= !mask`.
    ///
    /// Not suitable for write-1-to-clear registers; use [`RegisterBus::write_u8`] with the mask.
    fn clear_bits(&mut self, addr: u16, mask: u8) {
        let v = self.read_u8(addr);
        self.write_u8(addr, v & !mask);
    }

    fn fill(&mut self, start: u16, len: u16, value: u8) {
        for offset in 0..len {
            self.write_u8(start.wrapping_add(offset), value);
        }
    }
}

impl<T: RegisterBus + ?Sized> RegisterBus for Box<T> {
    fn read_u8(&mut self, addr: u16) -> u8 {
        (**self).read_u8(addr)
    }

    fn write_u8(&mut self, addr: u16, value: u8) {
        (**self).write_u8(addr, value)
    }
}
