//! Behavioural models of the register blocks the dispatch core talks to.
//!
//! These stand in for silicon on the host: they implement the bit semantics the core relies on
//! (write-1-to-clear status, self-clearing triggers, busy flags with programmable latency) and
//! record what the firmware did so tests can assert on it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::map::{
    CommandCtrl, CommandStatus, Trigger, CMD_OFF_ADDR, CMD_OFF_CTRL, CMD_OFF_OPCODE, CMD_OFF_PARAM,
    CMD_OFF_STATUS, CMD_OFF_TAG, CMD_OFF_TRIGGER, COMMAND_BLOCK_LEN, ENDPOINT_COUNT,
    REG_EP_SECONDARY_BASE, REG_EP_STATUS,
};
use crate::xdata::{XdataBus, XdataDevice};

/// A run of write-1-to-clear status bytes.
///
/// Hardware raises bits with [`W1cRegisters::assert_bits`]; firmware clears them by writing the
/// mask back.
#[derive(Debug, Clone)]
pub struct W1cRegisters {
    base: u16,
    bytes: Vec<u8>,
}

impl W1cRegisters {
    pub fn new(base: u16, len: u16) -> Self {
        Self {
            base,
            bytes: vec![0; usize::from(len)],
        }
    }

    pub fn map(bus: &mut XdataBus, base: u16, len: u16) -> Rc<RefCell<Self>> {
        bus.register_shared(base, len, Rc::new(RefCell::new(Self::new(base, len))))
    }

    fn index(&self, addr: u16) -> usize {
        usize::from(addr.wrapping_sub(self.base))
    }

    pub fn assert_bits(&mut self, addr: u16, mask: u8) {
        let idx = self.index(addr);
        self.bytes[idx] |= mask;
    }

    pub fn value(&self, addr: u16) -> u8 {
        self.bytes[self.index(addr)]
    }
}

impl XdataDevice for W1cRegisters {
    fn read(&mut self, addr: u16) -> u8 {
        self.value(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        let idx = self.index(addr);
        self.bytes[idx] &= !value;
    }

    fn reset(&mut self) {
        self.bytes.fill(0);
    }
}

/// Endpoint status block: the primary bitmap at [`REG_EP_STATUS`] plus eight secondary status
/// registers starting at [`REG_EP_SECONDARY_BASE`].
///
/// The primary register is derived from the secondaries (bit N is set while endpoint N has any
/// secondary bit pending) unless a test forces a raw value. Secondary registers are
/// write-1-to-clear; every clear is logged.
#[derive(Debug, Default, Clone)]
pub struct EndpointStatusBlock {
    secondary: [u8; ENDPOINT_COUNT],
    primary_override: Option<u8>,
    clears: Vec<(u8, u8)>,
    primary_reads: u32,
}

impl EndpointStatusBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps the block at its fixed addresses and returns the shared handle.
    pub fn map(bus: &mut XdataBus) -> Rc<RefCell<Self>> {
        let block = Rc::new(RefCell::new(Self::new()));
        bus.register_shared(REG_EP_STATUS, 1, block.clone());
        bus.register_shared(REG_EP_SECONDARY_BASE, ENDPOINT_COUNT as u16, block)
    }

    pub fn raise(&mut self, endpoint: usize, mask: u8) {
        self.secondary[endpoint] |= mask;
    }

    /// Forces the primary register to read as `value` regardless of secondary state.
    pub fn force_primary(&mut self, value: Option<u8>) {
        self.primary_override = value;
    }

    pub fn primary(&self) -> u8 {
        if let Some(v) = self.primary_override {
            return v;
        }
        self.secondary
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != 0)
            .fold(0u8, |acc, (i, _)| acc | (1 << i))
    }

    pub fn secondary(&self, endpoint: usize) -> u8 {
        self.secondary[endpoint]
    }

    /// `(endpoint, mask)` for every write to a secondary register, in order.
    pub fn clears(&self) -> &[(u8, u8)] {
        &self.clears
    }

    pub fn primary_reads(&self) -> u32 {
        self.primary_reads
    }
}

impl XdataDevice for EndpointStatusBlock {
    fn read(&mut self, addr: u16) -> u8 {
        if addr == REG_EP_STATUS {
            self.primary_reads += 1;
            return self.primary();
        }
        self.secondary[usize::from(addr - REG_EP_SECONDARY_BASE)]
    }

    fn write(&mut self, addr: u16, value: u8) {
        if addr == REG_EP_STATUS {
            return;
        }
        let ep = addr - REG_EP_SECONDARY_BASE;
        self.secondary[usize::from(ep)] &= !value;
        self.clears.push((ep as u8, value));
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Fields latched when firmware asserts the trigger bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedCommand {
    pub opcode: u8,
    pub param: u8,
    pub tag: u8,
    pub address: u32,
}

/// Latency of one command-unit phase, counted in register reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    /// The bit is observed set on the first `n` reads and clear from read `n + 1` onwards.
    Reads(u32),
    /// The bit never clears on its own.
    Never,
}

impl Latency {
    fn elapsed(self, reads: u32) -> bool {
        match self {
            Latency::Reads(n) => reads > n,
            Latency::Never => false,
        }
    }
}

/// A command block (NVMe submission, flash transaction, PHY settle) laid out as described in
/// [`crate::map`].
///
/// Writing `Trigger::START` latches the fields, sets `START` in the trigger register and `BUSY`
/// in the status register. `START` self-clears after `accept` reads of the trigger register;
/// `BUSY` clears after `complete` reads of the status register. Writing `CommandCtrl::ABORT`
/// drops both immediately.
#[derive(Debug, Clone)]
pub struct CommandUnit {
    base: u16,
    regs: [u8; COMMAND_BLOCK_LEN as usize],
    accept: Latency,
    complete: Latency,
    fail_next: bool,
    trigger_reads: u32,
    status_reads: u32,
    issued: Vec<IssuedCommand>,
    aborts: u32,
    enables: u32,
}

impl CommandUnit {
    pub fn new(base: u16) -> Self {
        Self {
            base,
            regs: [0; COMMAND_BLOCK_LEN as usize],
            accept: Latency::Reads(0),
            complete: Latency::Reads(0),
            fail_next: false,
            trigger_reads: 0,
            status_reads: 0,
            issued: Vec::new(),
            aborts: 0,
            enables: 0,
        }
    }

    pub fn map(bus: &mut XdataBus, base: u16) -> Rc<RefCell<Self>> {
        bus.register_shared(base, COMMAND_BLOCK_LEN, Rc::new(RefCell::new(Self::new(base))))
    }

    pub fn set_latency(&mut self, accept: Latency, complete: Latency) {
        self.accept = accept;
        self.complete = complete;
    }

    /// The next command completes with `CommandStatus::ERROR` set.
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }

    pub fn issued(&self) -> &[IssuedCommand] {
        &self.issued
    }

    pub fn status_reads(&self) -> u32 {
        self.status_reads
    }

    pub fn trigger_reads(&self) -> u32 {
        self.trigger_reads
    }

    pub fn aborts(&self) -> u32 {
        self.aborts
    }

    pub fn enables(&self) -> u32 {
        self.enables
    }

    pub fn status(&self) -> CommandStatus {
        CommandStatus::from_bits_truncate(self.regs[CMD_OFF_STATUS as usize])
    }

    pub fn trigger(&self) -> Trigger {
        Trigger::from_bits_truncate(self.regs[CMD_OFF_TRIGGER as usize])
    }

    fn reg(&self, off: u16) -> u8 {
        self.regs[usize::from(off)]
    }

    fn start(&mut self) {
        let a = usize::from(CMD_OFF_ADDR);
        let address = u32::from_be_bytes([
            self.regs[a],
            self.regs[a + 1],
            self.regs[a + 2],
            self.regs[a + 3],
        ]);
        self.issued.push(IssuedCommand {
            opcode: self.reg(CMD_OFF_OPCODE),
            param: self.reg(CMD_OFF_PARAM),
            tag: self.reg(CMD_OFF_TAG),
            address,
        });
        self.regs[CMD_OFF_TRIGGER as usize] |= Trigger::START.bits();
        self.regs[CMD_OFF_STATUS as usize] |= CommandStatus::BUSY.bits();
        self.trigger_reads = 0;
        self.status_reads = 0;
    }

    fn abort(&mut self) {
        self.aborts += 1;
        self.regs[CMD_OFF_TRIGGER as usize] &= !Trigger::START.bits();
        self.regs[CMD_OFF_STATUS as usize] &= !CommandStatus::BUSY.bits();
    }
}

impl XdataDevice for CommandUnit {
    fn read(&mut self, addr: u16) -> u8 {
        let off = addr.wrapping_sub(self.base);
        match off {
            CMD_OFF_TRIGGER => {
                if self.trigger().contains(Trigger::START) {
                    self.trigger_reads += 1;
                    if self.accept.elapsed(self.trigger_reads) {
                        self.regs[CMD_OFF_TRIGGER as usize] &= !Trigger::START.bits();
                    }
                }
            }
            CMD_OFF_STATUS => {
                if self.status().contains(CommandStatus::BUSY) {
                    self.status_reads += 1;
                    if self.complete.elapsed(self.status_reads) {
                        let status = &mut self.regs[CMD_OFF_STATUS as usize];
                        *status &= !CommandStatus::BUSY.bits();
                        if std::mem::take(&mut self.fail_next) {
                            *status |= CommandStatus::ERROR.bits();
                        }
                    }
                }
            }
            _ => {}
        }
        self.reg(off)
    }

    fn write(&mut self, addr: u16, value: u8) {
        let off = addr.wrapping_sub(self.base);
        match off {
            CMD_OFF_TRIGGER => {
                if value & Trigger::START.bits() != 0 {
                    self.start();
                } else {
                    self.regs[CMD_OFF_TRIGGER as usize] = value;
                }
            }
            // Write 1 to clear.
            CMD_OFF_STATUS => self.regs[CMD_OFF_STATUS as usize] &= !value,
            CMD_OFF_CTRL => {
                let ctrl = CommandCtrl::from_bits_truncate(value);
                if ctrl.contains(CommandCtrl::ABORT) {
                    self.abort();
                }
                if ctrl.contains(CommandCtrl::ENABLE) {
                    self.enables += 1;
                }
                self.regs[CMD_OFF_CTRL as usize] = value & !CommandCtrl::ABORT.bits();
            }
            _ => self.regs[usize::from(off)] = value,
        }
    }

    fn reset(&mut self) {
        let (accept, complete) = (self.accept, self.complete);
        *self = Self::new(self.base);
        self.accept = accept;
        self.complete = complete;
    }
}

/// Plain storage that remembers every write, for registers whose write *sequence* matters
/// (power/PHY/timer toggles during recovery).
#[derive(Debug, Default, Clone)]
pub struct WriteLog {
    values: HashMap<u16, u8>,
    writes: Vec<(u16, u8)>,
}

impl WriteLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> &[(u16, u8)] {
        &self.writes
    }

    /// Writes to `addr` only, in order.
    pub fn writes_to(&self, addr: u16) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl XdataDevice for WriteLog {
    fn read(&mut self, addr: u16) -> u8 {
        self.values.get(&addr).copied().unwrap_or(0)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.values.insert(addr, value);
        self.writes.push((addr, value));
    }

    fn reset(&mut self) {
        self.values.clear();
        self.writes.clear();
    }
}
