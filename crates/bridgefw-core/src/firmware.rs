//! The firmware context: everything a running image owns, and the entry points collaborators
//! use to reach one another.

use std::collections::BTreeMap;

use bridgefw_regs::RegisterBus;
use tracing::{debug, error, info};

use crate::bank::{Bank, BankWindow};
use crate::config::FirmwareConfig;
use crate::dispatch::{DispatchEntry, DispatchTable, SlotId};
use crate::error::{BuildError, CallError, Result};
use crate::image::CodeImage;
use crate::irq::{InterruptController, InterruptEnable, IrqLine};
use crate::stack::{CallStack, ReturnSite, StackEntry};
use crate::trampoline;
use crate::{command, endpoint, router};

/// Slots run once at boot, in order, before interrupts are enabled.
pub const STARTUP_SEQUENCE: [SlotId; 4] = [
    SlotId::HW_INIT,
    SlotId::USB_INIT,
    SlotId::NVME_INIT,
    SlotId::PHY_INIT,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    calls: BTreeMap<SlotId, u64>,
    failures: u64,
}

impl DispatchStats {
    pub fn calls(&self, slot: SlotId) -> u64 {
        self.calls.get(&slot).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.values().sum()
    }

    /// Dispatches that failed and were dropped by [`Firmware::dispatch`].
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

pub struct Firmware {
    pub(crate) bus: Box<dyn RegisterBus>,
    pub(crate) config: FirmwareConfig,
    pub(crate) window: BankWindow,
    pub(crate) stack: CallStack,
    pub(crate) irq: InterruptController,
    pub(crate) table: DispatchTable,
    pub(crate) image: CodeImage,
    stats: DispatchStats,
}

impl Firmware {
    /// Links `image` against `entries` and validates the result.
    ///
    /// Routines for the slots implemented in this crate (endpoint scan, command service) are
    /// placed at their table addresses unless the image already carries something there.
    pub fn new(
        bus: Box<dyn RegisterBus>,
        mut image: CodeImage,
        entries: &[DispatchEntry],
        config: FirmwareConfig,
    ) -> std::result::Result<Self, BuildError> {
        config.validate()?;
        install_core_routines(&mut image, entries);
        let table = DispatchTable::build(entries, &image)?;
        debug!(slots = table.len(), routines = image.len(), "dispatch table built");

        Ok(Self {
            bus,
            stack: CallStack::new(config.stack.base),
            config,
            window: BankWindow::new(),
            irq: InterruptController::new(),
            table,
            image,
            stats: DispatchStats::default(),
        })
    }

    pub fn bus(&mut self) -> &mut dyn RegisterBus {
        &mut *self.bus
    }

    pub fn config(&self) -> &FirmwareConfig {
        &self.config
    }

    pub fn active_bank(&self) -> Bank {
        self.window.active()
    }

    pub fn window(&self) -> &BankWindow {
        &self.window
    }

    /// Maps `bank` directly, bypassing the trampoline.
    pub fn select_bank(&mut self, bank: Bank) {
        self.window.select(bank);
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /// The stack pointer is an ordinary register; code can and occasionally does rewrite it.
    pub fn stack_mut(&mut self) -> &mut CallStack {
        &mut self.stack
    }

    pub fn irq(&self) -> &InterruptController {
        &self.irq
    }

    pub fn irq_mut(&mut self) -> &mut InterruptController {
        &mut self.irq
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    pub fn image(&self) -> &CodeImage {
        &self.image
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn call_slot(&mut self, id: SlotId) -> Result<()> {
        self.call(id, None)
    }

    /// Calls an entry point that takes its byte argument in `R7`.
    pub fn call_slot_with(&mut self, id: SlotId, param: u8) -> Result<()> {
        self.call(id, Some(param))
    }

    /// Calls whichever slot owns the stub at logical address `addr`.
    pub fn call_stub(&mut self, addr: u16, param: Option<u8>) -> Result<()> {
        let id = self
            .table
            .by_stub(addr)
            .map(|slot| slot.id)
            .ok_or(CallError::UnknownStub(addr))?;
        self.call(id, param)
    }

    fn call(&mut self, id: SlotId, param: Option<u8>) -> Result<()> {
        let slot = *self.table.slot(id).ok_or(CallError::UnknownSlot(id))?;
        *self.stats.calls.entry(id).or_default() += 1;
        trampoline::far_call(self, &slot, param)
    }

    /// Calls `id` and drops any failure after logging it. Used wherever the caller has no way to
    /// act on a defect: the main loop, the interrupt router, the scheduler.
    pub fn dispatch(&mut self, id: SlotId) {
        if let Err(err) = self.call(id, None) {
            self.dispatch_failed(id, err);
        }
    }

    pub fn dispatch_with(&mut self, id: SlotId, param: u8) {
        if let Err(err) = self.call(id, Some(param)) {
            self.dispatch_failed(id, err);
        }
    }

    fn dispatch_failed(&mut self, id: SlotId, err: CallError) {
        self.stats.failures += 1;
        error!(slot = %id, %err, "dispatch failed");
    }

    /// Latches an edge on `line`; it is taken at the next preemption point.
    pub fn raise_irq(&mut self, line: IrqLine) {
        self.irq.raise(line);
    }

    /// Preemption point: vectors to every interrupt that is deliverable right now.
    ///
    /// Called between main-loop steps and on every busy-wait iteration. A handler may itself hit
    /// preemption points, where only a higher-priority line can get in.
    pub fn poll_point(&mut self) {
        while let Some(line) = self.irq.next_deliverable() {
            self.service_interrupt(line);
        }
    }

    fn service_interrupt(&mut self, line: IrqLine) {
        self.irq.acknowledge(line);
        let depth = self.stack.depth();
        let bank = self.window.active();
        debug!(%line, %bank, depth, "interrupt entry");

        let result = self.interrupt_frame(line, bank);
        if let Err(err) = result {
            error!(%line, %err, "interrupt frame corrupted");
            self.stack.truncate(depth);
            self.window.select(bank);
        }

        self.irq.complete(line);
        debug!(%line, "interrupt exit");
    }

    fn interrupt_frame(&mut self, line: IrqLine, bank: Bank) -> Result<()> {
        self.stack.push(StackEntry::Return(ReturnSite::Interrupt))?;
        self.stack.push(StackEntry::SavedBank(bank))?;
        router::route(self, line);
        let saved = self.stack.pop_bank()?;
        self.window.select(saved);
        self.stack.pop_expect(StackEntry::Return(ReturnSite::Interrupt))
    }

    /// Runs `f` with `EA` cleared, then puts `EA` back the way it was.
    ///
    /// Pending edges stay latched and are taken at the next preemption point after the section.
    pub fn critical_section<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_enabled = self.irq.globally_enabled();
        self.irq.set_global(false);
        let result = f(self);
        self.irq.set_global(was_enabled);
        result
    }

    /// Reset vector up to the point where the main loop takes over.
    pub fn power_on(&mut self) {
        let work_ram = self.config.work_ram;
        self.bus.fill(work_ram.start, work_ram.len, 0);
        self.stack.reset();
        self.window.select(Bank::Bank0);
        self.irq.reset();
        self.irq
            .set_priority(self.config.interrupt_priority.priority_bit());
        info!(
            work_ram_len = work_ram.len,
            stack_capacity = self.stack.capacity(),
            "power on"
        );

        for slot in STARTUP_SEQUENCE {
            self.dispatch(slot);
        }

        self.irq
            .set_enable(InterruptEnable::EA | InterruptEnable::EX0 | InterruptEnable::EX1);
        info!("startup complete, interrupts enabled");
    }

    /// Powers on and never comes back.
    pub fn boot(mut self) -> ! {
        self.power_on();
        self.run()
    }
}

/// Places this crate's routines at the addresses `entries` assigns them.
fn install_core_routines(image: &mut CodeImage, entries: &[DispatchEntry]) {
    for entry in entries {
        let target = entry.target();
        if image.get(target).is_some() {
            continue;
        }
        match entry.slot {
            SlotId::ENDPOINT_SCAN => image.place(target, "endpoint_scan", endpoint::scan_routine),
            SlotId::COMMAND_SERVICE => {
                image.place(target, "command_service", command::service_routine)
            }
            _ => {}
        }
    }
}
