#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use bridgefw_core::{Bank, CodeImage, Firmware, FirmwareConfig, Routine, SlotId, STANDARD_TABLE};
use bridgefw_regs::devices::{CommandUnit, EndpointStatusBlock, W1cRegisters, WriteLog};
use bridgefw_regs::map::{
    FLASH_CMD_BLOCK, NVME_CMD_BLOCK, PHY_CMD_BLOCK, REG_FLASH_MODE, REG_PHY_CTRL,
    REG_POWER_CTRL, REG_TIMER_CTRL, REG_TIMER_STATUS,
};
use bridgefw_regs::XdataBus;

/// Base of the w1c block holding the USB, system and PCIe/NVMe interrupt status bytes.
pub const INT_STATUS_BASE: u16 = 0xC800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub slot: SlotId,
    pub param: Option<u8>,
    pub bank: Bank,
}

pub type CallLog = Rc<RefCell<Vec<Call>>>;

pub struct Rig {
    pub fw: Firmware,
    pub calls: CallLog,
    pub endpoints: Rc<RefCell<EndpointStatusBlock>>,
    pub int_status: Rc<RefCell<W1cRegisters>>,
    pub timer_status: Rc<RefCell<W1cRegisters>>,
    pub nvme: Rc<RefCell<CommandUnit>>,
    pub flash: Rc<RefCell<CommandUnit>>,
    pub phy: Rc<RefCell<CommandUnit>>,
    pub control: Rc<RefCell<WriteLog>>,
}

impl Rig {
    pub fn slots(&self) -> Vec<SlotId> {
        self.calls.borrow().iter().map(|c| c.slot).collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }
}

/// Hardware handles available to override routines before the firmware exists.
pub struct Devices {
    pub endpoints: Rc<RefCell<EndpointStatusBlock>>,
    pub int_status: Rc<RefCell<W1cRegisters>>,
    pub timer_status: Rc<RefCell<W1cRegisters>>,
    pub nvme: Rc<RefCell<CommandUnit>>,
    pub flash: Rc<RefCell<CommandUnit>>,
    pub phy: Rc<RefCell<CommandUnit>>,
    pub control: Rc<RefCell<WriteLog>>,
}

pub struct RigBuilder {
    config: FirmwareConfig,
    bus: XdataBus,
    devices: Devices,
    calls: CallLog,
    overrides: HashMap<SlotId, Routine>,
}

impl RigBuilder {
    pub fn new() -> Self {
        let mut bus = XdataBus::new();
        let endpoints = EndpointStatusBlock::map(&mut bus);
        let int_status = W1cRegisters::map(&mut bus, INT_STATUS_BASE, 0x10);
        let timer_status = W1cRegisters::map(&mut bus, REG_TIMER_STATUS, 1);
        let nvme = CommandUnit::map(&mut bus, NVME_CMD_BLOCK);
        let flash = CommandUnit::map(&mut bus, FLASH_CMD_BLOCK);
        let phy = CommandUnit::map(&mut bus, PHY_CMD_BLOCK);
        let control = Rc::new(RefCell::new(WriteLog::new()));
        for reg in [REG_POWER_CTRL, REG_PHY_CTRL, REG_TIMER_CTRL, REG_FLASH_MODE] {
            bus.register_shared(reg, 1, control.clone());
        }

        Self {
            config: FirmwareConfig::default(),
            bus,
            devices: Devices {
                endpoints,
                int_status,
                timer_status,
                nvme,
                flash,
                phy,
                control,
            },
            calls: Rc::new(RefCell::new(Vec::new())),
            overrides: HashMap::new(),
        }
    }

    pub fn config(mut self, f: impl FnOnce(&mut FirmwareConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    /// Replaces the recorder at `slot`. The replacement is recorded too.
    pub fn routine<F>(mut self, slot: SlotId, f: F) -> Self
    where
        F: Fn(&mut Firmware, Option<u8>) + 'static,
    {
        self.overrides.insert(slot, Rc::new(f));
        self
    }

    pub fn build(self) -> Rig {
        let mut image = CodeImage::new();
        for entry in STANDARD_TABLE.iter().filter(|e| !e.slot.is_core()) {
            let slot = entry.slot;
            let log = self.calls.clone();
            let inner = self.overrides.get(&slot).cloned();
            image.place(entry.target(), slot.to_string(), move |fw, param| {
                log.borrow_mut().push(Call {
                    slot,
                    param,
                    bank: fw.active_bank(),
                });
                if let Some(inner) = &inner {
                    inner(fw, param);
                }
            });
        }

        let fw = Firmware::new(Box::new(self.bus), image, STANDARD_TABLE, self.config)
            .expect("standard table links against the recorder image");
        let Devices {
            endpoints,
            int_status,
            timer_status,
            nvme,
            flash,
            phy,
            control,
        } = self.devices;
        Rig {
            fw,
            calls: self.calls,
            endpoints,
            int_status,
            timer_status,
            nvme,
            flash,
            phy,
            control,
        }
    }
}

pub fn rig() -> Rig {
    RigBuilder::new().build()
}

/// A rig that has been through `power_on` with the startup calls cleared from the log.
pub fn booted(builder: RigBuilder) -> Rig {
    let mut rig = builder.build();
    rig.fw.power_on();
    rig.clear_calls();
    rig
}
