//! Host-side board for the bridge firmware core.
//!
//! A [`Board`] maps the register models onto an XDATA bus, links stand-in collaborator routines
//! at their dispatch-table addresses and drives the firmware one main-loop pass at a time.
//! Hardware events are injected as [`Stimulus`] values between passes.
#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;

use bridgefw_core::main_loop::PassSummary;
use bridgefw_core::{BuildError, CodeImage, Firmware, FirmwareConfig, STANDARD_TABLE};
use bridgefw_regs::devices::{CommandUnit, EndpointStatusBlock, W1cRegisters, WriteLog};
use bridgefw_regs::map::{
    FLASH_CMD_BLOCK, G_RECOVERY_COUNT, NVME_CMD_BLOCK, PHY_CMD_BLOCK, REG_FLASH_MODE, REG_PHY_CTRL,
    REG_POWER_CTRL, REG_TIMER_CTRL, REG_TIMER_STATUS,
};
use bridgefw_regs::XdataBus;
use serde::Serialize;
use tracing::{debug, info};

mod collaborators;
mod settings;
mod stimulus;

pub use collaborators::{Activity, ActivityLog};
pub use settings::{parse_config, parse_script, SimSettings};
pub use stimulus::{Script, ScriptStep, Stimulus, Unit};

/// Base of the write-1-to-clear block holding the USB, system and PCIe/NVMe interrupt status.
pub const INT_STATUS_BASE: u16 = 0xC800;
pub const INT_STATUS_LEN: u16 = 0x10;

/// Shared handles to every modelled register block.
#[derive(Clone)]
pub struct Devices {
    pub endpoints: Rc<RefCell<EndpointStatusBlock>>,
    pub int_status: Rc<RefCell<W1cRegisters>>,
    pub timer_status: Rc<RefCell<W1cRegisters>>,
    pub nvme: Rc<RefCell<CommandUnit>>,
    pub flash: Rc<RefCell<CommandUnit>>,
    pub phy: Rc<RefCell<CommandUnit>>,
    /// Power, PHY, timer and flash-mode control registers.
    pub control: Rc<RefCell<WriteLog>>,
}

impl Devices {
    pub fn unit(&self, unit: Unit) -> &Rc<RefCell<CommandUnit>> {
        match unit {
            Unit::Nvme => &self.nvme,
            Unit::Flash => &self.flash,
            Unit::Phy => &self.phy,
        }
    }

    fn map(bus: &mut XdataBus) -> Self {
        let control = Rc::new(RefCell::new(WriteLog::new()));
        for reg in [REG_POWER_CTRL, REG_PHY_CTRL, REG_TIMER_CTRL, REG_FLASH_MODE] {
            bus.register_shared(reg, 1, control.clone());
        }
        Self {
            endpoints: EndpointStatusBlock::map(bus),
            int_status: W1cRegisters::map(bus, INT_STATUS_BASE, INT_STATUS_LEN),
            timer_status: W1cRegisters::map(bus, REG_TIMER_STATUS, 1),
            nvme: CommandUnit::map(bus, NVME_CMD_BLOCK),
            flash: CommandUnit::map(bus, FLASH_CMD_BLOCK),
            phy: CommandUnit::map(bus, PHY_CMD_BLOCK),
            control,
        }
    }
}

/// End-of-run counters, serialized by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub passes: u64,
    pub dispatches: u64,
    pub dispatch_failures: u64,
    pub endpoint_services: usize,
    pub commands_issued: usize,
    pub recoveries: u8,
    pub stack_high_water: usize,
    pub bank_switches: u64,
}

pub struct Board {
    fw: Firmware,
    devices: Devices,
    activity: ActivityLog,
    passes: u64,
}

impl Board {
    pub fn new(config: FirmwareConfig) -> Result<Self, BuildError> {
        let mut bus = XdataBus::new();
        let devices = Devices::map(&mut bus);
        let activity = ActivityLog::default();

        let mut image = CodeImage::new();
        collaborators::install(&mut image, &activity);

        let fw = Firmware::new(Box::new(bus), image, STANDARD_TABLE, config)?;
        Ok(Self {
            fw,
            devices,
            activity,
            passes: 0,
        })
    }

    pub fn firmware(&mut self) -> &mut Firmware {
        &mut self.fw
    }

    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Reset vector through startup; interrupts are live afterwards.
    pub fn power_on(&mut self) {
        self.passes = 0;
        self.fw.power_on();
    }

    pub fn inject(&mut self, stimulus: &Stimulus) {
        debug!(?stimulus, "inject");
        stimulus.apply(&mut self.fw, &self.devices);
    }

    pub fn run_pass(&mut self) -> PassSummary {
        self.passes += 1;
        self.fw.run_pass()
    }

    /// Runs `passes` passes, injecting each scripted stimulus before the pass it names.
    pub fn run_script(&mut self, script: &Script, passes: u64) -> Vec<PassSummary> {
        let mut summaries = Vec::new();
        for pass in 0..passes {
            for step in script.steps.iter().filter(|s| s.pass == pass) {
                self.inject(&step.stimulus);
            }
            summaries.push(self.run_pass());
        }
        info!(passes, "script finished");
        summaries
    }

    pub fn report(&mut self) -> RunReport {
        let recoveries = self.fw.bus().read_u8(G_RECOVERY_COUNT);
        let commands_issued = [&self.devices.nvme, &self.devices.flash, &self.devices.phy]
            .iter()
            .map(|unit| unit.borrow().issued().len())
            .sum();
        RunReport {
            passes: self.passes,
            dispatches: self.fw.stats().total_calls(),
            dispatch_failures: self.fw.stats().failures(),
            endpoint_services: self.devices.endpoints.borrow().clears().len(),
            commands_issued,
            recoveries,
            stack_high_water: self.fw.stack().high_water(),
            bank_switches: self.fw.window().switches(),
        }
    }
}
