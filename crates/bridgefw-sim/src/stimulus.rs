use bridgefw_core::{Firmware, IrqLine};
use bridgefw_regs::devices::Latency;
use bridgefw_regs::map::{
    SystemState, G_SYSTEM_STATE, INT_NVME_QUEUE, INT_PCIE_EVENT, INT_PCIE_LINK,
    INT_SYSTEM_EVENT, INT_SYSTEM_POWER, INT_USB_CBW, INT_USB_LINK, INT_USB_MASTER,
    REG_INT_PCIE_NVME, REG_INT_SYSTEM, REG_INT_USB_STATUS, REG_TIMER_STATUS,
    REG_USB_PERIPH_STATUS, TIMER_STATUS_TICK, USB_PERIPH_MASTER_READY,
};
use serde::{Deserialize, Serialize};

use crate::Devices;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Nvme,
    Flash,
    Phy,
}

/// A hardware event, as seen from the register side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Stimulus {
    /// Secondary condition `mask` on `endpoint`, signalled through the USB master interrupt.
    EndpointReady { endpoint: u8, mask: u8 },
    Cbw,
    UsbLink,
    SystemEvent,
    NvmeQueue,
    PcieEvent,
    PcieLink,
    Power,
    TimerTick,
    /// Sets the master-dispatch-ready flag without raising an interrupt.
    MasterReady,
    /// Posts deferred endpoint work for the main loop to pick up.
    DeferEndpoint,
    /// The unit stops completing commands.
    Stall { unit: Unit },
    /// The unit completes commands after `reads` status reads.
    Release { unit: Unit, reads: u32 },
}

impl Stimulus {
    pub fn apply(&self, fw: &mut Firmware, devices: &Devices) {
        let latch = |reg, mask| devices.int_status.borrow_mut().assert_bits(reg, mask);
        match *self {
            Stimulus::EndpointReady { endpoint, mask } => {
                devices
                    .endpoints
                    .borrow_mut()
                    .raise(usize::from(endpoint) % 8, mask);
                latch(REG_INT_USB_STATUS, INT_USB_MASTER);
                fw.raise_irq(IrqLine::Endpoint);
            }
            Stimulus::Cbw => {
                latch(REG_INT_USB_STATUS, INT_USB_CBW);
                fw.raise_irq(IrqLine::Endpoint);
            }
            Stimulus::UsbLink => {
                latch(REG_INT_USB_STATUS, INT_USB_LINK);
                fw.raise_irq(IrqLine::Endpoint);
            }
            Stimulus::SystemEvent => {
                latch(REG_INT_SYSTEM, INT_SYSTEM_EVENT);
                fw.raise_irq(IrqLine::Endpoint);
            }
            Stimulus::NvmeQueue => {
                latch(REG_INT_PCIE_NVME, INT_NVME_QUEUE);
                fw.raise_irq(IrqLine::System);
            }
            Stimulus::PcieEvent => {
                latch(REG_INT_PCIE_NVME, INT_PCIE_EVENT);
                fw.raise_irq(IrqLine::System);
            }
            Stimulus::PcieLink => {
                latch(REG_INT_PCIE_NVME, INT_PCIE_LINK);
                fw.raise_irq(IrqLine::System);
            }
            Stimulus::Power => {
                latch(REG_INT_SYSTEM, INT_SYSTEM_POWER);
                fw.raise_irq(IrqLine::System);
            }
            Stimulus::TimerTick => {
                devices
                    .timer_status
                    .borrow_mut()
                    .assert_bits(REG_TIMER_STATUS, TIMER_STATUS_TICK);
                fw.raise_irq(IrqLine::System);
            }
            Stimulus::MasterReady => fw
                .bus()
                .set_bits(REG_USB_PERIPH_STATUS, USB_PERIPH_MASTER_READY),
            Stimulus::DeferEndpoint => fw
                .bus()
                .set_bits(G_SYSTEM_STATE, SystemState::DEFERRED_ENDPOINT.bits()),
            Stimulus::Stall { unit } => {
                devices
                    .unit(unit)
                    .borrow_mut()
                    .set_latency(Latency::Reads(0), Latency::Never);
            }
            Stimulus::Release { unit, reads } => {
                devices
                    .unit(unit)
                    .borrow_mut()
                    .set_latency(Latency::Reads(0), Latency::Reads(reads));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Zero-based pass the stimulus is injected before.
    pub pass: u64,
    #[serde(flatten)]
    pub stimulus: Stimulus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub steps: Vec<ScriptStep>,
}

impl Script {
    /// A short mixed workload: link up, two CBWs, endpoint traffic, a timer tick and one
    /// stalled NVMe command that has to be recovered.
    pub fn demo() -> Self {
        let at = |pass, stimulus| ScriptStep { pass, stimulus };
        Self {
            steps: vec![
                at(0, Stimulus::PcieLink),
                at(0, Stimulus::UsbLink),
                at(1, Stimulus::Cbw),
                at(2, Stimulus::EndpointReady { endpoint: 3, mask: 0x04 }),
                at(3, Stimulus::TimerTick),
                at(4, Stimulus::Stall { unit: Unit::Nvme }),
                at(4, Stimulus::Cbw),
                at(6, Stimulus::Release { unit: Unit::Nvme, reads: 4 }),
                at(6, Stimulus::DeferEndpoint),
                at(6, Stimulus::EndpointReady { endpoint: 0, mask: 0x81 }),
                at(7, Stimulus::Power),
            ],
        }
    }
}
