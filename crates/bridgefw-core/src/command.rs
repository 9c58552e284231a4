//! Command/completion engine.
//!
//! An operation is issued into its command block, busy-polled to completion against a software
//! iteration counter, and completed through a shared epilogue. A wait that runs out triggers the
//! operation's recovery recipe and re-arms the block; the caller never sees an error.

use bridgefw_regs::map::{
    CommandCtrl, CommandStatus, Trigger, CMD_OFF_ADDR, CMD_OFF_CTRL, CMD_OFF_OPCODE,
    CMD_OFF_PARAM, CMD_OFF_STATUS, CMD_OFF_TAG, CMD_OFF_TRIGGER, CMD_REQ_FLASH, CMD_REQ_NONE,
    CMD_REQ_NVME, CMD_REQ_PHY, FLASH_CMD_BLOCK, FLASH_MODE_SOFT_RESET, G_CMD_REQ_ADDR,
    G_CMD_REQ_KIND, G_CMD_REQ_OPCODE, G_CMD_REQ_PARAM, G_CMD_REQ_TAG, G_CMD_SLOT_INDEX,
    G_CMD_STATE, G_FLASH_COUNTER, G_NVME_DOORBELL_COUNTER, G_NVME_QUEUE_COUNTER,
    G_NVME_SQ_TAIL, G_PHY_COUNTER, G_RECOVERY_COUNT, NVME_CMD_BLOCK, PHY_CMD_BLOCK,
    PHY_CTRL_LANE_RESET, PHY_CTRL_PLL_HOLD, POWER_CTRL_NVME_RAIL, POWER_CTRL_PHY_RAIL,
    REG_FLASH_MODE, REG_PHY_CTRL, REG_POWER_CTRL, REG_TIMER_CTRL, TIMER_CTRL_CLEAR,
};
use tracing::{debug, warn};

use crate::config::Timeouts;
use crate::firmware::Firmware;

/// Rolling command-state counter width.
pub const CMD_STATE_MASK: u8 = 0x07;
/// NVMe submission queue depth.
pub const SQ_INDEX_MASK: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    NvmeSubmit,
    FlashTransaction,
    PhySettle,
}

impl OperationKind {
    pub fn block(self) -> u16 {
        match self {
            OperationKind::NvmeSubmit => NVME_CMD_BLOCK,
            OperationKind::FlashTransaction => FLASH_CMD_BLOCK,
            OperationKind::PhySettle => PHY_CMD_BLOCK,
        }
    }

    /// Decodes a `G_CMD_REQ_KIND` byte. `CMD_REQ_NONE` and unknown values give `None`.
    pub fn from_request(kind: u8) -> Option<Self> {
        match kind {
            CMD_REQ_NVME => Some(OperationKind::NvmeSubmit),
            CMD_REQ_FLASH => Some(OperationKind::FlashTransaction),
            CMD_REQ_PHY => Some(OperationKind::PhySettle),
            _ => None,
        }
    }

    pub fn request_code(self) -> u8 {
        match self {
            OperationKind::NvmeSubmit => CMD_REQ_NVME,
            OperationKind::FlashTransaction => CMD_REQ_FLASH,
            OperationKind::PhySettle => CMD_REQ_PHY,
        }
    }

    /// Busy-waits run for this kind, in order.
    fn waits(self, timeouts: &Timeouts) -> Vec<BusyWait> {
        let block = self.block();
        let status = BusyWait {
            reg: block + CMD_OFF_STATUS,
            busy: CommandStatus::BUSY.bits(),
            error: CommandStatus::ERROR.bits(),
            counter: 0,
            threshold: 0,
        };
        match self {
            OperationKind::NvmeSubmit => vec![
                // Doorbell accepted: the engine drops START once it has fetched the entry.
                BusyWait {
                    reg: block + CMD_OFF_TRIGGER,
                    busy: Trigger::START.bits(),
                    error: 0,
                    counter: G_NVME_DOORBELL_COUNTER,
                    threshold: timeouts.nvme_doorbell,
                },
                BusyWait {
                    counter: G_NVME_QUEUE_COUNTER,
                    threshold: timeouts.nvme_queue,
                    ..status
                },
            ],
            OperationKind::FlashTransaction => vec![BusyWait {
                counter: G_FLASH_COUNTER,
                threshold: timeouts.flash,
                ..status
            }],
            OperationKind::PhySettle => vec![BusyWait {
                counter: G_PHY_COUNTER,
                threshold: timeouts.phy_settle,
                ..status
            }],
        }
    }

    fn recovery(self) -> &'static [RecoveryStep] {
        match self {
            OperationKind::NvmeSubmit => &[
                RecoveryStep::Cycle(REG_POWER_CTRL, POWER_CTRL_NVME_RAIL),
                RecoveryStep::Pulse(REG_PHY_CTRL, PHY_CTRL_LANE_RESET),
                RecoveryStep::Pulse(REG_TIMER_CTRL, TIMER_CTRL_CLEAR),
            ],
            OperationKind::FlashTransaction => {
                &[RecoveryStep::Pulse(REG_FLASH_MODE, FLASH_MODE_SOFT_RESET)]
            }
            OperationKind::PhySettle => &[
                RecoveryStep::Pulse(REG_PHY_CTRL, PHY_CTRL_PLL_HOLD),
                RecoveryStep::Cycle(REG_POWER_CTRL, POWER_CTRL_PHY_RAIL),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    pub kind: OperationKind,
    pub opcode: u8,
    pub param: u8,
    pub tag: u8,
    pub address: u32,
}

impl CommandRequest {
    /// Posts the request into the firmware's request block for the command service to pick up.
    pub fn post(&self, fw: &mut Firmware) {
        let bus = fw.bus();
        bus.write_u8(G_CMD_REQ_OPCODE, self.opcode);
        bus.write_u8(G_CMD_REQ_PARAM, self.param);
        bus.write_u8(G_CMD_REQ_TAG, self.tag);
        bus.write_u32_be(G_CMD_REQ_ADDR, self.address);
        bus.write_u8(G_CMD_REQ_KIND, self.kind.request_code());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Issued,
    Polling,
    TimedOut,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready { iterations: u32 },
    Error { iterations: u32 },
    TimedOut { iterations: u32 },
}

impl WaitOutcome {
    pub fn timed_out(self) -> bool {
        matches!(self, WaitOutcome::TimedOut { .. })
    }
}

/// Where the completion epilogue is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEntry {
    /// After a wait finished, successfully or with the error bit.
    Normal,
    /// After recovery; the abort already dropped busy and trigger.
    AfterTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub kind: OperationKind,
    /// Queue slot claimed at issue, for NVMe submissions.
    pub slot: Option<u8>,
    /// States passed through, starting from `Idle`.
    pub states: Vec<CommandState>,
    pub waits: Vec<WaitOutcome>,
}

impl CommandOutcome {
    pub fn timed_out(&self) -> bool {
        self.states.contains(&CommandState::TimedOut)
    }
}

/// An explicit bounded poll of one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyWait {
    pub reg: u16,
    /// Bits that mean "still working".
    pub busy: u8,
    /// Bits that mean "finished with an error".
    pub error: u8,
    /// Big-endian iteration counter in work RAM.
    pub counter: u16,
    pub threshold: u32,
}

impl BusyWait {
    /// Polls until the busy bits clear, an error bit shows, or the counter reaches the threshold.
    ///
    /// Each unsuccessful iteration ends in a preemption point.
    pub fn run(&self, fw: &mut Firmware) -> WaitOutcome {
        fw.bus().write_u32_be(self.counter, 0);
        loop {
            let value = fw.bus().read_u8(self.reg);
            let iterations = fw.bus().read_u32_be(self.counter);
            if value & self.error != 0 {
                return WaitOutcome::Error { iterations };
            }
            if value & self.busy == 0 {
                return WaitOutcome::Ready { iterations };
            }

            let iterations = iterations.wrapping_add(1);
            fw.bus().write_u32_be(self.counter, iterations);
            if iterations >= self.threshold {
                return WaitOutcome::TimedOut { iterations };
            }
            fw.poll_point();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryStep {
    /// Set then clear.
    Pulse(u16, u8),
    /// Clear then set.
    Cycle(u16, u8),
}

/// Issues `request`, waits it out and completes it.
pub fn execute(fw: &mut Firmware, request: &CommandRequest) -> CommandOutcome {
    let kind = request.kind;
    let mut states = vec![CommandState::Idle];

    let slot = issue(fw, request);
    states.push(CommandState::Issued);
    debug!(?kind, opcode = request.opcode, tag = request.tag, ?slot, "command issued");

    states.push(CommandState::Polling);
    let timeouts = fw.config().timeouts;
    let mut waits = Vec::new();
    let mut entry = CompletionEntry::Normal;
    for wait in kind.waits(&timeouts) {
        let outcome = wait.run(fw);
        waits.push(outcome);
        match outcome {
            WaitOutcome::Ready { .. } => continue,
            WaitOutcome::Error { iterations } => {
                debug!(?kind, iterations, "command finished with error status");
                break;
            }
            WaitOutcome::TimedOut { iterations } => {
                warn!(?kind, iterations, reg = wait.reg, "command wait timed out, recovering");
                states.push(CommandState::TimedOut);
                recover(fw, kind);
                entry = CompletionEntry::AfterTimeout;
                break;
            }
        }
    }

    complete(fw, kind, entry);
    states.push(CommandState::Complete);
    CommandOutcome {
        kind,
        slot,
        states,
        waits,
    }
}

fn issue(fw: &mut Firmware, request: &CommandRequest) -> Option<u8> {
    let block = request.kind.block();
    let slot = (request.kind == OperationKind::NvmeSubmit).then(|| {
        let tail = fw.bus().read_u8(G_NVME_SQ_TAIL) & SQ_INDEX_MASK;
        fw.bus().write_u8(G_CMD_SLOT_INDEX, tail);
        fw.bus()
            .write_u8(G_NVME_SQ_TAIL, tail.wrapping_add(1) & SQ_INDEX_MASK);
        tail
    });

    let bus = fw.bus();
    bus.write_u8(block + CMD_OFF_OPCODE, request.opcode);
    bus.write_u8(block + CMD_OFF_PARAM, request.param);
    bus.write_u8(block + CMD_OFF_TAG, request.tag);
    bus.write_u32_be(block + CMD_OFF_ADDR, request.address);
    bus.write_u8(block + CMD_OFF_TRIGGER, Trigger::START.bits());
    slot
}

fn recover(fw: &mut Firmware, kind: OperationKind) {
    let bus = fw.bus();
    for step in kind.recovery() {
        match *step {
            RecoveryStep::Pulse(reg, mask) => {
                bus.set_bits(reg, mask);
                bus.clear_bits(reg, mask);
            }
            RecoveryStep::Cycle(reg, mask) => {
                bus.clear_bits(reg, mask);
                bus.set_bits(reg, mask);
            }
        }
    }

    let ctrl = kind.block() + CMD_OFF_CTRL;
    bus.write_u8(ctrl, CommandCtrl::ABORT.bits());
    bus.write_u8(ctrl, CommandCtrl::ENABLE.bits());

    let count = bus.read_u8(G_RECOVERY_COUNT).wrapping_add(1);
    bus.write_u8(G_RECOVERY_COUNT, count);
    warn!(?kind, recoveries = count, "engine re-armed");
}

/// Shared completion epilogue.
pub fn complete(fw: &mut Firmware, kind: OperationKind, entry: CompletionEntry) {
    let block = kind.block();
    let bus = fw.bus();
    if entry == CompletionEntry::Normal {
        bus.write_u8(
            block + CMD_OFF_STATUS,
            (CommandStatus::BUSY | CommandStatus::ERROR).bits(),
        );
        bus.write_u8(block + CMD_OFF_TRIGGER, 0);
    }

    let state = bus.read_u8(G_CMD_STATE).wrapping_add(1) & CMD_STATE_MASK;
    bus.write_u8(G_CMD_STATE, state);
    bus.write_u8(G_CMD_SLOT_INDEX, 0);
    debug!(?kind, ?entry, state, "command complete");
}

/// Reads the posted request, if any, and clears the request kind.
pub fn take_request(fw: &mut Firmware) -> Option<CommandRequest> {
    let bus = fw.bus();
    let code = bus.read_u8(G_CMD_REQ_KIND);
    if code == CMD_REQ_NONE {
        return None;
    }
    bus.write_u8(G_CMD_REQ_KIND, CMD_REQ_NONE);

    let Some(kind) = OperationKind::from_request(code) else {
        warn!(code, "dropping command request of unknown kind");
        return None;
    };
    Some(CommandRequest {
        kind,
        opcode: bus.read_u8(G_CMD_REQ_OPCODE),
        param: bus.read_u8(G_CMD_REQ_PARAM),
        tag: bus.read_u8(G_CMD_REQ_TAG),
        address: bus.read_u32_be(G_CMD_REQ_ADDR),
    })
}

/// Dispatch-table entry for [`crate::dispatch::SlotId::COMMAND_SERVICE`].
pub fn service_routine(fw: &mut Firmware, _param: Option<u8>) {
    if let Some(request) = take_request(fw) {
        execute(fw, &request);
    }
}
