//! 8051-style interrupt controller for the two external lines.
//!
//! Lines are edge-latched: [`InterruptController::raise`] sets the pending flag and vectoring
//! clears it. Delivery is only considered at explicit preemption points (see
//! [`crate::Firmware::poll_point`]); a pending line is deliverable when `EA` and its own enable
//! bit are set and its priority is strictly above everything currently in service.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// `IE` special function register.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct InterruptEnable: u8 {
        /// External interrupt 0, the endpoint-class line.
        const EX0 = 1 << 0;
        /// External interrupt 1, the system-class line.
        const EX1 = 1 << 2;
        /// Global enable.
        const EA = 1 << 7;
    }
}

bitflags! {
    /// `IP` special function register. A set bit places the line at high priority.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct InterruptPriority: u8 {
        const PX0 = 1 << 0;
        const PX1 = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrqLine {
    /// INT0: USB endpoint, CBW and link events.
    Endpoint,
    /// INT1: NVMe queue, PCIe, power and timer events.
    System,
}

impl IrqLine {
    /// Hardware polling order when two lines of equal priority are pending.
    pub const ALL: [IrqLine; 2] = [IrqLine::Endpoint, IrqLine::System];

    pub fn enable_bit(self) -> InterruptEnable {
        match self {
            IrqLine::Endpoint => InterruptEnable::EX0,
            IrqLine::System => InterruptEnable::EX1,
        }
    }

    pub fn priority_bit(self) -> InterruptPriority {
        match self {
            IrqLine::Endpoint => InterruptPriority::PX0,
            IrqLine::System => InterruptPriority::PX1,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqLine::Endpoint => f.write_str("int0/endpoint"),
            IrqLine::System => f.write_str("int1/system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Low,
    High,
}

#[derive(Debug, Clone)]
pub struct InterruptController {
    enable: InterruptEnable,
    priority: InterruptPriority,
    pending: [bool; 2],
    in_service: Vec<(IrqLine, Level)>,
    delivered: [u64; 2],
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            enable: InterruptEnable::empty(),
            priority: InterruptPriority::empty(),
            pending: [false; 2],
            in_service: Vec::new(),
            delivered: [0; 2],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn enable(&self) -> InterruptEnable {
        self.enable
    }

    pub fn set_enable(&mut self, enable: InterruptEnable) {
        self.enable = enable;
    }

    pub fn priority(&self) -> InterruptPriority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: InterruptPriority) {
        self.priority = priority;
    }

    /// Global enable (`EA`).
    pub fn globally_enabled(&self) -> bool {
        self.enable.contains(InterruptEnable::EA)
    }

    pub fn set_global(&mut self, on: bool) {
        self.enable.set(InterruptEnable::EA, on);
    }

    pub fn level(&self, line: IrqLine) -> Level {
        if self.priority.contains(line.priority_bit()) {
            Level::High
        } else {
            Level::Low
        }
    }

    /// Latches an edge on `line`.
    pub fn raise(&mut self, line: IrqLine) {
        self.pending[line.index()] = true;
    }

    pub fn is_pending(&self, line: IrqLine) -> bool {
        self.pending[line.index()]
    }

    pub fn in_service(&self) -> &[(IrqLine, Level)] {
        &self.in_service
    }

    pub fn is_in_service(&self, line: IrqLine) -> bool {
        self.in_service.iter().any(|(l, _)| *l == line)
    }

    /// Number of times `line` has been vectored since reset.
    pub fn delivered(&self, line: IrqLine) -> u64 {
        self.delivered[line.index()]
    }

    /// The line the CPU would vector to right now, if any.
    pub fn next_deliverable(&self) -> Option<IrqLine> {
        if !self.globally_enabled() {
            return None;
        }
        let ceiling = self.in_service.last().map(|(_, level)| *level);
        let candidates = IrqLine::ALL.into_iter().filter(|&line| {
            self.pending[line.index()]
                && self.enable.contains(line.enable_bit())
                && !self.is_in_service(line)
                && ceiling.map_or(true, |c| self.level(line) > c)
        });
        // High priority first, then fixed polling order.
        candidates.min_by_key(|&line| (std::cmp::Reverse(self.level(line)), line))
    }

    /// Vectoring: clears the latched edge and marks the line in service.
    pub fn acknowledge(&mut self, line: IrqLine) {
        self.pending[line.index()] = false;
        self.delivered[line.index()] += 1;
        let level = self.level(line);
        self.in_service.push((line, level));
    }

    /// `RETI`: ends service of the innermost line.
    pub fn complete(&mut self, line: IrqLine) {
        if let Some(pos) = self.in_service.iter().rposition(|(l, _)| *l == line) {
            self.in_service.remove(pos);
        }
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}
