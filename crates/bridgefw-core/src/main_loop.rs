//! Cooperative main loop.

use bridgefw_regs::map::{EventFlags, SystemState, G_EVENT_FLAGS, G_SYSTEM_STATE};
use tracing::trace;

use crate::dispatch::SlotId;
use crate::firmware::Firmware;

/// Pollers run unconditionally at the top of every pass, in this order.
pub const ALWAYS_RUN: [SlotId; 4] = [
    SlotId::TIMER_POLL,
    SlotId::LINK_POLL,
    SlotId::PHY_POLL,
    SlotId::QUEUE_POLL,
];

/// Event bits that open the conditional part of a pass.
pub const PASS_EVENTS: EventFlags = EventFlags::ENDPOINT.union(EventFlags::HOST);

/// What one pass observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Event bits seen (and consumed) this pass.
    pub events: EventFlags,
    /// Deferred system-state bits promoted into the event byte for the next pass.
    pub promoted: SystemState,
}

impl Firmware {
    /// One iteration of the main loop body.
    pub fn run_pass(&mut self) -> PassSummary {
        for slot in ALWAYS_RUN {
            self.dispatch(slot);
            self.poll_point();
        }

        let raw = self.bus().read_u8(G_EVENT_FLAGS);
        let events = EventFlags::from_bits_retain(raw) & PASS_EVENTS;
        if !events.is_empty() {
            trace!(?events, "conditional dispatch");
            // Consume only what was observed; bits posted by handlers from here on wait a pass.
            self.bus().clear_bits(G_EVENT_FLAGS, events.bits());
            self.dispatch(SlotId::HOST_EVENT);
            if events.contains(EventFlags::ENDPOINT) {
                self.dispatch(SlotId::ENDPOINT_SCAN);
            }
            self.dispatch(SlotId::COMMAND_SERVICE);
        }

        let promoted = self.critical_section(promote_deferred);
        self.poll_point();

        PassSummary { events, promoted }
    }

    /// The main loop.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_pass();
        }
    }
}

/// Moves deferred work posted by interrupt handlers into the event byte.
fn promote_deferred(fw: &mut Firmware) -> SystemState {
    let deferred = SystemState::DEFERRED_HOST | SystemState::DEFERRED_ENDPOINT;
    let state = SystemState::from_bits_retain(fw.bus().read_u8(G_SYSTEM_STATE));
    let promoted = state & deferred;
    if promoted.is_empty() {
        return promoted;
    }

    let mut events = EventFlags::empty();
    events.set(EventFlags::HOST, promoted.contains(SystemState::DEFERRED_HOST));
    events.set(
        EventFlags::ENDPOINT,
        promoted.contains(SystemState::DEFERRED_ENDPOINT),
    );
    fw.bus().write_u8(G_SYSTEM_STATE, (state - promoted).bits());
    fw.bus().set_bits(G_EVENT_FLAGS, events.bits());
    promoted
}
