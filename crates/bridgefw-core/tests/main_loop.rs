use bridgefw_core::firmware::STARTUP_SEQUENCE;
use bridgefw_core::main_loop::ALWAYS_RUN;
use bridgefw_core::{Bank, IrqLine, SlotId};
use bridgefw_regs::map::{
    EventFlags, SystemState, G_EVENT_FLAGS, G_SYSTEM_STATE, INT_PCIE_LINK, REG_INT_PCIE_NVME,
};

mod util;

use util::{booted, RigBuilder};

#[test]
fn boot_runs_startup_then_an_idle_pass_runs_only_the_pollers() {
    let mut rig = RigBuilder::new().build();
    rig.fw.bus().write_u8(G_EVENT_FLAGS, 0xFF);

    rig.fw.power_on();
    assert_eq!(rig.slots(), STARTUP_SEQUENCE.to_vec());
    assert_eq!(rig.fw.bus().read_u8(G_EVENT_FLAGS), 0, "work RAM is zeroed");
    assert!(rig.fw.irq().globally_enabled());

    rig.clear_calls();
    let summary = rig.fw.run_pass();
    assert_eq!(rig.slots(), ALWAYS_RUN.to_vec());
    assert!(summary.events.is_empty());
    assert!(summary.promoted.is_empty());
    for slot in [SlotId::HOST_EVENT, SlotId::ENDPOINT_SCAN, SlotId::COMMAND_SERVICE] {
        assert_eq!(rig.fw.stats().calls(slot), 0, "{slot}");
    }
    assert_eq!(rig.fw.active_bank(), Bank::Bank0);
    assert_eq!(rig.fw.stack().depth(), 0);
}

#[test]
fn host_event_without_endpoint_bit_skips_the_scan() {
    let mut rig = booted(RigBuilder::new());
    rig.fw.bus().write_u8(G_EVENT_FLAGS, EventFlags::HOST.bits());

    let summary = rig.fw.run_pass();
    assert_eq!(summary.events, EventFlags::HOST);
    assert_eq!(rig.fw.stats().calls(SlotId::HOST_EVENT), 1);
    assert_eq!(rig.fw.stats().calls(SlotId::ENDPOINT_SCAN), 0);
    assert_eq!(rig.fw.stats().calls(SlotId::COMMAND_SERVICE), 1);
    assert_eq!(rig.fw.bus().read_u8(G_EVENT_FLAGS), 0);
}

#[test]
fn endpoint_bit_runs_all_three_conditional_slots() {
    let mut rig = booted(RigBuilder::new());
    rig.fw
        .bus()
        .write_u8(G_EVENT_FLAGS, (EventFlags::ENDPOINT | EventFlags::LINK_CHANGE).bits());

    rig.fw.run_pass();
    let mut expected = ALWAYS_RUN.to_vec();
    expected.push(SlotId::HOST_EVENT);
    assert_eq!(rig.slots(), expected);
    assert_eq!(rig.fw.stats().calls(SlotId::ENDPOINT_SCAN), 1);
    assert_eq!(rig.fw.stats().calls(SlotId::COMMAND_SERVICE), 1);
    // Bits outside the pass mask belong to someone else.
    assert_eq!(
        rig.fw.bus().read_u8(G_EVENT_FLAGS),
        EventFlags::LINK_CHANGE.bits()
    );
}

#[test]
fn deferred_state_is_promoted_for_the_next_pass() {
    let mut rig = booted(RigBuilder::new());
    rig.fw.bus().write_u8(
        G_SYSTEM_STATE,
        (SystemState::DEFERRED_ENDPOINT | SystemState::LINK_UP).bits(),
    );

    let first = rig.fw.run_pass();
    assert!(first.events.is_empty());
    assert_eq!(first.promoted, SystemState::DEFERRED_ENDPOINT);
    assert_eq!(
        rig.fw.bus().read_u8(G_SYSTEM_STATE),
        SystemState::LINK_UP.bits()
    );
    assert_eq!(rig.fw.bus().read_u8(G_EVENT_FLAGS), EventFlags::ENDPOINT.bits());

    let second = rig.fw.run_pass();
    assert_eq!(second.events, EventFlags::ENDPOINT);
    assert_eq!(rig.fw.stats().calls(SlotId::ENDPOINT_SCAN), 1);
    assert!(rig.fw.irq().globally_enabled());
}

#[test]
fn handler_posting_events_mid_pass_waits_for_the_next_pass() {
    let builder = RigBuilder::new().routine(SlotId::HOST_EVENT, |fw, _| {
        fw.bus().set_bits(G_EVENT_FLAGS, EventFlags::HOST.bits());
    });
    let mut rig = booted(builder);
    rig.fw.bus().write_u8(G_EVENT_FLAGS, EventFlags::HOST.bits());

    rig.fw.run_pass();
    assert_eq!(rig.fw.stats().calls(SlotId::HOST_EVENT), 1);
    assert_eq!(rig.fw.bus().read_u8(G_EVENT_FLAGS), EventFlags::HOST.bits());
}

#[test]
fn pending_interrupt_is_taken_after_the_first_poller() {
    let mut rig = booted(RigBuilder::new());
    rig.int_status
        .borrow_mut()
        .assert_bits(REG_INT_PCIE_NVME, INT_PCIE_LINK);
    rig.fw.raise_irq(IrqLine::System);

    rig.fw.run_pass();
    assert_eq!(
        rig.slots(),
        vec![
            SlotId::TIMER_POLL,
            SlotId::PCIE_LINK_EVENT,
            SlotId::LINK_POLL,
            SlotId::PHY_POLL,
            SlotId::QUEUE_POLL,
        ]
    );
}

#[test]
fn interrupt_raised_inside_the_critical_section_waits_for_it_to_end() {
    let mut rig = booted(RigBuilder::new());
    rig.int_status
        .borrow_mut()
        .assert_bits(REG_INT_PCIE_NVME, INT_PCIE_LINK);

    rig.fw.critical_section(|fw| {
        fw.raise_irq(IrqLine::System);
        fw.poll_point();
        assert!(fw.irq().is_pending(IrqLine::System));
    });
    assert!(rig.slots().is_empty());

    rig.fw.poll_point();
    assert_eq!(rig.slots(), vec![SlotId::PCIE_LINK_EVENT]);
}
