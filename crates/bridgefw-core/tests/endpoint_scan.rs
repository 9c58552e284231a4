use bridgefw_core::endpoint::{scan, ScanStop, FORCED_OFFSET, MAX_SCAN_STEPS};
use bridgefw_core::{BuildError, CodeImage, ConfigError, Firmware, FirmwareConfig, SlotId};
use bridgefw_regs::XdataBus;
use bridgefw_regs::map::{
    G_EP_DISPATCH_OFFSET, G_EP_INDEX, REG_USB_PERIPH_STATUS, USB_PERIPH_MASTER_READY,
};
use proptest::prelude::*;

mod util;

use util::{booted, Call, RigBuilder};

fn handler_params(calls: &[Call]) -> Vec<u8> {
    calls
        .iter()
        .filter(|c| c.slot == SlotId::ENDPOINT_HANDLER)
        .filter_map(|c| c.param)
        .collect()
}

#[test]
fn endpoint_three_condition_two_dispatches_offset_0x1a() {
    let mut rig = booted(RigBuilder::new());
    rig.endpoints.borrow_mut().raise(3, 0x04);

    let report = scan(&mut rig.fw);

    assert_eq!(report.serviced, vec![0x1A]);
    assert_eq!(report.stop, ScanStop::Idle);
    assert!(!report.forced);
    assert!(!report.master_dispatched);
    assert_eq!(handler_params(&rig.calls.borrow()), vec![0x1A]);
    assert_eq!(rig.endpoints.borrow().clears(), &[(3, 0x04)]);
    assert_eq!(rig.fw.bus().read_u8(G_EP_DISPATCH_OFFSET), 0x1A);
}

#[test]
fn empty_primary_is_a_no_op() {
    let mut rig = booted(RigBuilder::new());
    let report = scan(&mut rig.fw);

    assert!(report.serviced.is_empty());
    assert_eq!(report.stop, ScanStop::Idle);
    assert!(rig.calls.borrow().is_empty());
    assert!(rig.endpoints.borrow().clears().is_empty());
    assert_eq!(rig.fw.bus().read_u8(G_EP_INDEX), 8);
}

#[test]
fn primary_pointing_at_idle_endpoint_stops_without_clearing() {
    let mut rig = booted(RigBuilder::new());
    rig.endpoints.borrow_mut().force_primary(Some(0x02));

    let report = scan(&mut rig.fw);

    assert!(report.serviced.is_empty());
    assert!(rig.calls.borrow().is_empty());
    assert!(rig.endpoints.borrow().clears().is_empty());
    assert_eq!(rig.fw.bus().read_u8(G_EP_INDEX), 1);
}

#[test]
fn master_ready_on_entry_forces_offset_0x40_first() {
    let mut rig = booted(RigBuilder::new());
    rig.fw.bus().write_u8(REG_USB_PERIPH_STATUS, USB_PERIPH_MASTER_READY);
    rig.endpoints.borrow_mut().raise(0, 0x01);

    let report = scan(&mut rig.fw);

    assert!(report.forced);
    assert!(report.master_dispatched);
    assert_eq!(handler_params(&rig.calls.borrow()), vec![FORCED_OFFSET, 0x00]);
    assert_eq!(
        rig.slots(),
        vec![SlotId::ENDPOINT_HANDLER, SlotId::ENDPOINT_HANDLER, SlotId::MASTER_EVENT]
    );
}

#[test]
fn master_flag_raised_during_the_scan_is_handed_off_at_the_end() {
    let builder = RigBuilder::new().routine(SlotId::ENDPOINT_HANDLER, |fw, _| {
        fw.bus().set_bits(REG_USB_PERIPH_STATUS, USB_PERIPH_MASTER_READY);
    });
    let mut rig = booted(builder);
    rig.endpoints.borrow_mut().raise(5, 0x80);

    let report = scan(&mut rig.fw);

    assert!(!report.forced);
    assert!(report.master_dispatched);
    assert_eq!(report.serviced, vec![0x2F]);
    assert_eq!(rig.slots().last(), Some(&SlotId::MASTER_EVENT));
}

#[test]
fn scan_limit_bounds_the_pass() {
    let mut rig = booted(RigBuilder::new().config(|c| c.endpoint_scan_limit = 32));
    for ep in 0..8 {
        rig.endpoints.borrow_mut().raise(ep, 0xFF);
    }

    let report = scan(&mut rig.fw);

    assert_eq!(report.steps(), 32);
    assert_eq!(report.stop, ScanStop::Exhausted);
    assert_eq!(rig.endpoints.borrow().clears().len(), 32);
    // Endpoints 0-3 fully drained, 4-7 untouched.
    for ep in 0..4 {
        assert_eq!(rig.endpoints.borrow().secondary(ep), 0);
    }
    for ep in 4..8 {
        assert_eq!(rig.endpoints.borrow().secondary(ep), 0xFF);
    }
}

#[test]
fn scan_limit_above_the_step_bound_fails_the_build() {
    let mut config = FirmwareConfig::default();
    config.endpoint_scan_limit = 64;
    let err = Firmware::new(Box::new(XdataBus::new()), CodeImage::new(), &[], config)
        .err()
        .unwrap();
    assert_eq!(err, BuildError::Config(ConfigError::ScanLimit(64)));
}

#[test]
fn endpoint_handler_is_entered_in_its_bank() {
    let mut rig = booted(RigBuilder::new());
    rig.endpoints.borrow_mut().raise(1, 0x02);
    rig.fw.call_slot(SlotId::ENDPOINT_SCAN).unwrap();

    let calls = rig.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].param, Some(0x09));
    assert_eq!(calls[0].bank, bridgefw_core::Bank::Bank0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn each_step_services_one_condition_in_priority_order(
        secondaries in proptest::array::uniform8(any::<u8>()),
        limit in 1u8..=MAX_SCAN_STEPS,
    ) {
        let mut rig = booted(RigBuilder::new().config(|c| c.endpoint_scan_limit = limit));
        for (ep, &mask) in secondaries.iter().enumerate() {
            rig.endpoints.borrow_mut().raise(ep, mask);
        }

        let report = scan(&mut rig.fw);

        let pending: Vec<u8> = secondaries
            .iter()
            .enumerate()
            .flat_map(|(ep, &mask)| {
                (0..8u8).filter(move |bit| mask & (1 << bit) != 0).map(move |bit| ep as u8 * 8 + bit)
            })
            .collect();
        let expected: Vec<u8> = pending.iter().copied().take(usize::from(limit)).collect();

        prop_assert!(report.steps() <= usize::from(limit));
        prop_assert_eq!(&report.serviced, &expected);
        prop_assert_eq!(handler_params(&rig.calls.borrow()), expected.clone());

        let clears = rig.endpoints.borrow().clears().to_vec();
        prop_assert_eq!(clears.len(), expected.len());
        for (&(ep, mask), &offset) in clears.iter().zip(&expected) {
            prop_assert_eq!(mask.count_ones(), 1);
            prop_assert_eq!(ep * 8 + mask.trailing_zeros() as u8, offset);
        }

        let stop = if pending.len() < usize::from(limit) { ScanStop::Idle } else { ScanStop::Exhausted };
        prop_assert_eq!(report.stop, stop);
    }

    #[test]
    fn sentinel_primary_never_dispatches(primary in any::<u8>()) {
        let mut rig = booted(RigBuilder::new());
        // Primary claims something, but no endpoint has a secondary condition.
        rig.endpoints.borrow_mut().force_primary(Some(primary));

        let report = scan(&mut rig.fw);

        prop_assert!(report.serviced.is_empty());
        prop_assert!(rig.calls.borrow().is_empty());
        prop_assert!(rig.endpoints.borrow().clears().is_empty());
    }
}
