use std::cell::RefCell;
use std::rc::Rc;

use bridgefw_core::{
    Bank, CallConvention, CodeAddr, CodeImage, DispatchEntry, Firmware, FirmwareConfig, SlotId,
};
use bridgefw_regs::XdataBus;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Placement {
    Common,
    Banked(Bank),
}

fn placement() -> impl Strategy<Value = Placement> {
    prop_oneof![
        Just(Placement::Common),
        Just(Placement::Banked(Bank::Bank0)),
        Just(Placement::Banked(Bank::Bank1)),
    ]
}

fn convention() -> impl Strategy<Value = CallConvention> {
    prop_oneof![Just(CallConvention::CallReturn), Just(CallConvention::TailJump)]
}

#[derive(Default)]
struct Script {
    /// Slot indices to call, outermost first.
    path: Vec<usize>,
    cursor: usize,
    violations: Vec<String>,
}

const SLOTS: usize = 6;

fn build(layout: &[(Placement, CallConvention)], script: Rc<RefCell<Script>>) -> Firmware {
    let mut image = CodeImage::new();
    let mut entries = Vec::new();
    for (i, &(placement, convention)) in layout.iter().enumerate() {
        let (bank, logical) = match placement {
            Placement::Common => (Bank::Bank0, 0x4000 + i as u16 * 0x40),
            Placement::Banked(bank) => (bank, 0x9000 + i as u16 * 0x40),
        };
        let target = CodeAddr::new(bank, logical);
        let script = script.clone();
        image.place(target, format!("node{i}"), move |fw, _| {
            let own = fw.active_bank();
            if let Some(expected) = target.bank() {
                if own != expected {
                    script
                        .borrow_mut()
                        .violations
                        .push(format!("node{i} entered with {own}"));
                }
            }

            let next = {
                let mut s = script.borrow_mut();
                s.cursor += 1;
                s.path.get(s.cursor).copied()
            };
            if let Some(next) = next {
                if let Err(err) = fw.call_slot(SlotId(200 + next as u16)) {
                    script.borrow_mut().violations.push(err.to_string());
                }
                if fw.active_bank() != own {
                    script.borrow_mut().violations.push(format!(
                        "node{i} resumed with {} instead of {own}",
                        fw.active_bank()
                    ));
                }
            }
        });
        entries.push(DispatchEntry::new(SlotId(200 + i as u16), bank, logical, convention));
    }

    Firmware::new(Box::new(XdataBus::new()), image, &entries, FirmwareConfig::default()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn outermost_caller_gets_its_bank_back(
        layout in proptest::collection::vec((placement(), convention()), SLOTS),
        path in proptest::collection::vec(0..SLOTS, 1..20),
        start in prop_oneof![Just(Bank::Bank0), Just(Bank::Bank1)],
    ) {
        let script = Rc::new(RefCell::new(Script {
            path: path.clone(),
            ..Script::default()
        }));
        let mut fw = build(&layout, script.clone());
        fw.select_bank(start);

        fw.call_slot(SlotId(200 + path[0] as u16)).unwrap();

        prop_assert_eq!(fw.active_bank(), start);
        prop_assert_eq!(fw.stack().depth(), 0);
        prop_assert_eq!(fw.stack().high_water(), path.len() * 5);
        prop_assert!(script.borrow().violations.is_empty(), "{:?}", script.borrow().violations);
    }
}

#[test]
fn common_code_runs_under_the_callers_bank() {
    let script = Rc::new(RefCell::new(Script {
        path: vec![0],
        ..Script::default()
    }));
    let mut fw = build(&[(Placement::Common, CallConvention::CallReturn)], script);
    fw.select_bank(Bank::Bank1);
    fw.call_slot(SlotId(200)).unwrap();
    assert_eq!(fw.active_bank(), Bank::Bank1);
    assert_eq!(fw.window().switches(), 1);
}

#[test]
fn argument_reaches_a_banked_entry_point() {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let target = CodeAddr::new(Bank::Bank1, 0x9200);
    let mut image = CodeImage::new();
    {
        let seen = seen.clone();
        image.place(target, "with_arg", move |fw, param| {
            seen.borrow_mut().push((fw.active_bank(), param));
        });
    }
    let entries = [DispatchEntry::new(
        SlotId(210),
        Bank::Bank1,
        0x9200,
        CallConvention::CallReturn,
    )];
    let mut fw =
        Firmware::new(Box::new(XdataBus::new()), image, &entries, FirmwareConfig::default())
            .unwrap();
    fw.select_bank(Bank::Bank0);

    fw.call_slot_with(SlotId(210), 0x1A).unwrap();

    assert_eq!(*seen.borrow(), vec![(Bank::Bank1, Some(0x1A))]);
    assert_eq!(fw.active_bank(), Bank::Bank0);
    assert_eq!(fw.stack().depth(), 0);
}
