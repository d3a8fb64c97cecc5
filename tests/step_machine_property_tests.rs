//! Property-based tests for the step pointer state machine
//!
//! A scripted validator decides which steps are incomplete; random sequences
//! of navigation commands must never break the pointer invariants.

use kyc_onboarding::steps::{StepMachine, StepReport, StepValidator, Transition};
use proptest::prelude::*;

const TOTAL: u8 = 5;

/// Steps listed in `bad` always fail validation.
struct Scripted {
    bad: Vec<u8>,
}

impl StepValidator for Scripted {
    fn validate_step(&mut self, step: u8) -> StepReport {
        let mut report = StepReport::new(step);
        if self.bad.contains(&step) {
            report.push(format!("field on step {step}"));
        }
        report
    }
}

#[derive(Debug, Clone)]
enum Command {
    Next,
    Previous,
    GoTo(u8),
}

// PROPERTY TEST STRATEGIES

fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Next),
        Just(Command::Previous),
        (0u8..=TOTAL + 1).prop_map(Command::GoTo),
    ]
}

fn bad_steps_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(1u8..=TOTAL, 0..3)
}

// PROPERTY TESTS

proptest! {
    /// 1 <= current <= highest <= total after any command sequence
    #[test]
    fn pointers_stay_ordered(
        bad in bad_steps_strategy(),
        commands in prop::collection::vec(command_strategy(), 0..40),
    ) {
        let mut machine = StepMachine::new(TOTAL);
        let mut validator = Scripted { bad };
        for command in commands {
            let _ = match command {
                Command::Next => machine.next(&mut validator).map(|_| ()),
                Command::Previous => {
                    machine.previous();
                    Ok(())
                }
                Command::GoTo(target) => machine.go_to(target, &mut validator).map(|_| ()),
            };
            prop_assert!(1 <= machine.current());
            prop_assert!(machine.current() <= machine.highest());
            prop_assert!(machine.highest() <= TOTAL);
        }
    }

    /// The machine never moves past the first incomplete step
    #[test]
    fn never_passes_an_incomplete_step(
        bad in bad_steps_strategy(),
        commands in prop::collection::vec(command_strategy(), 0..40),
    ) {
        let first_bad = bad.iter().copied().min().unwrap_or(TOTAL);
        let mut machine = StepMachine::new(TOTAL);
        let mut validator = Scripted { bad };
        for command in commands {
            match command {
                Command::Next => { let _ = machine.next(&mut validator); }
                Command::Previous => { machine.previous(); }
                Command::GoTo(target) => { let _ = machine.go_to(target, &mut validator); }
            }
            prop_assert!(machine.highest() <= first_bad);
        }
    }

    /// Resume lands on the first incomplete step before the saved pointer
    #[test]
    fn restore_lands_on_first_incomplete(
        bad in bad_steps_strategy(),
        saved in prop::option::of(0u8..=TOTAL + 2),
    ) {
        let mut machine = StepMachine::new(TOTAL);
        let target = saved.filter(|s| (1..=TOTAL).contains(s)).unwrap_or(1);
        let expected = bad
            .iter()
            .copied()
            .filter(|s| *s < target)
            .min()
            .unwrap_or(target);
        let landed = machine.restore(saved, &mut Scripted { bad });
        prop_assert_eq!(landed, expected);
        prop_assert_eq!(machine.current(), expected);
        prop_assert_eq!(machine.highest(), expected);
    }

    /// Moving back is always allowed and never validates
    #[test]
    fn previous_never_fails(steps in 1u8..=TOTAL) {
        let mut machine = StepMachine::new(TOTAL);
        let mut all_good = Scripted { bad: Vec::new() };
        for _ in 1..steps {
            machine.next(&mut all_good).unwrap();
        }
        let transition = machine.previous();
        if steps == 1 {
            prop_assert_eq!(transition, Transition::Stayed(1));
        } else {
            prop_assert_eq!(transition, Transition::Moved { from: steps, to: steps - 1 });
        }
    }
}
