//! The step pointer state machine.
//!
//! `StepMachine` only knows step numbers. Whether a step is complete is asked
//! of a [`StepValidator`], which is the form session in practice.
use tracing::{debug, info};

use crate::error::NavigationError;

/// Result of validating one step. Empty `missing` means the step is complete.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepReport {
    pub step: u8,
    pub missing: Vec<String>,
}

impl StepReport {
    pub fn new(step: u8) -> Self {
        Self {
            step,
            missing: Vec::new(),
        }
    }

    /// Records a missing or invalid field label, once.
    pub fn push(&mut self, label: impl Into<String>) {
        let label = label.into();
        if !self.missing.contains(&label) {
            self.missing.push(label);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.missing.is_empty()
    }

    /// Comma separated list of at most `cap` labels, with a count of the rest.
    pub fn summary(&self, cap: usize) -> String {
        let cap = cap.max(1);
        if self.missing.len() <= cap {
            return self.missing.join(", ");
        }
        format!(
            "{} and {} more",
            self.missing[..cap].join(", "),
            self.missing.len() - cap
        )
    }
}

pub trait StepValidator {
    fn validate_step(&mut self, step: u8) -> StepReport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stayed(u8),
    Moved { from: u8, to: u8 },
}

impl Transition {
    pub fn step(&self) -> u8 {
        match *self {
            Transition::Stayed(step) => step,
            Transition::Moved { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepMachine {
    current: u8,
    highest: u8,
    total: u8,
}

impl StepMachine {
    pub fn new(total: u8) -> Self {
        Self {
            current: 1,
            highest: 1,
            total: total.max(1),
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn highest(&self) -> u8 {
        self.highest
    }

    pub fn total(&self) -> u8 {
        self.total
    }

    pub fn is_last(&self) -> bool {
        self.current == self.total
    }

    fn moved(&mut self, to: u8) -> Transition {
        let from = self.current;
        self.current = to;
        self.highest = self.highest.max(to);
        debug!(from, to, highest = self.highest, "step changed");
        Transition::Moved { from, to }
    }

    /// Validates the current step and moves forward one.
    pub fn next(&mut self, validator: &mut impl StepValidator) -> Result<Transition, NavigationError> {
        if self.is_last() {
            return Err(NavigationError::AtLastStep);
        }
        let report = validator.validate_step(self.current);
        if !report.is_valid() {
            debug!(step = self.current, missing = report.missing.len(), "step incomplete");
            return Err(NavigationError::Incomplete(report));
        }
        Ok(self.moved(self.current + 1))
    }

    /// Backward moves never validate.
    pub fn previous(&mut self) -> Transition {
        if self.current <= 1 {
            return Transition::Stayed(self.current);
        }
        let to = self.current - 1;
        let from = self.current;
        self.current = to;
        Transition::Moved { from, to }
    }

    /// Jump to `target`, as from a step indicator.
    ///
    /// Forward jumps are limited to steps already reached and validate every
    /// step in between. The first incomplete one aborts the jump.
    pub fn go_to(
        &mut self,
        target: u8,
        validator: &mut impl StepValidator,
    ) -> Result<Transition, NavigationError> {
        if target == 0 || target > self.total {
            return Err(NavigationError::OutOfRange(target));
        }
        if target == self.current {
            return Ok(Transition::Stayed(target));
        }
        if target > self.highest {
            return Err(NavigationError::NotReached {
                target,
                highest: self.highest,
            });
        }
        if target > self.current {
            for step in self.current..target {
                let report = validator.validate_step(step);
                if !report.is_valid() {
                    return Err(NavigationError::Incomplete(report));
                }
            }
        }
        let from = self.current;
        self.current = target;
        Ok(Transition::Moved { from, to: target })
    }

    /// Recomputes the pointers from a saved step by replaying validation.
    ///
    /// Steps `1..target` are checked in order; the first incomplete one
    /// becomes the current step. A missing or out-of-range target resumes at 1.
    pub fn restore(&mut self, target: Option<u8>, validator: &mut impl StepValidator) -> u8 {
        let target = target.filter(|t| (1..=self.total).contains(t)).unwrap_or(1);
        let mut landed = target;
        for step in 1..target {
            if !validator.validate_step(step).is_valid() {
                landed = step;
                break;
            }
        }
        self.current = landed;
        self.highest = landed;
        info!(saved = target, resumed = landed, "step pointer restored");
        landed
    }
}
