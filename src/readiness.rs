//! Readiness of the datasets prefill depends on.
//!
//! Each dataset announces itself once through [`ReadinessGate::signal`].
//! Waiters do not depend on arrival order, and a bounded fallback probe
//! catches signals that were missed.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bs_table;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadySignal {
    Locations,
    Banks,
    Occupations,
    Calendar,
}

impl ReadySignal {
    pub const ALL: [ReadySignal; 4] = [
        ReadySignal::Locations,
        ReadySignal::Banks,
        ReadySignal::Occupations,
        ReadySignal::Calendar,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub locations: bool,
    pub banks: bool,
    pub occupations: bool,
    pub calendar: bool,
}

impl Readiness {
    pub fn is_set(&self, signal: ReadySignal) -> bool {
        match signal {
            ReadySignal::Locations => self.locations,
            ReadySignal::Banks => self.banks,
            ReadySignal::Occupations => self.occupations,
            ReadySignal::Calendar => self.calendar,
        }
    }

    pub fn mark(&mut self, signal: ReadySignal) {
        match signal {
            ReadySignal::Locations => self.locations = true,
            ReadySignal::Banks => self.banks = true,
            ReadySignal::Occupations => self.occupations = true,
            ReadySignal::Calendar => self.calendar = true,
        }
    }

    pub fn all(&self) -> bool {
        ReadySignal::ALL.iter().all(|s| self.is_set(*s))
    }

    pub fn pending(&self) -> Vec<ReadySignal> {
        ReadySignal::ALL
            .into_iter()
            .filter(|s| !self.is_set(*s))
            .collect()
    }
}

/// Looks at the data directly, for when a signal was never observed.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn detect(&self) -> Readiness;
}

/// Whether the converter's month table is usable.
pub fn calendar_detected() -> bool {
    bs_table::ad_epoch().is_some() && bs_table::year_days(bs_table::BS_FIRST_YEAR).is_some()
}

#[derive(Debug)]
pub struct ReadinessGate {
    state: watch::Sender<Readiness>,
    calendar_announced: AtomicBool,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(Readiness::default()),
            calendar_announced: AtomicBool::new(false),
        }
    }

    pub fn signal(&self, signal: ReadySignal) {
        let changed = self.state.send_if_modified(|r| {
            if r.is_set(signal) {
                return false;
            }
            r.mark(signal);
            true
        });
        if changed {
            info!(?signal, "reference data ready");
        }
    }

    pub fn snapshot(&self) -> Readiness {
        *self.state.borrow()
    }

    /// Fires the calendar signal after `settle`. Only the first call has any effect.
    pub async fn announce_calendar_ready(&self, settle: Duration) -> bool {
        if self.calendar_announced.swap(true, Ordering::SeqCst) {
            return false;
        }
        tokio::time::sleep(settle).await;
        if !calendar_detected() {
            return false;
        }
        self.signal(ReadySignal::Calendar);
        true
    }

    /// Resolves once every signal has fired, or once `probe` sees every
    /// dataset within the `fallback` polling budget. Has no timeout of its own.
    pub async fn wait_all(&self, probe: &dyn ReadinessProbe, fallback: RetryPolicy) {
        let mut rx = self.state.subscribe();
        let events = async {
            let _ = rx.wait_for(Readiness::all).await;
        };
        let polling = async {
            let detected = fallback
                .poll(move || async move {
                    let seen = probe.detect().await;
                    seen.all().then_some(seen)
                })
                .await;
            match detected {
                Some(seen) => {
                    debug!("fallback probe found every dataset loaded");
                    for signal in ReadySignal::ALL.into_iter().filter(|s| seen.is_set(*s)) {
                        self.signal(signal);
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = events => {}
            _ = polling => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    #[async_trait]
    impl ReadinessProbe for Nothing {
        async fn detect(&self) -> Readiness {
            Readiness::default()
        }
    }

    struct Everything;

    #[async_trait]
    impl ReadinessProbe for Everything {
        async fn detect(&self) -> Readiness {
            Readiness {
                locations: true,
                banks: true,
                occupations: true,
                calendar: true,
            }
        }
    }

    #[test]
    fn pending_lists_missing_signals() {
        let mut r = Readiness::default();
        r.mark(ReadySignal::Banks);
        r.mark(ReadySignal::Calendar);
        assert_eq!(
            r.pending(),
            vec![ReadySignal::Locations, ReadySignal::Occupations]
        );
        assert!(!r.all());
    }

    #[tokio::test(start_paused = true)]
    async fn signals_in_any_order_release_waiters() {
        let gate = ReadinessGate::new();
        let signals = async {
            for signal in [
                ReadySignal::Calendar,
                ReadySignal::Occupations,
                ReadySignal::Locations,
                ReadySignal::Banks,
            ] {
                tokio::time::sleep(Duration::from_secs(3)).await;
                gate.signal(signal);
            }
        };
        tokio::join!(
            gate.wait_all(&Nothing, RetryPolicy::fixed(Duration::from_millis(500), 2)),
            signals
        );
        assert!(gate.snapshot().all());
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_probe_covers_missed_signals() {
        let gate = ReadinessGate::new();
        gate.wait_all(&Everything, RetryPolicy::default()).await;
        assert!(gate.snapshot().all());
    }

    #[tokio::test(start_paused = true)]
    async fn calendar_announces_once() {
        let gate = ReadinessGate::new();
        assert!(gate.announce_calendar_ready(Duration::from_millis(300)).await);
        assert!(!gate.announce_calendar_ready(Duration::from_millis(300)).await);
        assert!(gate.snapshot().calendar);
    }
}
