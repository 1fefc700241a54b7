//! Two-slot completion barrier
//!
//! Registered as a transient listener for one start or stop cycle. It
//! records the first report of each sub-system and completes once both have
//! reported; the controller then drops it.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::listener::TauListener;

const DHT: usize = 0;
const CHAIN_MANAGER: usize = 1;
const SUBSYSTEMS: [&str; 2] = ["DHT", "chain manager"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Report {
    success: bool,
    error: Option<String>,
}

/// Aggregated result of one barrier cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierOutcome {
    pub success: bool,
    /// Every sub-system failure or silence, joined into one message
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct Barrier {
    phase: Phase,
    slots: Mutex<[Option<Report>; 2]>,
    done: Mutex<Option<oneshot::Sender<()>>>,
}

impl Barrier {
    pub fn new(phase: Phase) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let barrier = Self {
            phase,
            slots: Mutex::new([None, None]),
            done: Mutex::new(Some(tx)),
        };
        (Arc::new(barrier), rx)
    }

    fn report(&self, slot: usize, success: bool, error: Option<&str>) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slots[slot].is_some() {
            return;
        }
        slots[slot] = Some(Report {
            success,
            error: error.map(str::to_string),
        });
        if slots.iter().all(Option::is_some) {
            let done = self.done.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
            if let Some(done) = done {
                let _ = done.send(());
            }
        }
    }

    /// Result as of now; a sub-system that has not reported counts as failed
    pub fn outcome(&self, waited: Duration) -> BarrierOutcome {
        let slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut success = true;
        let mut errors = Vec::new();
        for (name, slot) in SUBSYSTEMS.iter().zip(slots.iter()) {
            match slot {
                Some(report) if report.success => {}
                Some(report) => {
                    success = false;
                    errors.push(format!(
                        "{name}: {}",
                        report.error.as_deref().unwrap_or("failed")
                    ));
                }
                None => {
                    success = false;
                    errors.push(format!("{name} did not report within {}ms", waited.as_millis()));
                }
            }
        }
        BarrierOutcome {
            success,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}

impl TauListener for Barrier {
    fn on_dht_started(&self, success: bool, error: Option<&str>) {
        if self.phase == Phase::Startup {
            self.report(DHT, success, error);
        }
    }

    fn on_chain_manager_started(&self, success: bool, error: Option<&str>) {
        if self.phase == Phase::Startup {
            self.report(CHAIN_MANAGER, success, error);
        }
    }

    fn on_dht_stopped(&self) {
        if self.phase == Phase::Shutdown {
            self.report(DHT, true, None);
        }
    }

    fn on_chain_manager_stopped(&self) {
        if self.phase == Phase::Shutdown {
            self.report(CHAIN_MANAGER, true, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_after_both_reports() {
        let (barrier, mut rx) = Barrier::new(Phase::Startup);
        barrier.on_dht_started(true, None);
        assert!(rx.try_recv().is_err());

        barrier.on_chain_manager_started(false, Some("disk full"));
        rx.await.unwrap();

        let outcome = barrier.outcome(Duration::from_secs(1));
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("chain manager: disk full"));
    }

    #[test]
    fn test_first_report_wins() {
        let (barrier, _rx) = Barrier::new(Phase::Startup);
        barrier.on_dht_started(false, Some("no route"));
        barrier.on_dht_started(true, None);
        barrier.on_chain_manager_started(true, None);
        assert!(!barrier.outcome(Duration::ZERO).success);
    }

    #[test]
    fn test_silent_subsystem_is_named() {
        let (barrier, _rx) = Barrier::new(Phase::Shutdown);
        barrier.on_chain_manager_stopped();
        // startup callbacks are ignored in the shutdown phase
        barrier.on_dht_started(true, None);

        let outcome = barrier.outcome(Duration::from_millis(50));
        assert_eq!(outcome.error.as_deref(), Some("DHT did not report within 50ms"));
    }
}
