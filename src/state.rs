//! Acquisition state machine transitions
//!
//! [`transition`] is a pure function of the current state, the outcome the
//! engine observed during a tick, and the recovery limits. It decides the
//! next state and which side effects the engine must apply; all bus traffic
//! stays in the engine.

use std::fmt;

use bitflags::bitflags;

/// Engine state, exactly one live at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    #[default]
    Reset,
    WaitForReset,
    Configure,
    FifoRead,
    RequestStop,
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionState::Reset => "RESET",
            AcquisitionState::WaitForReset => "WAIT_FOR_RESET",
            AcquisitionState::Configure => "CONFIGURE",
            AcquisitionState::FifoRead => "FIFO_READ",
            AcquisitionState::RequestStop => "REQUEST_STOP",
            AcquisitionState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// What a tick (or a control command) observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Soft reset command written
    ResetIssued,
    /// Soft reset write failed on the bus
    ResetFailed,
    /// Still inside the settle window, or chip ID not back yet
    ResetPending,
    /// Settle time elapsed and chip ID answered
    ResetSettled,
    /// Reset never settled within the timeout
    ResetTimedOut,
    /// All table entries written and read back
    Configured { data_ready: bool },
    /// Configuration failed `attempts` times in a row
    ConfigureFailed { attempts: u32 },
    /// Round-robin register check found drift
    RegisterMismatch,
    /// FIFO cycle completed (or had nothing to do)
    FifoHealthy,
    /// `consecutive` FIFO cycles in a row hit a bus error
    BusFailure { consecutive: u32 },
    /// `consecutive` FIFO cycles in a row hit a bad frame
    BadTransfer { consecutive: u32 },
    /// External stop request
    StopRequested,
    /// Tick observed the pending stop
    StopAcknowledged,
    /// External start while stopped
    StartRequested,
    /// External reset request
    ResetRequested,
}

bitflags! {
    /// Side effects the engine applies after a transition
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Effects: u8 {
        const ENABLE_DATA_READY  = 1 << 0;
        const DISABLE_DATA_READY = 1 << 1;
        const RESET_FIFO         = 1 << 2;
        const INIT_FAILED        = 1 << 3;
        const RESET_COUNTERS     = 1 << 4;
    }
}

/// Escalation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub max_configure_attempts: u32,
    pub max_consecutive_bus_errors: u32,
    pub max_consecutive_bad_transfers: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_configure_attempts: 10,
            max_consecutive_bus_errors: 10,
            max_consecutive_bad_transfers: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: AcquisitionState,
    pub effects: Effects,
}

impl Transition {
    fn to(next: AcquisitionState) -> Self {
        Self {
            next,
            effects: Effects::empty(),
        }
    }

    fn with(next: AcquisitionState, effects: Effects) -> Self {
        Self { next, effects }
    }
}

/// Decide the next state for `event` observed in `state`
pub fn transition(state: AcquisitionState, event: Event, policy: &RecoveryPolicy) -> Transition {
    use AcquisitionState::*;

    match (state, event) {
        // Control surface
        (Stopped, Event::StartRequested) => Transition::to(Reset),
        (_, Event::ResetRequested) => {
            Transition::with(Reset, Effects::DISABLE_DATA_READY | Effects::RESET_COUNTERS)
        }
        (Stopped, _) => Transition::to(Stopped),
        (_, Event::StopRequested) => Transition::to(RequestStop),
        (RequestStop, Event::StopAcknowledged) => {
            Transition::with(Stopped, Effects::DISABLE_DATA_READY)
        }
        (RequestStop, _) => Transition::to(RequestStop),

        (Reset, Event::ResetIssued) => Transition::to(WaitForReset),
        (Reset, _) => Transition::to(Reset),

        (WaitForReset, Event::ResetSettled) => Transition::to(Configure),
        (WaitForReset, Event::ResetTimedOut) => {
            Transition::with(Stopped, Effects::INIT_FAILED | Effects::DISABLE_DATA_READY)
        }
        (WaitForReset, _) => Transition::to(WaitForReset),

        (Configure, Event::Configured { data_ready }) => {
            let mut effects = Effects::RESET_FIFO;
            if data_ready {
                effects |= Effects::ENABLE_DATA_READY;
            }
            Transition::with(FifoRead, effects)
        }
        (Configure, Event::ConfigureFailed { attempts }) => {
            if attempts >= policy.max_configure_attempts {
                Transition::to(Reset)
            } else {
                Transition::to(Configure)
            }
        }
        (Configure, _) => Transition::to(Configure),

        (FifoRead, Event::RegisterMismatch) => {
            Transition::with(Configure, Effects::DISABLE_DATA_READY)
        }
        (FifoRead, Event::BusFailure { consecutive }) => {
            if consecutive > policy.max_consecutive_bus_errors {
                Transition::with(Reset, Effects::DISABLE_DATA_READY)
            } else {
                Transition::to(FifoRead)
            }
        }
        (FifoRead, Event::BadTransfer { consecutive }) => {
            if consecutive >= policy.max_consecutive_bad_transfers {
                Transition::with(FifoRead, Effects::RESET_FIFO)
            } else {
                Transition::to(FifoRead)
            }
        }
        (FifoRead, _) => Transition::to(FifoRead),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AcquisitionState::*;

    fn step(state: AcquisitionState, event: Event) -> Transition {
        transition(state, event, &RecoveryPolicy::default())
    }

    #[test]
    fn test_reset_sequence() {
        assert_eq!(step(Reset, Event::ResetIssued).next, WaitForReset);
        assert_eq!(step(Reset, Event::ResetFailed).next, Reset);
        assert_eq!(step(WaitForReset, Event::ResetPending).next, WaitForReset);
        assert_eq!(step(WaitForReset, Event::ResetSettled).next, Configure);
    }

    #[test]
    fn test_reset_timeout_is_fatal() {
        let t = step(WaitForReset, Event::ResetTimedOut);
        assert_eq!(t.next, Stopped);
        assert!(t.effects.contains(Effects::INIT_FAILED));
    }

    #[test]
    fn test_configure_success_enters_fifo_read() {
        let t = step(Configure, Event::Configured { data_ready: true });
        assert_eq!(t.next, FifoRead);
        assert!(t.effects.contains(Effects::RESET_FIFO | Effects::ENABLE_DATA_READY));

        let t = step(Configure, Event::Configured { data_ready: false });
        assert_eq!(t.next, FifoRead);
        assert!(!t.effects.contains(Effects::ENABLE_DATA_READY));
    }

    #[test]
    fn test_configure_failure_escalates_after_ceiling() {
        let policy = RecoveryPolicy::default();
        let below = policy.max_configure_attempts - 1;
        assert_eq!(step(Configure, Event::ConfigureFailed { attempts: below }).next, Configure);
        assert_eq!(
            step(
                Configure,
                Event::ConfigureFailed {
                    attempts: policy.max_configure_attempts
                }
            )
            .next,
            Reset
        );
    }

    #[test]
    fn test_register_mismatch_reconfigures() {
        let t = step(FifoRead, Event::RegisterMismatch);
        assert_eq!(t.next, Configure);
        assert!(t.effects.contains(Effects::DISABLE_DATA_READY));
    }

    #[test]
    fn test_bus_failures_force_reset() {
        let limit = RecoveryPolicy::default().max_consecutive_bus_errors;
        assert_eq!(step(FifoRead, Event::BusFailure { consecutive: limit }).next, FifoRead);
        assert_eq!(step(FifoRead, Event::BusFailure { consecutive: limit + 1 }).next, Reset);
    }

    #[test]
    fn test_recurring_bad_transfers_reset_fifo() {
        let t = step(FifoRead, Event::BadTransfer { consecutive: 1 });
        assert_eq!(t.next, FifoRead);
        assert!(t.effects.is_empty());

        let t = step(FifoRead, Event::BadTransfer { consecutive: 3 });
        assert_eq!(t.next, FifoRead);
        assert!(t.effects.contains(Effects::RESET_FIFO));
    }

    #[test]
    fn test_stop_and_restart() {
        for state in [Reset, WaitForReset, Configure, FifoRead] {
            assert_eq!(step(state, Event::StopRequested).next, RequestStop);
        }
        let t = step(RequestStop, Event::StopAcknowledged);
        assert_eq!(t.next, Stopped);
        assert!(t.effects.contains(Effects::DISABLE_DATA_READY));

        assert_eq!(step(Stopped, Event::FifoHealthy).next, Stopped);
        assert_eq!(step(Stopped, Event::StopRequested).next, Stopped);
        assert_eq!(step(Stopped, Event::StartRequested).next, Reset);
    }

    #[test]
    fn test_reset_request_from_any_state() {
        for state in [Reset, WaitForReset, Configure, FifoRead, RequestStop, Stopped] {
            let t = step(state, Event::ResetRequested);
            assert_eq!(t.next, Reset);
            assert!(t.effects.contains(Effects::RESET_COUNTERS));
        }
    }

    #[test]
    fn test_start_ignored_while_running() {
        assert_eq!(step(FifoRead, Event::StartRequested).next, FifoRead);
    }
}
