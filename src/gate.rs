//! Single-use completion signal shared between the event path and the deadline.

use std::sync::atomic::{AtomicU8, Ordering};

const PENDING: u8 = 0;
const SIGNALED: u8 = 1;
const EXPIRED: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Signaled,
    Expired,
}

/// Leaves `Pending` exactly once, either through [`CompletionGate::try_signal`]
/// or [`CompletionGate::try_expire`], whichever caller gets there first.
#[derive(Debug)]
pub struct CompletionGate {
    state: AtomicU8,
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionGate {
    pub fn new() -> Self {
        CompletionGate {
            state: AtomicU8::new(PENDING),
        }
    }

    /// Returns true only for the caller that moved the gate to `Signaled`.
    pub fn try_signal(&self) -> bool {
        self.transition(SIGNALED)
    }

    /// Returns true only for the caller that moved the gate to `Expired`.
    pub fn try_expire(&self) -> bool {
        self.transition(EXPIRED)
    }

    pub fn is_signaled(&self) -> bool {
        self.state() == GateState::Signaled
    }

    pub fn is_pending(&self) -> bool {
        self.state() == GateState::Pending
    }

    pub fn state(&self) -> GateState {
        match self.state.load(Ordering::Acquire) {
            PENDING => GateState::Pending,
            SIGNALED => GateState::Signaled,
            _ => GateState::Expired,
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
