// Licensed under the Apache-2.0 license

//! One-shot wake-up from interrupt context to a waiting task.
//!
//! A [`Completion`] is armed by the task right before it starts a
//! transaction, signalled once by the interrupt handler, and consumed by
//! [`Completion::wait`]. The signal is latched: an interrupt that fires before
//! the task starts waiting is not lost.

use core::sync::atomic::{AtomicU8, Ordering};

use embedded_hal::delay::DelayNs;

use crate::common::{poll_until, Timeout};

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const SIGNALLED: u8 = 2;

#[derive(Debug)]
pub struct Completion {
    state: AtomicU8,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Prepare for exactly one [`signal`](Self::signal).
    ///
    /// Discards a signal that was never consumed.
    pub fn arm(&self) {
        self.state.store(ARMED, Ordering::Release);
    }

    /// Give up on the pending signal; a late `signal` is then ignored.
    pub fn disarm(&self) {
        self.state.store(IDLE, Ordering::Release);
    }

    /// Latch the signal. Safe to call from interrupt context.
    ///
    /// # Returns
    ///
    /// `true` if this call delivered the signal, `false` if the completion was
    /// not armed or has already been signalled.
    pub fn signal(&self) -> bool {
        self.state
            .compare_exchange(ARMED, SIGNALLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.state.load(Ordering::Acquire) == SIGNALLED
    }

    /// Consume a latched signal without blocking.
    pub fn try_take(&self) -> bool {
        self.state
            .compare_exchange(SIGNALLED, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Block until the signal arrives or `timeout` elapses.
    ///
    /// A signal is consumed by the call that observes it. On timeout the
    /// completion stays armed; callers that abandon the transaction should
    /// [`disarm`](Self::disarm) it.
    pub fn wait<D: DelayNs>(&self, timeout: Timeout, delay: &mut D) -> bool {
        poll_until(timeout, delay, || self.try_take())
    }
}
