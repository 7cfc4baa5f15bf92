//! One-shot, individually cancelable deadlines.
use embassy_time::Instant;
use heapless::Vec;

use crate::socket::SocketHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timer {
    /// Delay requested by the lifecycle state machine
    Lifecycle,
    SendPrompt(SocketHandle),
    SendResult(SocketHandle),
    OpenRetry(SocketHandle),
    /// Deferred open of a TLS port socket
    OpenDelayed(SocketHandle),
    GeoPoll,
}

#[derive(Debug, Default)]
pub struct Timers {
    entries: Vec<(Instant, Timer), 32>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `timer` to fire at `at`, replacing an armed timer of the same kind.
    pub fn arm(&mut self, timer: Timer, at: Instant) {
        self.cancel(timer);
        if self.entries.push((at, timer)).is_err() {
            error!("Timer table full, dropping {:?}", timer);
        }
    }

    /// Returns `true` if the timer was armed.
    pub fn cancel(&mut self, timer: Timer) -> bool {
        match self.entries.iter().position(|(_, t)| *t == timer) {
            Some(i) => {
                self.entries.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub fn cancel_socket(&mut self, handle: SocketHandle) {
        self.entries.retain(|(_, t)| {
            !matches!(t,
                Timer::SendPrompt(h) | Timer::SendResult(h) | Timer::OpenRetry(h) | Timer::OpenDelayed(h)
                if *h == handle)
        });
    }

    pub fn is_armed(&self, timer: Timer) -> bool {
        self.entries.iter().any(|(_, t)| *t == timer)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|(at, _)| *at).min()
    }

    /// Remove and return the earliest timer due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Timer> {
        let (i, _) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (at, _))| *at <= now)
            .min_by_key(|(_, (at, _))| *at)?;
        Some(self.entries.swap_remove(i).1)
    }
}
