//! Virtual TCP socket slots multiplexed over the AT channel.
mod set;

pub use set::{SocketSet, SocketSetIter};

use alloc::collections::VecDeque;
use heapless::String;

pub use set::Handle as SocketHandle;

/// Number of socket identities the module exposes.
pub const MAX_SOCKETS: usize = 12;

/// Slot reserved for incoming connections, never handed out by `create`.
pub const SERVER_SOCKET: SocketHandle = SocketHandle(MAX_SOCKETS as u8 - 1);

/// Largest payload accepted by a single `AT+QISEND`.
pub const MAX_PAYLOAD: usize = 1460;

pub const MAX_HOST_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketState {
    #[default]
    Unused,
    Connecting,
    Established,
    /// Closed by the peer or failed; close is finalized once drained
    Closing,
}

#[derive(Debug, Default)]
pub struct Socket {
    pub(crate) state: SocketState,
    /// Inbound data, appended by the notification handler and drained by `recv`
    pub(crate) rx: VecDeque<u8>,
    pub(crate) open_attempts: u8,
    pub(crate) host: String<MAX_HOST_LEN>,
    pub(crate) port: u16,
}

impl Socket {
    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// Pop up to `buf.len()` bytes from the front of the inbound queue.
    pub(crate) fn dequeue(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rx.len());
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *dst = src;
        }
        n
    }

    pub(crate) fn reset(&mut self) {
        self.state = SocketState::Unused;
        self.rx.clear();
        self.open_attempts = 0;
        self.host.clear();
        self.port = 0;
    }
}
