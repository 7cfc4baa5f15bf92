use core::fmt;

use atat::atat_derive::AtatLen;
use serde::{Deserialize, Serialize};

use super::{Socket, SocketState, MAX_SOCKETS, SERVER_SOCKET};

/// A handle, identifying a socket slot. Doubles as the module's connect id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, AtatLen,
)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handle(pub u8);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed table of every socket slot of the module.
#[derive(Debug)]
pub struct SocketSet {
    sockets: [Socket; MAX_SOCKETS],
}

impl Default for SocketSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketSet {
    pub fn new() -> Self {
        Self {
            sockets: core::array::from_fn(|_| Socket::default()),
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&Socket> {
        self.sockets.get(usize::from(handle.0))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Socket> {
        self.sockets.get_mut(usize::from(handle.0))
    }

    /// Lowest client slot that is unused and holds no stray data.
    pub(crate) fn free_slot(&self) -> Option<Handle> {
        self.iter()
            .find(|(h, s)| {
                *h != SERVER_SOCKET && s.state == SocketState::Unused && s.rx.is_empty()
            })
            .map(|(h, _)| h)
    }

    /// Lowest slot that received data without being opened by us.
    pub(crate) fn pending_incoming(&self) -> Option<Handle> {
        self.iter()
            .find(|(h, s)| {
                *h != SERVER_SOCKET && s.state == SocketState::Unused && !s.rx.is_empty()
            })
            .map(|(h, _)| h)
    }

    /// Append inbound payload. Data for an unknown id is dropped.
    pub(crate) fn append(&mut self, handle: Handle, data: &[u8]) {
        match self.get_mut(handle) {
            Some(socket) => socket.rx.extend(data),
            None => warn!("Dropping {} bytes for unknown socket {}", data.len(), handle.0),
        }
    }

    pub(crate) fn reset_all(&mut self) {
        for socket in self.sockets.iter_mut() {
            socket.reset();
        }
    }

    pub fn iter(&self) -> SocketSetIter<'_> {
        SocketSetIter {
            inner: self.sockets.iter().enumerate(),
        }
    }
}

pub struct SocketSetIter<'a> {
    inner: core::iter::Enumerate<core::slice::Iter<'a, Socket>>,
}

impl<'a> Iterator for SocketSetIter<'a> {
    type Item = (Handle, &'a Socket);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(i, s)| (Handle(i as u8), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_slot_skips_busy_and_dirty_slots() {
        let mut set = SocketSet::new();
        assert_eq!(set.free_slot(), Some(Handle(0)));

        set.get_mut(Handle(0)).unwrap().state = SocketState::Established;
        set.append(Handle(1), b"stray");
        assert_eq!(set.free_slot(), Some(Handle(2)));
        assert_eq!(set.pending_incoming(), Some(Handle(1)));
    }

    #[test]
    fn server_slot_is_never_free() {
        let mut set = SocketSet::new();
        for i in 0..MAX_SOCKETS as u8 - 1 {
            set.get_mut(Handle(i)).unwrap().state = SocketState::Connecting;
        }
        assert_eq!(set.free_slot(), None);
    }

    #[test]
    fn reset_all_clears_state_and_data() {
        let mut set = SocketSet::new();
        set.get_mut(Handle(3)).unwrap().state = SocketState::Closing;
        set.append(Handle(3), b"abc");
        set.append(Handle(42), b"lost");
        set.reset_all();
        assert!(set
            .iter()
            .all(|(_, s)| s.state == SocketState::Unused && s.rx.is_empty()));
    }
}
