//! Routing and reassembly of unsolicited notifications.
//!
//! Notification framing does not follow dispatch boundaries: a `recv`
//! payload may be split over several chunks, and a chunk may hold one
//! notification plus the start of the next. Payload bytes are routed
//! straight into the addressed socket's inbound queue. A payload that runs
//! past the end of a chunk leaves a [`Reassembly`] record behind, so the
//! next chunk continues the copy without a header.

use crate::at::Dispatch;
use crate::command::ip_transport_layer::urc::{self, Header};
use crate::socket::{SocketHandle, SocketSet};

/// Outstanding payload of a split `recv` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reassembly {
    pub socket: SocketHandle,
    pub remaining: usize,
}

/// Side effect a notification asks the driver to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UrcEvent {
    DataReceived(SocketHandle),
    SocketClosed(SocketHandle),
    PdpDeactivated(u8),
    PoweredDown,
}

const POWERED_DOWN: &[u8] = b"POWERED DOWN";

/// Notifications acknowledged and deliberately ignored.
const DISCARDED: &[&[u8]] = &[
    b"RDY",
    b"APP RDY",
    b"+QIND:",
    b"+QUSIM:",
    b"+CFUN:",
    b"+QIURC: \"incoming",
];

/// Split off the first line, dropping its `\r\n` or `\r` terminator.
fn split_line(data: &[u8]) -> (&[u8], &[u8]) {
    match data.iter().position(|&b| b == b'\r' || b == b'\n') {
        Some(i) => {
            let skip = if data[i..].starts_with(b"\r\n") { 2 } else { 1 };
            (&data[..i], &data[i + skip..])
        }
        None => (data, &[]),
    }
}

fn rest_of(data: &[u8], consumed: usize) -> Dispatch<'_> {
    if consumed >= data.len() {
        Dispatch::Consumed
    } else {
        Dispatch::Remainder(&data[consumed..])
    }
}

/// Copy as much of an outstanding payload as `data` holds.
fn continue_payload<'d>(
    sockets: &mut SocketSet,
    reassembly: &mut Option<Reassembly>,
    pending: Reassembly,
    data: &'d [u8],
) -> Dispatch<'d> {
    let n = pending.remaining.min(data.len());
    sockets.append(pending.socket, &data[..n]);
    let remaining = pending.remaining - n;
    *reassembly = (remaining > 0).then_some(Reassembly {
        socket: pending.socket,
        remaining,
    });
    rest_of(data, n)
}

/// Offer a chunk of unsolicited input.
///
/// At most one notification is handled per call; any trailing bytes are
/// handed back as [`Dispatch::Remainder`] for another round.
pub fn dispatch<'d>(
    sockets: &mut SocketSet,
    reassembly: &mut Option<Reassembly>,
    data: &'d [u8],
) -> (Dispatch<'d>, Option<UrcEvent>) {
    if let Some(pending) = reassembly.take() {
        let socket = pending.socket;
        let dispatch = continue_payload(sockets, reassembly, pending, data);
        return (dispatch, Some(UrcEvent::DataReceived(socket)));
    }

    let separators = data.iter().take_while(|&&b| b == b'\r' || b == b'\n').count();
    if separators > 0 {
        return (rest_of(data, separators), None);
    }

    if data.starts_with(urc::SOCKET_DATA) {
        return match urc::socket_data(data) {
            Header::Complete(header, consumed) => {
                trace!("Socket {} receiving {} bytes", header.socket.0, header.length);
                let pending = Reassembly {
                    socket: header.socket,
                    remaining: header.length,
                };
                let dispatch = if header.length == 0 {
                    rest_of(data, consumed)
                } else {
                    match continue_payload(sockets, reassembly, pending, &data[consumed..]) {
                        Dispatch::Remainder(rest) => Dispatch::Remainder(rest),
                        _ => Dispatch::Consumed,
                    }
                };
                (dispatch, Some(UrcEvent::DataReceived(header.socket)))
            }
            Header::Incomplete => (Dispatch::Incomplete, None),
            Header::Malformed => discard_line(data),
        };
    }

    if data.starts_with(urc::SOCKET_CLOSED) {
        return match urc::socket_closed(data) {
            Header::Complete(socket, consumed) => {
                debug!("Socket {} closed by peer", socket.0);
                (rest_of(data, consumed), Some(UrcEvent::SocketClosed(socket)))
            }
            Header::Incomplete => (Dispatch::Incomplete, None),
            Header::Malformed => discard_line(data),
        };
    }

    if data.starts_with(urc::PDP_DEACTIVATED) {
        return match urc::pdp_deactivated(data) {
            Header::Complete(ctx, consumed) => {
                warn!("PDP context {} deactivated", ctx);
                (rest_of(data, consumed), Some(UrcEvent::PdpDeactivated(ctx)))
            }
            Header::Incomplete => (Dispatch::Incomplete, None),
            Header::Malformed => discard_line(data),
        };
    }

    if data.starts_with(POWERED_DOWN) {
        let (_, rest) = split_line(data);
        warn!("Module powered down");
        return (rest_of(data, data.len() - rest.len()), Some(UrcEvent::PoweredDown));
    }

    if DISCARDED.iter().any(|prefix| data.starts_with(prefix)) {
        return discard_line(data);
    }

    if is_partial_prefix(data) {
        return (Dispatch::Incomplete, None);
    }

    (Dispatch::NotMine, None)
}

/// `data` stops short inside a recognised prefix.
fn is_partial_prefix(data: &[u8]) -> bool {
    let handled = [urc::SOCKET_DATA, urc::SOCKET_CLOSED, urc::PDP_DEACTIVATED, POWERED_DOWN];
    !data.is_empty()
        && handled
            .iter()
            .chain(DISCARDED)
            .any(|prefix| data.len() < prefix.len() && prefix.starts_with(data))
}

fn discard_line(data: &[u8]) -> (Dispatch<'_>, Option<UrcEvent>) {
    let (line, rest) = split_line(data);
    debug!("Ignoring notification {:?}", crate::fmt::LossyStr(line));
    (rest_of(data, data.len() - rest.len()), None)
}
