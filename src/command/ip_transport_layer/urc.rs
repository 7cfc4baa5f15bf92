//! Unsolicited notifications of the TCP/IP service
//!
//! These are parsed from raw bytes rather than lines, since a `recv`
//! notification carries binary payload directly after its header.
use crate::socket::SocketHandle;

pub(crate) const SOCKET_DATA: &[u8] = b"+QIURC: \"recv\",";
pub(crate) const SOCKET_CLOSED: &[u8] = b"+QIURC: \"closed\",";
pub(crate) const PDP_DEACTIVATED: &[u8] = b"+QIURC: \"pdpdeact\",";

/// Result of parsing a notification header.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Header<T> {
    /// Parsed value and the number of header bytes consumed
    Complete(T, usize),
    Incomplete,
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SocketData {
    pub socket: SocketHandle,
    pub length: usize,
}

/// Leading decimal number and its digit count.
fn number(data: &[u8]) -> Option<(usize, usize)> {
    let digits = data.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > 5 {
        return None;
    }
    let value = data[..digits]
        .iter()
        .fold(0usize, |acc, b| acc * 10 + usize::from(b - b'0'));
    Some((value, digits))
}

/// `+QIURC: "recv",<id>,<len>\r\n`, followed by `<len>` payload bytes.
pub(crate) fn socket_data(data: &[u8]) -> Header<SocketData> {
    let Some(rest) = data.strip_prefix(SOCKET_DATA) else {
        return Header::Malformed;
    };
    let Some(end) = rest.windows(2).position(|w| w == b"\r\n") else {
        return if rest.len() > 16 {
            Header::Malformed
        } else {
            Header::Incomplete
        };
    };
    let fields = &rest[..end];
    let parsed = number(fields).and_then(|(id, n)| {
        let tail = fields[n..].strip_prefix(b",")?;
        let (length, m) = number(tail)?;
        (m == tail.len()).then_some((id, length))
    });
    match parsed {
        Some((id, length)) if id <= u8::MAX as usize => Header::Complete(
            SocketData {
                socket: SocketHandle(id as u8),
                length,
            },
            SOCKET_DATA.len() + end + 2,
        ),
        _ => Header::Malformed,
    }
}

/// Single numeric argument after `prefix`, terminated by `\r\n` or a lone
/// `\r`. Digits running to the end of the input may still be growing.
fn numeric_line(data: &[u8], prefix: &[u8]) -> Header<usize> {
    let Some(rest) = data.strip_prefix(prefix) else {
        return Header::Malformed;
    };
    if rest.is_empty() {
        return Header::Incomplete;
    }
    let Some((value, n)) = number(rest) else {
        return Header::Malformed;
    };
    let ending = match &rest[n..] {
        [b'\r', b'\n', ..] => 2,
        [b'\r', ..] => 1,
        [] => return Header::Incomplete,
        _ => return Header::Malformed,
    };
    Header::Complete(value, prefix.len() + n + ending)
}

/// `+QIURC: "closed",<id>`
pub(crate) fn socket_closed(data: &[u8]) -> Header<SocketHandle> {
    match numeric_line(data, SOCKET_CLOSED) {
        Header::Complete(id, n) if id <= u8::MAX as usize => {
            Header::Complete(SocketHandle(id as u8), n)
        }
        Header::Incomplete => Header::Incomplete,
        _ => Header::Malformed,
    }
}

/// `+QIURC: "pdpdeact",<contextID>`
pub(crate) fn pdp_deactivated(data: &[u8]) -> Header<u8> {
    match numeric_line(data, PDP_DEACTIVATED) {
        Header::Complete(ctx, n) if ctx <= u8::MAX as usize => Header::Complete(ctx as u8, n),
        Header::Incomplete => Header::Incomplete,
        _ => Header::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_header() {
        assert_eq!(
            socket_data(b"+QIURC: \"recv\",4,12\r\nhello"),
            Header::Complete(
                SocketData {
                    socket: SocketHandle(4),
                    length: 12
                },
                21
            )
        );
        assert_eq!(socket_data(b"+QIURC: \"recv\",4,1"), Header::Incomplete);
        assert_eq!(socket_data(b"+QIURC: \"recv\",x,1\r\n"), Header::Malformed);
    }

    #[test]
    fn closed_line_endings() {
        let full = b"+QIURC: \"closed\",7\r\n";
        assert_eq!(
            socket_closed(full),
            Header::Complete(SocketHandle(7), full.len())
        );
        let partial = b"+QIURC: \"closed\",7\r";
        assert_eq!(
            socket_closed(partial),
            Header::Complete(SocketHandle(7), partial.len())
        );
        assert_eq!(socket_closed(b"+QIURC: \"closed\",1"), Header::Incomplete);
        assert_eq!(socket_closed(b"+QIURC: \"closed\",10"), Header::Incomplete);
        assert_eq!(socket_closed(b"+QIURC: \"closed\","), Header::Incomplete);
    }

    #[test]
    fn pdp_context() {
        assert_eq!(
            pdp_deactivated(b"+QIURC: \"pdpdeact\",1\r\nRDY"),
            Header::Complete(1, 22)
        );
    }
}
