//! AT Commands for the Quectel LTE/NB-IoT module family\
//! Following the Quectel BG96 AT commands manual and its TCP/IP and GNSS
//! application notes.

pub mod control;
pub mod device_lock;
pub mod general;
pub mod gnss;
pub mod ip_transport_layer;
pub mod network_service;
pub mod psn;

use atat::atat_derive::{AtatCmd, AtatResp};

#[derive(Clone, AtatResp)]
pub struct NoResponse;

/// Autobaud check
#[derive(Clone, AtatCmd)]
#[at_cmd("", NoResponse, timeout_ms = 500)]
pub struct AT;

/// Value following `key` up to the end of the line, with surrounding quotes
/// and whitespace removed. `key` includes the trailing colon, e.g. `+CPIN:`.
pub(crate) fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key).map(|v| v.trim().trim_matches('"'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atat::AtatCmd;

    #[test]
    fn sync_encoding() {
        let mut buf = [0u8; 16];
        let len = AT.write(&mut buf);
        assert_eq!(&buf[..len], b"AT\r\n");
    }

    #[test]
    fn field_strips_quotes() {
        assert_eq!(field("+QCCID: \"8945\"", "+QCCID:"), Some("8945"));
        assert_eq!(field("+CPIN: READY", "+CPIN:"), Some("READY"));
        assert_eq!(field("OK", "+CPIN:"), None);
    }
}
