//! ### SIM related commands

use atat::atat_derive::AtatCmd;

use super::NoResponse;

/// Enter PIN +CPIN
///
/// Read form reports whether a password is required. `+CPIN: READY` means
/// the SIM is usable.
#[derive(Clone, AtatCmd)]
#[at_cmd("+CPIN?", NoResponse, timeout_ms = 5000)]
pub struct GetPinStatus;

/// `true` if `line` is the `+CPIN` report of an unlocked SIM.
pub(crate) fn is_ready(line: &str) -> bool {
    super::field(line, "+CPIN:") == Some("READY")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_status() {
        assert!(is_ready("+CPIN: READY"));
        assert!(!is_ready("+CPIN: SIM PIN"));
        assert!(!is_ready("READY"));
    }
}
