//! ### Serial interface control commands
pub mod types;

use super::NoResponse;
use atat::atat_derive::AtatCmd;
use types::{Echo, ResultCodeFormat};

/// TA response format V
///
/// Selects numeric or verbose result codes. The driver relies on verbose
/// codes (`OK`, `ERROR`).
#[derive(Clone, AtatCmd)]
#[at_cmd("V", NoResponse, value_sep = false)]
pub struct SetResultCodeFormat {
    #[at_arg(position = 0)]
    pub format: ResultCodeFormat,
}

/// Echo mode E
///
/// Controls whether the module echoes characters received from the host.
#[derive(Clone, AtatCmd)]
#[at_cmd("E", NoResponse, value_sep = false)]
pub struct SetEcho {
    #[at_arg(position = 0)]
    pub enabled: Echo,
}

/// Set TE-TA local data flow control +IFC
///
/// Enables RTS/CTS hardware flow control in both directions.
#[derive(Clone, AtatCmd)]
#[at_cmd("+IFC=2,2", NoResponse, value_sep = false)]
pub struct SetFlowControl;

#[cfg(test)]
mod tests {
    use super::*;
    use atat::AtatCmd;

    #[test]
    fn echo_off_and_verbose() {
        let mut buf = [0u8; 32];
        let len = SetEcho {
            enabled: Echo::Disable,
        }
        .write(&mut buf);
        assert_eq!(&buf[..len], b"ATE0\r\n");

        let len = SetResultCodeFormat {
            format: ResultCodeFormat::Verbose,
        }
        .write(&mut buf);
        assert_eq!(&buf[..len], b"ATV1\r\n");

        let len = SetFlowControl.write(&mut buf);
        assert_eq!(&buf[..len], b"AT+IFC=2,2\r\n");
    }
}
