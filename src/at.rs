//! Boundary towards the AT transaction engine.
//!
//! The engine serializes command/response exchanges on the shared serial
//! channel and queues commands issued while an exchange is outstanding. The
//! driver never touches the UART itself; the engine calls back into
//! [`Device`](crate::client::Device) with every line belonging to the
//! outstanding command and with every chunk of unsolicited input.

use atat::AtatCmd;
use embassy_time::Duration;

pub trait AtEngine {
    /// Queue a fully encoded command (including `AT` prefix and line
    /// terminator). Its response lines are delivered in order through
    /// `Device::on_response` until that returns [`Flow::Done`] or the
    /// timeout elapses, in which case [`Response::Timeout`] is delivered.
    fn cmd(&mut self, cmd: &[u8], timeout: Duration);

    /// Out-of-band payload write, used after a `>` prompt.
    fn write(&mut self, data: &[u8]);

    /// `true` while a command is outstanding or queued.
    fn is_busy(&self) -> bool;

    fn set_debug(&mut self, _enabled: bool) {}
}

/// A response item for the outstanding command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response<'a> {
    Line(&'a str),
    /// The `>` data prompt
    Prompt,
    Timeout,
}

/// Whether the outstanding exchange wants more lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flow {
    Wait,
    Done,
}

/// Outcome of offering unsolicited input to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch<'a> {
    /// Not a notification this driver handles
    NotMine,
    /// Every byte was consumed
    Consumed,
    /// The leading bytes were consumed, the rest must be dispatched again
    Remainder(&'a [u8]),
    /// A recognised header is not complete yet, offer it again with more input
    Incomplete,
}

pub(crate) fn is_final(line: &str) -> bool {
    line == "OK" || is_error(line)
}

pub(crate) fn is_error(line: &str) -> bool {
    line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR")
}

/// Encode `cmd` and hand it to the engine with the command's own timeout.
pub(crate) fn send<E: AtEngine, C: AtatCmd>(engine: &mut E, cmd: &C) {
    let mut buf = [0u8; 256];
    let len = cmd.write(&mut buf);
    trace!("Sending {:?}", crate::fmt::LossyStr(&buf[..len]));
    engine.cmd(&buf[..len], Duration::from_millis(C::MAX_TIMEOUT_MS.into()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_lines() {
        assert!(is_final("OK"));
        assert!(is_final("ERROR"));
        assert!(is_final("+CME ERROR: 10"));
        assert!(!is_final("+CSQ: 99,99"));
        assert!(!is_final("SEND OK"));
    }
}
