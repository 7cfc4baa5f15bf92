use core::fmt;

use heapless::String;

/// Lifecycle stage whose retry budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    Synchronize,
    Attach,
    Open,
}

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// No response within the configured window
    Timeout,
    /// Explicit unexpected or error token from the modem
    Protocol(String<32>),
    /// Every socket slot is in use
    NoFreeSocket,
    /// Payload exceeds the 1460 byte segment limit
    PayloadTooLarge,
    /// Synchronization, attach or open retries depleted
    RetryExhausted(Stage),

    // Socket errors
    InvalidSocket,
    SocketClosed,
    DnsFailed,
    HostTooLong,

    /// APN or credential exceeds the 64 byte command argument limit
    ArgumentTooLong,

    // General device errors
    Busy,
    QueueFull,
    IoPin,
}

impl Error {
    /// Protocol error carrying the offending token, truncated to fit.
    pub fn protocol(token: &str) -> Self {
        let mut s = String::new();
        for c in token.chars() {
            if s.push(c).is_err() {
                break;
            }
        }
        Self::Protocol(s)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Protocol(token) => write!(f, "unexpected response: {}", token),
            Self::NoFreeSocket => f.write_str("no free socket"),
            Self::PayloadTooLarge => f.write_str("payload too large"),
            Self::RetryExhausted(Stage::Synchronize) => f.write_str("unable to synchronize"),
            Self::RetryExhausted(Stage::Attach) => {
                f.write_str("unrecoverable: packet service attach failed")
            }
            Self::RetryExhausted(Stage::Open) => f.write_str("socket open retries exhausted"),
            Self::InvalidSocket => f.write_str("invalid socket"),
            Self::SocketClosed => f.write_str("socket closed"),
            Self::DnsFailed => f.write_str("DNS lookup failed"),
            Self::HostTooLong => f.write_str("host name too long"),
            Self::ArgumentTooLong => f.write_str("argument too long"),
            Self::Busy => f.write_str("busy"),
            Self::QueueFull => f.write_str("command queue full"),
            Self::IoPin => f.write_str("pin error"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter<'_>) {
        match self {
            Self::Timeout => defmt::write!(f, "Timeout"),
            Self::Protocol(token) => defmt::write!(f, "Protocol({=str})", token.as_str()),
            Self::NoFreeSocket => defmt::write!(f, "NoFreeSocket"),
            Self::PayloadTooLarge => defmt::write!(f, "PayloadTooLarge"),
            Self::RetryExhausted(stage) => defmt::write!(f, "RetryExhausted({:?})", stage),
            Self::InvalidSocket => defmt::write!(f, "InvalidSocket"),
            Self::SocketClosed => defmt::write!(f, "SocketClosed"),
            Self::DnsFailed => defmt::write!(f, "DnsFailed"),
            Self::HostTooLong => defmt::write!(f, "HostTooLong"),
            Self::ArgumentTooLong => defmt::write!(f, "ArgumentTooLong"),
            Self::Busy => defmt::write!(f, "Busy"),
            Self::QueueFull => defmt::write!(f, "QueueFull"),
            Self::IoPin => defmt::write!(f, "IoPin"),
        }
    }
}
