//! Argument and parameter types used by TCP/IP Commands and Responses

/// `<err>` of the `+QIOPEN` result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenResult {
    Success,
    /// The socket identity is already open on the module
    AlreadyInUse,
    DnsFailed,
    ConnectFailed,
    Other(u16),
}

impl From<u16> for OpenResult {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Success,
            563 => Self::AlreadyInUse,
            565 => Self::DnsFailed,
            566 => Self::ConnectFailed,
            other => Self::Other(other),
        }
    }
}
