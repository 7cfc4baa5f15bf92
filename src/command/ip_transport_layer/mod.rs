//! ### TCP/IP commands
//!
//! Sockets are opened in direct push mode: received data is pushed to the
//! host as `+QIURC: "recv"` notifications instead of being polled.
pub mod types;
pub mod urc;

use core::fmt::Write as _;

use atat::atat_derive::AtatCmd;
use heapless::String;

use super::NoResponse;
use crate::socket::SocketHandle;
use types::OpenResult;

/// Open a socket service +QIOPEN
///
/// Opens a TCP client connection on `socket` of context 1, in direct push
/// mode. The final outcome is reported after `OK` as
/// `+QIOPEN: <socket>,<err>`.
#[derive(Clone)]
pub struct OpenSocket<'a> {
    pub socket: SocketHandle,
    pub remote_host: &'a str,
    pub remote_port: u16,
}

impl<'a> atat::AtatCmd for OpenSocket<'a> {
    type Response = NoResponse;

    const MAX_LEN: usize = 192;
    const MAX_TIMEOUT_MS: u32 = 150_000;

    fn write(&self, buf: &mut [u8]) -> usize {
        let mut s: String<192> = String::new();
        write!(
            s,
            "AT+QIOPEN=1,{},\"TCP\",\"{}\",{},0,1\r\n",
            self.socket.0, self.remote_host, self.remote_port
        )
        .ok();
        let len = s.len().min(buf.len());
        buf[..len].copy_from_slice(&s.as_bytes()[..len]);
        len
    }

    fn parse(
        &self,
        _resp: Result<&[u8], atat::InternalError>,
    ) -> Result<Self::Response, atat::Error> {
        Ok(NoResponse)
    }
}

/// Close a socket service +QICLOSE
#[derive(Clone, AtatCmd)]
#[at_cmd("+QICLOSE", NoResponse, timeout_ms = 10000)]
pub struct CloseSocket {
    #[at_arg(position = 0)]
    pub socket: SocketHandle,
}

/// Send data +QISEND
///
/// The module answers with a `>` prompt, after which exactly `length` bytes
/// are written. Completion is reported as `SEND OK` or `SEND FAIL`.
#[derive(Clone, AtatCmd)]
#[at_cmd("+QISEND", NoResponse, timeout_ms = 2000)]
pub struct SendData {
    #[at_arg(position = 0)]
    pub socket: SocketHandle,
    #[at_arg(position = 1)]
    pub length: usize,
}

/// Query the last error code +QIGETERROR
#[derive(Clone, AtatCmd)]
#[at_cmd("+QIGETERROR", NoResponse)]
pub struct GetLastError;

/// Parse `+QIOPEN: <socket>,<err>`.
pub(crate) fn open_result(line: &str) -> Option<(SocketHandle, OpenResult)> {
    let rest = line.strip_prefix("+QIOPEN:")?;
    let (id, err) = rest.split_once(',')?;
    let id = id.trim().parse::<u8>().ok()?;
    let err = err.trim().parse::<u16>().ok()?;
    Some((SocketHandle(id), OpenResult::from(err)))
}
