//! Socket multiplexer: create/close/accept/recv/send over the module's
//! socket identities.
//!
//! Data-path calls never block. `recv` and `send` follow the `nb`
//! convention: `WouldBlock` means "nothing now, try again", `Other` means
//! the socket is gone or the request can never succeed.

use core::fmt::Write as _;

use embedded_hal::digital::OutputPin;
use heapless::String;

use crate::at::{is_error, is_final, AtEngine, Flow, Response};
use crate::client::{Device, Event, Exchange, PendingSend};
use crate::command::ip_transport_layer::{
    open_result, types::OpenResult, CloseSocket, GetLastError, OpenSocket, SendData,
};
use crate::error::{Error, Stage};
use crate::module_timing::*;
use crate::socket::{SocketHandle, SocketState, MAX_HOST_LEN, MAX_PAYLOAD, SERVER_SOCKET};
use crate::timer::Timer;

/// Port that gets a grace period before opening, for a TLS layer to prepare.
const TLS_PORT: u16 = 443;

impl<RST, PWR> Device<RST, PWR>
where
    RST: OutputPin,
    PWR: OutputPin,
{
    /// Allocate the lowest free socket and start connecting it to
    /// `host:port`. The outcome is reported as [`Event::SocketOpened`] or
    /// [`Event::SocketOpenFailed`].
    pub fn create<E: AtEngine>(
        &mut self,
        engine: &mut E,
        host: &str,
        port: u16,
    ) -> Result<SocketHandle, Error> {
        let handle = self.sockets.free_slot().ok_or(Error::NoFreeSocket)?;
        let host = String::<MAX_HOST_LEN>::try_from(host).map_err(|_| Error::HostTooLong)?;

        let socket = self.sockets.get_mut(handle).ok_or(Error::InvalidSocket)?;
        socket.state = SocketState::Connecting;
        socket.open_attempts = 0;
        socket.host = host;
        socket.port = port;
        self.deferred_close &= !(1 << handle.0);

        if port == TLS_PORT {
            self.timers
                .arm(Timer::OpenDelayed(handle), self.now + TLS_OPEN_DELAY);
        } else {
            self.issue_open(engine, handle);
        }
        Ok(handle)
    }

    pub(crate) fn issue_open<E: AtEngine>(&mut self, engine: &mut E, handle: SocketHandle) {
        let Some(socket) = self.sockets.get(handle) else {
            return;
        };
        if socket.state != SocketState::Connecting {
            return;
        }
        let host = socket.host.clone();
        let cmd = OpenSocket {
            socket: handle,
            remote_host: host.as_str(),
            remote_port: socket.port,
        };
        debug!("Opening socket {} to {}:{}", handle.0, host.as_str(), socket.port);
        if let Err(e) = self.issue(engine, &cmd, Exchange::Open(handle)) {
            self.open_failed(handle, e);
        }
    }

    fn open_failed(&mut self, handle: SocketHandle, error: Error) {
        warn!("Socket {} failed to open: {:?}", handle.0, error);
        if let Some(socket) = self.sockets.get_mut(handle) {
            socket.state = SocketState::Closing;
        }
        self.emit(Event::SocketOpenFailed(handle, error));
    }

    pub(crate) fn open_response<E: AtEngine>(
        &mut self,
        engine: &mut E,
        handle: SocketHandle,
        response: Response<'_>,
    ) -> Flow {
        match response {
            Response::Line(l) if l.starts_with("+QIOPEN:") => match open_result(l) {
                Some((id, result)) if id == handle => {
                    self.handle_open_result(engine, handle, result);
                    Flow::Done
                }
                _ => {
                    warn!("Unexpected open result {:?} for socket {}", l, handle.0);
                    Flow::Wait
                }
            },
            Response::Line(l) if is_error(l) => {
                self.handle_open_result(engine, handle, OpenResult::Other(0));
                Flow::Done
            }
            Response::Timeout => {
                if self.socket_state(handle) == Some(SocketState::Connecting) {
                    self.open_failed(handle, Error::Timeout);
                }
                Flow::Done
            }
            _ => Flow::Wait,
        }
    }

    fn handle_open_result<E: AtEngine>(
        &mut self,
        engine: &mut E,
        handle: SocketHandle,
        result: OpenResult,
    ) {
        let now = self.now;
        let Some(socket) = self.sockets.get_mut(handle) else {
            return;
        };
        if socket.state != SocketState::Connecting {
            debug!("Ignoring open result for socket {} in {:?}", handle.0, socket.state);
            return;
        }

        match result {
            OpenResult::Success | OpenResult::AlreadyInUse => {
                info!("Socket {} connected", handle.0);
                socket.state = SocketState::Established;
                socket.open_attempts = 0;
                self.emit(Event::SocketOpened(handle));
            }
            OpenResult::DnsFailed => self.open_failed(handle, Error::DnsFailed),
            OpenResult::ConnectFailed => {
                socket.open_attempts += 1;
                if socket.open_attempts <= MAX_OPEN_RETRIES {
                    debug!(
                        "Socket {} connect failed, retry {}",
                        handle.0, socket.open_attempts
                    );
                    self.timers
                        .arm(Timer::OpenRetry(handle), now + OPEN_RETRY_DELAY);
                } else {
                    self.open_failed(handle, Error::RetryExhausted(Stage::Open));
                }
            }
            OpenResult::Other(code) => {
                let mut token: String<32> = String::new();
                write!(token, "+QIOPEN: {}", code).ok();
                if self.config.debug.dump_unknown {
                    debug!("Socket {} open result {}", handle.0, code);
                }
                self.open_failed(handle, Error::protocol(&token));
                if let Err(e) = self.issue(engine, &GetLastError, Exchange::LastError(handle)) {
                    error!("Unable to query last error: {:?}", e);
                }
            }
        }
    }

    pub(crate) fn last_error_response(&mut self, handle: SocketHandle, response: Response<'_>) -> Flow {
        match response {
            Response::Line(l) if l.starts_with("+QIGETERROR:") => {
                warn!("Socket {} last error: {}", handle.0, l);
                Flow::Wait
            }
            Response::Line(l) if is_final(l) => Flow::Done,
            Response::Timeout => Flow::Done,
            _ => Flow::Wait,
        }
    }

    /// Close `handle`. While a send is in progress or the engine is busy the
    /// close is deferred, and issued as soon as the channel goes idle.
    pub fn close<E: AtEngine>(&mut self, engine: &mut E, handle: SocketHandle) -> Result<(), Error> {
        let socket = self.sockets.get(handle).ok_or(Error::InvalidSocket)?;
        if socket.state == SocketState::Unused && socket.rx.is_empty() {
            return Ok(());
        }
        self.timers.cancel(Timer::OpenRetry(handle));
        self.timers.cancel(Timer::OpenDelayed(handle));

        if self.send.is_some() || engine.is_busy() {
            debug!("Deferring close of socket {}", handle.0);
            self.deferred_close |= 1 << handle.0;
            return Ok(());
        }
        self.issue_close(engine, handle)
    }

    fn issue_close<E: AtEngine>(&mut self, engine: &mut E, handle: SocketHandle) -> Result<(), Error> {
        self.issue(engine, &CloseSocket { socket: handle }, Exchange::Close(handle))?;
        self.deferred_close &= !(1 << handle.0);
        Ok(())
    }

    /// Issue closes that were deferred while the channel was busy.
    pub(crate) fn resume_deferred<E: AtEngine>(&mut self, engine: &mut E) {
        while self.deferred_close != 0 && self.send.is_none() && !engine.is_busy() {
            let handle = SocketHandle(self.deferred_close.trailing_zeros() as u8);
            debug!("Resuming close of socket {}", handle.0);
            if let Err(e) = self.issue_close(engine, handle) {
                error!("Unable to close socket {}: {:?}", handle.0, e);
                break;
            }
        }
    }

    pub(crate) fn close_response(&mut self, handle: SocketHandle, response: Response<'_>) -> Flow {
        let closed = match response {
            Response::Line("OK") => true,
            Response::Line(l) if is_error(l) => false,
            Response::Timeout => false,
            _ => return Flow::Wait,
        };

        if closed {
            info!("Socket {} closed", handle.0);
            if let Some(socket) = self.sockets.get_mut(handle) {
                socket.reset();
            }
            if self.reassembly.is_some_and(|r| r.socket == handle) {
                self.reassembly = None;
            }
            self.timers.cancel_socket(handle);
            self.emit(Event::SocketClosed(handle));
        } else if let Some(socket) = self.sockets.get_mut(handle) {
            warn!("Socket {} close failed", handle.0);
            socket.state = SocketState::Closing;
        }
        Flow::Done
    }

    /// The peer closed `handle`. The close is finalized once the buffered
    /// data has been drained by `recv`.
    pub(crate) fn peer_closed<E: AtEngine>(&mut self, engine: &mut E, handle: SocketHandle) {
        let Some(socket) = self.sockets.get_mut(handle) else {
            return;
        };
        if socket.state == SocketState::Unused && socket.rx.is_empty() {
            return;
        }
        socket.state = SocketState::Closing;
        if socket.rx.is_empty() {
            if let Err(e) = self.close(engine, handle) {
                error!("Unable to close socket {}: {:?}", handle.0, e);
            }
        }
    }

    /// Only meaningful for [`SERVER_SOCKET`]: hand out the lowest slot that
    /// received data without being opened locally.
    pub fn accept(&mut self, handle: SocketHandle) -> Option<SocketHandle> {
        if handle != SERVER_SOCKET {
            return None;
        }
        let accepted = self.sockets.pending_incoming()?;
        if let Some(socket) = self.sockets.get_mut(accepted) {
            socket.state = SocketState::Established;
        }
        Some(accepted)
    }

    /// Read buffered data into `buf`, returning a prefix of the inbound queue.
    ///
    /// `WouldBlock` while the engine is busy, the socket is connecting, or
    /// nothing is buffered. `Other(SocketClosed)` once the socket is gone or
    /// closing and fully drained; the caller should then `close` it.
    pub fn recv<E: AtEngine>(
        &mut self,
        engine: &mut E,
        handle: SocketHandle,
        buf: &mut [u8],
    ) -> nb::Result<usize, Error> {
        let engine_busy = engine.is_busy();
        let socket = self
            .sockets
            .get_mut(handle)
            .ok_or(nb::Error::Other(Error::InvalidSocket))?;

        if engine_busy || socket.state == SocketState::Connecting {
            return Err(nb::Error::WouldBlock);
        }
        if socket.rx.is_empty() {
            return match socket.state {
                SocketState::Unused | SocketState::Closing => {
                    Err(nb::Error::Other(Error::SocketClosed))
                }
                _ => Err(nb::Error::WouldBlock),
            };
        }

        let n = socket.dequeue(buf);
        if socket.rx.is_empty() && socket.state == SocketState::Closing {
            if let Err(e) = self.close(engine, handle) {
                error!("Unable to close socket {}: {:?}", handle.0, e);
            }
        }
        Ok(n)
    }

    /// Queue `data` for transmission. Returns the number of bytes accepted;
    /// delivery is reported later as [`Event::SendComplete`].
    pub fn send<E: AtEngine>(
        &mut self,
        engine: &mut E,
        handle: SocketHandle,
        data: &[u8],
    ) -> nb::Result<usize, Error> {
        if data.len() > MAX_PAYLOAD {
            return Err(nb::Error::Other(Error::PayloadTooLarge));
        }
        let socket = self
            .sockets
            .get(handle)
            .ok_or(nb::Error::Other(Error::InvalidSocket))?;
        match socket.state {
            SocketState::Unused | SocketState::Closing => {
                return Err(nb::Error::Other(Error::SocketClosed))
            }
            SocketState::Connecting => return Err(nb::Error::WouldBlock),
            SocketState::Established => {}
        }
        if self.send.is_some() || engine.is_busy() {
            return Err(nb::Error::WouldBlock);
        }
        if data.is_empty() {
            return Ok(0);
        }

        self.issue(
            engine,
            &SendData {
                socket: handle,
                length: data.len(),
            },
            Exchange::Send(handle),
        )
        .map_err(nb::Error::Other)?;
        self.send = Some(PendingSend {
            socket: handle,
            payload: data.to_vec(),
        });
        self.timers
            .arm(Timer::SendPrompt(handle), self.now + SEND_PROMPT_TIMEOUT);
        Ok(data.len())
    }

    pub(crate) fn send_response<E: AtEngine>(
        &mut self,
        engine: &mut E,
        handle: SocketHandle,
        response: Response<'_>,
    ) -> Flow {
        let active = self.send.as_ref().map(|s| s.socket) == Some(handle);
        let result = match response {
            Response::Prompt => {
                match self.send.as_ref() {
                    Some(send) if active => {
                        self.timers.cancel(Timer::SendPrompt(handle));
                        engine.write(&send.payload);
                        self.timers
                            .arm(Timer::SendResult(handle), self.now + SEND_RESULT_TIMEOUT);
                    }
                    _ => warn!("Prompt for abandoned send on socket {}", handle.0),
                }
                return Flow::Wait;
            }
            Response::Line("SEND OK") => Ok(()),
            Response::Line("SEND FAIL") => Err(Error::protocol("SEND FAIL")),
            Response::Line(l) if is_error(l) => Err(Error::protocol(l)),
            Response::Timeout => Err(Error::Timeout),
            _ => return Flow::Wait,
        };
        if active {
            self.finish_send(engine, result);
        }
        Flow::Done
    }

    /// Clear the send-busy flag and both guard timers, whichever terminal
    /// condition came first.
    pub(crate) fn finish_send<E: AtEngine>(&mut self, engine: &mut E, result: Result<(), Error>) {
        let Some(send) = self.send.take() else {
            return;
        };
        self.timers.cancel(Timer::SendPrompt(send.socket));
        self.timers.cancel(Timer::SendResult(send.socket));

        if let Err(ref e) = result {
            warn!("Send on socket {} failed: {:?}", send.socket.0, e);
            if let Some(socket) = self.sockets.get_mut(send.socket) {
                if socket.state == SocketState::Established {
                    socket.state = SocketState::Closing;
                }
            }
        }
        self.emit(Event::SendComplete(send.socket, result));
        self.resume_deferred(engine);
    }
}
