//! Packet data context and modem information queries.

use alloc::string::String as AllocString;

use embedded_hal::digital::OutputPin;

use crate::at::{is_error, is_final, AtEngine, Flow, Response};
use crate::client::{Device, Event, Exchange};
use crate::command::general::GetFirmwareVersion;
use crate::command::psn::{types::ContextType, ActivateContext, GetContextState, SetContextConfig};
use crate::error::Error;

/// The single PDP context the driver manages.
const CONTEXT_ID: u8 = 1;

/// Longest APN, user name or password accepted by `AT+QICSGP`.
const MAX_CONTEXT_ARG: usize = 64;

impl<RST, PWR> Device<RST, PWR>
where
    RST: OutputPin,
    PWR: OutputPin,
{
    /// Configure and activate the PDP context. Completes with exactly one
    /// [`Event::Connected`].
    ///
    /// An activation that times out is reported as success, the context
    /// usually comes up regardless and `get_ip` tells for sure.
    pub fn connect<E: AtEngine>(
        &mut self,
        engine: &mut E,
        apn: &str,
        username: &str,
        password: &str,
    ) -> Result<(), Error> {
        if self.connecting {
            return Err(Error::Busy);
        }
        if [apn, username, password]
            .iter()
            .any(|arg| arg.len() > MAX_CONTEXT_ARG)
        {
            return Err(Error::ArgumentTooLong);
        }

        info!("Configuring PDP context {}", CONTEXT_ID);
        self.issue(
            engine,
            &SetContextConfig {
                context_id: CONTEXT_ID,
                context_type: ContextType::IPv4,
                apn,
                username,
                password,
            },
            Exchange::PdpConfigure,
        )?;
        self.connecting = true;
        Ok(())
    }

    fn connected(&mut self, result: Result<(), Error>) {
        self.connecting = false;
        match &result {
            Ok(()) => info!("PDP context active"),
            Err(e) => warn!("PDP context activation failed: {:?}", e),
        }
        self.emit(Event::Connected(result));
    }

    pub(crate) fn pdp_configure_response<E: AtEngine>(
        &mut self,
        engine: &mut E,
        response: Response<'_>,
    ) -> Flow {
        match response {
            Response::Line("OK") => {
                if let Err(e) = self.issue(
                    engine,
                    &ActivateContext {
                        context_id: CONTEXT_ID,
                    },
                    Exchange::PdpActivate,
                ) {
                    self.connected(Err(e));
                }
            }
            Response::Line(l) if is_error(l) => self.connected(Err(Error::protocol(l))),
            Response::Timeout => self.connected(Err(Error::Timeout)),
            _ => return Flow::Wait,
        }
        Flow::Done
    }

    pub(crate) fn pdp_activate_response(&mut self, response: Response<'_>) -> Flow {
        match response {
            Response::Line("OK") => self.connected(Ok(())),
            Response::Line(l) if is_error(l) => self.connected(Err(Error::protocol(l))),
            Response::Timeout => {
                warn!("PDP activation timed out, assuming success");
                self.connected(Ok(()));
            }
            _ => return Flow::Wait,
        }
        Flow::Done
    }

    /// Completion of the `pdpdeact` acknowledgement. Whatever the modem
    /// answered, the context is gone and so is every socket.
    pub(crate) fn pdp_deact_response(&mut self, response: Response<'_>) -> Flow {
        match response {
            Response::Line(l) if is_final(l) => {}
            Response::Timeout => {}
            _ => return Flow::Wait,
        }

        warn!("PDP context deactivated, resetting all sockets");
        if let Some(send) = self.send.take() {
            self.emit(Event::SendComplete(send.socket, Err(Error::SocketClosed)));
        }
        for (handle, _) in self.sockets.iter() {
            self.timers.cancel_socket(handle);
        }
        self.sockets.reset_all();
        self.reassembly = None;
        self.deferred_close = 0;
        self.emit(Event::Disconnected);
        Flow::Done
    }

    /// Query the active context. Completes with one [`Event::Ip`] carrying
    /// the information lines, or what arrived of them before a timeout.
    pub fn get_ip<E: AtEngine>(&mut self, engine: &mut E) -> Result<(), Error> {
        if self.is_pending(Exchange::GetIp) || self.is_pending(Exchange::Version) {
            return Err(Error::Busy);
        }
        self.text.clear();
        self.issue(engine, &GetContextState, Exchange::GetIp)
    }

    pub fn get_version<E: AtEngine>(&mut self, engine: &mut E) -> Result<(), Error> {
        if self.is_pending(Exchange::GetIp) || self.is_pending(Exchange::Version) {
            return Err(Error::Busy);
        }
        self.text.clear();
        self.issue(engine, &GetFirmwareVersion, Exchange::Version)
    }

    pub(crate) fn ip_response(&mut self, response: Response<'_>) -> Flow {
        let result = match self.collect(response) {
            Some(Collected::Ok) | Some(Collected::Timeout) => Ok(self.take_text()),
            Some(Collected::Error(e)) => Err(e),
            None => return Flow::Wait,
        };
        self.emit(Event::Ip(result));
        Flow::Done
    }

    pub(crate) fn version_response(&mut self, response: Response<'_>) -> Flow {
        let result = match self.collect(response) {
            Some(Collected::Ok) => Ok(self.take_text()),
            Some(Collected::Timeout) => Err(Error::Timeout),
            Some(Collected::Error(e)) => Err(e),
            None => return Flow::Wait,
        };
        self.text.clear();
        self.emit(Event::Version(result));
        Flow::Done
    }

    /// Append information lines to `text`, returning how the exchange ended.
    fn collect(&mut self, response: Response<'_>) -> Option<Collected> {
        match response {
            Response::Line("OK") => Some(Collected::Ok),
            Response::Line(l) if is_error(l) => Some(Collected::Error(Error::protocol(l))),
            Response::Line(l) => {
                if !l.is_empty() {
                    if !self.text.is_empty() {
                        self.text.push('\n');
                    }
                    self.text.push_str(l);
                }
                None
            }
            Response::Timeout => Some(Collected::Timeout),
            Response::Prompt => None,
        }
    }

    fn take_text(&mut self) -> AllocString {
        core::mem::take(&mut self.text)
    }
}

enum Collected {
    Ok,
    Timeout,
    Error(Error),
}
