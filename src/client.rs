//! The driver instance owning all per-modem state.
//!
//! [`Device`] is sans-IO: the AT engine feeds it response lines, unsolicited
//! input and idle notifications, and the embedding feeds it time through
//! [`Device::handle_timeout`]. Outcomes of asynchronous operations are
//! queued as [`Event`]s and collected with [`Device::poll_event`].

use alloc::string::String as AllocString;
use alloc::vec::Vec as AllocVec;

use atat::AtatCmd;
use embassy_time::Instant;
use embedded_hal::digital::OutputPin;
use heapless::{Deque, String};

use crate::at::{self, is_final, AtEngine, Dispatch, Flow, Response};
use crate::command::{
    control::{
        types::{Echo, ResultCodeFormat},
        SetEcho, SetFlowControl, SetResultCodeFormat,
    },
    device_lock::GetPinStatus,
    general::GetCCID,
    network_service::{
        types::OperatorSelectionMode, GetOperatorList, GetOperatorSelection, GetSignalQuality,
        SetOperatorSelection,
    },
    psn::{types::GPRSAttachedState, DeactivateContext, SetGPRSAttached},
    AT,
};
use crate::config::{Config, DebugFlags};
use crate::error::Error;
use crate::services::location::GeoState;
use crate::socket::{SocketHandle, SocketSet, SocketState};
use crate::state::{Action, Input, Lifecycle, Pin, State};
use crate::timer::{Timer, Timers};
use crate::urc_handler::{self, Reassembly, UrcEvent};

/// Outcome of an asynchronous operation, or a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Result of `init` or `reset`, emitted once per run
    Initialized(Result<(), Error>),
    /// Non-halting lifecycle error
    LifecycleError(Error),
    SocketOpened(SocketHandle),
    SocketOpenFailed(SocketHandle, Error),
    SocketClosed(SocketHandle),
    SendComplete(SocketHandle, Result<(), Error>),
    Connected(Result<(), Error>),
    /// The PDP context was lost and every socket was reset
    Disconnected,
    Ip(Result<AllocString, Error>),
    Version(Result<AllocString, Error>),
    PoweredDown,
}

/// Tag of a command queued on the engine, matched to its responses in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Exchange {
    Lifecycle,
    Open(SocketHandle),
    Close(SocketHandle),
    Send(SocketHandle),
    LastError(SocketHandle),
    PdpConfigure,
    PdpActivate,
    PdpDeactAck,
    GetIp,
    Version,
    GeoStart,
    GeoPoll,
    GeoStop,
}

/// The send in progress. Its presence is the local send-busy flag.
#[derive(Debug)]
pub(crate) struct PendingSend {
    pub socket: SocketHandle,
    pub payload: AllocVec<u8>,
}

pub struct Device<RST, PWR> {
    pub(crate) config: Config<RST, PWR>,
    lifecycle: Lifecycle,
    sim_id: Option<String<24>>,
    operator: Option<String<32>>,
    pub(crate) sockets: SocketSet,
    pub(crate) reassembly: Option<Reassembly>,
    pending: Deque<Exchange, 16>,
    pub(crate) timers: Timers,
    events: Deque<Event, 16>,
    pub(crate) send: Option<PendingSend>,
    /// Bit per socket whose close waits for the channel to go idle
    pub(crate) deferred_close: u16,
    pub(crate) connecting: bool,
    /// Lines collected for `get_ip`/`get_version`
    pub(crate) text: AllocString,
    pub(crate) geo: GeoState,
    pub(crate) now: Instant,
}

impl<RST, PWR> Device<RST, PWR>
where
    RST: OutputPin,
    PWR: OutputPin,
{
    pub fn new(config: Config<RST, PWR>) -> Self {
        let lifecycle = Lifecycle::new(
            config.has_reset_pin(),
            config.has_power_pin(),
            config.flow_control,
        );
        Self {
            config,
            lifecycle,
            sim_id: None,
            operator: None,
            sockets: SocketSet::new(),
            reassembly: None,
            pending: Deque::new(),
            timers: Timers::new(),
            events: Deque::new(),
            send: None,
            deferred_close: 0,
            connecting: false,
            text: AllocString::new(),
            geo: GeoState::default(),
            now: Instant::from_ticks(0),
        }
    }

    /// Pulse the reset and power-key lines, wait for boot, then run the
    /// protocol initialization. Without pins this is the same as [`init`].
    ///
    /// [`init`]: Device::init
    pub fn reset<E: AtEngine>(&mut self, engine: &mut E) -> Result<(), Error> {
        self.start_lifecycle(engine, true)
    }

    /// Run the protocol initialization on an already powered module.
    pub fn init<E: AtEngine>(&mut self, engine: &mut E) -> Result<(), Error> {
        self.start_lifecycle(engine, false)
    }

    fn start_lifecycle<E: AtEngine>(&mut self, engine: &mut E, physical: bool) -> Result<(), Error> {
        if self.lifecycle.is_active() {
            return Err(Error::Busy);
        }
        self.timers.cancel(Timer::Lifecycle);
        self.sim_id = None;
        self.operator = None;
        self.step_lifecycle(engine, Input::Start { physical });
        Ok(())
    }

    fn step_lifecycle<E: AtEngine>(&mut self, engine: &mut E, input: Input<'_>) {
        let (next, actions) = self.lifecycle.transition(input);
        self.lifecycle = next;
        for action in actions {
            match action {
                Action::Command(state) => self.lifecycle_command(engine, state),
                Action::Delay(delay) => self.timers.arm(Timer::Lifecycle, self.now + delay),
                Action::SetPin(pin, asserted) => self.set_pin(pin, asserted),
                Action::Report(e) => {
                    warn!("Lifecycle error: {:?}", e);
                    self.emit(Event::LifecycleError(e));
                }
                Action::Complete(result) => self.emit(Event::Initialized(result)),
                Action::SimId(id) => self.sim_id = String::try_from(id).ok(),
                Action::Operator(name) => {
                    info!("Operator {}", name);
                    self.operator = String::try_from(name).ok();
                }
            }
        }
    }

    fn lifecycle_command<E: AtEngine>(&mut self, engine: &mut E, state: State) {
        let x = Exchange::Lifecycle;
        let result = match state {
            State::Synchronize => self.issue(engine, &AT, x),
            State::SetResponseFormat => self.issue(
                engine,
                &SetResultCodeFormat {
                    format: ResultCodeFormat::Verbose,
                },
                x,
            ),
            State::EchoOff => self.issue(
                engine,
                &SetEcho {
                    enabled: Echo::Disable,
                },
                x,
            ),
            State::HwFlowControl => self.issue(engine, &SetFlowControl, x),
            State::SimReady => self.issue(engine, &GetPinStatus, x),
            State::ShowSimId => self.issue(engine, &GetCCID, x),
            State::QuerySignalQuality => self.issue(engine, &GetSignalQuality, x),
            State::PsAttach => self.issue(
                engine,
                &SetGPRSAttached {
                    state: GPRSAttachedState::Attached,
                },
                x,
            ),
            State::AutoOperatorSelect => self.issue(
                engine,
                &SetOperatorSelection {
                    mode: OperatorSelectionMode::Automatic,
                },
                x,
            ),
            State::ListOperators => self.issue(engine, &GetOperatorList, x),
            State::CurrentOperator => self.issue(engine, &GetOperatorSelection, x),
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!("Unable to issue lifecycle command: {:?}", e);
            self.step_lifecycle(engine, Input::Stalled);
        }
    }

    fn lifecycle_response<E: AtEngine>(&mut self, engine: &mut E, response: Response<'_>) -> Flow {
        let (input, flow) = match response {
            Response::Line(l) if is_final(l) => (Input::Line(l), Flow::Done),
            Response::Line(l) => (Input::Line(l), Flow::Wait),
            Response::Timeout => (Input::Timeout, Flow::Done),
            Response::Prompt => return Flow::Wait,
        };
        self.step_lifecycle(engine, input);
        flow
    }

    fn set_pin(&mut self, pin: Pin, asserted: bool) {
        let result = match pin {
            Pin::Reset => self.config.reset_pin.as_mut().map(|p| p.set(asserted).is_ok()),
            Pin::PowerKey => self.config.power_pin.as_mut().map(|p| p.set(asserted).is_ok()),
        };
        if result == Some(false) {
            error!("Failed to drive {:?}", pin);
            self.emit(Event::LifecycleError(Error::IoPin));
        }
    }

    /// Queue `cmd` on the engine, tagged so its responses find their way back.
    pub(crate) fn issue<E: AtEngine, C: AtatCmd>(
        &mut self,
        engine: &mut E,
        cmd: &C,
        exchange: Exchange,
    ) -> Result<(), Error> {
        self.pending
            .push_back(exchange)
            .map_err(|_| Error::QueueFull)?;
        at::send(engine, cmd);
        Ok(())
    }

    pub(crate) fn is_pending(&self, exchange: Exchange) -> bool {
        self.pending.iter().any(|x| *x == exchange)
    }

    pub(crate) fn emit(&mut self, event: Event) {
        if self.events.is_full() {
            warn!("Event queue full, dropping oldest event");
            self.events.pop_front();
        }
        self.events.push_back(event).ok();
    }

    /// Deliver a response item for the outstanding command.
    pub fn on_response<E: AtEngine>(&mut self, engine: &mut E, response: Response<'_>) -> Flow {
        if self.config.debug.trace_at {
            debug!("<< {:?}", response);
        }
        let Some(&exchange) = self.pending.front() else {
            warn!("Response without outstanding command: {:?}", response);
            return Flow::Done;
        };

        let flow = match exchange {
            Exchange::Lifecycle => self.lifecycle_response(engine, response),
            Exchange::Open(h) => self.open_response(engine, h, response),
            Exchange::Close(h) => self.close_response(h, response),
            Exchange::Send(h) => self.send_response(engine, h, response),
            Exchange::LastError(h) => self.last_error_response(h, response),
            Exchange::PdpConfigure => self.pdp_configure_response(engine, response),
            Exchange::PdpActivate => self.pdp_activate_response(response),
            Exchange::PdpDeactAck => self.pdp_deact_response(response),
            Exchange::GetIp => self.ip_response(response),
            Exchange::Version => self.version_response(response),
            Exchange::GeoStart | Exchange::GeoStop => until_final(response),
            Exchange::GeoPoll => self.geo_response(response),
        };

        if flow == Flow::Done {
            self.pending.pop_front();
            self.resume_deferred(engine);
        }
        flow
    }

    /// Offer unsolicited input. See [`urc_handler::dispatch`].
    pub fn on_urc<'d, E: AtEngine>(&mut self, engine: &mut E, data: &'d [u8]) -> Dispatch<'d> {
        let (dispatch, event) =
            urc_handler::dispatch(&mut self.sockets, &mut self.reassembly, data);

        match event {
            Some(UrcEvent::SocketClosed(h)) => self.peer_closed(engine, h),
            Some(UrcEvent::PdpDeactivated(ctx)) => {
                if let Err(e) = self.issue(
                    engine,
                    &DeactivateContext { context_id: ctx },
                    Exchange::PdpDeactAck,
                ) {
                    error!("Unable to acknowledge PDP deactivation: {:?}", e);
                }
            }
            Some(UrcEvent::PoweredDown) => {
                self.set_pin(Pin::PowerKey, false);
                self.emit(Event::PoweredDown);
            }
            Some(UrcEvent::DataReceived(_)) | None => {}
        }
        dispatch
    }

    /// The engine has no command outstanding or queued.
    pub fn on_idle<E: AtEngine>(&mut self, engine: &mut E) {
        self.resume_deferred(engine);
    }

    /// Advance time to `now` and fire every timer that is due.
    pub fn handle_timeout<E: AtEngine>(&mut self, engine: &mut E, now: Instant) {
        self.now = now;
        while let Some(timer) = self.timers.pop_expired(now) {
            trace!("Timer {:?} expired", timer);
            match timer {
                Timer::Lifecycle => self.step_lifecycle(engine, Input::Timer),
                Timer::SendPrompt(h) | Timer::SendResult(h) => {
                    if self.send.as_ref().map(|s| s.socket) == Some(h) {
                        warn!("Send on socket {} timed out", h.0);
                        self.finish_send(engine, Err(Error::Timeout));
                    }
                }
                Timer::OpenRetry(h) | Timer::OpenDelayed(h) => self.issue_open(engine, h),
                Timer::GeoPoll => self.geo_poll(engine),
            }
        }
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn set_debug<E: AtEngine>(&mut self, engine: &mut E, flags: DebugFlags) {
        self.config.debug = flags;
        engine.set_debug(flags.trace_at);
    }

    pub fn lifecycle_state(&self) -> State {
        self.lifecycle.state()
    }

    /// ICCID read during initialization.
    pub fn sim_id(&self) -> Option<&str> {
        self.sim_id.as_deref()
    }

    /// Operator confirmed at the end of initialization.
    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    pub fn socket_state(&self, handle: SocketHandle) -> Option<SocketState> {
        self.sockets.get(handle).map(|s| s.state())
    }

    pub fn sockets(&self) -> &SocketSet {
        &self.sockets
    }
}

/// Wait for the final result code, ignoring its content.
pub(crate) fn until_final(response: Response<'_>) -> Flow {
    match response {
        Response::Line(l) if is_final(l) => Flow::Done,
        Response::Timeout => Flow::Done,
        _ => Flow::Wait,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockEngine, MockPin};
    use embassy_time::Duration;
    use embedded_hal::digital::PinState;

    fn respond<RST: OutputPin, PWR: OutputPin, E: AtEngine>(
        device: &mut Device<RST, PWR>,
        engine: &mut E,
        lines: &[&str],
    ) {
        for line in lines {
            device.on_response(engine, Response::Line(line));
        }
    }

    #[test]
    fn init_runs_full_sequence() {
        let mut engine = MockEngine::new();
        let mut device = Device::new(Config::new().with_reset(MockPin::default(), PinState::Low));

        device.init(&mut engine).unwrap();
        assert_eq!(engine.last(), Some("AT"));
        respond(&mut device, &mut engine, &["AT", "OK"]);
        assert_eq!(engine.last(), Some("ATV1"));
        respond(&mut device, &mut engine, &["OK"]);
        assert_eq!(engine.last(), Some("ATE0"));
        respond(&mut device, &mut engine, &["ATE0", "OK"]);
        assert_eq!(engine.last(), Some("AT+CPIN?"));
        respond(&mut device, &mut engine, &["+CPIN: READY", "OK"]);
        assert_eq!(engine.last(), Some("AT+QCCID"));
        respond(&mut device, &mut engine, &["+QCCID: 89450421180216254864", "OK"]);
        assert_eq!(engine.last(), Some("AT+CSQ"));
        respond(&mut device, &mut engine, &["+CSQ: 24,99", "OK"]);
        assert_eq!(engine.last(), Some("AT+CGATT=1"));
        assert_eq!(engine.timeouts.last(), Some(&Duration::from_secs(75)));
        respond(&mut device, &mut engine, &["OK"]);
        assert_eq!(engine.last(), Some("AT+COPS?"));
        respond(&mut device, &mut engine, &["+COPS: 0,0,\"Telia\",8", "OK"]);

        assert_eq!(device.poll_event(), Some(Event::Initialized(Ok(()))));
        assert_eq!(device.poll_event(), None);
        assert_eq!(device.sim_id(), Some("89450421180216254864"));
        assert_eq!(device.operator(), Some("Telia"));
        assert_eq!(device.lifecycle_state(), State::Done);
        assert!(device.pending.is_empty());
    }

    #[test]
    fn sync_failure_is_reported_once_without_eleventh_attempt() {
        let mut engine = MockEngine::new();
        let mut device = Device::new(Config::new());

        device.init(&mut engine).unwrap();
        for _ in 0..15 {
            device.on_response(&mut engine, Response::Timeout);
        }

        assert_eq!(engine.count("AT"), 10);
        assert_eq!(
            device.poll_event(),
            Some(Event::Initialized(Err(Error::RetryExhausted(
                crate::error::Stage::Synchronize
            ))))
        );
        assert_eq!(device.poll_event(), None);
    }

    #[test]
    fn full_command_queue_fails_the_run() {
        let mut engine = MockEngine::new();
        let mut device = Device::new(Config::new());
        while !device.pending.is_full() {
            device.pending.push_back(Exchange::GeoStop).unwrap();
        }

        device.init(&mut engine).unwrap();
        assert!(engine.commands.is_empty());
        assert_eq!(
            device.poll_event(),
            Some(Event::Initialized(Err(Error::QueueFull)))
        );
        assert_eq!(device.lifecycle_state(), State::Failed);

        device.pending.clear();
        device.init(&mut engine).unwrap();
        assert_eq!(engine.last(), Some("AT"));
    }

    #[test]
    fn reset_pulses_pins_before_sync() {
        let mut engine = MockEngine::new();
        let rst = MockPin::default();
        let pwr = MockPin::default();
        let mut device = Device::new(
            Config::new()
                .with_reset(rst.clone(), PinState::Low)
                .with_power_key(pwr.clone(), PinState::High),
        );

        device.reset(&mut engine).unwrap();
        assert_eq!(rst.level(), Some(PinState::Low));
        assert!(engine.commands.is_empty());

        let mut now = Instant::from_ticks(0);
        while engine.commands.is_empty() {
            now = device.poll_timeout().expect("pending delay");
            device.handle_timeout(&mut engine, now);
        }
        assert_eq!(rst.level(), Some(PinState::High));
        assert_eq!(pwr.history(), vec![PinState::High, PinState::Low]);
        assert_eq!(engine.last(), Some("AT"));
        assert!(now >= Instant::from_ticks(0) + crate::module_timing::boot_time());

        assert_eq!(device.reset(&mut engine), Err(Error::Busy));
    }

    #[test]
    fn attach_failure_falls_back_to_operator_selection() {
        let mut engine = MockEngine::new();
        let mut device = Device::new(Config::new());
        device.init(&mut engine).unwrap();
        respond(&mut device, &mut engine, &["OK", "OK", "OK"]);
        respond(&mut device, &mut engine, &["+CPIN: READY", "OK", "OK"]);
        respond(&mut device, &mut engine, &["+CSQ: 10,0", "OK"]);
        assert_eq!(engine.last(), Some("AT+CGATT=1"));

        device.on_response(&mut engine, Response::Timeout);
        assert_eq!(engine.last(), Some("AT+COPS=0"));
        respond(&mut device, &mut engine, &["OK"]);
        assert_eq!(engine.last(), Some("AT+COPS=?"));
        respond(&mut device, &mut engine, &["+COPS: (1,\"A\",\"A\",\"1\",7)", "OK"]);

        let deadline = device.poll_timeout().unwrap();
        assert_eq!(deadline, Instant::from_ticks(0) + Duration::from_secs(30));
        device.handle_timeout(&mut engine, deadline);
        assert_eq!(engine.last(), Some("AT+CGATT=1"));
    }

    #[test]
    fn powered_down_releases_power_key() {
        let mut engine = MockEngine::new();
        let pwr = MockPin::default();
        let mut device = Device::new(Config::new().with_power_key(pwr.clone(), PinState::High));

        assert_eq!(
            device.on_urc(&mut engine, b"POWERED DOWN\r\n"),
            Dispatch::Consumed
        );
        assert_eq!(pwr.level(), Some(PinState::Low));
        assert_eq!(device.poll_event(), Some(Event::PoweredDown));
    }

    #[test]
    fn stray_response_is_dropped() {
        let mut engine = MockEngine::new();
        let mut device = Device::new(Config::new());
        assert_eq!(
            device.on_response(&mut engine, Response::Line("OK")),
            Flow::Done
        );
    }
}
