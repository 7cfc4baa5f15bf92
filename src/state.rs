//! Modem lifecycle: power-up, autobaud sync, SIM check, attach and operator
//! selection.
//!
//! [`Lifecycle::transition`] is a pure function of the current state and one
//! input. It returns the next state plus the actions the driver has to carry
//! out (issue the state's command, arm a delay, drive a pin, report).

use embassy_time::Duration;
use heapless::Vec;

use crate::at::{is_error, is_final};
use crate::command::network_service::{self, responses::SignalQuality};
use crate::command::{device_lock, general};
use crate::error::{Error, Stage};
use crate::module_timing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    ResetPulse,
    PowerKeyPulse,
    Booting,
    Synchronize,
    SetResponseFormat,
    EchoOff,
    HwFlowControl,
    SimReady,
    ShowSimId,
    QuerySignalQuality,
    PsAttach,
    AutoOperatorSelect,
    ListOperators,
    CurrentOperator,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pin {
    Reset,
    PowerKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input<'a> {
    /// Begin the sequence, pulsing the control pins first if `physical`
    Start { physical: bool },
    Line(&'a str),
    /// The outstanding command got no final response in time
    Timeout,
    /// A delay requested through [`Action::Delay`] elapsed
    Timer,
    /// The command for the current state could not be queued
    Stalled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action<'a> {
    /// Issue the command belonging to the given state
    Command(State),
    Delay(Duration),
    /// Assert or release a control pin
    SetPin(Pin, bool),
    /// Non-halting error
    Report(Error),
    /// Terminal outcome, emitted exactly once per run
    Complete(Result<(), Error>),
    SimId(&'a str),
    Operator(&'a str),
}

pub type Actions<'a> = Vec<Action<'a>, 4>;

/// Responses an echoing module may produce around `ATE0`.
const ECHO_ARTIFACTS: &[&str] = &["ATE0", "ATV1", "AT", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    state: State,
    sync_attempts: u8,
    attach_retries: u8,
    fallback_done: bool,
    sim_ready: bool,
    signal_known: bool,
    has_reset_pin: bool,
    has_power_pin: bool,
    flow_control: bool,
}

fn emit<'a>(actions: &mut Actions<'a>, action: Action<'a>) {
    if actions.push(action).is_err() {
        error!("Lifecycle action overflow");
    }
}

impl Lifecycle {
    pub fn new(has_reset_pin: bool, has_power_pin: bool, flow_control: bool) -> Self {
        Self {
            state: State::Idle,
            sync_attempts: 0,
            attach_retries: 0,
            fallback_done: false,
            sim_ready: false,
            signal_known: false,
            has_reset_pin,
            has_power_pin,
            flow_control,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// A run is in progress.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, State::Idle | State::Done | State::Failed)
    }

    fn enter(&mut self, state: State, actions: &mut Actions<'_>) {
        debug!("Lifecycle {:?} -> {:?}", self.state, state);
        self.state = state;
        match state {
            State::Synchronize => {
                self.sync_attempts = 0;
                emit(actions, Action::Command(state));
            }
            State::SimReady => {
                self.sim_ready = false;
                emit(actions, Action::Command(state));
            }
            State::QuerySignalQuality => {
                self.signal_known = false;
                emit(actions, Action::Command(state));
            }
            State::Idle
            | State::ResetPulse
            | State::PowerKeyPulse
            | State::Booting
            | State::Done
            | State::Failed => {}
            _ => emit(actions, Action::Command(state)),
        }
    }

    fn fail(&mut self, error: Error, actions: &mut Actions<'_>) {
        error!("Lifecycle failed in {:?}: {:?}", self.state, error);
        self.enter(State::Failed, actions);
        emit(actions, Action::Complete(Err(error)));
    }

    fn pulse_power_key(&mut self, actions: &mut Actions<'_>) {
        self.enter(State::PowerKeyPulse, actions);
        emit(actions, Action::SetPin(Pin::PowerKey, true));
        emit(actions, Action::Delay(pwr_on_time()));
    }

    fn boot(&mut self, actions: &mut Actions<'_>) {
        self.enter(State::Booting, actions);
        emit(actions, Action::Delay(boot_time()));
    }

    fn sync_failed(&mut self, wait: bool, actions: &mut Actions<'_>) {
        self.sync_attempts += 1;
        if self.sync_attempts >= MAX_SYNC_ATTEMPTS {
            self.fail(Error::RetryExhausted(Stage::Synchronize), actions);
        } else if wait {
            emit(actions, Action::Delay(SYNC_RETRY_INTERVAL));
        } else {
            emit(actions, Action::Command(State::Synchronize));
        }
    }

    fn echo_done(&mut self, actions: &mut Actions<'_>) {
        if self.flow_control {
            self.enter(State::HwFlowControl, actions);
        } else {
            self.enter(State::SimReady, actions);
        }
    }

    fn attach_failed(&mut self, error: Error, actions: &mut Actions<'_>) {
        warn!("Attach failed: {:?}", error);
        if !self.fallback_done {
            self.fallback_done = true;
            self.enter(State::AutoOperatorSelect, actions);
            return;
        }
        self.attach_retries += 1;
        if self.attach_retries >= MAX_ATTACH_RETRIES {
            self.fail(Error::RetryExhausted(Stage::Attach), actions);
        } else {
            let backoff = ATTACH_BACKOFF_STEP * u32::from(self.attach_retries);
            emit(actions, Action::Delay(backoff));
        }
    }

    /// Report a failed step and move on regardless.
    fn skip(&mut self, error: Error, next: State, actions: &mut Actions<'_>) {
        emit(actions, Action::Report(error));
        self.enter(next, actions);
    }

    pub fn transition<'a>(self, input: Input<'a>) -> (Self, Actions<'a>) {
        use Input::{Line, Timeout, Timer};
        use State::*;

        let mut next = self;
        let mut actions = Actions::new();
        let a = &mut actions;

        match (self.state, input) {
            (_, Input::Start { physical }) => {
                next = Self::new(self.has_reset_pin, self.has_power_pin, self.flow_control);
                if physical && self.has_reset_pin {
                    next.enter(ResetPulse, a);
                    emit(a, Action::SetPin(Pin::Reset, true));
                    emit(a, Action::Delay(reset_time()));
                } else if physical && self.has_power_pin {
                    next.pulse_power_key(a);
                } else {
                    next.enter(Synchronize, a);
                }
            }

            (_, Input::Stalled) if self.is_active() => next.fail(Error::QueueFull, a),

            (ResetPulse, Timer) => {
                emit(a, Action::SetPin(Pin::Reset, false));
                if self.has_power_pin {
                    next.pulse_power_key(a);
                } else {
                    next.boot(a);
                }
            }
            (PowerKeyPulse, Timer) => {
                emit(a, Action::SetPin(Pin::PowerKey, false));
                next.boot(a);
            }
            (Booting, Timer) => next.enter(Synchronize, a),

            (Synchronize, Line("OK")) => next.enter(SetResponseFormat, a),
            (Synchronize, Line(l)) if is_error(l) => next.sync_failed(true, a),
            (Synchronize, Timeout) => next.sync_failed(false, a),
            (Synchronize, Timer) => emit(a, Action::Command(Synchronize)),

            (SetResponseFormat, Line("OK")) => next.enter(EchoOff, a),
            (SetResponseFormat, Line(l)) if is_error(l) => {
                next.skip(Error::protocol(l), EchoOff, a)
            }
            (SetResponseFormat, Timeout) => next.skip(Error::Timeout, EchoOff, a),

            (EchoOff, Line("OK")) => next.echo_done(a),
            (EchoOff, Line(l)) if ECHO_ARTIFACTS.contains(&l) => {}
            (EchoOff, Line(l)) => {
                emit(a, Action::Report(Error::protocol(l)));
                if is_error(l) {
                    emit(a, Action::Delay(ECHO_SETTLE_TIME));
                }
            }
            (EchoOff, Timeout) | (EchoOff, Timer) => next.echo_done(a),

            (HwFlowControl, Line("OK")) => next.enter(SimReady, a),
            (HwFlowControl, Line(l)) if is_error(l) => next.skip(Error::protocol(l), SimReady, a),
            (HwFlowControl, Timeout) => next.skip(Error::Timeout, SimReady, a),

            (SimReady, Line("OK")) => {
                if self.sim_ready {
                    next.enter(ShowSimId, a);
                } else {
                    next.skip(Error::protocol("SIM not ready"), ShowSimId, a);
                }
            }
            (SimReady, Line(l)) if is_error(l) => next.skip(Error::protocol(l), ShowSimId, a),
            (SimReady, Line(l)) if device_lock::is_ready(l) => next.sim_ready = true,
            (SimReady, Timeout) => next.skip(Error::Timeout, ShowSimId, a),

            (ShowSimId, Line("OK")) => next.enter(QuerySignalQuality, a),
            (ShowSimId, Line(l)) if is_error(l) => {
                next.skip(Error::protocol(l), QuerySignalQuality, a)
            }
            (ShowSimId, Line(l)) => {
                if let Some(id) = general::ccid(l) {
                    emit(a, Action::SimId(id));
                }
            }
            (ShowSimId, Timeout) => next.skip(Error::Timeout, QuerySignalQuality, a),

            (QuerySignalQuality, Line("OK")) => {
                if self.signal_known {
                    next.enter(PsAttach, a);
                } else {
                    emit(a, Action::Delay(SIGNAL_POLL_INTERVAL));
                }
            }
            (QuerySignalQuality, Line(l)) if l.starts_with("+CSQ:") => {
                next.signal_known = atat::serde_at::from_str::<SignalQuality>(l)
                    .map(|sq| sq.is_known())
                    .unwrap_or(false);
            }
            (QuerySignalQuality, Line(l)) if is_error(l) => {
                emit(a, Action::Delay(SIGNAL_POLL_INTERVAL))
            }
            (QuerySignalQuality, Timeout) => emit(a, Action::Delay(SIGNAL_POLL_INTERVAL)),
            (QuerySignalQuality, Timer) => next.enter(QuerySignalQuality, a),

            (PsAttach, Line("OK")) => next.enter(CurrentOperator, a),
            (PsAttach, Line(l)) if is_error(l) => next.attach_failed(Error::protocol(l), a),
            (PsAttach, Timeout) => next.attach_failed(Error::Timeout, a),
            (PsAttach, Timer) => emit(a, Action::Command(PsAttach)),

            (AutoOperatorSelect, Line(l)) if is_final(l) => {
                if is_error(l) {
                    emit(a, Action::Report(Error::protocol(l)));
                }
                next.enter(ListOperators, a);
            }
            (AutoOperatorSelect, Timeout) => next.skip(Error::Timeout, ListOperators, a),

            (ListOperators, Line(l)) if is_final(l) => {
                emit(a, Action::Delay(ATTACH_FALLBACK_DELAY))
            }
            (ListOperators, Timeout) => emit(a, Action::Delay(ATTACH_FALLBACK_DELAY)),
            (ListOperators, Timer) => next.enter(PsAttach, a),

            (CurrentOperator, Line(l)) if is_final(l) => {
                if is_error(l) {
                    emit(a, Action::Report(Error::protocol(l)));
                }
                next.enter(Done, a);
                emit(a, Action::Complete(Ok(())));
            }
            (CurrentOperator, Line(l)) => {
                if let Some(name) = network_service::operator_name(l) {
                    emit(a, Action::Operator(name));
                }
            }
            (CurrentOperator, Timeout) => {
                emit(a, Action::Report(Error::Timeout));
                next.enter(Done, a);
                emit(a, Action::Complete(Ok(())));
            }

            (state, _) => trace!("Lifecycle ignoring input in {:?}", state),
        }

        (next, actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step<'a>(fsm: &mut Lifecycle, input: Input<'a>) -> Actions<'a> {
        let (next, actions) = fsm.transition(input);
        *fsm = next;
        actions
    }

    /// Run an OK-only exchange for the current state.
    fn ok(fsm: &mut Lifecycle) -> Actions<'static> {
        step(fsm, Input::Line("OK"))
    }

    fn at_state(state: State) -> Lifecycle {
        Lifecycle {
            state,
            ..Lifecycle::new(false, false, false)
        }
    }

    #[test]
    fn no_pins_starts_protocol_directly() {
        let mut fsm = Lifecycle::new(false, false, false);
        let actions = step(&mut fsm, Input::Start { physical: true });
        assert_eq!(fsm.state(), State::Synchronize);
        assert_eq!(&actions[..], &[Action::Command(State::Synchronize)]);
    }

    #[test]
    fn pins_are_pulsed_in_sequence() {
        let mut fsm = Lifecycle::new(true, true, false);
        let actions = step(&mut fsm, Input::Start { physical: true });
        assert_eq!(
            &actions[..],
            &[
                Action::SetPin(Pin::Reset, true),
                Action::Delay(reset_time())
            ]
        );
        let actions = step(&mut fsm, Input::Timer);
        assert_eq!(
            &actions[..],
            &[
                Action::SetPin(Pin::Reset, false),
                Action::SetPin(Pin::PowerKey, true),
                Action::Delay(pwr_on_time())
            ]
        );
        let actions = step(&mut fsm, Input::Timer);
        assert_eq!(
            &actions[..],
            &[
                Action::SetPin(Pin::PowerKey, false),
                Action::Delay(boot_time())
            ]
        );
        let actions = step(&mut fsm, Input::Timer);
        assert_eq!(&actions[..], &[Action::Command(State::Synchronize)]);
    }

    #[test]
    fn stalled_command_ends_the_run() {
        let mut fsm = Lifecycle::new(false, false, false);
        step(&mut fsm, Input::Start { physical: false });

        let actions = step(&mut fsm, Input::Stalled);
        assert_eq!(&actions[..], &[Action::Complete(Err(Error::QueueFull))]);
        assert_eq!(fsm.state(), State::Failed);
        assert!(!fsm.is_active());
        assert!(step(&mut fsm, Input::Stalled).is_empty());
    }

    #[test]
    fn sync_gives_up_after_ten_attempts() {
        let mut fsm = Lifecycle::new(false, false, false);
        let mut attempts = step(&mut fsm, Input::Start { physical: false })
            .iter()
            .filter(|a| **a == Action::Command(State::Synchronize))
            .count();
        let mut completions = Vec::<Action, 16>::new();

        for _ in 0..20 {
            let input = if fsm.state() == State::Failed {
                Input::Timeout
            } else if attempts % 2 == 0 {
                Input::Line("ERROR")
            } else {
                Input::Timeout
            };
            for action in step(&mut fsm, input) {
                match action {
                    Action::Command(State::Synchronize) => attempts += 1,
                    Action::Delay(_) => {
                        for action in step(&mut fsm, Input::Timer) {
                            if action == Action::Command(State::Synchronize) {
                                attempts += 1;
                            }
                        }
                    }
                    Action::Complete(_) => completions.push(action).unwrap(),
                    _ => {}
                }
            }
        }

        assert_eq!(attempts, 10);
        assert_eq!(fsm.state(), State::Failed);
        assert_eq!(
            &completions[..],
            &[Action::Complete(Err(Error::RetryExhausted(Stage::Synchronize)))]
        );
    }

    #[test]
    fn echo_artifacts_are_tolerated() {
        let mut fsm = at_state(State::EchoOff);
        assert!(step(&mut fsm, Input::Line("ATE0")).is_empty());
        assert!(step(&mut fsm, Input::Line("AT")).is_empty());

        let actions = step(&mut fsm, Input::Line("garbage"));
        assert_eq!(
            &actions[..],
            &[Action::Report(Error::protocol("garbage"))]
        );
        assert_eq!(fsm.state(), State::EchoOff);

        let actions = step(&mut fsm, Input::Timeout);
        assert_eq!(fsm.state(), State::SimReady);
        assert_eq!(&actions[..], &[Action::Command(State::SimReady)]);
    }

    #[test]
    fn flow_control_failure_does_not_block() {
        let mut fsm = Lifecycle {
            state: State::EchoOff,
            ..Lifecycle::new(false, false, true)
        };
        ok(&mut fsm);
        assert_eq!(fsm.state(), State::HwFlowControl);
        let actions = step(&mut fsm, Input::Line("ERROR"));
        assert_eq!(fsm.state(), State::SimReady);
        assert_eq!(
            &actions[..],
            &[
                Action::Report(Error::protocol("ERROR")),
                Action::Command(State::SimReady)
            ]
        );
    }

    #[test]
    fn sim_id_is_cached_and_sim_errors_reported() {
        let mut fsm = at_state(State::SimReady);
        step(&mut fsm, Input::Line("+CPIN: SIM PIN"));
        let actions = ok(&mut fsm);
        assert!(matches!(actions[0], Action::Report(Error::Protocol(_))));
        assert_eq!(fsm.state(), State::ShowSimId);

        let actions = step(&mut fsm, Input::Line("+QCCID: 89450421180216254864"));
        assert_eq!(&actions[..], &[Action::SimId("89450421180216254864")]);
        ok(&mut fsm);
        assert_eq!(fsm.state(), State::QuerySignalQuality);
    }

    #[test]
    fn signal_quality_polls_until_known() {
        let mut fsm = at_state(State::QuerySignalQuality);
        step(&mut fsm, Input::Line("+CSQ: 99,99"));
        let actions = ok(&mut fsm);
        assert_eq!(&actions[..], &[Action::Delay(SIGNAL_POLL_INTERVAL)]);

        let actions = step(&mut fsm, Input::Timer);
        assert_eq!(&actions[..], &[Action::Command(State::QuerySignalQuality)]);

        step(&mut fsm, Input::Line("+CSQ: 18,0"));
        let actions = ok(&mut fsm);
        assert_eq!(fsm.state(), State::PsAttach);
        assert_eq!(&actions[..], &[Action::Command(State::PsAttach)]);
    }

    #[test]
    fn attach_fallback_then_unrecoverable() {
        let mut fsm = at_state(State::PsAttach);

        // First failure: forced automatic selection, operator scan, blind retry
        step(&mut fsm, Input::Timeout);
        assert_eq!(fsm.state(), State::AutoOperatorSelect);
        ok(&mut fsm);
        assert_eq!(fsm.state(), State::ListOperators);
        let actions = ok(&mut fsm);
        assert_eq!(&actions[..], &[Action::Delay(ATTACH_FALLBACK_DELAY)]);
        let actions = step(&mut fsm, Input::Timer);
        assert_eq!(&actions[..], &[Action::Command(State::PsAttach)]);

        // Then linear back-off
        let actions = step(&mut fsm, Input::Line("ERROR"));
        assert_eq!(&actions[..], &[Action::Delay(Duration::from_secs(2))]);
        step(&mut fsm, Input::Timer);
        let actions = step(&mut fsm, Input::Timeout);
        assert_eq!(&actions[..], &[Action::Delay(Duration::from_secs(4))]);
        step(&mut fsm, Input::Timer);

        let actions = step(&mut fsm, Input::Line("ERROR"));
        assert_eq!(fsm.state(), State::Failed);
        assert_eq!(
            &actions[..],
            &[Action::Complete(Err(Error::RetryExhausted(Stage::Attach)))]
        );

        // Nothing more happens after the terminal error
        assert!(step(&mut fsm, Input::Timer).is_empty());
    }

    #[test]
    fn operator_confirmed_then_done() {
        let mut fsm = at_state(State::PsAttach);
        ok(&mut fsm);
        assert_eq!(fsm.state(), State::CurrentOperator);
        let actions = step(&mut fsm, Input::Line("+COPS: 0,0,\"Telenor\",7"));
        assert_eq!(&actions[..], &[Action::Operator("Telenor")]);
        let actions = ok(&mut fsm);
        assert_eq!(fsm.state(), State::Done);
        assert_eq!(&actions[..], &[Action::Complete(Ok(()))]);
        assert!(!fsm.is_active());
    }
}
