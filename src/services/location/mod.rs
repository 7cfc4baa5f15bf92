//! Periodic GNSS position polling.

use core::fmt::Write as _;

use embassy_time::Duration;
use embedded_hal::digital::OutputPin;
use heapless::String;

use crate::at::{is_final, AtEngine, Flow, Response};
use crate::client::{Device, Exchange};
use crate::command::gnss::{position, AcquirePosition, TurnOffGnss, TurnOnGnss};
use crate::error::Error;
use crate::timer::Timer;

/// Standalone GNSS session.
const GNSS_MODE_STANDALONE: u8 = 1;
/// Report coordinates as signed decimal degrees.
const LOCATION_MODE_DECIMAL: u8 = 2;

#[derive(Debug)]
pub(crate) struct GeoState {
    pub running: bool,
    pub period: Duration,
    /// Last fix as `"longitude,latitude"`
    pub position: Option<String<48>>,
    pub in_flight: bool,
    /// The poll in flight produced a valid fix line
    pub fix_seen: bool,
}

impl Default for GeoState {
    fn default() -> Self {
        Self {
            running: false,
            period: Duration::from_secs(0),
            position: None,
            in_flight: false,
            fix_seen: false,
        }
    }
}

impl<RST, PWR> Device<RST, PWR>
where
    RST: OutputPin,
    PWR: OutputPin,
{
    /// Power the GNSS engine and poll the position every `period`.
    /// Calling it again while running only changes the period.
    pub fn geo_loc_start<E: AtEngine>(&mut self, engine: &mut E, period: Duration) -> Result<(), Error> {
        self.geo.period = period;
        if self.geo.running {
            return Ok(());
        }
        self.issue(
            engine,
            &TurnOnGnss {
                mode: GNSS_MODE_STANDALONE,
            },
            Exchange::GeoStart,
        )?;
        self.geo.running = true;
        self.geo.position = None;
        self.geo_poll(engine);
        Ok(())
    }

    /// Stop polling and forget the cached position. A poll already in
    /// flight completes without effect.
    pub fn geo_loc_stop<E: AtEngine>(&mut self, engine: &mut E) -> Result<(), Error> {
        self.geo.running = false;
        self.geo.position = None;
        self.timers.cancel(Timer::GeoPoll);
        self.issue(engine, &TurnOffGnss, Exchange::GeoStop)
    }

    /// Last known position as `"longitude,latitude"`.
    pub fn geo_position(&self) -> Option<&str> {
        self.geo.position.as_deref()
    }

    pub(crate) fn geo_poll<E: AtEngine>(&mut self, engine: &mut E) {
        if !self.geo.running || self.geo.in_flight {
            return;
        }
        let cmd = AcquirePosition {
            mode: LOCATION_MODE_DECIMAL,
        };
        match self.issue(engine, &cmd, Exchange::GeoPoll) {
            Ok(()) => {
                self.geo.in_flight = true;
                self.geo.fix_seen = false;
            }
            Err(e) => {
                warn!("Unable to poll position: {:?}", e);
                self.timers.arm(Timer::GeoPoll, self.now + self.geo.period);
            }
        }
    }

    pub(crate) fn geo_response(&mut self, response: Response<'_>) -> Flow {
        match response {
            Response::Line(l) if l.starts_with("+QGPSLOC:") => {
                match position(l) {
                    Some((lon, lat)) if self.geo.running => {
                        let mut fix = String::new();
                        if write!(fix, "{},{}", lon, lat).is_ok() {
                            debug!("Position {}", fix.as_str());
                            self.geo.position = Some(fix);
                            self.geo.fix_seen = true;
                        } else {
                            self.geo.position = None;
                        }
                    }
                    Some(_) => {}
                    None => {
                        debug!("Malformed position {:?}", l);
                        self.geo.position = None;
                    }
                }
                return Flow::Wait;
            }
            Response::Line(l) if is_final(l) => {
                if !self.geo.fix_seen {
                    trace!("No fix: {}", l);
                    self.geo.position = None;
                }
            }
            Response::Timeout => self.geo.position = None,
            _ => return Flow::Wait,
        }

        self.geo.in_flight = false;
        self.geo.fix_seen = false;
        if self.geo.running {
            self.timers.arm(Timer::GeoPoll, self.now + self.geo.period);
        }
        Flow::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NoPin};
    use crate::test_helpers::MockEngine;
    use embassy_time::Instant;

    const FIX: &str = "+QGPSLOC: 061951.000,31.16334,-121.62806,0.7,62.2,2,0.00,0.0,0.0,110513,09";

    fn started() -> (Device<NoPin, NoPin>, MockEngine) {
        let mut device = Device::new(Config::new());
        let mut engine = MockEngine::new();
        device
            .geo_loc_start(&mut engine, Duration::from_secs(10))
            .unwrap();
        assert_eq!(engine.commands, ["AT+QGPS=1\r\n", "AT+QGPSLOC=2\r\n"]);
        device.on_response(&mut engine, Response::Line("+CME ERROR: 504"));
        (device, engine)
    }

    #[test]
    fn fix_is_cached_and_poll_rescheduled() {
        let (mut device, mut engine) = started();
        device.on_response(&mut engine, Response::Line(FIX));
        assert_eq!(
            device.on_response(&mut engine, Response::Line("OK")),
            Flow::Done
        );
        assert_eq!(device.geo_position(), Some("-121.62806,31.16334"));

        let next = device.poll_timeout().unwrap();
        assert_eq!(next, Instant::from_ticks(0) + Duration::from_secs(10));
        device.handle_timeout(&mut engine, next);
        assert_eq!(engine.count("AT+QGPSLOC=2"), 2);
    }

    #[test]
    fn missing_fix_clears_position() {
        let (mut device, mut engine) = started();
        device.on_response(&mut engine, Response::Line(FIX));
        device.on_response(&mut engine, Response::Line("OK"));
        device.handle_timeout(&mut engine, device.poll_timeout().unwrap());

        device.on_response(&mut engine, Response::Line("+CME ERROR: 516"));
        assert_eq!(device.geo_position(), None);
        assert!(device.poll_timeout().is_some());

        device.handle_timeout(&mut engine, device.poll_timeout().unwrap());
        device.on_response(&mut engine, Response::Line(FIX));
        device.on_response(&mut engine, Response::Line("OK"));
        device.handle_timeout(&mut engine, device.poll_timeout().unwrap());
        device.on_response(&mut engine, Response::Timeout);
        assert_eq!(device.geo_position(), None);
    }

    #[test]
    fn malformed_fix_clears_position() {
        let (mut device, mut engine) = started();
        device.on_response(&mut engine, Response::Line("+QGPSLOC: 061951.000,N,E"));
        device.on_response(&mut engine, Response::Line("OK"));
        assert_eq!(device.geo_position(), None);
    }

    #[test]
    fn stop_discards_poll_in_flight() {
        let (mut device, mut engine) = started();
        device.geo_loc_stop(&mut engine).unwrap();
        assert_eq!(engine.last(), Some("AT+QGPSEND"));

        device.on_response(&mut engine, Response::Line(FIX));
        device.on_response(&mut engine, Response::Line("OK"));
        assert_eq!(device.geo_position(), None);
        assert_eq!(device.poll_timeout(), None);
        assert_eq!(engine.count("AT+QGPSLOC=2"), 1);
    }

    #[test]
    fn restart_while_running_updates_period() {
        let (mut device, mut engine) = started();
        device
            .geo_loc_start(&mut engine, Duration::from_secs(60))
            .unwrap();
        assert_eq!(engine.count("AT+QGPS=1"), 1);
        device.on_response(&mut engine, Response::Line("OK"));
        assert_eq!(
            device.poll_timeout(),
            Some(Instant::from_ticks(0) + Duration::from_secs(60))
        );
    }
}
