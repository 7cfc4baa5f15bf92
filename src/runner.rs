//! Async embedding of the sans-IO [`Device`].
//!
//! [`State`] owns the device together with the AT engine. The [`Runner`]
//! must be polled in a background task: it feeds engine input and timer
//! expiries into the device. [`Control`] is the application handle.

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_sync::waitqueue::WakerRegistration;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::OutputPin;
use heapless::{String, Vec};

use crate::at::{AtEngine, Dispatch, Response};
use crate::client::{Device, Event};
use crate::config::Config;
use crate::error::Error;
use crate::fmt::LossyStr;
use crate::socket::{SocketHandle, SocketState};

pub const LINE_LEN: usize = 256;
pub const URC_CHUNK_LEN: usize = 256;

/// Holds a partial notification header between chunks.
const URC_BUF_LEN: usize = 2 * URC_CHUNK_LEN;

/// Input produced by the AT engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response line belonging to the outstanding command
    Line(String<LINE_LEN>),
    /// `>` data prompt
    Prompt,
    /// The outstanding command timed out
    Timeout,
    /// Chunk of unsolicited input
    Urc(Vec<u8, URC_CHUNK_LEN>),
    /// Nothing outstanding or queued
    Idle,
}

/// Receiving half of the AT engine.
#[allow(async_fn_in_trait)]
pub trait Incoming {
    async fn next(&mut self) -> Inbound;
}

struct Shared<E, RST, PWR> {
    device: Device<RST, PWR>,
    engine: E,
    event_waker: WakerRegistration,
}

pub struct State<E, RST, PWR> {
    shared: Mutex<NoopRawMutex, RefCell<Shared<E, RST, PWR>>>,
    /// Raised whenever the application may have armed a timer
    changed: Signal<NoopRawMutex, ()>,
}

impl<E, RST, PWR> State<E, RST, PWR>
where
    E: AtEngine,
    RST: OutputPin,
    PWR: OutputPin,
{
    pub fn new(engine: E, config: Config<RST, PWR>) -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared {
                device: Device::new(config),
                engine,
                event_waker: WakerRegistration::new(),
            })),
            changed: Signal::new(),
        }
    }
}

pub fn new<'d, E, RST, PWR, I>(
    state: &'d State<E, RST, PWR>,
    incoming: I,
) -> (Control<'d, E, RST, PWR>, Runner<'d, E, RST, PWR, I>)
where
    E: AtEngine,
    RST: OutputPin,
    PWR: OutputPin,
    I: Incoming,
{
    (
        Control { state },
        Runner {
            state,
            incoming,
            urc_buf: Vec::new(),
        },
    )
}

/// Background runner.
///
/// You must call `.run()` in a background task for the driver to operate.
pub struct Runner<'d, E, RST, PWR, I> {
    state: &'d State<E, RST, PWR>,
    incoming: I,
    urc_buf: Vec<u8, URC_BUF_LEN>,
}

impl<'d, E, RST, PWR, I> Runner<'d, E, RST, PWR, I>
where
    E: AtEngine,
    RST: OutputPin,
    PWR: OutputPin,
    I: Incoming,
{
    pub async fn run(mut self) -> ! {
        loop {
            let deadline = self
                .state
                .shared
                .lock(|s| s.borrow().device.poll_timeout())
                .unwrap_or(Instant::MAX);

            let woken = select3(
                self.incoming.next(),
                Timer::at(deadline),
                self.state.changed.wait(),
            )
            .await;
            match woken {
                Either3::First(inbound) => self.handle(inbound),
                Either3::Second(()) => self.tick(),
                Either3::Third(()) => {}
            }
        }
    }

    /// Fire due timers.
    pub fn tick(&mut self) {
        self.state.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.device.handle_timeout(&mut s.engine, Instant::now());
            s.event_waker.wake();
        });
    }

    /// Feed one engine input to the device.
    pub fn handle(&mut self, inbound: Inbound) {
        let urc_buf = &mut self.urc_buf;
        self.state.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            let (device, engine) = (&mut s.device, &mut s.engine);
            device.handle_timeout(engine, Instant::now());
            match inbound {
                Inbound::Line(line) => {
                    device.on_response(engine, Response::Line(&line));
                }
                Inbound::Prompt => {
                    device.on_response(engine, Response::Prompt);
                }
                Inbound::Timeout => {
                    device.on_response(engine, Response::Timeout);
                }
                Inbound::Urc(chunk) => dispatch_urc(device, engine, urc_buf, &chunk),
                Inbound::Idle => device.on_idle(engine),
            }
            s.event_waker.wake();
        });
    }
}

/// Offer `chunk`, after any held back partial header, until every
/// notification in it has been handled.
fn dispatch_urc<E, RST, PWR>(
    device: &mut Device<RST, PWR>,
    engine: &mut E,
    buf: &mut Vec<u8, URC_BUF_LEN>,
    chunk: &[u8],
) where
    E: AtEngine,
    RST: OutputPin,
    PWR: OutputPin,
{
    if buf.extend_from_slice(chunk).is_err() {
        warn!("Dropping {} bytes of partial notification", buf.len());
        buf.clear();
        if buf.extend_from_slice(chunk).is_err() {
            return;
        }
    }

    let mut offset = 0;
    loop {
        let data = &buf[offset..];
        match device.on_urc(engine, data) {
            Dispatch::Remainder(rest) if !rest.is_empty() => offset = buf.len() - rest.len(),
            Dispatch::Incomplete => {
                let len = buf.len() - offset;
                buf.copy_within(offset.., 0);
                buf.truncate(len);
                return;
            }
            Dispatch::NotMine => {
                debug!("Unhandled notification {:?}", LossyStr(data));
                match data.iter().position(|&b| b == b'\n') {
                    Some(i) if offset + i + 1 < buf.len() => offset += i + 1,
                    _ => break,
                }
            }
            _ => break,
        }
    }
    buf.clear();
}

/// Application handle. Every call first brings the device up to date with
/// the current time.
pub struct Control<'d, E, RST, PWR> {
    state: &'d State<E, RST, PWR>,
}

impl<'d, E, RST, PWR> Control<'d, E, RST, PWR>
where
    E: AtEngine,
    RST: OutputPin,
    PWR: OutputPin,
{
    fn with<R>(&self, f: impl FnOnce(&mut Device<RST, PWR>, &mut E) -> R) -> R {
        let result = self.state.shared.lock(|s| {
            let s = &mut *s.borrow_mut();
            s.device.handle_timeout(&mut s.engine, Instant::now());
            f(&mut s.device, &mut s.engine)
        });
        self.state.changed.signal(());
        result
    }

    /// Wait for the next [`Event`].
    pub async fn next_event(&self) -> Event {
        poll_fn(|cx| {
            self.state.shared.lock(|s| {
                let s = &mut *s.borrow_mut();
                match s.device.poll_event() {
                    Some(event) => Poll::Ready(event),
                    None => {
                        s.event_waker.register(cx.waker());
                        Poll::Pending
                    }
                }
            })
        })
        .await
    }

    pub fn reset(&self) -> Result<(), Error> {
        self.with(|device, engine| device.reset(engine))
    }

    pub fn init(&self) -> Result<(), Error> {
        self.with(|device, engine| device.init(engine))
    }

    pub fn connect(&self, apn: &str, username: &str, password: &str) -> Result<(), Error> {
        self.with(|device, engine| device.connect(engine, apn, username, password))
    }

    pub fn get_ip(&self) -> Result<(), Error> {
        self.with(|device, engine| device.get_ip(engine))
    }

    pub fn get_version(&self) -> Result<(), Error> {
        self.with(|device, engine| device.get_version(engine))
    }

    pub fn create(&self, host: &str, port: u16) -> Result<SocketHandle, Error> {
        self.with(|device, engine| device.create(engine, host, port))
    }

    pub fn close(&self, handle: SocketHandle) -> Result<(), Error> {
        self.with(|device, engine| device.close(engine, handle))
    }

    pub fn accept(&self, handle: SocketHandle) -> Option<SocketHandle> {
        self.with(|device, _| device.accept(handle))
    }

    pub fn recv(&self, handle: SocketHandle, buf: &mut [u8]) -> nb::Result<usize, Error> {
        self.with(|device, engine| device.recv(engine, handle, buf))
    }

    pub fn send(&self, handle: SocketHandle, data: &[u8]) -> nb::Result<usize, Error> {
        self.with(|device, engine| device.send(engine, handle, data))
    }

    pub fn socket_state(&self, handle: SocketHandle) -> Option<SocketState> {
        self.with(|device, _| device.socket_state(handle))
    }

    pub fn geo_loc_start(&self, period: Duration) -> Result<(), Error> {
        self.with(|device, engine| device.geo_loc_start(engine, period))
    }

    pub fn geo_loc_stop(&self) -> Result<(), Error> {
        self.with(|device, engine| device.geo_loc_stop(engine))
    }

    pub fn geo_position(&self) -> Option<String<48>> {
        self.with(|device, _| device.geo_position().and_then(|p| String::try_from(p).ok()))
    }
}
