use core::convert::Infallible;
use std::cell::RefCell;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embassy_time::Duration;
use embedded_hal::digital::{ErrorType, OutputPin, PinState};

use crate::at::AtEngine;

/// Records everything the driver hands to the AT engine.
#[derive(Debug, Default)]
pub struct MockEngine {
    /// Encoded commands, terminator included
    pub commands: Vec<String>,
    pub writes: Vec<Vec<u8>>,
    pub timeouts: Vec<Duration>,
    pub busy: bool,
    pub debug: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last command without its line terminator.
    pub fn last(&self) -> Option<&str> {
        self.commands.last().map(|c| c.trim_end())
    }

    pub fn count(&self, cmd: &str) -> usize {
        self.commands.iter().filter(|c| c.trim_end() == cmd).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

impl AtEngine for MockEngine {
    fn cmd(&mut self, cmd: &[u8], timeout: Duration) {
        self.commands.push(String::from_utf8_lossy(cmd).into_owned());
        self.timeouts.push(timeout);
    }

    fn write(&mut self, data: &[u8]) {
        self.writes.push(data.to_vec());
    }

    fn is_busy(&self) -> bool {
        self.busy
    }

    fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }
}

/// Output pin remembering every level it was driven to. Clones share history.
#[derive(Debug, Default, Clone)]
pub struct MockPin {
    levels: Rc<RefCell<Vec<PinState>>>,
}

impl MockPin {
    pub fn level(&self) -> Option<PinState> {
        self.levels.borrow().last().copied()
    }

    pub fn history(&self) -> Vec<PinState> {
        self.levels.borrow().clone()
    }
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(PinState::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.levels.borrow_mut().push(PinState::High);
        Ok(())
    }
}
