use embedded_hal::digital::{ErrorType, OutputPin, PinState};

/// Placeholder for a control line that is not wired up.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A control output together with the level that asserts it.
pub struct ControlPin<P> {
    pub(crate) pin: P,
    pub(crate) active: PinState,
}

impl<P: OutputPin> ControlPin<P> {
    pub(crate) fn set(&mut self, asserted: bool) -> Result<(), P::Error> {
        let level = match (asserted, self.active) {
            (true, level) => level,
            (false, PinState::High) => PinState::Low,
            (false, PinState::Low) => PinState::High,
        };
        self.pin.set_state(level)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DebugFlags {
    /// Trace every line exchanged with the AT engine
    pub trace_at: bool,
    /// Dump raw open results that the driver does not recognise
    pub dump_unknown: bool,
}

pub struct Config<RST, PWR> {
    pub(crate) reset_pin: Option<ControlPin<RST>>,
    pub(crate) power_pin: Option<ControlPin<PWR>>,
    pub(crate) flow_control: bool,
    pub(crate) debug: DebugFlags,
}

impl Config<NoPin, NoPin> {
    pub fn new() -> Self {
        Config {
            reset_pin: None,
            power_pin: None,
            flow_control: false,
            debug: DebugFlags::default(),
        }
    }
}

impl Default for Config<NoPin, NoPin> {
    fn default() -> Self {
        Self::new()
    }
}

impl<RST, PWR> Config<RST, PWR>
where
    RST: OutputPin,
    PWR: OutputPin,
{
    pub fn with_reset<R: OutputPin>(self, pin: R, active: PinState) -> Config<R, PWR> {
        Config {
            reset_pin: Some(ControlPin { pin, active }),
            power_pin: self.power_pin,
            flow_control: self.flow_control,
            debug: self.debug,
        }
    }

    pub fn with_power_key<P: OutputPin>(self, pin: P, active: PinState) -> Config<RST, P> {
        Config {
            reset_pin: self.reset_pin,
            power_pin: Some(ControlPin { pin, active }),
            flow_control: self.flow_control,
            debug: self.debug,
        }
    }

    pub fn with_flow_control(self) -> Self {
        Config {
            flow_control: true,
            ..self
        }
    }

    pub fn debug(self, debug: DebugFlags) -> Self {
        Config { debug, ..self }
    }

    pub fn has_reset_pin(&self) -> bool {
        self.reset_pin.is_some()
    }

    pub fn has_power_pin(&self) -> bool {
        self.power_pin.is_some()
    }
}
