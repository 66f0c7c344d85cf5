//! Runout switches and cutter force sensor

use embedded_hal::digital::InputPin;
use splicer_core::motion::FeedInput;
use splicer_core::traits::SensorBank;

use super::ntc::AdcReader;

/// Filament-present switches for both inputs plus the blade force ADC
///
/// Switches are active-high by default (pin high = filament present).
/// A pin that cannot be read counts as empty so a broken switch stops
/// the feed instead of grinding on; an unreadable force channel reads
/// as full scale so the blade is flagged worn.
pub struct FilamentSensors<A, B, F> {
    switch_a: A,
    switch_b: B,
    force: F,
    active_low: bool,
}

impl<A, B, F> FilamentSensors<A, B, F>
where
    A: InputPin,
    B: InputPin,
    F: AdcReader,
{
    pub fn new(switch_a: A, switch_b: B, force: F) -> Self {
        Self {
            switch_a,
            switch_b,
            force,
            active_low: false,
        }
    }

    /// Treat a low pin as filament present
    pub fn active_low(mut self) -> Self {
        self.active_low = true;
        self
    }

    pub fn release(self) -> (A, B, F) {
        (self.switch_a, self.switch_b, self.force)
    }
}

impl<A, B, F> SensorBank for FilamentSensors<A, B, F>
where
    A: InputPin,
    B: InputPin,
    F: AdcReader,
{
    fn filament_present(&mut self, input: FeedInput) -> bool {
        let level = match input {
            FeedInput::A => self.switch_a.is_high().map_err(|_| ()),
            FeedInput::B => self.switch_b.is_high().map_err(|_| ()),
        };
        match level {
            Ok(high) => high != self.active_low,
            Err(_) => {
                warn!("runout switch read failed");
                false
            }
        }
    }

    fn cutter_force(&mut self) -> u16 {
        self.force.read().unwrap_or_else(|_| {
            warn!("cutter force read failed");
            u16::MAX
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct PinError;

    impl embedded_hal::digital::Error for PinError {
        fn kind(&self) -> embedded_hal::digital::ErrorKind {
            embedded_hal::digital::ErrorKind::Other
        }
    }

    struct MockSwitch(bool);

    impl embedded_hal::digital::ErrorType for MockSwitch {
        type Error = Infallible;
    }

    impl InputPin for MockSwitch {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0)
        }
        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0)
        }
    }

    struct BrokenSwitch;

    impl embedded_hal::digital::ErrorType for BrokenSwitch {
        type Error = PinError;
    }

    impl InputPin for BrokenSwitch {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Err(PinError)
        }
        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Err(PinError)
        }
    }

    struct ForceAdc(Option<u16>);

    impl AdcReader for ForceAdc {
        fn read(&mut self) -> Result<u16, ()> {
            self.0.ok_or(())
        }
    }

    #[test]
    fn test_active_high_switches() {
        let mut s = FilamentSensors::new(MockSwitch(true), MockSwitch(false), ForceAdc(Some(300)));
        assert!(s.filament_present(FeedInput::A));
        assert!(!s.filament_present(FeedInput::B));
        assert_eq!(s.cutter_force(), 300);
    }

    #[test]
    fn test_active_low_switches() {
        let mut s = FilamentSensors::new(MockSwitch(true), MockSwitch(false), ForceAdc(Some(0)))
            .active_low();
        assert!(!s.filament_present(FeedInput::A));
        assert!(s.filament_present(FeedInput::B));
    }

    #[test]
    fn test_read_failures() {
        let mut s = FilamentSensors::new(BrokenSwitch, MockSwitch(true), ForceAdc(None));
        assert!(!s.filament_present(FeedInput::A));
        assert!(s.filament_present(FeedInput::B));
        assert_eq!(s.cutter_force(), u16::MAX);
    }
}
