//! Heater and fan outputs over `embedded-hal`
//!
//! Duty values from the control loop are 0..=255 and get scaled to the
//! channel's own resolution. Pin errors are logged and otherwise ignored:
//! the loop has no better response than writing again next sample.

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::SetDutyCycle;
use splicer_core::traits::{FanOutput, HeaterOutput};

/// Scale an 8-bit duty to a channel with `max` full scale
fn scale_duty(duty: u8, max: u16) -> u16 {
    ((duty as u32 * max as u32) / 255) as u16
}

/// Heater driven by a hardware PWM channel (MOSFET or SSR)
pub struct PwmHeater<P> {
    pwm: P,
    power: u8,
}

impl<P: SetDutyCycle> PwmHeater<P> {
    /// Wrap a channel; the heater starts off
    pub fn new(pwm: P) -> Self {
        let mut heater = Self { pwm, power: 0 };
        heater.set_power(0);
        heater
    }

    /// Get access to the underlying channel
    pub fn channel(&self) -> &P {
        &self.pwm
    }
}

impl<P: SetDutyCycle> HeaterOutput for PwmHeater<P> {
    fn set_power(&mut self, power: u8) {
        self.power = power;
        let duty = scale_duty(power, self.pwm.max_duty_cycle());
        if self.pwm.set_duty_cycle(duty).is_err() {
            warn!("heater pwm write failed");
        }
    }

    fn power(&self) -> u8 {
        self.power
    }
}

/// Part cooling fan on a PWM channel
pub struct PwmFan<P> {
    pwm: P,
    duty: u8,
}

impl<P: SetDutyCycle> PwmFan<P> {
    /// Wrap a channel; the fan starts stopped
    pub fn new(pwm: P) -> Self {
        let mut fan = Self { pwm, duty: 0 };
        fan.set_pwm(0);
        fan
    }

    pub fn channel(&self) -> &P {
        &self.pwm
    }
}

impl<P: SetDutyCycle> FanOutput for PwmFan<P> {
    fn set_pwm(&mut self, pwm: u8) {
        self.duty = pwm;
        let duty = scale_duty(pwm, self.pwm.max_duty_cycle());
        if self.pwm.set_duty_cycle(duty).is_err() {
            warn!("fan pwm write failed");
        }
    }

    fn pwm(&self) -> u8 {
        self.duty
    }
}

/// On/off fan on a plain GPIO
///
/// Any non-zero duty switches the fan fully on. The pin can be
/// active-high (default) or active-low.
pub struct GpioFan<P> {
    pin: P,
    /// If true, fan ON = pin LOW
    inverted: bool,
    duty: u8,
}

impl<P: OutputPin> GpioFan<P> {
    pub fn new(pin: P, inverted: bool) -> Self {
        let mut fan = Self {
            pin,
            inverted,
            duty: 0,
        };
        fan.set_pwm(0);
        fan
    }

    pub fn new_active_high(pin: P) -> Self {
        Self::new(pin, false)
    }

    pub fn new_active_low(pin: P) -> Self {
        Self::new(pin, true)
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}

impl<P: OutputPin> FanOutput for GpioFan<P> {
    fn set_pwm(&mut self, pwm: u8) {
        self.duty = if pwm > 0 { 255 } else { 0 };
        let on = pwm > 0;
        let result = if on != self.inverted {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if result.is_err() {
            warn!("fan pin write failed");
        }
    }

    fn pwm(&self) -> u8 {
        self.duty
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::convert::Infallible;

    /// PWM channel with a 1000-count full scale
    #[derive(Debug, Default)]
    pub(crate) struct MockPwm {
        pub duty: u16,
        pub writes: u32,
    }

    impl embedded_hal::pwm::ErrorType for MockPwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for MockPwm {
        fn max_duty_cycle(&self) -> u16 {
            1000
        }

        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            self.writes += 1;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct MockPin {
        pub high: bool,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            Ok(())
        }
    }

    #[test]
    fn test_heater_starts_off() {
        let heater = PwmHeater::new(MockPwm { duty: 700, writes: 0 });
        assert_eq!(heater.power(), 0);
        assert_eq!(heater.channel().duty, 0);
        assert_eq!(heater.channel().writes, 1);
    }

    #[test]
    fn test_heater_duty_scaling() {
        let mut heater = PwmHeater::new(MockPwm::default());
        heater.set_power(255);
        assert_eq!(heater.channel().duty, 1000);
        heater.set_power(51);
        assert_eq!(heater.channel().duty, 200);
        assert_eq!(heater.power(), 51);
        heater.off();
        assert_eq!(heater.channel().duty, 0);
    }

    #[test]
    fn test_pwm_fan() {
        let mut fan = PwmFan::new(MockPwm::default());
        fan.set_pwm(128);
        assert_eq!(fan.pwm(), 128);
        assert_eq!(fan.channel().duty, 501);
    }

    #[test]
    fn test_gpio_fan_active_high() {
        let mut fan = GpioFan::new_active_high(MockPin::default());
        assert!(!fan.pin().high);
        fan.set_pwm(10);
        assert!(fan.pin().high);
        assert_eq!(fan.pwm(), 255);
        fan.set_pwm(0);
        assert!(!fan.pin().high);
    }

    #[test]
    fn test_gpio_fan_active_low() {
        let mut fan = GpioFan::new_active_low(MockPin::default());
        // off drives the pin high
        assert!(fan.pin().high);
        fan.set_pwm(255);
        assert!(!fan.pin().high);
    }
}
