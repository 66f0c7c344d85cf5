//! Hobby servo driving the cutter blade
//!
//! Standard 50 Hz servo signal: a 500-2500 µs pulse maps linearly onto
//! 0-180°. The blade is open at one angle and closed at the other.

use embedded_hal::pwm::SetDutyCycle;
use splicer_core::traits::CutterActuator;

/// Servo angles and pulse timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServoConfig {
    /// Blade open (degrees)
    pub open_deg: u8,
    /// Blade closed (degrees)
    pub closed_deg: u8,
    /// Pulse width at 0° (µs)
    pub min_pulse_us: u16,
    /// Pulse width at 180° (µs)
    pub max_pulse_us: u16,
    /// PWM period (µs)
    pub period_us: u16,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            open_deg: 0,
            closed_deg: 90,
            min_pulse_us: 500,
            max_pulse_us: 2500,
            period_us: 20_000,
        }
    }
}

impl ServoConfig {
    /// Pulse width for an angle, clamped to 0..=180°
    pub fn pulse_us(&self, angle_deg: u8) -> u16 {
        let angle = angle_deg.min(180) as u32;
        let span = self.max_pulse_us.saturating_sub(self.min_pulse_us) as u32;
        self.min_pulse_us + (span * angle / 180) as u16
    }
}

/// Cutter blade on a servo PWM channel
pub struct ServoCutter<P> {
    pwm: P,
    config: ServoConfig,
    active: bool,
}

impl<P: SetDutyCycle> ServoCutter<P> {
    /// Wrap a channel running at the servo period; the blade starts open
    pub fn new(pwm: P, config: ServoConfig) -> Self {
        let mut cutter = Self {
            pwm,
            config,
            active: false,
        };
        cutter.write_angle(config.open_deg);
        cutter
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn channel(&self) -> &P {
        &self.pwm
    }

    /// Change the open and closed angles; the blade moves to the new
    /// position for its current state
    pub fn set_angles(&mut self, open_deg: u8, closed_deg: u8) {
        self.config.open_deg = open_deg.min(180);
        self.config.closed_deg = closed_deg.min(180);
        let angle = if self.active {
            self.config.closed_deg
        } else {
            self.config.open_deg
        };
        self.write_angle(angle);
    }

    fn write_angle(&mut self, angle_deg: u8) {
        let pulse = self.config.pulse_us(angle_deg) as u32;
        let period = self.config.period_us.max(1) as u32;
        let duty = (pulse * self.pwm.max_duty_cycle() as u32 / period) as u16;
        if self.pwm.set_duty_cycle(duty).is_err() {
            warn!("servo pwm write failed");
        }
    }
}

impl<P: SetDutyCycle> CutterActuator for ServoCutter<P> {
    fn activate(&mut self) {
        self.active = true;
        self.write_angle(self.config.closed_deg);
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.write_angle(self.config.open_deg);
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    /// 20 ms period at 1 µs resolution
    #[derive(Default)]
    struct MockPwm {
        duty: u16,
    }

    impl embedded_hal::pwm::ErrorType for MockPwm {
        type Error = Infallible;
    }

    impl SetDutyCycle for MockPwm {
        fn max_duty_cycle(&self) -> u16 {
            20_000
        }
        fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
            self.duty = duty;
            Ok(())
        }
    }

    #[test]
    fn test_pulse_widths() {
        let cfg = ServoConfig::default();
        assert_eq!(cfg.pulse_us(0), 500);
        assert_eq!(cfg.pulse_us(90), 1500);
        assert_eq!(cfg.pulse_us(180), 2500);
        assert_eq!(cfg.pulse_us(255), 2500);
    }

    #[test]
    fn test_starts_open() {
        let cutter = ServoCutter::new(MockPwm::default(), ServoConfig::default());
        assert!(!cutter.is_active());
        assert_eq!(cutter.channel().duty, 500);
    }

    #[test]
    fn test_activate_closes_blade() {
        let mut cutter = ServoCutter::new(MockPwm::default(), ServoConfig::default());
        cutter.activate();
        assert!(cutter.is_active());
        assert_eq!(cutter.channel().duty, 1500);
        cutter.deactivate();
        assert!(!cutter.is_active());
        assert_eq!(cutter.channel().duty, 500);
    }

    #[test]
    fn test_set_angles_moves_blade() {
        let mut cutter = ServoCutter::new(MockPwm::default(), ServoConfig::default());
        cutter.activate();
        cutter.set_angles(10, 120);
        assert_eq!(cutter.channel().duty, (500 + 2000u32 * 120 / 180) as u16);
        cutter.deactivate();
        assert_eq!(cutter.config().open_deg, 10);
        assert_eq!(cutter.channel().duty, 500 + 2000 * 10 / 180);
    }
}
