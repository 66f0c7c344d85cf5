//! PID heater loop
//!
//! Positional PID with a fixed sample period. The integral is held
//! inside the output range (anti-windup) and the derivative acts on the
//! measurement, so setpoint ramps do not kick the output. Math runs in
//! Q16.16; gains are set in the usual per-second units.

use super::fixed::Fixed32;

/// PID gains (per-second units)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    /// Proportional gain (duty per °C)
    pub kp: f32,
    /// Integral gain (duty per °C·s)
    pub ki: f32,
    /// Derivative gain (duty per °C/s)
    pub kd: f32,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 20.0,
            ki: 1.0,
            kd: 5.0,
        }
    }
}

/// Loop timing and output limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidConfig {
    /// Sample period (ms)
    pub sample_ms: u32,
    /// Lowest duty
    pub output_min: u8,
    /// Highest duty
    pub output_max: u8,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            sample_ms: 100,
            output_min: 0,
            output_max: 255,
        }
    }
}

/// Fixed-point PID controller
#[derive(Debug, Clone)]
pub struct Pid {
    config: PidConfig,
    gains: PidGains,
    kp: Fixed32,
    /// Ki scaled by the sample period
    ki_dt: Fixed32,
    /// Kd divided by the sample period
    kd_dt: Fixed32,
    integral: Fixed32,
    last_input: Option<Fixed32>,
    output: u8,
}

impl Pid {
    pub fn new(gains: PidGains, config: PidConfig) -> Self {
        let mut pid = Self {
            config,
            gains,
            kp: Fixed32::ZERO,
            ki_dt: Fixed32::ZERO,
            kd_dt: Fixed32::ZERO,
            integral: Fixed32::ZERO,
            last_input: None,
            output: 0,
        };
        pid.set_gains(gains);
        pid
    }

    /// Replace the gains; the integral is kept so the output stays bumpless
    pub fn set_gains(&mut self, gains: PidGains) {
        let dt_s = self.config.sample_ms.max(1) as f32 / 1000.0;
        self.gains = gains;
        self.kp = Fixed32::from_f32(gains.kp.max(0.0));
        self.ki_dt = Fixed32::from_f32(gains.ki.max(0.0) * dt_s);
        self.kd_dt = Fixed32::from_f32(gains.kd.max(0.0) / dt_s);
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Forget integral and derivative history
    pub fn reset(&mut self) {
        self.integral = Fixed32::ZERO;
        self.last_input = None;
        self.output = 0;
    }

    /// Last computed duty
    pub fn output(&self) -> u8 {
        self.output
    }

    /// One sample; both temperatures in 0.1°C units
    pub fn compute(&mut self, setpoint_x10: i16, input_x10: i16) -> u8 {
        let lo = Fixed32::from_int(self.config.output_min as i16);
        let hi = Fixed32::from_int(self.config.output_max as i16);
        let input = Fixed32::from_tenths(input_x10);
        let error = Fixed32::from_tenths(setpoint_x10) - input;

        self.integral = (self.integral + self.ki_dt.mul(error)).clamp(lo, hi);

        let d_input = input - self.last_input.unwrap_or(input);
        self.last_input = Some(input);

        let output = self.kp.mul(error) + self.integral - self.kd_dt.mul(d_input);
        self.output = output.clamp(lo, hi).to_int() as u8;
        self.output
    }
}

impl Default for Pid {
    fn default() -> Self {
        Self::new(PidGains::default(), PidConfig::default())
    }
}
