//! PID autotune using the relay method
//!
//! The heater is switched between two power levels whenever the
//! temperature leaves a band around the target. After a fixed number of
//! oscillation cycles the amplitude and period of the last cycle give
//! the ultimate gain and period, from which Ziegler-Nichols gains are
//! derived.

use core::f32::consts::PI;
use core::fmt;

use super::pid::PidGains;

/// Autotune progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutotuneState {
    /// Not running
    Idle,
    /// Relay high, waiting to overshoot the band
    Heating,
    /// Relay low, waiting to undershoot the band
    Cooling,
    /// Gains available
    Complete,
    /// Stopped without a result
    Failed(AutotuneError),
}

/// Why an autotune stopped without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AutotuneError {
    /// Exceeded the temperature ceiling
    OverTemp,
    /// Took longer than the time cap
    Timeout,
    /// Temperature sensor failed
    SensorFault,
    /// Oscillation too small to measure
    NoOscillation,
    /// Cancelled by the operator or a target of zero
    Cancelled,
}

impl AutotuneError {
    /// Token used in the failure line
    pub const fn label(self) -> &'static str {
        match self {
            AutotuneError::OverTemp => "OVERTEMP",
            AutotuneError::Timeout => "TIMEOUT",
            AutotuneError::SensorFault => "SENSOR",
            AutotuneError::NoOscillation => "NO_OSCILLATION",
            AutotuneError::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AutotuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Relay levels, band and limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AutotuneConfig {
    /// Relay high output
    pub output_high: u8,
    /// Relay low output
    pub output_low: u8,
    /// Half-width of the switching band (0.1°C)
    pub band_x10: i16,
    /// Cycles to run before computing gains
    pub cycles: u8,
    /// Time cap (ms)
    pub timeout_ms: u32,
    /// Abort above this temperature (0.1°C)
    pub max_temp_x10: i16,
}

impl Default for AutotuneConfig {
    fn default() -> Self {
        Self {
            output_high: 200,
            output_low: 0,
            band_x10: 20,
            cycles: 5,
            timeout_ms: 20 * 60 * 1000,
            max_temp_x10: 2800,
        }
    }
}

/// Relay autotuner
///
/// Pure state machine: feed it readings with [`update`](Self::update)
/// and drive the heater with [`output`](Self::output).
#[derive(Debug, Clone)]
pub struct RelayAutotune {
    config: AutotuneConfig,
    state: AutotuneState,
    target_x10: i16,
    started_ms: u32,
    /// Time of the last high-to-low switch
    last_switch_ms: Option<u32>,
    cycles: u8,
    peak_high_x10: i16,
    peak_low_x10: i16,
    /// Period of the last complete cycle (ms)
    period_ms: u32,
    result: Option<PidGains>,
}

impl RelayAutotune {
    pub fn new(config: AutotuneConfig) -> Self {
        Self {
            config,
            state: AutotuneState::Idle,
            target_x10: 0,
            started_ms: 0,
            last_switch_ms: None,
            cycles: 0,
            peak_high_x10: i16::MIN,
            peak_low_x10: i16::MAX,
            period_ms: 0,
            result: None,
        }
    }

    /// Begin relay cycling around `target_x10`, relay high
    pub fn start(&mut self, target_x10: i16, now_ms: u32) {
        self.state = AutotuneState::Heating;
        self.target_x10 = target_x10;
        self.started_ms = now_ms;
        self.last_switch_ms = None;
        self.cycles = 0;
        self.peak_high_x10 = i16::MIN;
        self.peak_low_x10 = i16::MAX;
        self.period_ms = 0;
        self.result = None;
    }

    /// Stop with [`AutotuneError::Cancelled`]; a no-op when not running
    pub fn cancel(&mut self) {
        if self.is_active() {
            self.state = AutotuneState::Failed(AutotuneError::Cancelled);
        }
    }

    /// Stop with the given error
    pub fn fail(&mut self, error: AutotuneError) -> AutotuneError {
        self.state = AutotuneState::Failed(error);
        error
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, AutotuneState::Heating | AutotuneState::Cooling)
    }

    pub fn state(&self) -> AutotuneState {
        self.state
    }

    /// Completed cycles
    pub fn cycles(&self) -> u8 {
        self.cycles
    }

    pub fn result(&self) -> Option<PidGains> {
        self.result
    }

    pub fn config(&self) -> &AutotuneConfig {
        &self.config
    }

    /// Heater duty for the current relay state
    pub fn output(&self) -> u8 {
        match self.state {
            AutotuneState::Heating => self.config.output_high,
            AutotuneState::Cooling => self.config.output_low,
            _ => 0,
        }
    }

    /// Feed one reading; returns the outcome on the sample it finishes
    pub fn update(&mut self, current_x10: i16, now_ms: u32) -> Option<Result<PidGains, AutotuneError>> {
        if !self.is_active() {
            return None;
        }
        if now_ms.wrapping_sub(self.started_ms) > self.config.timeout_ms {
            return Some(Err(self.fail(AutotuneError::Timeout)));
        }
        if current_x10 > self.config.max_temp_x10 {
            return Some(Err(self.fail(AutotuneError::OverTemp)));
        }

        self.peak_high_x10 = self.peak_high_x10.max(current_x10);
        self.peak_low_x10 = self.peak_low_x10.min(current_x10);

        let band = self.config.band_x10;
        match self.state {
            AutotuneState::Heating if current_x10 > self.target_x10.saturating_add(band) => {
                self.state = AutotuneState::Cooling;
                self.cycles = self.cycles.saturating_add(1);
                let since = self.last_switch_ms.unwrap_or(self.started_ms);
                self.period_ms = now_ms.wrapping_sub(since);
                self.last_switch_ms = Some(now_ms);
                debug!("autotune cycle {} period {} ms", self.cycles, self.period_ms);

                if self.cycles >= self.config.cycles {
                    return Some(self.finish());
                }
                self.peak_high_x10 = current_x10;
                self.peak_low_x10 = current_x10;
            }
            AutotuneState::Cooling if current_x10 < self.target_x10.saturating_sub(band) => {
                self.state = AutotuneState::Heating;
            }
            _ => {}
        }
        None
    }

    fn finish(&mut self) -> Result<PidGains, AutotuneError> {
        let amplitude_c = (self.peak_high_x10 as f32 - self.peak_low_x10 as f32) / 20.0;
        let period_s = self.period_ms as f32 / 1000.0;
        if amplitude_c <= 0.0 || period_s <= 0.0 {
            return Err(self.fail(AutotuneError::NoOscillation));
        }

        let relay = self.config.output_high as f32 - self.config.output_low as f32;
        let ku = 4.0 * relay / (PI * amplitude_c);
        let gains = PidGains {
            kp: 0.6 * ku,
            ki: 1.2 * ku / period_s,
            kd: 0.075 * ku * period_s,
        };
        self.result = Some(gains);
        self.state = AutotuneState::Complete;
        Ok(gains)
    }
}

impl Default for RelayAutotune {
    fn default() -> Self {
        Self::new(AutotuneConfig::default())
    }
}
