//! Thermal policy
//!
//! Board-independent parts of the heater loop: stage tracking, the
//! ramped effective setpoint, runaway detection and reading validation.
//! The loop itself (sensor, PID, heater and fan outputs) is implemented
//! by the driver crate against [`crate::traits::ThermalControl`].

pub mod runaway;
pub mod stage;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::traits::SensorError;

pub use runaway::RunawayGuard;
pub use stage::{SetpointRamp, StageTracker};

/// Coarse heating progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HeatingStage {
    /// Loop disabled
    #[default]
    Off,
    /// Climbing toward target
    Preheat,
    /// Near target, waiting for the material soak time
    Soak,
    /// At temperature
    Ready,
    /// Interlock tripped; heater held off
    Fault,
}

impl HeatingStage {
    /// Numeric code used in telemetry lines
    pub const fn code(self) -> u8 {
        match self {
            HeatingStage::Off => 0,
            HeatingStage::Preheat => 1,
            HeatingStage::Soak => 2,
            HeatingStage::Ready => 3,
            HeatingStage::Fault => 4,
        }
    }
}

/// Reason the thermal loop entered [`HeatingStage::Fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ThermalFault {
    /// Thermistor open, shorted or implausible
    Thermistor,
    /// Above the absolute ceiling
    OverTemp,
    /// Not rising while heating below target
    Runaway,
    /// PID loop stopped executing
    PidWatchdog,
}

impl ThermalFault {
    /// Token used in fault lines
    pub const fn label(self) -> &'static str {
        match self {
            ThermalFault::Thermistor => "THERMISTOR",
            ThermalFault::OverTemp => "OVERTEMP",
            ThermalFault::Runaway => "RUNAWAY",
            ThermalFault::PidWatchdog => "PID_WATCHDOG",
        }
    }
}

/// Heater loop snapshot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TemperatureTelemetry {
    /// Measured (0.1°C)
    pub current_x10: i16,
    /// Requested (0.1°C)
    pub target_x10: i16,
    /// Ramped setpoint fed to the PID (0.1°C)
    pub setpoint_x10: i16,
    /// Estimated time to target (s)
    pub seconds_to_target: f32,
    /// Heater duty
    pub output_pwm: u8,
    /// Relay autotune running
    pub autotuning: bool,
    /// Latched fault, if any
    pub fault: Option<ThermalFault>,
    /// Heating stage
    pub stage: HeatingStage,
}

/// Thermal safety limits and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThermalConfig {
    /// Absolute ceiling; targets clamp to it and readings above it fault
    pub max_temp_x10: i16,
    /// Reached/stage band
    pub hysteresis_x10: i16,
    /// Lowest plausible reading
    pub min_valid_x10: i16,
    /// Highest plausible reading
    pub max_valid_x10: i16,
    /// Runaway window (ms)
    pub runaway_window_ms: u32,
    /// Minimum rise expected within the window
    pub runaway_min_rise_x10: i16,
    /// Maximum gap between PID executions (ms)
    pub watchdog_ms: u32,
    /// PID sample period (ms)
    pub sample_ms: u32,
    /// Motion below this with a target set is cold extrusion
    pub cold_extrusion_min_x10: i16,
    /// Telemetry line period, 0 disables (ms)
    pub log_interval_ms: u32,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            max_temp_x10: 2800,
            hysteresis_x10: 30,
            min_valid_x10: -100,
            max_valid_x10: 3200,
            runaway_window_ms: 40_000,
            runaway_min_rise_x10: 100,
            watchdog_ms: 2000,
            sample_ms: 100,
            cold_extrusion_min_x10: 1700,
            log_interval_ms: 0,
        }
    }
}

impl ThermalConfig {
    /// Validate a raw sensor result against the interlocks
    pub fn classify_reading(&self, reading: Result<i16, SensorError>) -> Result<i16, ThermalFault> {
        let temp = reading.map_err(|_| ThermalFault::Thermistor)?;
        if temp <= self.min_valid_x10 || temp >= self.max_valid_x10 {
            return Err(ThermalFault::Thermistor);
        }
        if temp > self.max_temp_x10 {
            return Err(ThermalFault::OverTemp);
        }
        Ok(temp)
    }

    /// Clamp a requested target to the ceiling; negatives mean off
    pub fn clamp_target(&self, target_x10: i16) -> i16 {
        target_x10.clamp(0, self.max_temp_x10)
    }
}
