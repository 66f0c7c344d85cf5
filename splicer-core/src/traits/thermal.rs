//! Thermal seam consumed by the sequencers and the safety layer

use crate::config::{Material, ThermalProfile};
use crate::report::ReportSink;
use crate::thermal::{HeatingStage, TemperatureTelemetry};

/// Heater loop as seen from outside the thermal subsystem
///
/// Temperatures are in 0.1°C units.
pub trait ThermalControl {
    /// Run one control step: read, check interlocks, advance the stage
    /// machine, compute and apply heater output
    fn update<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R);

    /// Request a weld temperature; zero switches the loop off
    fn set_target_x10(&mut self, target_x10: i16);

    /// Requested temperature
    fn target_x10(&self) -> i16;

    /// Last measured temperature
    fn current_x10(&self) -> i16;

    /// Current within hysteresis of target
    fn is_target_reached(&self) -> bool;

    /// Drive the heater directly (disables the PID loop)
    fn set_heater_power(&mut self, power: u8);

    /// Last heater duty written
    fn heater_power(&self) -> u8;

    /// Fan fully on or off
    fn set_cooling_fan(&mut self, on: bool);

    /// Fan duty
    fn set_cooling_fan_pwm(&mut self, pwm: u8);

    /// Last fan duty written
    fn cooling_fan_pwm(&self) -> u8;

    /// Motion must not start: cold with a non-zero target
    fn is_cold_extrusion_blocked(&self) -> bool;

    /// Heating stage
    fn stage(&self) -> HeatingStage;

    /// Select a material and adopt its splice temperature as target
    fn set_material(&mut self, material: Material);

    /// Profile of the selected material
    fn active_profile(&self) -> ThermalProfile;

    /// Replace the PID gains
    fn set_pid_gains(&mut self, kp: f32, ki: f32, kd: f32);

    /// Begin a relay autotune around `target_x10`
    fn start_autotune(&mut self, target_x10: i16) -> bool;

    /// Stop a running autotune and switch the heater off
    fn cancel_autotune(&mut self);

    /// Autotune in progress
    fn is_autotuning(&self) -> bool;

    /// Snapshot for status reporting
    fn telemetry(&self) -> TemperatureTelemetry;

    /// Period of the temperature log line, 0 disables (ms)
    fn set_log_interval(&mut self, interval_ms: u32);

    /// A safety interlock has tripped
    fn has_fault(&self) -> bool {
        self.stage() == HeatingStage::Fault
    }

    /// Heater off, PID disabled
    fn heater_off(&mut self) {
        self.set_target_x10(0);
        self.set_heater_power(0);
    }

    /// Estimated seconds until target at the profile ramp rate
    fn seconds_to_target(&self) -> f32 {
        let target = self.target_x10();
        let current = self.current_x10();
        if target <= 0 || current >= target {
            return 0.0;
        }
        let rate = self.active_profile().ramp_x10_per_s;
        if rate <= 0 {
            return 999.0;
        }
        (target - current) as f32 / rate as f32
    }
}
