//! Stepper axis driver trait
//!
//! This trait abstracts over a step/dir pulse generator with trapezoidal
//! ramping plus the smart-driver extras (current, microstepping, stall
//! detection) a TMC-class driver offers over UART.

use crate::motion::MotorDiagnostics;

/// Trait for one positional stepper axis
///
/// Positions are in driver steps and are deliberately 32-bit; the motor
/// control layer folds large positions into a 64-bit offset before they
/// can overflow.
pub trait AxisDriver {
    /// Energize or release the driver
    fn enable(&mut self, enabled: bool);

    /// Set the cruise speed in steps per second
    fn set_max_speed(&mut self, steps_per_s: f32);

    /// Current cruise speed in steps per second
    fn max_speed(&self) -> f32;

    /// Set acceleration in steps per second squared
    fn set_acceleration(&mut self, steps_per_s2: f32);

    /// Queue a move relative to the current target
    fn move_by(&mut self, steps: i32);

    /// Position reached by the pulse generator
    fn current_position(&self) -> i32;

    /// Redefine the current position; also cancels any pending motion
    fn set_current_position(&mut self, steps: i32);

    /// Steps remaining to the target
    fn distance_to_go(&self) -> i32;

    /// Decelerate to a stop at the configured acceleration
    fn stop(&mut self);

    /// Advance the pulse generator; call every loop iteration
    fn run(&mut self, now_us: u32);

    /// Set motor RMS current
    fn set_current_ma(&mut self, milliamps: u16);

    /// Set microstep resolution
    fn set_microsteps(&mut self, microsteps: u16);

    /// Arm stall detection with the given threshold, or disarm with `None`
    fn set_stall_guard(&mut self, threshold: Option<u8>);

    /// Driver reported a stall
    fn stall_detected(&mut self) -> bool;

    /// Driver reported an over-temperature pre-warning
    fn over_temp_warning(&mut self) -> bool;

    /// True while a move is pending
    fn is_running(&self) -> bool {
        self.distance_to_go() != 0
    }

    /// Fill the driver-reported fields of a diagnostics snapshot
    fn read_diagnostics(&mut self, diag: &mut MotorDiagnostics) {
        diag.stall_detected = self.stall_detected();
        diag.over_temp_warning = self.over_temp_warning();
    }
}

/// Blade actuator (servo or stepper cam)
pub trait CutterActuator {
    /// Drive the blade closed
    fn activate(&mut self);

    /// Return the blade to its open position
    fn deactivate(&mut self);

    /// True while the blade is commanded closed
    fn is_active(&self) -> bool;
}
