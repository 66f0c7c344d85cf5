//! Non-blocking sensorless homing
//!
//! The axis seeks toward its limit at reduced speed with stall detection
//! armed. A stall zeroes the axis; reaching the travel limit or the
//! timeout without one fails the cycle.

use super::MotorAxis;
use crate::elapsed_ms;

/// Stall threshold armed during homing
pub const HOMING_STALL_THRESHOLD: u8 = 8;

/// Homing gives up after this long
pub const HOMING_TIMEOUT_MS: u32 = 12_000;

/// Slowest seek speed (steps/s)
pub const HOMING_MIN_SPEED: f32 = 100.0;

/// Outcome of the most recent homing request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HomingStatus {
    /// No homing requested since boot
    Idle,
    /// Seeking toward the limit
    Seeking(MotorAxis),
    /// Stall found, position zeroed
    Homed(MotorAxis),
    /// Travel or time exhausted without a stall
    Failed(MotorAxis),
}

/// What the motor layer should do after polling the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HomingStep {
    /// Keep seeking
    Continue,
    /// Stall seen: zero the axis
    Stalled,
    /// Give up
    Exhausted,
}

/// One in-flight homing cycle
#[derive(Debug, Clone, Copy)]
pub(crate) struct HomingCycle {
    pub axis: MotorAxis,
    started_ms: u32,
}

impl HomingCycle {
    pub fn new(axis: MotorAxis, now_ms: u32) -> Self {
        Self {
            axis,
            started_ms: now_ms,
        }
    }

    /// Decide the next step from the driver's view of the axis
    pub fn poll(&self, now_ms: u32, stalled: bool, distance_to_go: i32) -> HomingStep {
        if stalled {
            HomingStep::Stalled
        } else if distance_to_go == 0 || elapsed_ms(now_ms, self.started_ms) >= HOMING_TIMEOUT_MS {
            HomingStep::Exhausted
        } else {
            HomingStep::Continue
        }
    }
}
