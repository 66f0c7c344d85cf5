//! Motion seam consumed by the sequencers
//!
//! The motor control layer implements this; cut, feed, splice, recovery
//! and the recipe machine only ever talk to motors through it.

use crate::motion::{MotorAxis, MotorDiagnostics, MotorPosition};

/// Errors that can occur when commanding motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionError {
    /// The axis does not accept positional commands (CUTTER)
    NotPositional,
    /// A homing cycle owns the axis
    Busy,
    /// Requested value is outside the allowed set
    InvalidConfig,
    /// Driver has no stall detection
    Unsupported,
}

/// Millimetre-level motion interface
pub trait MotionControl {
    /// Queue a relative move
    fn move_relative(&mut self, axis: MotorAxis, distance_mm: f32) -> Result<(), MotionError>;

    /// Queue a move to an absolute position
    fn move_absolute(&mut self, axis: MotorAxis, position_mm: f32) -> Result<(), MotionError>;

    /// Start a move on all three positional axes at once
    ///
    /// The move stays "active" until every positional axis is idle.
    fn sync_move(&mut self, feed_a_mm: f32, feed_b_mm: f32, winder_mm: f32)
        -> Result<(), MotionError>;

    /// Override the cruise speed of an axis (clamped to its profile)
    fn set_speed_mm_s(&mut self, axis: MotorAxis, speed_mm_s: f32) -> Result<(), MotionError>;

    /// True when the axis has no pending motion
    fn is_idle(&self, axis: MotorAxis) -> bool;

    /// True while a synchronized move is still running
    fn is_sync_active(&self) -> bool;

    /// Absolute commanded position
    fn position(&self, axis: MotorAxis) -> MotorPosition;

    /// Latest diagnostics snapshot
    fn diagnostics(&self, axis: MotorAxis) -> MotorDiagnostics;

    /// Halt everything now and de-energize the drivers
    fn emergency_stop(&mut self);

    /// Close the blade
    fn activate_cutter(&mut self);

    /// Open the blade
    fn deactivate_cutter(&mut self);

    /// True when no positional axis is moving
    fn all_idle(&self) -> bool {
        MotorAxis::POSITIONAL.iter().all(|&axis| self.is_idle(axis))
    }

    /// True when any positional axis is moving
    fn any_moving(&self) -> bool {
        !self.all_idle()
    }
}
