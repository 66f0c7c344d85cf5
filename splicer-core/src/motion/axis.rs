//! Axis identifiers and per-axis value types

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Driven axes of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MotorAxis {
    /// Input A feed extruder
    FeedA,
    /// Input B feed extruder
    FeedB,
    /// Output spool winder
    Winder,
    /// Blade actuator; not positional
    Cutter,
}

impl MotorAxis {
    /// Axes that carry a step position
    pub const POSITIONAL: [MotorAxis; 3] = [MotorAxis::FeedA, MotorAxis::FeedB, MotorAxis::Winder];

    /// Index into per-axis arrays, `None` for the cutter
    pub fn index(self) -> Option<usize> {
        match self {
            MotorAxis::FeedA => Some(0),
            MotorAxis::FeedB => Some(1),
            MotorAxis::Winder => Some(2),
            MotorAxis::Cutter => None,
        }
    }

    /// Short label used in status lines
    pub fn label(self) -> &'static str {
        match self {
            MotorAxis::FeedA => "A",
            MotorAxis::FeedB => "B",
            MotorAxis::Winder => "W",
            MotorAxis::Cutter => "C",
        }
    }
}

/// One of the two filament inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FeedInput {
    /// Input A
    A,
    /// Input B
    B,
}

impl FeedInput {
    /// The axis feeding this input
    pub fn axis(self) -> MotorAxis {
        match self {
            FeedInput::A => MotorAxis::FeedA,
            FeedInput::B => MotorAxis::FeedB,
        }
    }

    /// Input for a segment color index (0 = A, anything else = B)
    pub fn from_color(color_index: u8) -> Self {
        if color_index == 0 {
            FeedInput::A
        } else {
            FeedInput::B
        }
    }

    /// Status line label
    pub fn label(self) -> &'static str {
        match self {
            FeedInput::A => "A",
            FeedInput::B => "B",
        }
    }
}

/// Per-axis speed limits
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MotionProfile {
    /// Cruise speed (steps/s)
    pub max_speed: f32,
    /// Acceleration (steps/s²)
    pub acceleration: f32,
    /// Jerk limit (steps/s²); caps the effective acceleration when > 0
    pub jerk_limit: f32,
}

impl MotionProfile {
    /// Acceleration actually applied to the driver
    pub fn effective_acceleration(&self) -> f32 {
        if self.jerk_limit > 0.0 {
            self.acceleration.min(self.jerk_limit)
        } else {
            self.acceleration
        }
    }
}

/// Absolute commanded position of an axis
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorPosition {
    /// Signed step count including the renormalization offset
    pub steps: i64,
    /// Same position in millimetres
    pub mm: f32,
}

/// Health snapshot of one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MotorDiagnostics {
    /// Driver reported a stall
    pub stall_detected: bool,
    /// Driver over-temperature pre-warning
    pub over_temp_warning: bool,
    /// A synchronized move was active at the time of the snapshot
    pub sync_move_active: bool,
    /// Steps requested so far
    pub commanded_steps: i64,
    /// Steps reached so far
    pub observed_steps: i64,
    /// |commanded − observed|
    pub missed_step_estimate: i64,
}
