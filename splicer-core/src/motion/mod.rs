//! Motor control layer
//!
//! Converts millimetre requests into step commands for the two feed axes
//! and the winder, drives the cutter actuator, and keeps per-axis
//! diagnostics.

pub mod axis;
pub mod control;
pub mod homing;
pub mod ramp;

pub use axis::{FeedInput, MotionProfile, MotorAxis, MotorDiagnostics, MotorPosition};
pub use control::{MotorConfig, MotorControl, POSITION_NORMALIZE_THRESHOLD};
pub use homing::HomingStatus;
pub use ramp::{RampState, StepRamp};
