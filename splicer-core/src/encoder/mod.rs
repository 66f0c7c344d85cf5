//! Filament encoder subsystem
//!
//! A quadrature wheel rides on the filament path. The edge interrupt
//! maintains a compact counter cell ([`EncoderIsr`]); once per control
//! tick [`EncoderSystem`] snapshots it and derives position, velocity,
//! slip against the commanded motor position, signal health, and an
//! optional small corrective move.

pub mod isr;
pub mod system;

pub use isr::{decode, EncoderIsr, IsrSnapshot};
pub use system::{
    CalibrationError, EncoderConfig, EncoderHealth, EncoderSystem, EncoderTelemetry,
};
