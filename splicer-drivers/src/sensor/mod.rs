//! Sensor implementations

pub mod filament;
pub mod ntc;

pub use filament::FilamentSensors;
pub use ntc::{AdcReader, NtcConfig, NtcThermistor};
