//! Hardware driver implementations
//!
//! This crate provides concrete implementations of the traits defined
//! in splicer-core for the splicer's hardware:
//!
//! - Weld heater loop (Q16.16 PID, relay autotune, stage and interlocks)
//! - Heater and fan outputs over `embedded-hal` PWM
//! - NTC thermistor and filament/force sensor inputs
//! - Step/dir axes with TMC2209 UART configuration
//! - Servo blade actuator

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod log;

pub mod actuator;
pub mod heater;
pub mod sensor;
pub mod stepper;
pub mod thermal;

pub use thermal::ThermalController;
