//! Board-agnostic control core for the filament splicer
//!
//! This crate contains all application logic that does not depend on
//! specific hardware implementations:
//!
//! - Hardware abstraction traits (axis drivers, heater, sensors, storage)
//! - Quadrature encoder state shared with the edge interrupt
//! - Motor control layer (profiles, synchronized moves, homing)
//! - Thermal stage policy and material tables
//! - Cut, feed and splice phase sequencers
//! - Error handling and guided recovery
//! - Multi-segment recipe state machine
//!
//! Everything is driven by explicit `tick(now_ms)` calls from a single
//! cooperative loop. Nothing here blocks or sleeps.

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod log;

pub mod command;
pub mod config;
pub mod encoder;
pub mod machine;
pub mod motion;
pub mod report;
pub mod safety;
pub mod sequence;
pub mod state;
pub mod thermal;
pub mod tracking;
pub mod traits;

/// Milliseconds elapsed between two wrapping timestamps
#[inline]
pub(crate) fn elapsed_ms(now_ms: u32, since_ms: u32) -> u32 {
    now_ms.wrapping_sub(since_ms)
}
