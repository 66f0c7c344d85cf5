//! Blade actuators

pub mod servo;

pub use servo::{ServoConfig, ServoCutter};
