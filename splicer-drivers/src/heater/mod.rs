//! Heater loop building blocks

pub mod autotune;
pub mod fixed;
pub mod output;
pub mod pid;

pub use autotune::{AutotuneConfig, AutotuneError, AutotuneState, RelayAutotune};
pub use fixed::Fixed32;
pub use output::{GpioFan, PwmFan, PwmHeater};
pub use pid::{Pid, PidConfig, PidGains};
