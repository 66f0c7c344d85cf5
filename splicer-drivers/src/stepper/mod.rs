//! Stepper driver implementations

pub mod axis;
pub mod tmc2209;

pub use axis::StepDirAxis;
pub use tmc2209::{DrvStatus, Tmc2209Config, Tmc2209Error, Tmc2209Uart};
