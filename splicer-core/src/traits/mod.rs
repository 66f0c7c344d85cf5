//! Hardware abstraction traits
//!
//! These traits define the interface between the control logic and
//! hardware-specific implementations, plus the subsystem seams the
//! sequencers consume (so each sequencer can be driven by a mock).

pub mod heater;
pub mod io;
pub mod motion;
pub mod stepper;
pub mod storage;
pub mod thermal;

pub use heater::{FanOutput, HeaterOutput, SensorError, TemperatureSensor};
pub use io::SensorBank;
pub use motion::{MotionControl, MotionError};
pub use stepper::{AxisDriver, CutterActuator};
pub use storage::{RecordStore, StorageError, StorageKey};
pub use thermal::ThermalControl;
