//! Configuration types and persisted records
//!
//! Material tables are compile-time constants keyed by [`Material`];
//! persisted records carry a signature and an XOR checksum and fall back
//! to defaults when either fails.

pub mod materials;
pub mod persist;

pub use materials::{Material, SpliceProfile, ThermalProfile};
pub use persist::{CalibrationRecord, CutterStatsRecord, Persistence, Record, RecordError};
