//! Digital and analog inputs consumed by the sequencers

use crate::motion::FeedInput;

/// Process sensors that are not part of the motion or thermal path
pub trait SensorBank {
    /// True while filament is present at the given input
    fn filament_present(&mut self, input: FeedInput) -> bool;

    /// Raw cutter force reading (ADC counts)
    fn cutter_force(&mut self) -> u16;
}
