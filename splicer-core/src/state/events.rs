//! Events that trigger recipe state transitions

use super::machine::RecipeError;
use crate::motion::FeedInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecipeEvent {
    // Loading
    /// Segment upload started
    BeginLoad,
    /// Segment upload finished and validated
    LoadComplete,

    // Execution control
    /// Run the loaded recipe, first segment on this input
    Start(FeedInput),
    /// Stop everything and return to idle
    Abort,

    // Per-segment progress
    /// Feed axis reached its target
    FeedDone,
    /// Blade actuation time elapsed
    CutDone,
    /// Reposition time elapsed
    Positioned,
    /// Heater reached weld temperature
    TemperatureReached,
    /// Weld hold time elapsed
    WeldHeld,
    /// Joint cooled (by temperature or time)
    Cooled,
    /// Winder finished
    Spooled,
    /// Advance to the next segment on this input
    Advance(FeedInput),
    /// Last segment done
    RecipeFinished,

    // Faults
    Fault(RecipeError),
}

impl RecipeEvent {
    /// Raised by an operator command rather than by sequencing
    pub fn is_user_event(&self) -> bool {
        matches!(
            self,
            RecipeEvent::BeginLoad
                | RecipeEvent::LoadComplete
                | RecipeEvent::Start(_)
                | RecipeEvent::Abort
        )
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, RecipeEvent::Fault(_))
    }
}
