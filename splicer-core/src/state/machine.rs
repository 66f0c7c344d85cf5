//! Recipe state graph

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::events::RecipeEvent;
use crate::motion::FeedInput;

/// Recipe states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecipeState {
    /// No recipe
    #[default]
    Idle,
    /// Segments arriving
    Loading,
    /// Recipe loaded, waiting for start
    Ready,
    FeedingA,
    FeedingB,
    /// Blade closing
    Cutting,
    /// Moving the cut end to the weld zone
    Positioning,
    /// Waiting for weld temperature
    Heating,
    /// Compressing and holding
    Welding,
    /// Fan on, heater off
    Cooling,
    /// Winding onto the output spool
    Spooling,
    /// Choosing the next segment
    NextSegment,
    /// All segments done
    Complete,
    /// Fault; only abort leaves
    Error,
}

/// Why a recipe operation was refused or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecipeError {
    /// Another recipe is running
    Busy,
    /// More segments than fit
    TooLarge,
    /// No segments
    Empty,
    /// Segment length not positive and finite
    InvalidSegment,
    /// Start without a loaded recipe
    NotReady,
    /// Pause outside an active run
    NotRunning,
    /// Resume without a pause
    NotPaused,
    /// Weld temperature not reached in time
    HeaterTimeout,
    /// Motion layer refused a command
    Motion,
}

impl RecipeError {
    pub fn label(self) -> &'static str {
        match self {
            RecipeError::Busy => "BUSY",
            RecipeError::TooLarge => "TOO_LARGE",
            RecipeError::Empty => "EMPTY",
            RecipeError::InvalidSegment => "INVALID_SEGMENT",
            RecipeError::NotReady => "NOT_READY",
            RecipeError::NotRunning => "NOT_RUNNING",
            RecipeError::NotPaused => "NOT_PAUSED",
            RecipeError::HeaterTimeout => "HEATER_TIMEOUT",
            RecipeError::Motion => "MOTION",
        }
    }
}

impl core::fmt::Display for RecipeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

impl RecipeState {
    pub fn name(self) -> &'static str {
        match self {
            RecipeState::Idle => "IDLE",
            RecipeState::Loading => "LOADING",
            RecipeState::Ready => "READY",
            RecipeState::FeedingA => "FEEDING_A",
            RecipeState::FeedingB => "FEEDING_B",
            RecipeState::Cutting => "CUTTING",
            RecipeState::Positioning => "POSITIONING",
            RecipeState::Heating => "HEATING",
            RecipeState::Welding => "WELDING",
            RecipeState::Cooling => "COOLING",
            RecipeState::Spooling => "SPOOLING",
            RecipeState::NextSegment => "NEXT_SEGMENT",
            RecipeState::Complete => "COMPLETE",
            RecipeState::Error => "ERROR",
        }
    }

    /// Feeding state for an input
    pub fn feeding(input: FeedInput) -> Self {
        match input {
            FeedInput::A => RecipeState::FeedingA,
            FeedInput::B => RecipeState::FeedingB,
        }
    }

    /// A segment is being processed
    pub fn is_busy(self) -> bool {
        !matches!(
            self,
            RecipeState::Idle | RecipeState::Ready | RecipeState::Complete | RecipeState::Error
        )
    }

    /// States a pause may interrupt
    pub fn is_pausable(self) -> bool {
        !matches!(
            self,
            RecipeState::Idle | RecipeState::Complete | RecipeState::Error
        )
    }

    /// Heater is expected on
    pub fn heater_allowed(self) -> bool {
        matches!(self, RecipeState::Heating | RecipeState::Welding)
    }

    /// Process an event and return the next state
    pub fn transition(self, event: RecipeEvent) -> Self {
        use RecipeEvent::*;
        use RecipeState::*;

        match (self, event) {
            // Abort always wins
            (_, Abort) => Idle,

            (Idle | Ready | Complete, BeginLoad) => Loading,
            (Loading, LoadComplete) => Ready,
            (Ready, Start(input)) => RecipeState::feeding(input),

            (FeedingA | FeedingB, FeedDone) => Cutting,
            (Cutting, CutDone) => Positioning,
            (Positioning, Positioned) => Heating,
            (Heating, TemperatureReached) => Welding,
            (Welding, WeldHeld) => Cooling,
            (Cooling, Cooled) => Spooling,
            (Spooling, Spooled) => NextSegment,
            (NextSegment, Advance(input)) => RecipeState::feeding(input),
            (NextSegment, RecipeFinished) => Complete,

            (state, Fault(_)) if state.is_busy() => Error,

            // Default: stay in current state
            _ => self,
        }
    }
}
