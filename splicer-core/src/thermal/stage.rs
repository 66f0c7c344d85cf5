//! Heating stage machine and ramped setpoint

use super::HeatingStage;
use crate::elapsed_ms;

/// Tracks PREHEAT → SOAK → READY progress
///
/// Transitions use the configured hysteresis band: reaching
/// `target - hysteresis` counts as at temperature, dropping below
/// `target - 2 * hysteresis` falls back to PREHEAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTracker {
    stage: HeatingStage,
    entered_ms: u32,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    /// Start in OFF
    pub const fn new() -> Self {
        Self {
            stage: HeatingStage::Off,
            entered_ms: 0,
        }
    }

    /// Current stage
    pub fn stage(&self) -> HeatingStage {
        self.stage
    }

    /// Time the current stage was entered
    pub fn entered_ms(&self) -> u32 {
        self.entered_ms
    }

    /// Force a stage
    pub fn enter(&mut self, stage: HeatingStage, now_ms: u32) {
        self.stage = stage;
        self.entered_ms = now_ms;
    }

    /// Advance on a new reading; returns the new stage on a change
    ///
    /// FAULT is absorbing here; only [`Self::enter`] leaves it.
    pub fn update(
        &mut self,
        current_x10: i16,
        target_x10: i16,
        hysteresis_x10: i16,
        soak_ms: u32,
        now_ms: u32,
    ) -> Option<HeatingStage> {
        let reached = current_x10 >= target_x10.saturating_sub(hysteresis_x10);
        let dropped = current_x10 < target_x10.saturating_sub(hysteresis_x10.saturating_mul(2));
        let next = match self.stage {
            HeatingStage::Off if target_x10 > 0 => HeatingStage::Preheat,
            HeatingStage::Preheat if reached => HeatingStage::Soak,
            HeatingStage::Soak | HeatingStage::Ready if dropped => HeatingStage::Preheat,
            HeatingStage::Soak
                if reached && elapsed_ms(now_ms, self.entered_ms) >= soak_ms =>
            {
                HeatingStage::Ready
            }
            _ => return None,
        };
        self.enter(next, now_ms);
        Some(next)
    }
}

/// Effective setpoint that climbs toward target at a bounded rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetpointRamp {
    baseline_x10: i16,
    started_ms: u32,
}

impl SetpointRamp {
    /// Restart the ramp from the current temperature
    pub fn restart(&mut self, current_x10: i16, now_ms: u32) {
        self.baseline_x10 = current_x10;
        self.started_ms = now_ms;
    }

    /// Setpoint at `now_ms`, never above `target_x10`
    pub fn setpoint(&self, target_x10: i16, rate_x10_per_s: i16, now_ms: u32) -> i16 {
        if self.baseline_x10 >= target_x10 || rate_x10_per_s <= 0 {
            return target_x10;
        }
        let elapsed = elapsed_ms(now_ms, self.started_ms) as i64;
        let ramped = self.baseline_x10 as i64 + rate_x10_per_s as i64 * elapsed / 1000;
        ramped.min(target_x10 as i64) as i16
    }
}
