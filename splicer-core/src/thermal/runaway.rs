//! Thermal runaway detection

use crate::elapsed_ms;

/// Detects a heater that is on but not heating
///
/// While below `target - hysteresis` the temperature must rise at
/// least `min_rise` within each window. The window restarts whenever
/// that rise is achieved or the target band is reached, so the guard
/// never fires at or above target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunawayGuard {
    baseline_x10: i16,
    since_ms: u32,
}

impl RunawayGuard {
    /// Restart the window from the current temperature
    pub fn arm(&mut self, current_x10: i16, now_ms: u32) {
        self.baseline_x10 = current_x10;
        self.since_ms = now_ms;
    }

    /// Returns true when the heater has failed to raise the temperature
    pub fn check(
        &mut self,
        current_x10: i16,
        target_x10: i16,
        hysteresis_x10: i16,
        min_rise_x10: i16,
        window_ms: u32,
        now_ms: u32,
    ) -> bool {
        if current_x10 >= target_x10.saturating_sub(hysteresis_x10) {
            self.arm(current_x10, now_ms);
            return false;
        }
        if current_x10.saturating_sub(self.baseline_x10) >= min_rise_x10 {
            self.arm(current_x10, now_ms);
            return false;
        }
        elapsed_ms(now_ms, self.since_ms) >= window_ms
    }
}
