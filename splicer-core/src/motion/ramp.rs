//! Trapezoidal step ramp
//!
//! Generates step timing for one axis with linear acceleration and
//! deceleration. Speed is re-planned after every step from the remaining
//! distance, so targets can be changed while moving (including reversals,
//! which decelerate to the start speed before turning around).

use libm::sqrtf;

/// Current ramp phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RampState {
    /// No motion
    Stopped,
    /// Speeding up toward the cruise speed
    Accelerating,
    /// At the cruise speed
    Cruising,
    /// Slowing down for the target or a reversal
    Decelerating,
}

/// Step generator for one axis
#[derive(Debug, Clone)]
pub struct StepRamp {
    position: i32,
    target: i32,
    /// Speed magnitude (steps/s)
    speed: f32,
    /// Direction of the step in progress, 0 at rest
    direction: i8,
    max_speed: f32,
    acceleration: f32,
    last_step_us: u32,
    state: RampState,
}

impl StepRamp {
    /// Create a ramp at rest at position zero
    pub fn new(max_speed: f32, acceleration: f32) -> Self {
        Self {
            position: 0,
            target: 0,
            speed: 0.0,
            direction: 0,
            max_speed,
            acceleration,
            last_step_us: 0,
            state: RampState::Stopped,
        }
    }

    /// Set the cruise speed (steps/s)
    pub fn set_max_speed(&mut self, steps_per_s: f32) {
        self.max_speed = steps_per_s.max(1.0);
        if self.speed > self.max_speed {
            self.speed = self.max_speed;
        }
    }

    /// Cruise speed (steps/s)
    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    /// Set acceleration (steps/s²)
    pub fn set_acceleration(&mut self, steps_per_s2: f32) {
        self.acceleration = steps_per_s2.max(0.0);
    }

    /// Queue a relative move from the current target
    pub fn move_by(&mut self, steps: i32) {
        self.target = self.target.saturating_add(steps);
    }

    /// Move to an absolute step position
    pub fn move_to(&mut self, target: i32) {
        self.target = target;
    }

    /// Steps left to the target
    pub fn distance_to_go(&self) -> i32 {
        self.target.saturating_sub(self.position)
    }

    /// Current step position
    pub fn position(&self) -> i32 {
        self.position
    }

    /// Redefine the position; cancels motion
    pub fn set_position(&mut self, position: i32) {
        self.position = position;
        self.target = position;
        self.speed = 0.0;
        self.direction = 0;
        self.state = RampState::Stopped;
    }

    /// Current speed magnitude (steps/s)
    pub fn speed(&self) -> f32 {
        self.speed
    }

    /// Current ramp phase
    pub fn state(&self) -> RampState {
        self.state
    }

    /// True while moving or holding a pending target
    pub fn is_running(&self) -> bool {
        self.direction != 0 || self.distance_to_go() != 0
    }

    /// Steps needed to come to rest from the current speed
    pub fn stopping_distance(&self) -> i32 {
        if self.acceleration <= 0.0 {
            return 0;
        }
        (self.speed * self.speed / (2.0 * self.acceleration)) as i32
    }

    /// Decelerate to rest as quickly as the acceleration allows
    pub fn stop(&mut self) {
        if self.direction == 0 {
            self.target = self.position;
            return;
        }
        let steps = self.stopping_distance().max(1);
        self.target = self
            .position
            .saturating_add(steps.saturating_mul(self.direction as i32));
    }

    /// Emit a step if one is due
    ///
    /// Returns the direction (+1/-1) of the step taken. Call as often as
    /// possible; steps are spaced by the current speed.
    pub fn poll(&mut self, now_us: u32) -> Option<i8> {
        if self.direction == 0 {
            let remaining = self.distance_to_go();
            if remaining == 0 {
                self.state = RampState::Stopped;
                return None;
            }
            self.direction = if remaining > 0 { 1 } else { -1 };
            self.speed = self.start_speed();
            self.last_step_us = now_us;
            self.state = RampState::Accelerating;
            return Some(self.take_step());
        }

        let interval_us = (1_000_000.0 / self.speed) as u32;
        if now_us.wrapping_sub(self.last_step_us) < interval_us {
            return None;
        }
        self.last_step_us = now_us;
        Some(self.take_step())
    }

    fn start_speed(&self) -> f32 {
        if self.acceleration <= 0.0 {
            return self.max_speed;
        }
        sqrtf(2.0 * self.acceleration).min(self.max_speed)
    }

    fn take_step(&mut self) -> i8 {
        let dir = self.direction;
        self.position = self.position.wrapping_add(dir as i32);
        self.plan_next_speed();
        dir
    }

    fn plan_next_speed(&mut self) {
        let remaining = self.distance_to_go();
        let start = self.start_speed();

        if remaining == 0 {
            self.speed = 0.0;
            self.direction = 0;
            self.state = RampState::Stopped;
            return;
        }

        if self.acceleration <= 0.0 {
            self.speed = self.max_speed;
            self.direction = if remaining > 0 { 1 } else { -1 };
            self.state = RampState::Cruising;
            return;
        }

        let dv = self.acceleration / self.speed.max(start);
        let toward = (remaining > 0) == (self.direction > 0);

        if !toward {
            // Target is behind us: slow down, then turn around from rest
            self.speed -= dv;
            if self.speed <= start {
                self.speed = 0.0;
                self.direction = 0;
            }
            self.state = RampState::Decelerating;
        } else if remaining.unsigned_abs() as i32 <= self.stopping_distance() {
            self.speed = (self.speed - dv).max(start);
            self.state = RampState::Decelerating;
        } else if self.speed < self.max_speed {
            self.speed = (self.speed + dv).min(self.max_speed);
            self.state = RampState::Accelerating;
        } else {
            self.speed = self.max_speed;
            self.state = RampState::Cruising;
        }
    }
}
