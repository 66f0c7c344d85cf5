//! Recipe execution
//!
//! Each segment runs FEEDING -> CUTTING -> POSITIONING -> HEATING ->
//! WELDING -> COOLING -> SPOOLING -> NEXT_SEGMENT. Phase actions are
//! issued on the first tick of a state and the state then waits on
//! elapsed time, temperature or axis idleness.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::events::RecipeEvent;
use super::machine::{RecipeError, RecipeState};
use crate::elapsed_ms;
use crate::motion::{FeedInput, MotorAxis};
use crate::report::{ReportSink, StatusLine};
use crate::safety::{error::truncate_message, ErrorMessage};
use crate::traits::{MotionControl, ThermalControl};

/// Longest recipe accepted
pub const MAX_SEGMENTS: usize = 500;

/// One length of a single filament
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    pub input: FeedInput,
    pub length_mm: f32,
}

impl Segment {
    pub fn new(input: FeedInput, length_mm: f32) -> Self {
        Self { input, length_mm }
    }

    /// Segment from a slicer color index (0 is input A)
    pub fn from_color(color_index: u8, length_mm: f32) -> Self {
        Self::new(FeedInput::from_color(color_index), length_mm)
    }

    fn is_valid(&self) -> bool {
        self.length_mm.is_finite() && self.length_mm > 0.0
    }
}

pub type Recipe = heapless::Vec<Segment, MAX_SEGMENTS>;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecipeConfig {
    /// Blade actuation time (ms)
    pub cut_ms: u32,
    /// Reposition time (ms)
    pub position_ms: u32,
    /// Both feeds advance this far into the weld zone (mm)
    pub position_advance_mm: f32,
    /// Weld temperature (°C×10)
    pub weld_temp_x10: i16,
    /// Weld temperature counts as reached this far below target (°C×10)
    pub hysteresis_x10: i16,
    /// Longest wait for weld temperature (ms)
    pub heater_timeout_ms: u32,
    pub compression_mm: f32,
    pub hold_ms: u32,
    /// Cooling ends at or below this (°C×10)
    pub cooling_target_x10: i16,
    /// Cooling ends after this regardless of temperature (ms)
    pub cooling_ms: u32,
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            cut_ms: 500,
            position_ms: 1000,
            position_advance_mm: 5.0,
            weld_temp_x10: 2100,
            hysteresis_x10: 30,
            heater_timeout_ms: 120_000,
            compression_mm: 2.0,
            hold_ms: 3000,
            cooling_target_x10: 500,
            cooling_ms: 5000,
        }
    }
}

pub struct RecipeMachine {
    config: RecipeConfig,
    state: RecipeState,
    state_started_ms: u32,
    /// Phase action already issued in this state
    issued: bool,
    /// Absolute target of the feed or winder move in flight (mm)
    move_target_mm: Option<f32>,
    paused: Option<RecipeState>,
    recipe: Recipe,
    current: u16,
    error: ErrorMessage,
}

impl RecipeMachine {
    pub fn new(config: RecipeConfig) -> Self {
        Self {
            config,
            state: RecipeState::Idle,
            state_started_ms: 0,
            issued: false,
            move_target_mm: None,
            paused: None,
            recipe: Recipe::new(),
            current: 0,
            error: ErrorMessage::new(),
        }
    }

    /// Open a segment upload, discarding any previous recipe
    pub fn begin_load<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) -> Result<(), RecipeError> {
        if !matches!(
            self.state,
            RecipeState::Idle | RecipeState::Ready | RecipeState::Complete
        ) {
            return Err(RecipeError::Busy);
        }
        self.recipe.clear();
        self.current = 0;
        self.apply(RecipeEvent::BeginLoad, now_ms, sink);
        Ok(())
    }

    /// Append one segment to the upload
    pub fn push_segment(&mut self, segment: Segment) -> Result<(), RecipeError> {
        if self.state != RecipeState::Loading {
            return Err(RecipeError::NotReady);
        }
        if !segment.is_valid() {
            return Err(RecipeError::InvalidSegment);
        }
        self.recipe.push(segment).map_err(|_| RecipeError::TooLarge)
    }

    /// Close the upload; an empty upload returns to IDLE
    pub fn finish_load<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) -> Result<(), RecipeError> {
        if self.state != RecipeState::Loading {
            return Err(RecipeError::NotReady);
        }
        if self.recipe.is_empty() {
            self.apply(RecipeEvent::Abort, now_ms, sink);
            return Err(RecipeError::Empty);
        }
        info!("recipe loaded: {} segments", self.recipe.len());
        self.apply(RecipeEvent::LoadComplete, now_ms, sink);
        Ok(())
    }

    /// Load a whole recipe at once
    ///
    /// Validates everything before touching the current recipe.
    pub fn load<R: ReportSink>(
        &mut self,
        segments: &[Segment],
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), RecipeError> {
        if segments.len() > MAX_SEGMENTS {
            return Err(RecipeError::TooLarge);
        }
        if segments.is_empty() {
            return Err(RecipeError::Empty);
        }
        if !segments.iter().all(Segment::is_valid) {
            return Err(RecipeError::InvalidSegment);
        }
        self.begin_load(now_ms, sink)?;
        for segment in segments {
            self.push_segment(*segment)?;
        }
        self.finish_load(now_ms, sink)
    }

    pub fn start<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) -> Result<(), RecipeError> {
        if self.state != RecipeState::Ready {
            return Err(RecipeError::NotReady);
        }
        let first = self.recipe.first().ok_or(RecipeError::Empty)?;
        self.current = 0;
        self.error.clear();
        let input = first.input;
        self.apply(RecipeEvent::Start(input), now_ms, sink);
        Ok(())
    }

    /// Stop motors and heater, remembering where to resume
    pub fn pause<M, T>(&mut self, motion: &mut M, thermal: &mut T) -> Result<(), RecipeError>
    where
        M: MotionControl,
        T: ThermalControl,
    {
        if !self.state.is_pausable() || self.paused.is_some() {
            return Err(RecipeError::NotRunning);
        }
        motion.emergency_stop();
        thermal.heater_off();
        self.paused = Some(self.state);
        info!("recipe paused in {}", self.state.name());
        Ok(())
    }

    /// Re-enter the interrupted state
    ///
    /// Feed and spool moves resume toward their original absolute
    /// targets; time-gated phases restart their timers.
    pub fn resume<T: ThermalControl>(&mut self, thermal: &mut T, now_ms: u32) -> Result<(), RecipeError> {
        let state = self.paused.take().ok_or(RecipeError::NotPaused)?;
        self.state = state;
        self.state_started_ms = now_ms;
        match state {
            RecipeState::FeedingA
            | RecipeState::FeedingB
            | RecipeState::Spooling
            | RecipeState::Cutting
            | RecipeState::Heating => self.issued = false,
            RecipeState::Welding => thermal.set_target_x10(self.config.weld_temp_x10),
            _ => {}
        }
        info!("recipe resumed in {}", state.name());
        Ok(())
    }

    /// Stop everything and return to IDLE, keeping the fan on
    pub fn abort<M, T, R>(&mut self, motion: &mut M, thermal: &mut T, now_ms: u32, sink: &mut R)
    where
        M: MotionControl,
        T: ThermalControl,
        R: ReportSink,
    {
        motion.emergency_stop();
        thermal.heater_off();
        thermal.set_cooling_fan(true);
        self.paused = None;
        self.apply(RecipeEvent::Abort, now_ms, sink);
        warn!("recipe aborted");
    }

    pub fn tick<M, T, R>(&mut self, now_ms: u32, motion: &mut M, thermal: &mut T, sink: &mut R)
    where
        M: MotionControl,
        T: ThermalControl,
        R: ReportSink,
    {
        if self.paused.is_some() {
            return;
        }
        let elapsed = elapsed_ms(now_ms, self.state_started_ms);

        match self.state {
            RecipeState::Idle | RecipeState::Loading | RecipeState::Ready | RecipeState::Complete => {}
            RecipeState::FeedingA | RecipeState::FeedingB => {
                let input = if self.state == RecipeState::FeedingA {
                    FeedInput::A
                } else {
                    FeedInput::B
                };
                let length = self.segment().map(|s| s.length_mm).unwrap_or(0.0);
                self.run_move(input.axis(), length, RecipeEvent::FeedDone, now_ms, motion, thermal, sink);
            }
            RecipeState::Cutting => {
                if !self.issued {
                    motion.activate_cutter();
                    self.issued = true;
                }
                if elapsed > self.config.cut_ms {
                    motion.deactivate_cutter();
                    self.apply(RecipeEvent::CutDone, now_ms, sink);
                }
            }
            RecipeState::Positioning => {
                if !self.issued {
                    let advance = self.config.position_advance_mm;
                    if motion.sync_move(advance, advance, 0.0).is_err() {
                        self.fail(RecipeError::Motion, now_ms, motion, thermal, sink);
                        return;
                    }
                    self.issued = true;
                }
                if elapsed > self.config.position_ms {
                    self.apply(RecipeEvent::Positioned, now_ms, sink);
                }
            }
            RecipeState::Heating => {
                if !self.issued {
                    thermal.set_target_x10(self.config.weld_temp_x10);
                    self.issued = true;
                }
                if elapsed > self.config.heater_timeout_ms {
                    self.fail(RecipeError::HeaterTimeout, now_ms, motion, thermal, sink);
                } else if thermal.current_x10() >= self.config.weld_temp_x10 - self.config.hysteresis_x10 {
                    self.apply(RecipeEvent::TemperatureReached, now_ms, sink);
                }
            }
            RecipeState::Welding => {
                if !self.issued {
                    let squeeze = self.config.compression_mm;
                    if motion.sync_move(squeeze, -squeeze, 0.0).is_err() {
                        self.fail(RecipeError::Motion, now_ms, motion, thermal, sink);
                        return;
                    }
                    self.issued = true;
                }
                if elapsed >= self.config.hold_ms {
                    self.apply(RecipeEvent::WeldHeld, now_ms, sink);
                }
            }
            RecipeState::Cooling => {
                if !self.issued {
                    thermal.heater_off();
                    thermal.set_cooling_fan(true);
                    self.issued = true;
                }
                let cold = thermal.current_x10() <= self.config.cooling_target_x10;
                if cold || elapsed >= self.config.cooling_ms {
                    thermal.set_cooling_fan(false);
                    self.apply(RecipeEvent::Cooled, now_ms, sink);
                }
            }
            RecipeState::Spooling => {
                let length = self.segment().map(|s| s.length_mm).unwrap_or(0.0);
                self.run_move(MotorAxis::Winder, length, RecipeEvent::Spooled, now_ms, motion, thermal, sink);
            }
            RecipeState::NextSegment => {
                self.current = self.current.saturating_add(1);
                let total = self.recipe.len() as u16;
                sink.emit(StatusLine::Progress {
                    current: self.current,
                    total,
                });
                match self.segment() {
                    Some(next) => {
                        let input = next.input;
                        self.apply(RecipeEvent::Advance(input), now_ms, sink);
                    }
                    None => {
                        self.apply(RecipeEvent::RecipeFinished, now_ms, sink);
                        info!("recipe complete");
                        sink.emit(StatusLine::RecipeDone);
                    }
                }
            }
            RecipeState::Error => thermal.set_cooling_fan(true),
        }
    }

    pub fn state(&self) -> RecipeState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// (1-based segment in progress, total)
    pub fn progress(&self) -> (u16, u16) {
        let total = self.recipe.len() as u16;
        ((self.current + 1).min(total), total)
    }

    pub fn recipe(&self) -> &[Segment] {
        &self.recipe
    }

    /// Reason for the last ERROR entry
    pub fn error_message(&self) -> &str {
        self.error.as_str()
    }

    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RecipeConfig) {
        self.config = config;
    }

    fn segment(&self) -> Option<&Segment> {
        self.recipe.get(self.current as usize)
    }

    /// Issue a relative move once, then wait for the axis to go idle
    #[allow(clippy::too_many_arguments)]
    fn run_move<M, T, R>(
        &mut self,
        axis: MotorAxis,
        length_mm: f32,
        done: RecipeEvent,
        now_ms: u32,
        motion: &mut M,
        thermal: &mut T,
        sink: &mut R,
    ) where
        M: MotionControl,
        T: ThermalControl,
        R: ReportSink,
    {
        if !self.issued {
            let target = match self.move_target_mm {
                Some(target) => target,
                None => motion.position(axis).mm + length_mm,
            };
            if motion.move_absolute(axis, target).is_err() {
                self.fail(RecipeError::Motion, now_ms, motion, thermal, sink);
                return;
            }
            debug!("recipe move {} to {} mm", axis.label(), target);
            self.move_target_mm = Some(target);
            self.issued = true;
            return;
        }
        if motion.is_idle(axis) {
            self.apply(done, now_ms, sink);
        }
    }

    fn fail<M, T, R>(&mut self, reason: RecipeError, now_ms: u32, motion: &mut M, thermal: &mut T, sink: &mut R)
    where
        M: MotionControl,
        T: ThermalControl,
        R: ReportSink,
    {
        motion.emergency_stop();
        thermal.heater_off();
        thermal.set_cooling_fan(true);
        self.error = truncate_message(reason.label());
        error!("recipe error: {}", reason.label());
        self.apply(RecipeEvent::Fault(reason), now_ms, sink);
        sink.emit(StatusLine::RecipeError(reason));
    }

    fn apply<R: ReportSink>(&mut self, event: RecipeEvent, now_ms: u32, sink: &mut R) {
        let next = self.state.transition(event);
        if next == self.state {
            return;
        }
        debug!("recipe {} -> {}", self.state.name(), next.name());
        sink.emit(StatusLine::StateChange {
            from: self.state,
            to: next,
        });
        self.state = next;
        self.state_started_ms = now_ms;
        self.issued = false;
        self.move_target_mm = None;
    }
}

impl Default for RecipeMachine {
    fn default() -> Self {
        Self::new(RecipeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::control::tests::{motors, Motors};
    use crate::report::NullSink;
    use crate::thermal::tests::MockThermal;

    struct Rig {
        recipe: RecipeMachine,
        motors: Motors,
        thermal: MockThermal,
        out: heapless::Vec<StatusLine, 64>,
        now: u32,
    }

    impl Rig {
        fn loaded(segments: &[Segment]) -> Self {
            let mut recipe = RecipeMachine::default();
            recipe.load(segments, 0, &mut NullSink).unwrap();
            Self {
                recipe,
                motors: motors(),
                thermal: MockThermal::default(),
                out: heapless::Vec::new(),
                now: 0,
            }
        }

        /// Advance time, completing any queued motion
        fn step(&mut self, ms: u32) {
            self.now += ms;
            self.motors.run(self.now.wrapping_mul(1000));
            self.recipe
                .tick(self.now, &mut self.motors, &mut self.thermal, &mut self.out);
        }

        fn run_until(&mut self, state: RecipeState, limit: u32) {
            for _ in 0..limit {
                if self.recipe.state() == state {
                    return;
                }
                self.step(100);
            }
        }
    }

    #[test]
    fn test_load_rejects_bad_input() {
        let mut r = RecipeMachine::default();
        assert_eq!(r.load(&[], 0, &mut NullSink), Err(RecipeError::Empty));
        assert_eq!(
            r.load(&[Segment::new(FeedInput::A, -1.0)], 0, &mut NullSink),
            Err(RecipeError::InvalidSegment)
        );
        let big = [Segment::new(FeedInput::A, 1.0); MAX_SEGMENTS + 1];
        assert_eq!(r.load(&big, 0, &mut NullSink), Err(RecipeError::TooLarge));
        assert_eq!(r.state(), RecipeState::Idle);
    }

    #[test]
    fn test_incremental_load() {
        let mut r = RecipeMachine::default();
        let mut out: heapless::Vec<StatusLine, 4> = heapless::Vec::new();
        assert_eq!(
            r.push_segment(Segment::from_color(0, 10.0)),
            Err(RecipeError::NotReady)
        );
        r.begin_load(0, &mut out).unwrap();
        r.push_segment(Segment::from_color(1, 10.0)).unwrap();
        r.finish_load(0, &mut out).unwrap();
        assert_eq!(r.state(), RecipeState::Ready);
        assert_eq!(r.recipe()[0].input, FeedInput::B);
        assert_eq!(
            out[0],
            StatusLine::StateChange {
                from: RecipeState::Idle,
                to: RecipeState::Loading
            }
        );
    }

    #[test]
    fn test_empty_upload_returns_idle() {
        let mut r = RecipeMachine::default();
        r.begin_load(0, &mut NullSink).unwrap();
        assert_eq!(r.finish_load(0, &mut NullSink), Err(RecipeError::Empty));
        assert_eq!(r.state(), RecipeState::Idle);
    }

    #[test]
    fn test_start_requires_ready() {
        let mut r = RecipeMachine::default();
        assert_eq!(r.start(0, &mut NullSink), Err(RecipeError::NotReady));
    }

    #[test]
    fn test_full_segment_cycle() {
        let mut rig = Rig::loaded(&[Segment::new(FeedInput::B, 10.0)]);
        rig.recipe.start(0, &mut rig.out).unwrap();
        assert_eq!(rig.recipe.state(), RecipeState::FeedingB);
        assert!(rig.recipe.is_busy());

        // first tick issues the feed, the next sees it complete
        rig.step(10);
        assert_eq!(rig.recipe.state(), RecipeState::FeedingB);
        rig.step(10);
        assert_eq!(rig.recipe.state(), RecipeState::Cutting);
        assert!(rig.motors.position(MotorAxis::FeedB).mm > 9.9);

        rig.step(10);
        assert!(rig.motors.cutter().active);
        rig.step(500);
        assert_eq!(rig.recipe.state(), RecipeState::Positioning);
        assert!(!rig.motors.cutter().active);

        rig.run_until(RecipeState::Heating, 20);
        rig.step(10);
        assert_eq!(rig.thermal.target_x10, 2100);
        rig.thermal.current_x10 = 2075;
        rig.step(10);
        assert_eq!(rig.recipe.state(), RecipeState::Welding);

        rig.run_until(RecipeState::Cooling, 40);
        rig.step(10);
        assert_eq!(rig.thermal.target_x10, 0);
        assert_eq!(rig.thermal.fan, 255);
        rig.thermal.current_x10 = 450;
        rig.step(10);
        assert_eq!(rig.recipe.state(), RecipeState::Spooling);
        assert_eq!(rig.thermal.fan, 0);

        rig.run_until(RecipeState::Complete, 20);
        assert_eq!(rig.recipe.state(), RecipeState::Complete);
        assert!(rig.motors.position(MotorAxis::Winder).mm > 9.9);
        assert!(rig.out.contains(&StatusLine::Progress { current: 1, total: 1 }));
        assert_eq!(rig.out.last(), Some(&StatusLine::RecipeDone));
        assert_eq!(rig.recipe.progress(), (1, 1));
        assert!(!rig.recipe.is_busy());
    }

    #[test]
    fn test_segments_alternate_inputs() {
        let mut rig = Rig::loaded(&[
            Segment::new(FeedInput::A, 5.0),
            Segment::new(FeedInput::B, 5.0),
        ]);
        rig.thermal.current_x10 = 2100;
        rig.recipe.start(0, &mut rig.out).unwrap();
        assert_eq!(rig.recipe.state(), RecipeState::FeedingA);
        rig.run_until(RecipeState::FeedingB, 200);
        assert_eq!(rig.recipe.state(), RecipeState::FeedingB);
        assert_eq!(rig.recipe.progress(), (2, 2));
    }

    #[test]
    fn test_heater_timeout() {
        let mut rig = Rig::loaded(&[Segment::new(FeedInput::A, 5.0)]);
        rig.recipe.start(0, &mut rig.out).unwrap();
        rig.run_until(RecipeState::Heating, 50);
        assert_eq!(rig.recipe.state(), RecipeState::Heating);
        rig.thermal.current_x10 = 1500;
        rig.step(120_000);
        assert_eq!(rig.recipe.state(), RecipeState::Heating);
        rig.step(10);
        assert_eq!(rig.recipe.state(), RecipeState::Error);
        assert_eq!(rig.recipe.error_message(), "HEATER_TIMEOUT");
        assert_eq!(rig.thermal.target_x10, 0);
        assert_eq!(rig.thermal.fan, 255);
        assert_eq!(
            rig.out.last(),
            Some(&StatusLine::RecipeError(RecipeError::HeaterTimeout))
        );

        // only abort leaves ERROR
        assert_eq!(rig.recipe.start(rig.now, &mut rig.out), Err(RecipeError::NotReady));
        rig.recipe
            .abort(&mut rig.motors, &mut rig.thermal, rig.now, &mut rig.out);
        assert_eq!(rig.recipe.state(), RecipeState::Idle);
    }

    #[test]
    fn test_pause_resume_feed() {
        let mut rig = Rig::loaded(&[Segment::new(FeedInput::A, 10.0)]);
        rig.motors.driver_mut(MotorAxis::FeedA).unwrap().hold_motion = true;
        rig.recipe.start(0, &mut rig.out).unwrap();
        rig.step(10);
        assert_eq!(rig.recipe.state(), RecipeState::FeedingA);

        rig.recipe.pause(&mut rig.motors, &mut rig.thermal).unwrap();
        assert!(rig.recipe.is_paused());
        assert!(!rig.motors.drivers_enabled());
        assert_eq!(
            rig.recipe.pause(&mut rig.motors, &mut rig.thermal),
            Err(RecipeError::NotRunning)
        );
        rig.step(1000);
        assert_eq!(rig.recipe.state(), RecipeState::FeedingA);

        rig.motors.driver_mut(MotorAxis::FeedA).unwrap().hold_motion = false;
        rig.recipe.resume(&mut rig.thermal, rig.now).unwrap();
        rig.step(10);
        rig.step(10);
        assert_eq!(rig.recipe.state(), RecipeState::Cutting);
        let fed = rig.motors.position(MotorAxis::FeedA).mm;
        assert!((fed - 10.0).abs() < 0.05, "fed {}", fed);
        assert_eq!(
            rig.recipe.resume(&mut rig.thermal, rig.now),
            Err(RecipeError::NotPaused)
        );
    }

    #[test]
    fn test_abort_from_running() {
        let mut rig = Rig::loaded(&[Segment::new(FeedInput::A, 10.0)]);
        rig.recipe.start(0, &mut rig.out).unwrap();
        rig.thermal.set_target_x10(2100);
        rig.recipe
            .abort(&mut rig.motors, &mut rig.thermal, 5, &mut rig.out);
        assert_eq!(rig.recipe.state(), RecipeState::Idle);
        assert_eq!(rig.thermal.target_x10, 0);
        assert_eq!(rig.thermal.fan, 255);
        assert!(!rig.motors.drivers_enabled());
    }
}
