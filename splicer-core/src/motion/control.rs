//! Motor control layer
//!
//! Owns the three positional axis drivers and the cutter actuator. Each
//! positional axis tracks its commanded absolute position as a 64-bit step
//! count; the driver only ever sees a 32-bit position, which is folded
//! into a 64-bit offset whenever it grows past
//! [`POSITION_NORMALIZE_THRESHOLD`] while the axis is at rest.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::homing::{HomingCycle, HomingStatus, HomingStep, HOMING_MIN_SPEED, HOMING_STALL_THRESHOLD};
use super::{MotionProfile, MotorAxis, MotorDiagnostics, MotorPosition};
use crate::traits::{AxisDriver, CutterActuator, MotionControl, MotionError};

/// Driver positions beyond this magnitude are folded into the offset
pub const POSITION_NORMALIZE_THRESHOLD: i32 = 100_000_000;

/// Microstep setting the steps-per-mm table is expressed at
pub const BASE_MICROSTEPS: u16 = 16;

/// Motor layer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MotorConfig {
    /// Steps per mm at 16 microsteps, indexed FEED_A, FEED_B, WINDER
    pub steps_per_mm: [f32; 3],
    /// Speed limits, same indexing
    pub profiles: [MotionProfile; 3],
    /// Current while moving (mA)
    pub run_current_ma: u16,
    /// Current at rest after a synchronized move (mA)
    pub hold_current_ma: u16,
    /// Microstep resolution (8, 16 or 32)
    pub microsteps: u16,
}

impl Default for MotorConfig {
    fn default() -> Self {
        let feed = MotionProfile {
            max_speed: 5000.0,
            acceleration: 2000.0,
            jerk_limit: 2000.0,
        };
        Self {
            steps_per_mm: [93.0, 93.0, 50.0],
            profiles: [
                feed,
                feed,
                MotionProfile {
                    max_speed: 8000.0,
                    ..feed
                },
            ],
            run_current_ma: 800,
            hold_current_ma: 400,
            microsteps: BASE_MICROSTEPS,
        }
    }
}

/// Motor control layer over three axis drivers and a cutter
pub struct MotorControl<D, C> {
    axes: [D; 3],
    cutter: C,
    config: MotorConfig,
    backlash_mm: [f32; 3],
    last_direction: [i8; 3],
    offset_steps: [i64; 3],
    commanded_steps: [i64; 3],
    diagnostics: [MotorDiagnostics; 3],
    sync_active: bool,
    drivers_enabled: bool,
    homing: Option<HomingCycle>,
    homing_status: HomingStatus,
}

impl<D: AxisDriver, C: CutterActuator> MotorControl<D, C> {
    /// Take ownership of the drivers and apply the configuration
    ///
    /// `axes` is indexed FEED_A, FEED_B, WINDER.
    pub fn new(axes: [D; 3], cutter: C, config: MotorConfig) -> Self {
        let mut control = Self {
            axes,
            cutter,
            config,
            backlash_mm: [0.0; 3],
            last_direction: [0; 3],
            offset_steps: [0; 3],
            commanded_steps: [0; 3],
            diagnostics: [MotorDiagnostics::default(); 3],
            sync_active: false,
            drivers_enabled: false,
            homing: None,
            homing_status: HomingStatus::Idle,
        };
        for axis in MotorAxis::POSITIONAL {
            control.apply_profile(axis);
        }
        control.set_currents(config.run_current_ma, config.hold_current_ma);
        for driver in control.axes.iter_mut() {
            driver.set_microsteps(config.microsteps);
        }
        control.cutter.deactivate();
        control.set_drivers_enabled(true);
        control
    }

    /// Advance step generation and bookkeeping
    ///
    /// Call every loop iteration.
    pub fn run(&mut self, now_us: u32) {
        for driver in self.axes.iter_mut() {
            driver.run(now_us);
        }
        for axis in MotorAxis::POSITIONAL {
            self.normalize_if_needed(axis);
        }
        if self.sync_active && self.all_idle() {
            self.sync_active = false;
            let hold = self.config.hold_current_ma;
            for driver in self.axes.iter_mut() {
                driver.set_current_ma(hold);
            }
        }
    }

    /// Refresh diagnostics and advance a homing cycle
    ///
    /// Call once per control tick.
    pub fn tick(&mut self, now_ms: u32) {
        for axis in MotorAxis::POSITIONAL {
            self.update_diagnostics(axis);
        }
        self.poll_homing(now_ms);
    }

    /// Steps per mm at the current microstep setting
    pub fn steps_per_mm(&self, axis: MotorAxis) -> f32 {
        match axis.index() {
            Some(i) => {
                self.config.steps_per_mm[i] * self.config.microsteps as f32 / BASE_MICROSTEPS as f32
            }
            None => 0.0,
        }
    }

    fn mm_to_steps(&self, axis: MotorAxis, mm: f32) -> i64 {
        (mm * self.steps_per_mm(axis)) as i64
    }

    /// Replace an axis' speed limits
    pub fn configure_profile(
        &mut self,
        axis: MotorAxis,
        profile: MotionProfile,
    ) -> Result<(), MotionError> {
        let i = axis.index().ok_or(MotionError::NotPositional)?;
        self.config.profiles[i] = profile;
        self.apply_profile(axis);
        Ok(())
    }

    /// Speed limits of an axis
    pub fn profile(&self, axis: MotorAxis) -> Option<MotionProfile> {
        axis.index().map(|i| self.config.profiles[i])
    }

    /// Change microstep resolution on every axis
    ///
    /// Only 8, 16 and 32 are accepted; steps-per-mm rescale accordingly.
    pub fn set_microstepping(&mut self, microsteps: u16) -> Result<(), MotionError> {
        if !matches!(microsteps, 8 | 16 | 32) {
            return Err(MotionError::InvalidConfig);
        }
        self.config.microsteps = microsteps;
        for driver in self.axes.iter_mut() {
            driver.set_microsteps(microsteps);
        }
        Ok(())
    }

    /// Microstep resolution
    pub fn microsteps(&self) -> u16 {
        self.config.microsteps
    }

    /// Set run and hold currents; run current is applied immediately
    pub fn set_currents(&mut self, run_ma: u16, hold_ma: u16) {
        self.config.run_current_ma = run_ma;
        self.config.hold_current_ma = hold_ma;
        for driver in self.axes.iter_mut() {
            driver.set_current_ma(run_ma);
        }
    }

    /// Run and hold currents (mA)
    pub fn currents(&self) -> (u16, u16) {
        (self.config.run_current_ma, self.config.hold_current_ma)
    }

    /// Extra travel inserted when an axis reverses; negative values clamp to zero
    pub fn set_backlash(&mut self, axis: MotorAxis, backlash_mm: f32) -> Result<(), MotionError> {
        let i = axis.index().ok_or(MotionError::NotPositional)?;
        self.backlash_mm[i] = backlash_mm.max(0.0);
        Ok(())
    }

    /// Zero an axis without moving it
    pub fn reset_position(&mut self, axis: MotorAxis) -> Result<(), MotionError> {
        let i = axis.index().ok_or(MotionError::NotPositional)?;
        self.axes[i].set_current_position(0);
        self.offset_steps[i] = 0;
        self.commanded_steps[i] = 0;
        Ok(())
    }

    /// Begin a sensorless homing cycle toward the negative limit
    pub fn start_homing(
        &mut self,
        axis: MotorAxis,
        travel_limit_mm: f32,
        seek_speed_mm_s: f32,
        now_ms: u32,
    ) -> Result<(), MotionError> {
        let i = axis.index().ok_or(MotionError::NotPositional)?;
        if self.homing.is_some() {
            return Err(MotionError::Busy);
        }
        let steps = self.mm_to_steps(axis, travel_limit_mm).unsigned_abs();
        let seek = (seek_speed_mm_s * self.steps_per_mm(axis)).max(HOMING_MIN_SPEED);
        self.set_drivers_enabled(true);
        let driver = &mut self.axes[i];
        driver.set_max_speed(seek);
        driver.set_stall_guard(Some(HOMING_STALL_THRESHOLD));
        driver.move_by(-(steps.min(i32::MAX as u64) as i32));
        self.homing = Some(HomingCycle::new(axis, now_ms));
        self.homing_status = HomingStatus::Seeking(axis);
        info!("homing {} started", axis.label());
        Ok(())
    }

    /// Result of the latest homing request
    pub fn homing_status(&self) -> HomingStatus {
        self.homing_status
    }

    /// True while the drivers are energized
    pub fn drivers_enabled(&self) -> bool {
        self.drivers_enabled
    }

    /// Backlash setting of an axis (mm)
    pub fn backlash(&self, axis: MotorAxis) -> f32 {
        axis.index().map(|i| self.backlash_mm[i]).unwrap_or(0.0)
    }

    /// Access a positional driver
    pub fn driver(&self, axis: MotorAxis) -> Option<&D> {
        axis.index().map(|i| &self.axes[i])
    }

    /// Mutable access to a positional driver
    pub fn driver_mut(&mut self, axis: MotorAxis) -> Option<&mut D> {
        match axis.index() {
            Some(i) => Some(&mut self.axes[i]),
            None => None,
        }
    }

    /// Access the cutter actuator
    pub fn cutter(&self) -> &C {
        &self.cutter
    }

    /// Mutable access to the cutter actuator
    pub fn cutter_mut(&mut self) -> &mut C {
        &mut self.cutter
    }

    fn set_drivers_enabled(&mut self, enabled: bool) {
        for driver in self.axes.iter_mut() {
            driver.enable(enabled);
        }
        self.drivers_enabled = enabled;
    }

    fn apply_profile(&mut self, axis: MotorAxis) {
        if let Some(i) = axis.index() {
            let profile = self.config.profiles[i];
            let driver = &mut self.axes[i];
            driver.set_max_speed(profile.max_speed);
            driver.set_acceleration(profile.effective_acceleration());
        }
    }

    fn absolute_steps(&self, i: usize) -> i64 {
        self.offset_steps[i] + self.axes[i].current_position() as i64
    }

    fn normalize_if_needed(&mut self, axis: MotorAxis) {
        let Some(i) = axis.index() else { return };
        let driver = &mut self.axes[i];
        if driver.distance_to_go() != 0 {
            return;
        }
        let current = driver.current_position();
        if current.unsigned_abs() <= POSITION_NORMALIZE_THRESHOLD as u32 {
            return;
        }
        self.offset_steps[i] += current as i64;
        driver.set_current_position(0);
        debug!("axis {} renormalized", axis.label());
    }

    fn update_diagnostics(&mut self, axis: MotorAxis) {
        let Some(i) = axis.index() else { return };
        let observed = self.absolute_steps(i);
        let commanded = self.commanded_steps[i];
        let sync = self.sync_active;
        let diag = &mut self.diagnostics[i];
        diag.observed_steps = observed;
        diag.commanded_steps = commanded;
        diag.missed_step_estimate = (commanded - observed).abs();
        diag.sync_move_active = sync;
        self.axes[i].read_diagnostics(diag);
    }

    fn poll_homing(&mut self, now_ms: u32) {
        let Some(cycle) = self.homing else { return };
        let Some(i) = cycle.axis.index() else {
            self.homing = None;
            return;
        };
        let stalled = self.axes[i].stall_detected();
        let distance = self.axes[i].distance_to_go();
        match cycle.poll(now_ms, stalled, distance) {
            HomingStep::Continue => return,
            HomingStep::Stalled => {
                let driver = &mut self.axes[i];
                driver.stop();
                driver.set_current_position(0);
                self.offset_steps[i] = 0;
                self.commanded_steps[i] = 0;
                self.diagnostics[i].stall_detected = false;
                self.homing_status = HomingStatus::Homed(cycle.axis);
                info!("homing {} complete", cycle.axis.label());
            }
            HomingStep::Exhausted => {
                self.axes[i].stop();
                self.homing_status = HomingStatus::Failed(cycle.axis);
                warn!("homing {} failed", cycle.axis.label());
            }
        }
        self.axes[i].set_stall_guard(None);
        self.homing = None;
        self.apply_profile(cycle.axis);
    }

    fn queue_relative(&mut self, axis: MotorAxis, requested: i64) -> Result<(), MotionError> {
        let i = axis.index().ok_or(MotionError::NotPositional)?;
        if self.homing.map(|h| h.axis) == Some(axis) {
            return Err(MotionError::Busy);
        }
        if requested == 0 {
            return Ok(());
        }
        self.set_drivers_enabled(true);
        let direction: i8 = if requested > 0 { 1 } else { -1 };
        if self.last_direction[i] != 0
            && direction != self.last_direction[i]
            && self.backlash_mm[i] > 0.0
        {
            let backlash = self.mm_to_steps(axis, self.backlash_mm[i]) * direction as i64;
            self.axes[i].move_by(clamp_i32(backlash));
            self.commanded_steps[i] += backlash;
        }
        self.axes[i].move_by(clamp_i32(requested));
        self.commanded_steps[i] += requested;
        self.last_direction[i] = direction;
        Ok(())
    }
}

fn clamp_i32(steps: i64) -> i32 {
    steps.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl<D: AxisDriver, C: CutterActuator> MotionControl for MotorControl<D, C> {
    fn move_relative(&mut self, axis: MotorAxis, distance_mm: f32) -> Result<(), MotionError> {
        let steps = self.mm_to_steps(axis, distance_mm);
        self.queue_relative(axis, steps)
    }

    fn move_absolute(&mut self, axis: MotorAxis, position_mm: f32) -> Result<(), MotionError> {
        let i = axis.index().ok_or(MotionError::NotPositional)?;
        let target = self.mm_to_steps(axis, position_mm);
        let delta = target - self.absolute_steps(i);
        self.queue_relative(axis, delta)
    }

    fn sync_move(
        &mut self,
        feed_a_mm: f32,
        feed_b_mm: f32,
        winder_mm: f32,
    ) -> Result<(), MotionError> {
        self.move_relative(MotorAxis::FeedA, feed_a_mm)?;
        self.move_relative(MotorAxis::FeedB, feed_b_mm)?;
        self.move_relative(MotorAxis::Winder, winder_mm)?;
        self.sync_active = true;
        let run = self.config.run_current_ma;
        for driver in self.axes.iter_mut() {
            driver.set_current_ma(run);
        }
        Ok(())
    }

    fn set_speed_mm_s(&mut self, axis: MotorAxis, speed_mm_s: f32) -> Result<(), MotionError> {
        let i = axis.index().ok_or(MotionError::NotPositional)?;
        let limit = self.config.profiles[i].max_speed;
        let steps = (speed_mm_s * self.steps_per_mm(axis)).clamp(1.0, limit);
        self.axes[i].set_max_speed(steps);
        Ok(())
    }

    fn is_idle(&self, axis: MotorAxis) -> bool {
        match axis.index() {
            Some(i) => self.axes[i].distance_to_go() == 0,
            None => true,
        }
    }

    fn is_sync_active(&self) -> bool {
        self.sync_active
    }

    fn position(&self, axis: MotorAxis) -> MotorPosition {
        match axis.index() {
            Some(i) => {
                let steps = self.absolute_steps(i);
                MotorPosition {
                    steps,
                    mm: steps as f32 / self.steps_per_mm(axis),
                }
            }
            None => MotorPosition::default(),
        }
    }

    fn diagnostics(&self, axis: MotorAxis) -> MotorDiagnostics {
        axis.index()
            .map(|i| self.diagnostics[i])
            .unwrap_or_default()
    }

    fn emergency_stop(&mut self) {
        for i in 0..self.axes.len() {
            let driver = &mut self.axes[i];
            driver.stop();
            let here = driver.current_position();
            driver.set_current_position(here);
            self.commanded_steps[i] = self.offset_steps[i] + here as i64;
        }
        if let Some(cycle) = self.homing.take() {
            if let Some(i) = cycle.axis.index() {
                self.axes[i].set_stall_guard(None);
            }
            self.homing_status = HomingStatus::Failed(cycle.axis);
            self.apply_profile(cycle.axis);
        }
        self.sync_active = false;
        self.set_drivers_enabled(false);
        warn!("emergency stop");
    }

    fn activate_cutter(&mut self) {
        self.cutter.activate();
    }

    fn deactivate_cutter(&mut self) {
        self.cutter.deactivate();
    }
}
