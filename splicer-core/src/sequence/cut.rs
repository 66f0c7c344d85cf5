//! Cutting subsystem
//!
//! IDLE → RETRACTING → CLOSING → HOLDING → OPENING → VERIFYING → DONE.
//! The blade force is sampled once, at the end of CLOSING.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::CutterStatsRecord;
use crate::elapsed_ms;
use crate::motion::MotorAxis;
use crate::report::{ReportSink, StatusLine};
use crate::traits::{MotionControl, MotionError, SensorBank};

/// Cutter timing and thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CutConfig {
    /// Blade travel time, each direction (ms)
    pub travel_ms: u32,
    /// Time the blade stays closed (ms)
    pub hold_ms: u32,
    /// Retract both feeds before cutting, 0 skips (mm)
    pub pre_cut_retract_mm: f32,
    /// Advance feed A after cutting to verify, 0 skips (mm)
    pub verify_advance_mm: f32,
    /// Budget for the pre-cut retract (ms)
    pub retract_timeout_ms: u32,
    /// Budget for the verify advance (ms)
    pub verify_timeout_ms: u32,
    /// Cuts between blade services
    pub maintenance_interval: u32,
    /// Force reading above which the blade counts as worn
    pub wear_threshold: u16,
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            travel_ms: 300,
            hold_ms: 200,
            pre_cut_retract_mm: 1.0,
            verify_advance_mm: 2.0,
            retract_timeout_ms: 5000,
            verify_timeout_ms: 3000,
            maintenance_interval: 500,
            wear_threshold: 800,
        }
    }
}

/// Cut phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CutPhase {
    #[default]
    Idle,
    Retracting,
    Closing,
    Holding,
    Opening,
    Verifying,
    Done,
}

/// Outcome of a cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CutResult {
    Success,
    Incomplete,
    BladeWorn,
    Timeout,
    Aborted,
}

impl CutResult {
    /// Token used in status lines
    pub const fn label(self) -> &'static str {
        match self {
            CutResult::Success => "SUCCESS",
            CutResult::Incomplete => "INCOMPLETE",
            CutResult::BladeWorn => "BLADE_WORN",
            CutResult::Timeout => "TIMEOUT",
            CutResult::Aborted => "ABORTED",
        }
    }

    /// Whether the machine should treat this as a cutter failure
    pub const fn is_failure(self) -> bool {
        matches!(self, CutResult::Incomplete | CutResult::Timeout)
    }
}

/// Cutter errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CutError {
    /// A cut is already running
    Busy,
    /// The pre-cut retract was refused
    Motion(MotionError),
}

impl From<MotionError> for CutError {
    fn from(e: MotionError) -> Self {
        CutError::Motion(e)
    }
}

/// Blade usage
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CutStatistics {
    pub total_cuts: u32,
    pub successful_cuts: u32,
    pub failed_cuts: u32,
    pub last_maintenance_cut: u32,
    /// Rolling mean of the sampled force
    pub average_force: f32,
    pub maintenance_due: bool,
}

impl CutStatistics {
    /// Cuts since the blade was last serviced
    pub fn cuts_since_maintenance(&self) -> u32 {
        self.total_cuts.wrapping_sub(self.last_maintenance_cut)
    }
}

/// Cutting subsystem state
#[derive(Debug, Clone)]
pub struct CuttingSystem {
    config: CutConfig,
    stats: CutStatistics,
    phase: CutPhase,
    phase_started_ms: u32,
    in_progress: bool,
    manual_pending: bool,
    last_force: u16,
    last_result: Option<CutResult>,
}

impl CuttingSystem {
    /// Create an idle cutter
    pub fn new(config: CutConfig) -> Self {
        Self {
            config,
            stats: CutStatistics::default(),
            phase: CutPhase::Idle,
            phase_started_ms: 0,
            in_progress: false,
            manual_pending: false,
            last_force: 0,
            last_result: None,
        }
    }

    fn enter(&mut self, phase: CutPhase, now_ms: u32) {
        self.phase = phase;
        self.phase_started_ms = now_ms;
    }

    /// Begin a cut
    pub fn execute<M: MotionControl>(&mut self, motion: &mut M, now_ms: u32) -> Result<(), CutError> {
        if self.in_progress {
            return Err(CutError::Busy);
        }
        self.last_force = 0;
        let retract = self.config.pre_cut_retract_mm;
        if retract > 0.0 {
            motion.move_relative(MotorAxis::FeedA, -retract)?;
            motion.move_relative(MotorAxis::FeedB, -retract)?;
            self.enter(CutPhase::Retracting, now_ms);
        } else {
            motion.activate_cutter();
            self.enter(CutPhase::Closing, now_ms);
        }
        self.in_progress = true;
        debug!("cut started");
        Ok(())
    }

    /// Queue a cut for the next tick
    pub fn request_manual_cut(&mut self) {
        self.manual_pending = true;
    }

    /// A manual cut is queued
    pub fn is_manual_cut_pending(&self) -> bool {
        self.manual_pending
    }

    /// Advance the cut; returns the result on the tick a cut finishes
    pub fn tick<M, B, R>(
        &mut self,
        now_ms: u32,
        motion: &mut M,
        sensors: &mut B,
        sink: &mut R,
    ) -> Option<CutResult>
    where
        M: MotionControl,
        B: SensorBank,
        R: ReportSink,
    {
        if !self.in_progress {
            if self.manual_pending {
                self.manual_pending = false;
                if let Err(e) = self.execute(motion, now_ms) {
                    warn!("manual cut refused: {}", e);
                }
            }
            return None;
        }
        let elapsed = elapsed_ms(now_ms, self.phase_started_ms);
        match self.phase {
            CutPhase::Retracting => {
                if motion.is_idle(MotorAxis::FeedA) && motion.is_idle(MotorAxis::FeedB) {
                    motion.activate_cutter();
                    self.enter(CutPhase::Closing, now_ms);
                } else if elapsed > self.config.retract_timeout_ms {
                    return Some(self.finish(CutResult::Timeout, sink));
                }
            }
            CutPhase::Closing => {
                if elapsed >= self.config.travel_ms {
                    self.last_force = sensors.cutter_force();
                    self.enter(CutPhase::Holding, now_ms);
                }
            }
            CutPhase::Holding => {
                if elapsed >= self.config.hold_ms {
                    motion.deactivate_cutter();
                    self.enter(CutPhase::Opening, now_ms);
                }
            }
            CutPhase::Opening => {
                if elapsed >= self.config.travel_ms {
                    let advance = self.config.verify_advance_mm;
                    if advance <= 0.0 {
                        return Some(self.finish(self.force_verdict(), sink));
                    }
                    match motion.move_relative(MotorAxis::FeedA, advance) {
                        Ok(()) => self.enter(CutPhase::Verifying, now_ms),
                        Err(_) => return Some(self.finish(CutResult::Incomplete, sink)),
                    }
                }
            }
            CutPhase::Verifying => {
                if motion.is_idle(MotorAxis::FeedA) {
                    return Some(self.finish(self.force_verdict(), sink));
                } else if elapsed > self.config.verify_timeout_ms {
                    return Some(self.finish(CutResult::Timeout, sink));
                }
            }
            CutPhase::Idle | CutPhase::Done => {}
        }
        None
    }

    fn force_verdict(&self) -> CutResult {
        if self.last_force > self.config.wear_threshold {
            CutResult::BladeWorn
        } else {
            CutResult::Success
        }
    }

    fn finish<R: ReportSink>(&mut self, result: CutResult, sink: &mut R) -> CutResult {
        self.in_progress = false;
        self.last_result = Some(result);
        let s = &mut self.stats;
        s.total_cuts = s.total_cuts.wrapping_add(1);
        if result == CutResult::Success {
            s.successful_cuts = s.successful_cuts.wrapping_add(1);
        } else {
            s.failed_cuts = s.failed_cuts.wrapping_add(1);
        }
        let n = s.total_cuts.max(1) as f32;
        s.average_force += (self.last_force as f32 - s.average_force) / n;
        self.refresh_maintenance();
        sink.emit(StatusLine::CutDone(result));
        if self.stats.maintenance_due {
            sink.emit(StatusLine::CutterMaintenance {
                cuts_since: self.stats.cuts_since_maintenance(),
            });
        }
        self.phase = CutPhase::Done;
        result
    }

    fn refresh_maintenance(&mut self) {
        self.stats.maintenance_due =
            self.stats.cuts_since_maintenance() >= self.config.maintenance_interval;
    }

    /// Stop immediately: blade open, motors halted
    pub fn abort<M: MotionControl>(&mut self, motion: &mut M) {
        motion.deactivate_cutter();
        if self.in_progress {
            motion.emergency_stop();
            self.last_result = Some(CutResult::Aborted);
        }
        self.in_progress = false;
        self.manual_pending = false;
        self.phase = CutPhase::Idle;
    }

    /// A cut is running
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Current phase
    pub fn phase(&self) -> CutPhase {
        self.phase
    }

    /// Result of the last finished cut
    pub fn last_result(&self) -> Option<CutResult> {
        self.last_result
    }

    /// Force sampled during the current or last cut
    pub fn last_force(&self) -> u16 {
        self.last_force
    }

    /// Usage counters
    pub fn statistics(&self) -> CutStatistics {
        self.stats
    }

    /// Active configuration
    pub fn config(&self) -> &CutConfig {
        &self.config
    }

    /// Blade travel time (ms)
    pub fn set_travel_ms(&mut self, travel_ms: u32) {
        self.config.travel_ms = travel_ms;
    }

    /// Cuts between services; re-evaluates the alert
    pub fn set_maintenance_interval(&mut self, interval: u32) {
        self.config.maintenance_interval = interval.max(1);
        self.refresh_maintenance();
    }

    /// Record a blade service
    pub fn acknowledge_maintenance(&mut self) {
        self.stats.last_maintenance_cut = self.stats.total_cuts;
        self.stats.maintenance_due = false;
        info!("cutter maintenance acknowledged");
    }

    /// Zero all counters
    pub fn reset_statistics(&mut self) {
        self.stats = CutStatistics::default();
    }

    /// Persistable counters
    pub fn stats_record(&self) -> CutterStatsRecord {
        CutterStatsRecord {
            total_cuts: self.stats.total_cuts,
            successful_cuts: self.stats.successful_cuts,
            failed_cuts: self.stats.failed_cuts,
            last_maintenance_cut: self.stats.last_maintenance_cut,
        }
    }

    /// Adopt persisted counters
    pub fn restore_stats(&mut self, record: &CutterStatsRecord) {
        self.stats.total_cuts = record.total_cuts;
        self.stats.successful_cuts = record.successful_cuts;
        self.stats.failed_cuts = record.failed_cuts;
        self.stats.last_maintenance_cut = record.last_maintenance_cut;
        self.refresh_maintenance();
    }
}
