//! Encoder telemetry, health, closed-loop correction and calibration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use libm::fabsf;

use super::isr::{EncoderIsr, IsrSnapshot};
use crate::config::persist::Persistence;
use crate::config::CalibrationRecord;
use crate::elapsed_ms;
use crate::motion::MotorAxis;
use crate::report::{ReportSink, StatusLine};
use crate::traits::{MotionControl, RecordStore, StorageError};

/// Samples in the slip moving window
pub const SLIP_WINDOW: usize = 16;

/// Encoder tuning
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EncoderConfig {
    /// Used until a valid calibration is loaded
    pub default_ticks_per_mm: f32,
    /// Lowest accepted calibration
    pub min_ticks_per_mm: f32,
    /// Highest accepted calibration
    pub max_ticks_per_mm: f32,
    /// Window-average slip above this flags slip (mm)
    pub slip_threshold_mm: f32,
    /// Slip below this is not corrected (mm)
    pub correction_deadband_mm: f32,
    /// Fraction of the slip error applied per correction
    pub correction_gain: f32,
    /// Largest single correction (mm)
    pub correction_max_mm: f32,
    /// Minimum time between corrections (ms)
    pub correction_interval_ms: u32,
    /// Invalid/total transition ratio above which the signal is degraded
    pub invalid_ratio_warn: f32,
    /// No valid edge for this long while moving marks the encoder failed (ms)
    pub stale_ms: u32,
    /// Telemetry line period, 0 disables (ms)
    pub log_interval_ms: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            default_ticks_per_mm: 12.0,
            min_ticks_per_mm: 1.0,
            max_ticks_per_mm: 200.0,
            slip_threshold_mm: 1.0,
            correction_deadband_mm: 0.3,
            correction_gain: 0.5,
            correction_max_mm: 2.0,
            correction_interval_ms: 250,
            invalid_ratio_warn: 0.05,
            stale_ms: 500,
            log_interval_ms: 0,
        }
    }
}

/// Derived filament motion
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderTelemetry {
    /// Tick count at the last update
    pub ticks: i64,
    /// Filament position (mm)
    pub position_mm: f32,
    /// Smoothed filament velocity (mm/s)
    pub velocity_mm_s: f32,
    /// Commanded minus measured position (mm)
    pub slip_error_mm: f32,
    /// Mean |slip| over the window (mm)
    pub average_slip_error_mm: f32,
    /// Window mean above threshold
    pub slip_detected: bool,
}

/// Encoder signal quality
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderHealth {
    /// Decoded transitions
    pub valid_transitions: u32,
    /// Bounced or skipped transitions
    pub invalid_transitions: u32,
    /// valid / (valid + invalid), 1.0 with no transitions
    pub signal_quality: f32,
    /// Invalid ratio above the warning level
    pub degraded: bool,
    /// No valid edge within the staleness window while a motor moves
    pub failed: bool,
    /// Corrective moves issued
    pub correction_events: u32,
    /// Successful calibrations
    pub calibration_runs: u32,
}

impl Default for EncoderHealth {
    fn default() -> Self {
        Self {
            valid_transitions: 0,
            invalid_transitions: 0,
            signal_quality: 1.0,
            degraded: false,
            failed: false,
            correction_events: 0,
            calibration_runs: 0,
        }
    }
}

/// Calibration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// Known length must be positive
    InvalidLength,
    /// No calibration in progress
    NotActive,
    /// Encoder did not move during calibration
    NoMotion,
    /// Result outside the accepted range
    OutOfRange,
    /// Could not persist the result
    Storage(StorageError),
}

impl From<StorageError> for CalibrationError {
    fn from(e: StorageError) -> Self {
        CalibrationError::Storage(e)
    }
}

/// Fixed-size ring of |slip| samples
#[derive(Debug, Clone)]
struct SlipWindow {
    samples: [f32; SLIP_WINDOW],
    index: usize,
    count: usize,
}

impl SlipWindow {
    const fn new() -> Self {
        Self {
            samples: [0.0; SLIP_WINDOW],
            index: 0,
            count: 0,
        }
    }

    fn push(&mut self, error_mm: f32) {
        self.samples[self.index] = fabsf(error_mm);
        self.index = (self.index + 1) % SLIP_WINDOW;
        if self.count < SLIP_WINDOW {
            self.count += 1;
        }
    }

    fn average(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.samples[..self.count].iter().sum::<f32>() / self.count as f32
    }
}

#[derive(Debug, Clone, Copy)]
struct Calibration {
    known_length_mm: f32,
    start_ticks: i64,
}

/// Encoder subsystem state owned by the control loop
pub struct EncoderSystem<'a> {
    isr: &'a EncoderIsr,
    config: EncoderConfig,
    telemetry: EncoderTelemetry,
    health: EncoderHealth,
    ticks_per_mm: f32,
    closed_loop: bool,
    calibration: Option<Calibration>,
    window: SlipWindow,
    last_log_ms: u32,
    last_correction_ms: u32,
}

impl<'a> EncoderSystem<'a> {
    /// Create the subsystem around a shared interrupt cell
    pub fn new(isr: &'a EncoderIsr, config: EncoderConfig) -> Self {
        Self {
            isr,
            config,
            telemetry: EncoderTelemetry::default(),
            health: EncoderHealth::default(),
            ticks_per_mm: config.default_ticks_per_mm,
            closed_loop: true,
            calibration: None,
            window: SlipWindow::new(),
            last_log_ms: 0,
            last_correction_ms: 0,
        }
    }

    /// Derive telemetry from a fresh snapshot and apply correction
    pub fn update<M: MotionControl, R: ReportSink>(
        &mut self,
        now_ms: u32,
        now_us: u32,
        motion: &mut M,
        sink: &mut R,
    ) {
        let snap = self.isr.snapshot();
        self.apply_snapshot(&snap, motion);
        self.update_health(&snap, now_us, motion);
        self.apply_correction(now_ms, motion);
        self.log(now_ms, sink);
    }

    fn apply_snapshot<M: MotionControl>(&mut self, snap: &IsrSnapshot, motion: &M) {
        let t = &mut self.telemetry;
        t.ticks = snap.tick_count;
        t.position_mm = snap.tick_count as f32 / self.ticks_per_mm;
        let instant = snap.tick_rate / self.ticks_per_mm;
        t.velocity_mm_s = 0.8 * t.velocity_mm_s + 0.2 * instant;
        t.slip_error_mm = expected_position_mm(motion) - t.position_mm;
        self.window.push(t.slip_error_mm);
        t.average_slip_error_mm = self.window.average();
        t.slip_detected = t.average_slip_error_mm > self.config.slip_threshold_mm;
    }

    fn update_health<M: MotionControl>(&mut self, snap: &IsrSnapshot, now_us: u32, motion: &M) {
        let h = &mut self.health;
        h.valid_transitions = snap.valid_transitions;
        h.invalid_transitions = snap.invalid_transitions;
        let total = snap.valid_transitions as u64 + snap.invalid_transitions as u64;
        if total == 0 {
            h.signal_quality = 1.0;
            h.degraded = false;
        } else {
            h.signal_quality = snap.valid_transitions as f32 / total as f32;
            let invalid_ratio = snap.invalid_transitions as f32 / total as f32;
            h.degraded = invalid_ratio > self.config.invalid_ratio_warn;
        }
        let stale_us = self.config.stale_ms.saturating_mul(1000);
        h.failed = motion.any_moving() && now_us.wrapping_sub(snap.last_valid_edge_us) > stale_us;
    }

    fn apply_correction<M: MotionControl>(&mut self, now_ms: u32, motion: &mut M) {
        if !self.closed_loop
            || elapsed_ms(now_ms, self.last_correction_ms) < self.config.correction_interval_ms
        {
            return;
        }
        let slip = self.telemetry.slip_error_mm;
        if fabsf(slip) < self.config.correction_deadband_mm {
            return;
        }
        let Some(axis) = MotorAxis::POSITIONAL
            .into_iter()
            .find(|&axis| !motion.is_idle(axis))
        else {
            return;
        };
        let max = self.config.correction_max_mm;
        let correction = (slip * self.config.correction_gain).clamp(-max, max);
        match motion.move_relative(axis, correction) {
            Ok(()) => {
                self.last_correction_ms = now_ms;
                self.health.correction_events = self.health.correction_events.wrapping_add(1);
                debug!("slip correction {} on {}", correction, axis.label());
            }
            Err(e) => warn!("slip correction rejected: {}", e),
        }
    }

    fn log<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) {
        let interval = self.config.log_interval_ms;
        if interval == 0 || elapsed_ms(now_ms, self.last_log_ms) < interval {
            return;
        }
        self.last_log_ms = now_ms;
        sink.emit(StatusLine::EncoderLog {
            ticks: self.telemetry.ticks,
            position_mm: self.telemetry.position_mm,
            velocity_mm_s: self.telemetry.velocity_mm_s,
            slip_mm: self.telemetry.average_slip_error_mm,
            quality: self.health.signal_quality,
            failed: self.health.failed,
        });
    }

    /// Latest telemetry
    pub fn telemetry(&self) -> EncoderTelemetry {
        self.telemetry
    }

    /// Latest health
    pub fn health(&self) -> EncoderHealth {
        self.health
    }

    /// Active configuration
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Start a calibration over a known filament length
    pub fn begin_calibration(&mut self, known_length_mm: f32) -> Result<(), CalibrationError> {
        if !(known_length_mm > 0.0) {
            return Err(CalibrationError::InvalidLength);
        }
        self.calibration = Some(Calibration {
            known_length_mm,
            start_ticks: self.telemetry.ticks,
        });
        info!("encoder calibration started");
        Ok(())
    }

    /// Finish calibration, store the new ticks/mm and persist it
    pub fn complete_calibration<S: RecordStore>(
        &mut self,
        persist: &mut Persistence<S>,
    ) -> Result<f32, CalibrationError> {
        let cal = self.calibration.take().ok_or(CalibrationError::NotActive)?;
        let delta = (self.telemetry.ticks - cal.start_ticks).unsigned_abs();
        if delta == 0 {
            warn!("encoder calibration: no motion");
            return Err(CalibrationError::NoMotion);
        }
        let measured = delta as f32 / cal.known_length_mm;
        self.set_ticks_per_mm(measured)?;
        self.health.calibration_runs = self.health.calibration_runs.wrapping_add(1);
        self.save_calibration(persist)?;
        info!("encoder calibrated: {} ticks/mm", measured);
        Ok(measured)
    }

    /// Drop an in-progress calibration
    pub fn abort_calibration(&mut self) {
        self.calibration = None;
    }

    /// Calibration in progress
    pub fn is_calibration_active(&self) -> bool {
        self.calibration.is_some()
    }

    /// Set ticks/mm if within the accepted range
    pub fn set_ticks_per_mm(&mut self, ticks_per_mm: f32) -> Result<(), CalibrationError> {
        if !(self.config.min_ticks_per_mm..=self.config.max_ticks_per_mm).contains(&ticks_per_mm) {
            return Err(CalibrationError::OutOfRange);
        }
        self.ticks_per_mm = ticks_per_mm;
        Ok(())
    }

    /// Ticks per millimetre in use
    pub fn ticks_per_mm(&self) -> f32 {
        self.ticks_per_mm
    }

    /// Persist the current calibration
    pub fn save_calibration<S: RecordStore>(
        &self,
        persist: &mut Persistence<S>,
    ) -> Result<(), StorageError> {
        persist.save(&CalibrationRecord {
            ticks_per_mm: self.ticks_per_mm,
            calibration_runs: self.health.calibration_runs,
        })
    }

    /// Load a persisted calibration, falling back to the default
    ///
    /// Returns true when a valid record was applied.
    pub fn load_calibration<S: RecordStore>(&mut self, persist: &mut Persistence<S>) -> bool {
        match persist.load::<CalibrationRecord>() {
            Some(rec) if self.set_ticks_per_mm(rec.ticks_per_mm).is_ok() => {
                self.health.calibration_runs = rec.calibration_runs;
                true
            }
            _ => {
                warn!("encoder calibration unavailable, using default");
                self.ticks_per_mm = self.config.default_ticks_per_mm;
                false
            }
        }
    }

    /// Zero counters, telemetry and the slip window
    pub fn reset_counters(&mut self) {
        self.isr.reset();
        self.telemetry = EncoderTelemetry::default();
        self.window = SlipWindow::new();
    }

    /// Enable or disable slip correction
    pub fn set_closed_loop(&mut self, enabled: bool) {
        self.closed_loop = enabled;
    }

    /// Slip correction enabled
    pub fn is_closed_loop(&self) -> bool {
        self.closed_loop
    }

    /// Tune correction gain and deadband
    pub fn set_correction(&mut self, gain: f32, deadband_mm: f32) {
        self.config.correction_gain = gain.clamp(0.0, 1.0);
        self.config.correction_deadband_mm = deadband_mm.max(0.0);
    }

    /// Telemetry line period, 0 disables
    pub fn set_log_interval(&mut self, interval_ms: u32) {
        self.config.log_interval_ms = interval_ms;
    }
}

/// Where the filament should be according to the motors
fn expected_position_mm<M: MotionControl>(motion: &M) -> f32 {
    MotorAxis::POSITIONAL
        .iter()
        .map(|&axis| fabsf(motion.position(axis).mm))
        .fold(0.0, f32::max)
}
