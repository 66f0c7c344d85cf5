//! Position tracking
//!
//! Reconciles encoder position with the commanded feed position over a
//! "job", recording drift events and operator waypoints.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use heapless::Vec;
use libm::fabsf;

use crate::elapsed_ms;
use crate::encoder::{EncoderHealth, EncoderTelemetry};
use crate::motion::MotorAxis;
use crate::report::{ReportSink, StatusLine};
use crate::traits::MotionControl;

/// Waypoint capacity per job
pub const MAX_WAYPOINTS: usize = 32;

/// Drift event capacity per job
pub const MAX_DRIFT_EVENTS: usize = 16;

/// Shortest accepted update interval (ms)
pub const MIN_TRACKING_INTERVAL_MS: u32 = 50;

/// Drift thresholds and sampling
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackingConfig {
    pub minor_drift_mm: f32,
    pub moderate_drift_mm: f32,
    pub severe_drift_mm: f32,
    pub interval_ms: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            minor_drift_mm: 0.5,
            moderate_drift_mm: 1.5,
            severe_drift_mm: 3.0,
            interval_ms: 200,
        }
    }
}

/// Drift classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriftSeverity {
    Minor,
    Moderate,
    Severe,
}

/// Operator-marked position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Waypoint {
    /// Since job start (ms)
    pub timestamp_ms: u32,
    pub position_mm: f32,
    pub motor_position_mm: f32,
    pub drift_mm: f32,
}

/// Drift above the minor threshold
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriftEvent {
    /// Since job start (ms)
    pub timestamp_ms: u32,
    pub expected_mm: f32,
    pub actual_mm: f32,
    pub error_mm: f32,
    pub severity: DriftSeverity,
}

/// Current reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PositionSnapshot {
    pub encoder_mm: f32,
    pub motor_a_mm: f32,
    pub motor_b_mm: f32,
    pub drift_mm: f32,
    pub cumulative_drift_mm: f32,
    pub velocity_mm_s: f32,
    pub elapsed_ms: u32,
}

/// Per-job statistics
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PositionJobStats {
    pub start_ms: u32,
    pub start_position_mm: f32,
    pub total_distance_mm: f32,
    pub peak_velocity_mm_s: f32,
    pub max_drift_mm: f32,
    pub cumulative_drift_mm: f32,
    pub correction_count: u32,
    pub active: bool,
}

/// Drift between the encoder and whichever feed axis moved further
fn drift_mm<M: MotionControl>(encoder: &EncoderTelemetry, motion: &M) -> f32 {
    let a = motion.position(MotorAxis::FeedA).mm;
    let b = motion.position(MotorAxis::FeedB).mm;
    let motor = if fabsf(a) > fabsf(b) { a } else { b };
    encoder.position_mm - motor
}

/// Position tracking state
#[derive(Debug, Clone)]
pub struct PositionTracker {
    config: TrackingConfig,
    job: PositionJobStats,
    jobs_started: u32,
    waypoints: Vec<Waypoint, MAX_WAYPOINTS>,
    drift_events: Vec<DriftEvent, MAX_DRIFT_EVENTS>,
    last_encoder_mm: f32,
    last_drift_mm: f32,
    last_update_ms: u32,
    seen_corrections: u32,
}

impl PositionTracker {
    /// Create an idle tracker
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            job: PositionJobStats::default(),
            jobs_started: 0,
            waypoints: Vec::new(),
            drift_events: Vec::new(),
            last_encoder_mm: 0.0,
            last_drift_mm: 0.0,
            last_update_ms: 0,
            seen_corrections: 0,
        }
    }

    /// Begin a job; ignored while one is active
    pub fn start_job<R: ReportSink>(
        &mut self,
        encoder: &EncoderTelemetry,
        health: &EncoderHealth,
        now_ms: u32,
        sink: &mut R,
    ) {
        if self.job.active {
            return;
        }
        self.job = PositionJobStats {
            start_ms: now_ms,
            start_position_mm: encoder.position_mm,
            active: true,
            ..PositionJobStats::default()
        };
        self.waypoints.clear();
        self.drift_events.clear();
        self.last_encoder_mm = encoder.position_mm;
        self.last_drift_mm = 0.0;
        self.last_update_ms = now_ms;
        self.seen_corrections = health.correction_events;
        self.jobs_started = self.jobs_started.wrapping_add(1);
        sink.emit(StatusLine::JobStarted(self.jobs_started));
    }

    /// End the job and report its summary
    pub fn stop_job<R: ReportSink>(&mut self, sink: &mut R) {
        if !self.job.active {
            return;
        }
        self.job.active = false;
        sink.emit(StatusLine::JobStopped {
            distance_mm: self.job.total_distance_mm,
            max_drift_mm: self.job.max_drift_mm,
            drift_events: self.drift_events.len() as u16,
        });
    }

    /// Sample drift once per interval while a job is active
    pub fn update<M: MotionControl, R: ReportSink>(
        &mut self,
        now_ms: u32,
        encoder: &EncoderTelemetry,
        health: &EncoderHealth,
        motion: &M,
        sink: &mut R,
    ) {
        if !self.job.active || elapsed_ms(now_ms, self.last_update_ms) < self.config.interval_ms {
            return;
        }
        self.last_update_ms = now_ms;

        let drift = drift_mm(encoder, motion);
        let abs_drift = fabsf(drift);
        let job = &mut self.job;
        job.cumulative_drift_mm += fabsf(drift - self.last_drift_mm);
        self.last_drift_mm = drift;
        job.peak_velocity_mm_s = job.peak_velocity_mm_s.max(encoder.velocity_mm_s);
        job.max_drift_mm = job.max_drift_mm.max(abs_drift);
        job.total_distance_mm += fabsf(encoder.position_mm - self.last_encoder_mm);
        self.last_encoder_mm = encoder.position_mm;

        if health.correction_events > self.seen_corrections {
            job.correction_count += health.correction_events - self.seen_corrections;
            self.seen_corrections = health.correction_events;
        }

        if abs_drift >= self.config.minor_drift_mm {
            let event = DriftEvent {
                timestamp_ms: elapsed_ms(now_ms, job.start_ms),
                expected_mm: motion.position(MotorAxis::FeedA).mm,
                actual_mm: encoder.position_mm,
                error_mm: drift,
                severity: self.classify(abs_drift),
            };
            if self.drift_events.push(event).is_ok() && event.severity == DriftSeverity::Severe {
                sink.emit(StatusLine::SevereDrift { error_mm: drift });
            }
        }
    }

    /// Severity for an absolute drift
    pub fn classify(&self, abs_drift_mm: f32) -> DriftSeverity {
        if abs_drift_mm >= self.config.severe_drift_mm {
            DriftSeverity::Severe
        } else if abs_drift_mm >= self.config.moderate_drift_mm {
            DriftSeverity::Moderate
        } else {
            DriftSeverity::Minor
        }
    }

    /// Record the current position; false once full
    pub fn add_waypoint<M: MotionControl>(
        &mut self,
        encoder: &EncoderTelemetry,
        motion: &M,
        now_ms: u32,
    ) -> bool {
        let motor = motion.position(MotorAxis::FeedA).mm;
        self.waypoints
            .push(Waypoint {
                timestamp_ms: elapsed_ms(now_ms, self.job.start_ms),
                position_mm: encoder.position_mm,
                motor_position_mm: motor,
                drift_mm: encoder.position_mm - motor,
            })
            .is_ok()
    }

    /// Current reconciliation
    pub fn snapshot<M: MotionControl>(
        &self,
        encoder: &EncoderTelemetry,
        motion: &M,
        now_ms: u32,
    ) -> PositionSnapshot {
        PositionSnapshot {
            encoder_mm: encoder.position_mm,
            motor_a_mm: motion.position(MotorAxis::FeedA).mm,
            motor_b_mm: motion.position(MotorAxis::FeedB).mm,
            drift_mm: drift_mm(encoder, motion),
            cumulative_drift_mm: self.job.cumulative_drift_mm,
            velocity_mm_s: encoder.velocity_mm_s,
            elapsed_ms: if self.job.active {
                elapsed_ms(now_ms, self.job.start_ms)
            } else {
                0
            },
        }
    }

    /// Job statistics
    pub fn job_stats(&self) -> PositionJobStats {
        self.job
    }

    /// A job is active
    pub fn is_job_active(&self) -> bool {
        self.job.active
    }

    /// Recorded waypoints
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Recorded drift events
    pub fn drift_events(&self) -> &[DriftEvent] {
        &self.drift_events
    }

    pub fn clear_waypoints(&mut self) {
        self.waypoints.clear();
    }

    pub fn clear_drift_events(&mut self) {
        self.drift_events.clear();
    }

    /// Replace the three drift thresholds
    pub fn set_drift_thresholds(&mut self, minor_mm: f32, moderate_mm: f32, severe_mm: f32) {
        self.config.minor_drift_mm = minor_mm;
        self.config.moderate_drift_mm = moderate_mm;
        self.config.severe_drift_mm = severe_mm;
    }

    /// Sampling interval, floored at [`MIN_TRACKING_INTERVAL_MS`]
    pub fn set_interval_ms(&mut self, interval_ms: u32) {
        self.config.interval_ms = interval_ms.max(MIN_TRACKING_INTERVAL_MS);
    }

    /// Active configuration
    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }
}
