//! Feed subsystem
//!
//! Drives one feed axis a requested length while watching the runout
//! switch and the encoder. Fed distance is what the encoder measured,
//! not what was commanded.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use libm::fabsf;

use crate::elapsed_ms;
use crate::encoder::EncoderTelemetry;
use crate::motion::FeedInput;
use crate::report::{ReportSink, StatusLine};
use crate::traits::{MotionControl, MotionError, SensorBank, ThermalControl};

/// Feed speeds and jam detection
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeedConfig {
    /// Normal feed speed (mm/s)
    pub fast_speed_mm_s: f32,
    /// Dry-run speed (mm/s)
    pub slow_speed_mm_s: f32,
    /// Retract speed (mm/s)
    pub retract_speed_mm_s: f32,
    /// Encoder velocity below this over a window is a jam (mm/s)
    pub jam_threshold_mm_s: f32,
    /// Jam evaluation window (ms)
    pub jam_window_ms: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            fast_speed_mm_s: 20.0,
            slow_speed_mm_s: 5.0,
            retract_speed_mm_s: 15.0,
            jam_threshold_mm_s: 0.5,
            jam_window_ms: 500,
        }
    }
}

/// What the feed axis is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedMode {
    #[default]
    Idle,
    FeedA,
    FeedB,
    RetractA,
    RetractB,
    /// Feed without jam detection
    DryRun,
}

impl FeedMode {
    fn feeding(input: FeedInput) -> Self {
        match input {
            FeedInput::A => FeedMode::FeedA,
            FeedInput::B => FeedMode::FeedB,
        }
    }

    fn retracting(input: FeedInput) -> Self {
        match input {
            FeedInput::A => FeedMode::RetractA,
            FeedInput::B => FeedMode::RetractB,
        }
    }
}

/// Feed counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeedStatistics {
    pub total_fed_a_mm: f32,
    pub total_fed_b_mm: f32,
    /// Rate of the last completed feed (mm/s)
    pub average_feed_rate_mm_s: f32,
    pub jam_count: u32,
    pub slip_events: u32,
    pub runout_events: u32,
}

/// Reasons a feed cannot start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedError {
    /// Another feed is running
    Busy,
    /// Length must be positive
    InvalidLength,
    /// Hot end below the minimum motion temperature
    ColdExtrusion,
    /// Motor layer refused the move
    Motion(MotionError),
}

impl From<MotionError> for FeedError {
    fn from(e: MotionError) -> Self {
        FeedError::Motion(e)
    }
}

/// Terminal feed events, reported once
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedEvent {
    /// Axis reached its target
    Completed { input: FeedInput, fed_mm: f32 },
    /// Encoder stopped moving
    Jammed(FeedInput),
    /// Runout switch opened
    RanOut(FeedInput),
}

/// Feed subsystem state
#[derive(Debug, Clone)]
pub struct FeedSystem {
    config: FeedConfig,
    stats: FeedStatistics,
    mode: FeedMode,
    input: FeedInput,
    target_mm: f32,
    fed_mm: f32,
    start_encoder_mm: f32,
    started_ms: u32,
    last_jam_check_ms: u32,
    last_jam_position_mm: f32,
    jam_detected: bool,
    runout: [bool; 2],
    complete: bool,
}

impl FeedSystem {
    /// Create an idle feeder
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            stats: FeedStatistics::default(),
            mode: FeedMode::Idle,
            input: FeedInput::A,
            target_mm: 0.0,
            fed_mm: 0.0,
            start_encoder_mm: 0.0,
            started_ms: 0,
            last_jam_check_ms: 0,
            last_jam_position_mm: 0.0,
            jam_detected: false,
            runout: [false; 2],
            complete: false,
        }
    }

    /// Feed `length_mm` on `input`
    #[allow(clippy::too_many_arguments)]
    pub fn start_feed<M, T, R>(
        &mut self,
        input: FeedInput,
        length_mm: f32,
        encoder: &EncoderTelemetry,
        motion: &mut M,
        thermal: &T,
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), FeedError>
    where
        M: MotionControl,
        T: ThermalControl,
        R: ReportSink,
    {
        self.check_start(length_mm)?;
        if thermal.is_cold_extrusion_blocked() {
            sink.emit(StatusLine::ColdExtrusionBlocked);
            return Err(FeedError::ColdExtrusion);
        }
        let speed = self.config.fast_speed_mm_s;
        self.begin(FeedMode::feeding(input), input, length_mm, speed, encoder, motion, now_ms)
    }

    /// Pull `length_mm` back on `input`; no temperature check
    pub fn start_retract<M: MotionControl>(
        &mut self,
        input: FeedInput,
        length_mm: f32,
        encoder: &EncoderTelemetry,
        motion: &mut M,
        now_ms: u32,
    ) -> Result<(), FeedError> {
        self.check_start(length_mm)?;
        let speed = self.config.retract_speed_mm_s;
        self.begin(FeedMode::retracting(input), input, -length_mm, speed, encoder, motion, now_ms)
    }

    /// Feed slowly without jam detection or temperature check
    pub fn start_dry_run<M: MotionControl>(
        &mut self,
        input: FeedInput,
        length_mm: f32,
        encoder: &EncoderTelemetry,
        motion: &mut M,
        now_ms: u32,
    ) -> Result<(), FeedError> {
        self.check_start(length_mm)?;
        let speed = self.config.slow_speed_mm_s;
        self.begin(FeedMode::DryRun, input, length_mm, speed, encoder, motion, now_ms)
    }

    fn check_start(&self, length_mm: f32) -> Result<(), FeedError> {
        if self.mode != FeedMode::Idle {
            return Err(FeedError::Busy);
        }
        if !(length_mm > 0.0) {
            return Err(FeedError::InvalidLength);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn begin<M: MotionControl>(
        &mut self,
        mode: FeedMode,
        input: FeedInput,
        distance_mm: f32,
        speed_mm_s: f32,
        encoder: &EncoderTelemetry,
        motion: &mut M,
        now_ms: u32,
    ) -> Result<(), FeedError> {
        let axis = input.axis();
        motion.set_speed_mm_s(axis, speed_mm_s)?;
        motion.move_relative(axis, distance_mm)?;
        self.mode = mode;
        self.input = input;
        self.target_mm = fabsf(distance_mm);
        self.fed_mm = 0.0;
        self.start_encoder_mm = encoder.position_mm;
        self.started_ms = now_ms;
        self.last_jam_check_ms = now_ms;
        self.last_jam_position_mm = encoder.position_mm;
        self.jam_detected = false;
        self.complete = false;
        debug!("feed {} started", input.label());
        Ok(())
    }

    /// Advance the active feed
    pub fn tick<M, B, R>(
        &mut self,
        now_ms: u32,
        encoder: &EncoderTelemetry,
        motion: &mut M,
        sensors: &mut B,
        sink: &mut R,
    ) -> Option<FeedEvent>
    where
        M: MotionControl,
        B: SensorBank,
        R: ReportSink,
    {
        self.runout = [
            !sensors.filament_present(FeedInput::A),
            !sensors.filament_present(FeedInput::B),
        ];
        if self.mode == FeedMode::Idle {
            return None;
        }
        if matches!(self.mode, FeedMode::FeedA | FeedMode::FeedB) && self.is_runout(self.input) {
            self.stats.runout_events = self.stats.runout_events.wrapping_add(1);
            self.abort(motion);
            sink.emit(StatusLine::FeedRunout(self.input));
            warn!("runout on {}", self.input.label());
            return Some(FeedEvent::RanOut(self.input));
        }
        // a move that already finished cannot be jammed
        let idle = motion.is_idle(self.input.axis());
        if !idle && self.mode != FeedMode::DryRun && self.jammed(now_ms, encoder) {
            self.jam_detected = true;
            self.stats.jam_count = self.stats.jam_count.wrapping_add(1);
            self.abort(motion);
            sink.emit(StatusLine::FeedJam);
            warn!("jam on {}", self.input.label());
            return Some(FeedEvent::Jammed(self.input));
        }
        self.fed_mm = fabsf(encoder.position_mm - self.start_encoder_mm);
        if !idle {
            return None;
        }
        match self.input {
            FeedInput::A => self.stats.total_fed_a_mm += self.fed_mm,
            FeedInput::B => self.stats.total_fed_b_mm += self.fed_mm,
        }
        let elapsed_s = elapsed_ms(now_ms, self.started_ms) as f32 / 1000.0;
        if elapsed_s > 0.0 {
            self.stats.average_feed_rate_mm_s = self.fed_mm / elapsed_s;
        }
        self.mode = FeedMode::Idle;
        self.complete = true;
        sink.emit(StatusLine::FeedDone {
            input: self.input,
            fed_mm: self.fed_mm,
        });
        Some(FeedEvent::Completed {
            input: self.input,
            fed_mm: self.fed_mm,
        })
    }

    fn jammed(&mut self, now_ms: u32, encoder: &EncoderTelemetry) -> bool {
        let window = self.config.jam_window_ms;
        if window == 0 || elapsed_ms(now_ms, self.last_jam_check_ms) < window {
            return false;
        }
        self.last_jam_check_ms = now_ms;
        let moved = fabsf(encoder.position_mm - self.last_jam_position_mm);
        self.last_jam_position_mm = encoder.position_mm;
        let velocity = moved / (window as f32 / 1000.0);
        velocity < self.config.jam_threshold_mm_s
    }

    /// Stop everything and go idle
    pub fn abort<M: MotionControl>(&mut self, motion: &mut M) {
        motion.emergency_stop();
        self.mode = FeedMode::Idle;
        self.complete = false;
    }

    /// A feed is running
    pub fn is_active(&self) -> bool {
        self.mode != FeedMode::Idle
    }

    /// Last feed reached its target
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Current mode
    pub fn mode(&self) -> FeedMode {
        self.mode
    }

    /// Encoder distance covered by the current or last feed (mm)
    pub fn fed_mm(&self) -> f32 {
        self.fed_mm
    }

    /// Requested distance of the current or last feed (mm)
    pub fn target_mm(&self) -> f32 {
        self.target_mm
    }

    /// Runout switch state seen on the last tick
    pub fn is_runout(&self, input: FeedInput) -> bool {
        match input {
            FeedInput::A => self.runout[0],
            FeedInput::B => self.runout[1],
        }
    }

    /// Last feed ended in a jam
    pub fn is_jam_detected(&self) -> bool {
        self.jam_detected
    }

    /// Counters
    pub fn statistics(&self) -> FeedStatistics {
        self.stats
    }

    /// Active configuration
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Replace the three feed speeds
    pub fn set_speeds(&mut self, fast_mm_s: f32, slow_mm_s: f32, retract_mm_s: f32) {
        self.config.fast_speed_mm_s = fast_mm_s;
        self.config.slow_speed_mm_s = slow_mm_s;
        self.config.retract_speed_mm_s = retract_mm_s;
    }

    /// Jam velocity threshold (mm/s)
    pub fn set_jam_threshold(&mut self, threshold_mm_s: f32) {
        self.config.jam_threshold_mm_s = threshold_mm_s.max(0.0);
    }

    /// Count an encoder slip event during feeding
    pub fn record_slip(&mut self) {
        self.stats.slip_events = self.stats.slip_events.wrapping_add(1);
    }

    /// Zero all counters
    pub fn reset_statistics(&mut self) {
        self.stats = FeedStatistics::default();
    }
}
