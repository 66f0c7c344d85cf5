//! Splice execution engine
//!
//! One weld cycle: RETRACT_A → ADVANCE_B → HEATING → COMPRESSING →
//! HOLDING → COOLING → VERIFYING → COMPLETE or FAILED. Terminal phases
//! stay put until the next [`SpliceEngine::start`].

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use libm::fabsf;

use crate::config::{Material, SpliceProfile};
use crate::elapsed_ms;
use crate::encoder::EncoderTelemetry;
use crate::motion::MotorAxis;
use crate::report::{ReportSink, StatusLine};
use crate::traits::{MotionControl, MotionError, ThermalControl};

/// Phase budgets and fixed moves
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpliceConfig {
    /// Feed A pull-back before advancing B (mm)
    pub retract_mm: f32,
    /// Added to the compression distance when advancing B (mm)
    pub advance_margin_mm: f32,
    pub retract_timeout_ms: u32,
    pub advance_timeout_ms: u32,
    pub heater_timeout_ms: u32,
    pub compress_timeout_ms: u32,
    pub verify_timeout_ms: u32,
}

impl Default for SpliceConfig {
    fn default() -> Self {
        Self {
            retract_mm: 2.0,
            advance_margin_mm: 2.0,
            retract_timeout_ms: 5000,
            advance_timeout_ms: 5000,
            heater_timeout_ms: 120_000,
            compress_timeout_ms: 3000,
            verify_timeout_ms: 3000,
        }
    }
}

/// Splice phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SplicePhase {
    #[default]
    Idle,
    RetractA,
    AdvanceB,
    Heating,
    Compressing,
    Holding,
    Cooling,
    Verifying,
    Complete,
    Failed,
}

/// Live view of the running splice
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpliceTelemetry {
    pub phase: SplicePhase,
    pub temperature_x10: i16,
    pub compression_mm: f32,
    pub elapsed_ms: u32,
    pub estimated_remaining_ms: u32,
    pub quality: f32,
    pub passed: bool,
}

/// Running splice counters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpliceStatistics {
    pub total_attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub average_splice_time_ms: f32,
    pub average_quality: f32,
}

/// Reasons a splice cannot start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpliceError {
    /// A splice is already running
    Busy,
    /// The initial retract was refused
    Motion(MotionError),
}

impl From<MotionError> for SpliceError {
    fn from(e: MotionError) -> Self {
        SpliceError::Motion(e)
    }
}

/// Quality from the residual slip after the pull test
pub fn quality_from_slip(slip_mm: f32) -> f32 {
    let slip = fabsf(slip_mm);
    if slip < 0.5 {
        1.0
    } else if slip < 1.0 {
        0.8
    } else {
        0.5
    }
}

/// Splice sequencer state
#[derive(Debug, Clone)]
pub struct SpliceEngine {
    config: SpliceConfig,
    profile: SpliceProfile,
    material: Material,
    stats: SpliceStatistics,
    phase: SplicePhase,
    phase_started_ms: u32,
    splice_started_ms: u32,
    quality: f32,
    passed: bool,
    active: bool,
    complete: bool,
}

impl SpliceEngine {
    /// Create an idle engine
    pub fn new(config: SpliceConfig) -> Self {
        Self {
            config,
            profile: Material::Pla.splice_profile(),
            material: Material::Pla,
            stats: SpliceStatistics::default(),
            phase: SplicePhase::Idle,
            phase_started_ms: 0,
            splice_started_ms: 0,
            quality: 0.0,
            passed: false,
            active: false,
            complete: false,
        }
    }

    fn enter(&mut self, phase: SplicePhase, now_ms: u32) {
        self.phase = phase;
        self.phase_started_ms = now_ms;
        debug!("splice phase {}", phase);
    }

    /// Begin a splice with the profile for `material`
    pub fn start<M: MotionControl>(
        &mut self,
        material: Material,
        motion: &mut M,
        now_ms: u32,
    ) -> Result<(), SpliceError> {
        if self.active {
            return Err(SpliceError::Busy);
        }
        motion.move_relative(MotorAxis::FeedA, -self.config.retract_mm)?;
        self.material = material;
        self.profile = material.splice_profile();
        self.active = true;
        self.complete = false;
        self.quality = 0.0;
        self.passed = false;
        self.splice_started_ms = now_ms;
        self.enter(SplicePhase::RetractA, now_ms);
        info!("splice started ({})", material.name());
        Ok(())
    }

    /// Advance the splice; returns the outcome on the tick it finishes
    pub fn tick<M, T, R>(
        &mut self,
        now_ms: u32,
        motion: &mut M,
        thermal: &mut T,
        encoder: &EncoderTelemetry,
        sink: &mut R,
    ) -> Option<bool>
    where
        M: MotionControl,
        T: ThermalControl,
        R: ReportSink,
    {
        if !self.active {
            return None;
        }
        let elapsed = elapsed_ms(now_ms, self.phase_started_ms);
        let p = self.profile;
        match self.phase {
            SplicePhase::RetractA => {
                if motion.is_idle(MotorAxis::FeedA) {
                    let advance = p.compression_mm + self.config.advance_margin_mm;
                    if motion.move_relative(MotorAxis::FeedB, advance).is_err() {
                        return Some(self.finish(false, 0.0, now_ms, thermal, sink));
                    }
                    self.enter(SplicePhase::AdvanceB, now_ms);
                } else if elapsed > self.config.retract_timeout_ms {
                    return Some(self.finish(false, 0.0, now_ms, thermal, sink));
                }
            }
            SplicePhase::AdvanceB => {
                if motion.is_idle(MotorAxis::FeedB) {
                    thermal.set_target_x10(p.temperature_x10);
                    self.enter(SplicePhase::Heating, now_ms);
                } else if elapsed > self.config.advance_timeout_ms {
                    return Some(self.finish(false, 0.0, now_ms, thermal, sink));
                }
            }
            SplicePhase::Heating => {
                if thermal.is_target_reached() {
                    let c = p.compression_mm;
                    if motion.sync_move(c, -c, 0.0).is_err() {
                        return Some(self.finish(false, 0.0, now_ms, thermal, sink));
                    }
                    self.enter(SplicePhase::Compressing, now_ms);
                } else if elapsed > self.config.heater_timeout_ms {
                    warn!("splice heater timeout");
                    return Some(self.finish(false, 0.0, now_ms, thermal, sink));
                }
            }
            SplicePhase::Compressing => {
                if !motion.is_sync_active() || elapsed > self.config.compress_timeout_ms {
                    self.enter(SplicePhase::Holding, now_ms);
                }
            }
            SplicePhase::Holding => {
                if elapsed >= p.hold_ms {
                    thermal.set_heater_power(0);
                    thermal.set_cooling_fan(true);
                    self.enter(SplicePhase::Cooling, now_ms);
                }
            }
            SplicePhase::Cooling => {
                let cooled = thermal.current_x10() <= p.cool_target_x10;
                if cooled || elapsed >= p.cool_ms {
                    thermal.set_cooling_fan(false);
                    if p.pull_test_mm <= 0.0 {
                        return Some(self.finish(true, 1.0, now_ms, thermal, sink));
                    }
                    if motion.move_relative(MotorAxis::FeedA, -p.pull_test_mm).is_err() {
                        return Some(self.finish(false, 0.0, now_ms, thermal, sink));
                    }
                    self.enter(SplicePhase::Verifying, now_ms);
                }
            }
            SplicePhase::Verifying => {
                if motion.is_idle(MotorAxis::FeedA) {
                    let quality = quality_from_slip(encoder.slip_error_mm);
                    return Some(self.finish(quality >= 0.5, quality, now_ms, thermal, sink));
                } else if elapsed > self.config.verify_timeout_ms {
                    return Some(self.finish(false, 0.0, now_ms, thermal, sink));
                }
            }
            SplicePhase::Idle | SplicePhase::Complete | SplicePhase::Failed => {}
        }
        None
    }

    fn finish<T: ThermalControl, R: ReportSink>(
        &mut self,
        success: bool,
        quality: f32,
        now_ms: u32,
        thermal: &mut T,
        sink: &mut R,
    ) -> bool {
        self.passed = success;
        self.quality = quality;
        self.active = false;
        self.complete = true;
        let elapsed = elapsed_ms(now_ms, self.splice_started_ms);
        let s = &mut self.stats;
        s.total_attempts = s.total_attempts.wrapping_add(1);
        if success {
            s.successes = s.successes.wrapping_add(1);
        } else {
            s.failures = s.failures.wrapping_add(1);
        }
        let n = s.total_attempts.max(1) as f32;
        s.average_splice_time_ms += (elapsed as f32 - s.average_splice_time_ms) / n;
        s.average_quality += (quality - s.average_quality) / n;
        self.enter(
            if success {
                SplicePhase::Complete
            } else {
                SplicePhase::Failed
            },
            now_ms,
        );
        thermal.heater_off();
        thermal.set_cooling_fan(false);
        sink.emit(StatusLine::SpliceResult {
            success,
            elapsed_ms: elapsed,
            quality,
        });
        success
    }

    /// Stop the splice: motors halted, heater off, fan on
    ///
    /// The final fan state is off because completion always clears it.
    pub fn abort<M, T, R>(&mut self, motion: &mut M, thermal: &mut T, now_ms: u32, sink: &mut R)
    where
        M: MotionControl,
        T: ThermalControl,
        R: ReportSink,
    {
        if !self.active {
            return;
        }
        motion.emergency_stop();
        thermal.set_heater_power(0);
        thermal.set_cooling_fan(true);
        self.finish(false, 0.0, now_ms, thermal, sink);
        warn!("splice aborted");
    }

    fn estimate_remaining_ms<T: ThermalControl>(&self, thermal: &T, now_ms: u32) -> u32 {
        let elapsed = elapsed_ms(now_ms, self.phase_started_ms);
        let p = &self.profile;
        match self.phase {
            SplicePhase::Heating => {
                (thermal.seconds_to_target() * 1000.0) as u32 + p.hold_ms + p.cool_ms
            }
            SplicePhase::Holding => p.hold_ms.saturating_sub(elapsed) + p.cool_ms,
            SplicePhase::Cooling => p.cool_ms.saturating_sub(elapsed),
            _ => 0,
        }
    }

    /// Snapshot for status reporting
    pub fn telemetry<T: ThermalControl>(&self, thermal: &T, now_ms: u32) -> SpliceTelemetry {
        SpliceTelemetry {
            phase: self.phase,
            temperature_x10: thermal.current_x10(),
            compression_mm: self.profile.compression_mm,
            elapsed_ms: elapsed_ms(now_ms, self.splice_started_ms),
            estimated_remaining_ms: self.estimate_remaining_ms(thermal, now_ms),
            quality: self.quality,
            passed: self.passed,
        }
    }

    /// A splice is running
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The last splice has finished (either way)
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Current phase
    pub fn phase(&self) -> SplicePhase {
        self.phase
    }

    /// Material of the current or last splice
    pub fn material(&self) -> Material {
        self.material
    }

    /// Counters
    pub fn statistics(&self) -> SpliceStatistics {
        self.stats
    }

    /// Zero all counters
    pub fn reset_statistics(&mut self) {
        self.stats = SpliceStatistics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::control::tests::{motors, Motors};
    use crate::report::NullSink;
    use crate::thermal::tests::MockThermal;
    use crate::thermal::HeatingStage;

    fn slip(slip_error_mm: f32) -> EncoderTelemetry {
        EncoderTelemetry {
            slip_error_mm,
            ..EncoderTelemetry::default()
        }
    }

    fn drive(
        engine: &mut SpliceEngine,
        m: &mut Motors,
        thermal: &mut MockThermal,
        enc: &EncoderTelemetry,
        sink: &mut heapless::Vec<StatusLine, 4>,
    ) -> Option<bool> {
        for t in (0..200_000u32).step_by(100) {
            m.run(0);
            if engine.phase() == SplicePhase::Heating {
                thermal.current_x10 = thermal.target_x10;
            }
            if let Some(done) = engine.tick(t, m, thermal, enc, sink) {
                return Some(done);
            }
        }
        None
    }

    #[test]
    fn test_pla_splice_completes() {
        let mut engine = SpliceEngine::new(SpliceConfig::default());
        let mut m = motors();
        let mut thermal = MockThermal::default();
        let mut sink = heapless::Vec::new();
        engine.start(Material::from_index(0), &mut m, 0).unwrap();
        assert_eq!(engine.phase(), SplicePhase::RetractA);
        assert_eq!(drive(&mut engine, &mut m, &mut thermal, &slip(0.1), &mut sink), Some(true));
        assert_eq!(engine.phase(), SplicePhase::Complete);
        assert_eq!(engine.telemetry(&thermal, 0).quality, 1.0);
        assert_eq!(engine.statistics().successes, 1);
        assert_eq!(engine.statistics().average_quality, 1.0);
        assert_eq!(thermal.heater_power(), 0);
        assert_eq!(thermal.cooling_fan_pwm(), 0);
        assert_eq!(thermal.target_x10(), 0);
        assert!(matches!(
            sink[0],
            StatusLine::SpliceResult { success: true, .. }
        ));
    }

    #[test]
    fn test_heating_arms_target() {
        let mut engine = SpliceEngine::new(SpliceConfig::default());
        let mut m = motors();
        let mut thermal = MockThermal::default();
        engine.start(Material::Petg, &mut m, 0).unwrap();
        m.run(0);
        engine.tick(10, &mut m, &mut thermal, &slip(0.0), &mut NullSink);
        assert_eq!(engine.phase(), SplicePhase::AdvanceB);
        m.run(0);
        engine.tick(20, &mut m, &mut thermal, &slip(0.0), &mut NullSink);
        assert_eq!(engine.phase(), SplicePhase::Heating);
        assert_eq!(thermal.target_x10(), 2350);
        assert_eq!(thermal.stage(), HeatingStage::Preheat);
    }

    #[test]
    fn test_heater_timeout_fails() {
        let mut engine = SpliceEngine::new(SpliceConfig::default());
        let mut m = motors();
        let mut thermal = MockThermal::default();
        engine.start(Material::Pla, &mut m, 0).unwrap();
        m.run(0);
        engine.tick(0, &mut m, &mut thermal, &slip(0.0), &mut NullSink);
        m.run(0);
        engine.tick(0, &mut m, &mut thermal, &slip(0.0), &mut NullSink);
        assert_eq!(engine.phase(), SplicePhase::Heating);
        assert_eq!(
            engine.tick(120_000, &mut m, &mut thermal, &slip(0.0), &mut NullSink),
            None
        );
        assert_eq!(
            engine.tick(120_001, &mut m, &mut thermal, &slip(0.0), &mut NullSink),
            Some(false)
        );
        assert_eq!(engine.phase(), SplicePhase::Failed);
        assert_eq!(engine.statistics().failures, 1);
        assert_eq!(thermal.heater_power(), 0);
    }

    #[test]
    fn test_large_slip_lowers_quality() {
        let mut engine = SpliceEngine::new(SpliceConfig::default());
        let mut m = motors();
        let mut thermal = MockThermal::default();
        let mut sink = heapless::Vec::new();
        engine.start(Material::Abs, &mut m, 0).unwrap();
        assert_eq!(drive(&mut engine, &mut m, &mut thermal, &slip(-0.7), &mut sink), Some(true));
        assert_eq!(engine.telemetry(&thermal, 0).quality, 0.8);
    }

    #[test]
    fn test_busy_and_restart_from_terminal() {
        let mut engine = SpliceEngine::new(SpliceConfig::default());
        let mut m = motors();
        let mut thermal = MockThermal::default();
        engine.start(Material::Pla, &mut m, 0).unwrap();
        assert_eq!(engine.start(Material::Pla, &mut m, 1), Err(SpliceError::Busy));
        engine.abort(&mut m, &mut thermal, 5, &mut NullSink);
        assert_eq!(engine.phase(), SplicePhase::Failed);
        assert!(!m.drivers_enabled());
        engine.start(Material::Pla, &mut m, 10).unwrap();
        assert!(engine.is_active());
    }

    #[test]
    fn test_remaining_estimate() {
        let mut engine = SpliceEngine::new(SpliceConfig::default());
        let mut m = motors();
        let mut thermal = MockThermal::default();
        engine.start(Material::Pla, &mut m, 0).unwrap();
        m.run(0);
        engine.tick(0, &mut m, &mut thermal, &slip(0.0), &mut NullSink);
        m.run(0);
        engine.tick(0, &mut m, &mut thermal, &slip(0.0), &mut NullSink);
        thermal.current_x10 = 1700;
        // 20 s to target + 2 s hold + 5 s cool
        assert_eq!(engine.telemetry(&thermal, 0).estimated_remaining_ms, 27_000);
    }

    proptest::proptest! {
        #[test]
        fn prop_quality_bounds(slip in -10.0f32..10.0) {
            let q = quality_from_slip(slip);
            proptest::prop_assert!((0.0..=1.0).contains(&q));
            proptest::prop_assert!(q >= 0.5);
            proptest::prop_assert_eq!(q == 1.0, slip.abs() < 0.5);
        }
    }
}
