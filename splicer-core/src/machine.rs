//! Composed splicer
//!
//! [`Machine`] owns one instance of every subsystem and advances them in
//! a fixed order from a single [`Machine::tick`]. Faults surfaced by the
//! subsystems are funnelled into the [`ErrorHandler`] here, so no
//! subsystem reports to it directly.
//!
//! The step generator is separate: call [`Machine::run`] as often as the
//! main loop allows, and `tick` at the control rate.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandError};
use crate::config::{CutterStatsRecord, Persistence};
use crate::encoder::{EncoderConfig, EncoderIsr, EncoderSystem};
use crate::motion::{FeedInput, HomingStatus, MotorAxis, MotorControl};
use crate::report::{ReportSink, StatusLine};
use crate::safety::{ErrorCode, ErrorHandler, RecoveryConfig, RecoveryEngine};
use crate::sequence::{
    CutConfig, CutResult, CuttingSystem, FeedConfig, FeedEvent, FeedSystem, SpliceConfig,
    SpliceEngine,
};
use crate::state::{RecipeConfig, RecipeError, RecipeMachine};
use crate::thermal::ThermalFault;
use crate::tracking::{PositionTracker, TrackingConfig};
use crate::traits::{
    AxisDriver, CutterActuator, MotionControl, RecordStore, SensorBank, ThermalControl,
};

/// Configuration of every owned subsystem
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MachineConfig {
    pub encoder: EncoderConfig,
    pub cut: CutConfig,
    pub feed: FeedConfig,
    pub splice: SpliceConfig,
    pub tracking: TrackingConfig,
    pub recovery: RecoveryConfig,
    pub recipe: RecipeConfig,
}

pub struct Machine<'a, D, C, T, B, S> {
    encoder: EncoderSystem<'a>,
    motion: MotorControl<D, C>,
    thermal: T,
    sensors: B,
    persist: Persistence<S>,
    feed: FeedSystem,
    cutter: CuttingSystem,
    splice: SpliceEngine,
    tracking: PositionTracker,
    errors: ErrorHandler,
    recovery: RecoveryEngine,
    recipe: RecipeMachine,
    /// Thermal fault already forwarded to the error handler
    thermal_fault: Option<ThermalFault>,
    /// Stall already forwarded, per positional axis
    stalled: [bool; 3],
    slipping: bool,
}

impl<'a, D, C, T, B, S> Machine<'a, D, C, T, B, S>
where
    D: AxisDriver,
    C: CutterActuator,
    T: ThermalControl,
    B: SensorBank,
    S: RecordStore,
{
    /// Assemble the machine and restore persisted calibration and
    /// cutter statistics
    pub fn new(
        isr: &'a EncoderIsr,
        motion: MotorControl<D, C>,
        thermal: T,
        sensors: B,
        store: S,
        config: MachineConfig,
    ) -> Self {
        let mut persist = Persistence::new(store);

        let mut encoder = EncoderSystem::new(isr, config.encoder);
        encoder.load_calibration(&mut persist);

        let mut cutter = CuttingSystem::new(config.cut);
        if let Some(record) = persist.load::<CutterStatsRecord>() {
            cutter.restore_stats(&record);
            info!("cutter stats restored: {} cuts", record.total_cuts);
        }

        Self {
            encoder,
            motion,
            thermal,
            sensors,
            persist,
            feed: FeedSystem::new(config.feed),
            cutter,
            splice: SpliceEngine::new(config.splice),
            tracking: PositionTracker::new(config.tracking),
            errors: ErrorHandler::new(),
            recovery: RecoveryEngine::new(config.recovery),
            recipe: RecipeMachine::new(config.recipe),
            thermal_fault: None,
            stalled: [false; 3],
            slipping: false,
        }
    }

    /// Generate steps; call as often as possible
    pub fn run(&mut self, now_us: u32) {
        self.motion.run(now_us);
    }

    /// One control tick
    pub fn tick<R: ReportSink>(&mut self, now_ms: u32, now_us: u32, sink: &mut R) {
        self.encoder.update(now_ms, now_us, &mut self.motion, sink);
        let telemetry = self.encoder.telemetry();
        let health = self.encoder.health();

        self.motion.tick(now_ms);
        self.thermal.update(now_ms, sink);

        let feed_event = self.feed.tick(
            now_ms,
            &telemetry,
            &mut self.motion,
            &mut self.sensors,
            sink,
        );
        if telemetry.slip_detected && !self.slipping && self.feed.is_active() {
            self.feed.record_slip();
        }
        self.slipping = telemetry.slip_detected;

        let cut = self
            .cutter
            .tick(now_ms, &mut self.motion, &mut self.sensors, sink);
        self.splice
            .tick(now_ms, &mut self.motion, &mut self.thermal, &telemetry, sink);
        self.tracking
            .update(now_ms, &telemetry, &health, &self.motion, sink);
        self.recovery
            .tick(now_ms, &mut self.errors, &mut self.thermal, sink);
        self.recipe
            .tick(now_ms, &mut self.motion, &mut self.thermal, sink);

        if let Some(event) = feed_event {
            self.on_feed_event(event, now_ms, sink);
        }
        if let Some(result) = cut {
            self.on_cut(result, now_ms, sink);
        }
        self.check_thermal(now_ms, sink);
        self.check_stalls(now_ms, sink);
    }

    /// Record a fault; critical faults stop every sequencer first
    pub fn report_error<R: ReportSink>(
        &mut self,
        code: ErrorCode,
        message: &str,
        now_ms: u32,
        sink: &mut R,
    ) {
        if code.is_critical() {
            self.abort_all(now_ms, sink);
        }
        self.errors
            .report(code, message, &mut self.thermal, &mut self.motion, sink);
    }

    /// Parse and execute one host line
    pub fn handle_line<R: ReportSink>(
        &mut self,
        line: &str,
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), CommandError> {
        match Command::parse(line) {
            Ok(command) => self.execute(command, now_ms, sink),
            Err(e) => {
                sink.emit(StatusLine::Rejected(e));
                Err(e)
            }
        }
    }

    /// Execute a command, answering with OK or a rejection line
    pub fn execute<R: ReportSink>(
        &mut self,
        command: Command,
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), CommandError> {
        let result = self.dispatch(command, now_ms, sink);
        match result {
            Ok(()) => sink.emit(StatusLine::Ok),
            Err(e) => {
                debug!("command rejected: {}", e.label());
                sink.emit(StatusLine::Rejected(e));
            }
        }
        result
    }

    fn dispatch<R: ReportSink>(
        &mut self,
        command: Command,
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), CommandError> {
        match command {
            Command::Status | Command::Temp(None) => self.emit_status(sink),
            Command::Start => self.recipe.start(now_ms, sink)?,
            Command::Pause => self.recipe.pause(&mut self.motion, &mut self.thermal)?,
            Command::Resume => self.recipe.resume(&mut self.thermal, now_ms)?,
            Command::Abort => self.abort_all(now_ms, sink),
            Command::EmergencyStop => {
                self.report_error(ErrorCode::EmergencyStop, "emergency stop", now_ms, sink)
            }
            Command::ClearError => self.errors.clear_error(),
            Command::Temp(Some(target_x10)) => self.thermal.set_target_x10(target_x10),
            Command::Autotune(target_x10) => {
                if !self.thermal.start_autotune(target_x10) {
                    return Err(CommandError::Busy);
                }
            }
            Command::Splice(material) => {
                if self.errors.has_error() {
                    return Err(CommandError::InvalidState);
                }
                self.splice.start(material, &mut self.motion, now_ms)?;
            }
            Command::Cut => {
                if self.cutter.is_in_progress() || self.cutter.is_manual_cut_pending() {
                    return Err(CommandError::Busy);
                }
                self.cutter.request_manual_cut();
            }
            Command::AcknowledgeMaintenance => {
                self.cutter.acknowledge_maintenance();
                self.persist.save(&self.cutter.stats_record())?;
            }
            Command::Feed { input, length_mm } => {
                let telemetry = self.encoder.telemetry();
                self.feed.start_feed(
                    input,
                    length_mm,
                    &telemetry,
                    &mut self.motion,
                    &self.thermal,
                    now_ms,
                    sink,
                )?;
            }
            Command::Retract { input, length_mm } => {
                let telemetry = self.encoder.telemetry();
                self.feed
                    .start_retract(input, length_mm, &telemetry, &mut self.motion, now_ms)?;
            }
            Command::RecipeBegin => self.recipe.begin_load(now_ms, sink)?,
            Command::RecipeSegment(segment) => {
                if let Err(e) = self.recipe.push_segment(segment) {
                    self.report_recipe_error(e, now_ms, sink);
                    return Err(e.into());
                }
            }
            Command::RecipeEnd => self.recipe.finish_load(now_ms, sink)?,
            Command::EncoderCalibrate(length_mm) => self.encoder.begin_calibration(length_mm)?,
            Command::EncoderCalibrateDone => {
                let ticks_per_mm = self.encoder.complete_calibration(&mut self.persist)?;
                sink.emit(StatusLine::EncoderCalibrated { ticks_per_mm });
            }
            Command::EncoderCalibrateAbort => self.encoder.abort_calibration(),
            Command::EncoderReset => self.encoder.reset_counters(),
            Command::EncoderClosedLoop(enabled) => self.encoder.set_closed_loop(enabled),
            Command::EncoderLog(interval_ms) => self.encoder.set_log_interval(interval_ms),
            Command::TempLog(interval_ms) => self.thermal.set_log_interval(interval_ms),
            Command::JobStart => {
                let telemetry = self.encoder.telemetry();
                let health = self.encoder.health();
                self.tracking.start_job(&telemetry, &health, now_ms, sink);
            }
            Command::JobStop => self.tracking.stop_job(sink),
            Command::RecoveryBegin => self.recovery.begin(&self.errors, now_ms, sink)?,
            Command::RecoveryConfirm => {
                self.recovery
                    .confirm_user(&mut self.errors, now_ms, sink)?
            }
            Command::RecoveryAbort => self.abort_recovery(now_ms, sink)?,
        }
        Ok(())
    }

    /// Stop every sequencer: motors halted, heater off, fan on
    pub fn abort_all<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) {
        self.feed.abort(&mut self.motion);
        if self.cutter.is_in_progress() {
            self.cutter.abort(&mut self.motion);
        }
        self.splice
            .abort(&mut self.motion, &mut self.thermal, now_ms, sink);
        self.recipe
            .abort(&mut self.motion, &mut self.thermal, now_ms, sink);
    }

    /// Abort recovery together with any splice it was guarding
    pub fn abort_recovery<R: ReportSink>(
        &mut self,
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), CommandError> {
        if !self.recovery.is_active() {
            return Err(CommandError::InvalidState);
        }
        self.splice
            .abort(&mut self.motion, &mut self.thermal, now_ms, sink);
        self.recovery
            .abort(&mut self.errors, &mut self.thermal, sink)?;
        Ok(())
    }

    fn emit_status<R: ReportSink>(&self, sink: &mut R) {
        sink.emit(StatusLine::Status {
            state: self.recipe.state(),
            current_x10: self.thermal.current_x10(),
            target_x10: self.thermal.target_x10(),
            stage: self.thermal.stage(),
            error: self.errors.error_code(),
        });
    }

    fn on_feed_event<R: ReportSink>(&mut self, event: FeedEvent, now_ms: u32, sink: &mut R) {
        match event {
            FeedEvent::Completed { .. } => {}
            FeedEvent::Jammed(input) => {
                let message = match input {
                    FeedInput::A => "jam on input A",
                    FeedInput::B => "jam on input B",
                };
                self.report_error(ErrorCode::FilamentJam, message, now_ms, sink);
            }
            FeedEvent::RanOut(input) => {
                self.report_error(ErrorCode::runout(input), "filament runout", now_ms, sink)
            }
        }
    }

    fn on_cut<R: ReportSink>(&mut self, result: CutResult, now_ms: u32, sink: &mut R) {
        if let Err(e) = self.persist.save(&self.cutter.stats_record()) {
            warn!("cutter stats not saved: {}", e);
        }
        if result.is_failure() {
            self.report_error(ErrorCode::CutterFail, result.label(), now_ms, sink);
        }
    }

    fn report_recipe_error<R: ReportSink>(&mut self, error: RecipeError, now_ms: u32, sink: &mut R) {
        let code = match error {
            RecipeError::TooLarge => ErrorCode::RecipeTooLarge,
            RecipeError::InvalidSegment | RecipeError::Empty => ErrorCode::RecipeInvalid,
            _ => return,
        };
        self.report_error(code, error.label(), now_ms, sink);
    }

    /// Forward a newly tripped thermal interlock once
    fn check_thermal<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) {
        let fault = self.thermal.telemetry().fault;
        if fault == self.thermal_fault {
            return;
        }
        self.thermal_fault = fault;
        if let Some(fault) = fault {
            self.report_error(ErrorCode::thermal(fault), fault.label(), now_ms, sink);
        }
    }

    /// Forward driver stalls once per stall; homing stalls are expected
    fn check_stalls<R: ReportSink>(&mut self, now_ms: u32, sink: &mut R) {
        let homing = match self.motion.homing_status() {
            HomingStatus::Seeking(axis) => Some(axis),
            _ => None,
        };
        for (i, axis) in MotorAxis::POSITIONAL.into_iter().enumerate() {
            let stalled = homing != Some(axis) && self.motion.diagnostics(axis).stall_detected;
            if stalled && !self.stalled[i] {
                if let Some(code) = ErrorCode::stall(axis) {
                    self.report_error(code, "motor stall", now_ms, sink);
                }
            }
            self.stalled[i] = stalled;
        }
    }

    pub fn encoder(&self) -> &EncoderSystem<'a> {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut EncoderSystem<'a> {
        &mut self.encoder
    }

    pub fn motion(&self) -> &MotorControl<D, C> {
        &self.motion
    }

    pub fn motion_mut(&mut self) -> &mut MotorControl<D, C> {
        &mut self.motion
    }

    pub fn thermal(&self) -> &T {
        &self.thermal
    }

    pub fn thermal_mut(&mut self) -> &mut T {
        &mut self.thermal
    }

    pub fn sensors_mut(&mut self) -> &mut B {
        &mut self.sensors
    }

    pub fn persistence(&self) -> &Persistence<S> {
        &self.persist
    }

    pub fn persistence_mut(&mut self) -> &mut Persistence<S> {
        &mut self.persist
    }

    pub fn feed(&self) -> &FeedSystem {
        &self.feed
    }

    pub fn cutter(&self) -> &CuttingSystem {
        &self.cutter
    }

    pub fn cutter_mut(&mut self) -> &mut CuttingSystem {
        &mut self.cutter
    }

    pub fn splice(&self) -> &SpliceEngine {
        &self.splice
    }

    pub fn tracking(&self) -> &PositionTracker {
        &self.tracking
    }

    pub fn tracking_mut(&mut self) -> &mut PositionTracker {
        &mut self.tracking
    }

    pub fn errors(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    pub fn recipe(&self) -> &RecipeMachine {
        &self.recipe
    }

    pub fn recipe_mut(&mut self) -> &mut RecipeMachine {
        &mut self.recipe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::persist::tests::MemStore;
    use crate::config::CalibrationRecord;
    use crate::motion::control::tests::{motors, MockAxis, MockBlade};
    use crate::safety::RecoveryPhase;
    use crate::sequence::cut::tests::MockSensors;
    use crate::state::RecipeState;
    use crate::thermal::tests::MockThermal;

    type TestMachine<'a> = Machine<'a, MockAxis, MockBlade, MockThermal, MockSensors, MemStore>;

    fn machine_with(isr: &EncoderIsr, store: MemStore) -> TestMachine<'_> {
        Machine::new(
            isr,
            motors(),
            MockThermal::default(),
            MockSensors::default(),
            store,
            MachineConfig::default(),
        )
    }

    fn machine(isr: &EncoderIsr) -> TestMachine<'_> {
        machine_with(isr, MemStore::default())
    }

    type Lines = heapless::Vec<StatusLine, 64>;

    /// Run the loop in 50 ms steps until `done` or `limit` ms pass
    fn run_for(
        m: &mut TestMachine<'_>,
        out: &mut Lines,
        from_ms: u32,
        limit_ms: u32,
        done: impl Fn(&TestMachine<'_>) -> bool,
    ) -> u32 {
        let mut now = from_ms;
        while now < from_ms + limit_ms && !done(m) {
            now += 50;
            m.run(now * 1000);
            m.tick(now, now * 1000, out);
        }
        now
    }

    #[test]
    fn test_thermal_runaway_report_shuts_down() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.thermal_mut().set_target_x10(2100);
        m.thermal_mut().power = 200;

        m.report_error(ErrorCode::ThermalRunaway, "runaway", 0, &mut out);

        assert!(m.errors().has_error());
        assert_eq!(m.thermal().heater_power(), 0);
        assert_eq!(m.thermal().cooling_fan_pwm(), 255);
        assert!(!m.motion().drivers_enabled());
        assert!(out.contains(&StatusLine::EmergencyShutdown));
    }

    #[test]
    fn test_thermal_fault_forwarded_once() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.thermal_mut().trip(ThermalFault::Runaway);

        m.tick(100, 100_000, &mut out);
        m.tick(200, 200_000, &mut out);

        assert_eq!(m.errors().error_code(), ErrorCode::ThermalRunaway);
        assert_eq!(m.thermal().cooling_fan_pwm(), 255);
        let errors = out
            .iter()
            .filter(|l| matches!(l, StatusLine::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(out.contains(&StatusLine::EmergencyShutdown));
    }

    #[test]
    fn test_feed_jam_raises_error() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.motion_mut().driver_mut(MotorAxis::FeedA).unwrap().hold_motion = true;

        m.handle_line("FEED A 20", 0, &mut out).unwrap();
        assert!(m.feed().is_active());
        run_for(&mut m, &mut out, 0, 2000, |m| !m.feed().is_active());

        assert!(!m.feed().is_active());
        assert_eq!(m.feed().statistics().jam_count, 1);
        assert_eq!(m.errors().error_code(), ErrorCode::FilamentJam);
        assert!(out.contains(&StatusLine::FeedJam));
    }

    #[test]
    fn test_cold_feed_rejected() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.thermal_mut().set_target_x10(2100);
        m.thermal_mut().current_x10 = 250;

        assert_eq!(
            m.handle_line("FEED B 10", 0, &mut out),
            Err(CommandError::ColdExtrusion)
        );
        assert!(out.contains(&StatusLine::ColdExtrusionBlocked));
        assert_eq!(
            out.last(),
            Some(&StatusLine::Rejected(CommandError::ColdExtrusion))
        );
    }

    #[test]
    fn test_runout_raises_error() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.motion_mut().driver_mut(MotorAxis::FeedB).unwrap().hold_motion = true;
        m.handle_line("FEED B 20", 0, &mut out).unwrap();
        m.sensors_mut().present[1] = false;

        m.tick(10, 10_000, &mut out);

        assert_eq!(m.errors().error_code(), ErrorCode::FilamentOutB);
        assert!(out.contains(&StatusLine::FeedRunout(FeedInput::B)));
    }

    #[test]
    fn test_cut_persists_statistics() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();

        m.handle_line("CUT", 0, &mut out).unwrap();
        assert_eq!(m.handle_line("CUT", 0, &mut out), Err(CommandError::Busy));
        run_for(&mut m, &mut out, 0, 5000, |m| m.cutter().last_result().is_some());

        assert_eq!(m.cutter().last_result(), Some(CutResult::Success));
        assert!(out.contains(&StatusLine::CutDone(CutResult::Success)));
        let saved = m
            .persistence_mut()
            .load::<CutterStatsRecord>()
            .unwrap();
        assert_eq!(saved.total_cuts, 1);
        assert_eq!(saved.successful_cuts, 1);
        assert!(!m.errors().has_error());
    }

    #[test]
    fn test_boot_restores_records() {
        let mut persist = Persistence::new(MemStore::default());
        persist
            .save(&CalibrationRecord {
                ticks_per_mm: 15.0,
                calibration_runs: 2,
            })
            .unwrap();
        persist
            .save(&CutterStatsRecord {
                total_cuts: 40,
                successful_cuts: 38,
                failed_cuts: 2,
                last_maintenance_cut: 0,
            })
            .unwrap();

        let isr = EncoderIsr::new(20);
        let m = machine_with(&isr, persist.into_store());

        assert_eq!(m.encoder().ticks_per_mm(), 15.0);
        assert_eq!(m.encoder().health().calibration_runs, 2);
        assert_eq!(m.cutter().statistics().total_cuts, 40);
    }

    #[test]
    fn test_corrupt_records_fall_back() {
        let mut persist = Persistence::new(MemStore::default());
        persist
            .save(&CalibrationRecord {
                ticks_per_mm: 15.0,
                calibration_runs: 2,
            })
            .unwrap();
        let mut store = persist.into_store();
        store.slots[0][5] ^= 0xFF;

        let isr = EncoderIsr::new(20);
        let m = machine_with(&isr, store);

        assert_eq!(m.encoder().ticks_per_mm(), 12.0);
        assert_eq!(m.persistence().corrupt_loads(), 1);
    }

    #[test]
    fn test_status_and_unknown_commands() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();

        m.handle_line("STATUS", 0, &mut out).unwrap();
        assert!(matches!(
            out[0],
            StatusLine::Status {
                state: RecipeState::Idle,
                error: ErrorCode::None,
                ..
            }
        ));
        assert_eq!(out[1], StatusLine::Ok);

        assert_eq!(m.handle_line("WELD", 0, &mut out), Err(CommandError::Unknown));
        assert_eq!(
            out.last(),
            Some(&StatusLine::Rejected(CommandError::Unknown))
        );
        assert_eq!(m.handle_line("START", 0, &mut out), Err(CommandError::InvalidState));
    }

    #[test]
    fn test_estop_and_clear() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();

        m.handle_line("ESTOP", 0, &mut out).unwrap();
        assert_eq!(m.errors().error_code(), ErrorCode::EmergencyStop);
        assert!(m.errors().is_shutdown());
        assert_eq!(
            m.handle_line("SPLICE PLA", 0, &mut out),
            Err(CommandError::InvalidState)
        );

        m.handle_line("CLEAR", 0, &mut out).unwrap();
        assert!(!m.errors().has_error());
        m.handle_line("SPLICE PLA", 0, &mut out).unwrap();
        assert!(m.splice().is_active());
    }

    #[test]
    fn test_recovery_commands() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();

        assert_eq!(
            m.handle_line("RECOVERY BEGIN", 0, &mut out),
            Err(CommandError::InvalidState)
        );
        m.report_error(ErrorCode::FilamentJam, "jam", 0, &mut out);
        m.handle_line("RECOVERY BEGIN", 0, &mut out).unwrap();
        let assessed = run_for(&mut m, &mut out, 0, 2000, |m| m.recovery().is_awaiting_user());
        assert!(m.recovery().is_awaiting_user());
        // action is read after the 500 ms settling delay
        assert_eq!(assessed, 500);

        m.handle_line("RECOVERY CONFIRM", 2000, &mut out).unwrap();
        assert_eq!(m.recovery().phase(), RecoveryPhase::Resolved);
        assert!(!m.errors().has_error());
        let phases: heapless::Vec<RecoveryPhase, 8> = out
            .iter()
            .filter_map(|l| match l {
                StatusLine::RecoveryPhase(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases.as_slice(),
            &[
                RecoveryPhase::Assessing,
                RecoveryPhase::AwaitingUser,
                RecoveryPhase::Resolved
            ]
        );
    }

    #[test]
    fn test_recovery_abort_command() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.report_error(ErrorCode::ThermalRunaway, "runaway", 0, &mut out);
        m.handle_line("RECOVERY BEGIN", 0, &mut out).unwrap();

        m.handle_line("RECOVERY ABORT", 10, &mut out).unwrap();
        assert!(!m.recovery().is_active());
        assert!(!m.errors().has_error());
        assert_eq!(m.thermal().heater_power(), 0);
        assert_eq!(m.thermal().cooling_fan_pwm(), 0);
        assert_eq!(
            m.handle_line("RECOVERY ABORT", 20, &mut out),
            Err(CommandError::InvalidState)
        );
    }

    #[test]
    fn test_recipe_upload_and_run() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.thermal_mut().current_x10 = 2100;

        m.handle_line("RECIPE BEGIN", 0, &mut out).unwrap();
        m.handle_line("SEG 0 10", 0, &mut out).unwrap();
        m.handle_line("RECIPE END", 0, &mut out).unwrap();
        assert_eq!(m.recipe().state(), RecipeState::Ready);

        m.handle_line("START", 0, &mut out).unwrap();
        assert_eq!(m.recipe().state(), RecipeState::FeedingA);
        m.handle_line("PAUSE", 10, &mut out).unwrap();
        assert!(m.recipe().is_paused());
        m.handle_line("RESUME", 20, &mut out).unwrap();

        out.clear();
        run_for(&mut m, &mut out, 20, 20_000, |m| {
            m.recipe().state() == RecipeState::Complete
        });
        assert_eq!(m.recipe().state(), RecipeState::Complete);
        assert!(out.contains(&StatusLine::RecipeDone));
    }

    #[test]
    fn test_invalid_segment_reports_error() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.handle_line("RECIPE BEGIN", 0, &mut out).unwrap();
        m.recipe_mut().push_segment(crate::state::Segment::from_color(0, 1.0)).unwrap();

        assert_eq!(
            m.execute(
                Command::RecipeSegment(crate::state::Segment::from_color(0, -3.0)),
                0,
                &mut out
            ),
            Err(CommandError::InvalidArgument)
        );
        assert_eq!(m.errors().error_code(), ErrorCode::RecipeInvalid);
    }

    #[test]
    fn test_stall_forwarded() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.motion_mut().driver_mut(MotorAxis::Winder).unwrap().stalled = true;

        m.tick(10, 10_000, &mut out);
        m.tick(20, 20_000, &mut out);

        assert_eq!(m.errors().error_code(), ErrorCode::MotorStallWinder);
        let errors = out
            .iter()
            .filter(|l| matches!(l, StatusLine::Error { .. }))
            .count();
        assert_eq!(errors, 1);
    }

    #[test]
    fn test_abort_leaves_safe_state() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.thermal_mut().current_x10 = 2100;
        m.handle_line("TEMP 210", 0, &mut out).unwrap();
        m.handle_line("FEED A 10", 0, &mut out).unwrap();

        m.handle_line("ABORT", 5, &mut out).unwrap();

        assert!(!m.feed().is_active());
        assert_eq!(m.thermal().target_x10(), 0);
        assert_eq!(m.thermal().heater_power(), 0);
        assert!(m.motion().all_idle());
    }

    #[test]
    fn test_log_interval_commands() {
        let isr = EncoderIsr::new(20);
        let mut m = machine(&isr);
        let mut out = Lines::new();
        m.handle_line("TEMPLOG 1000", 0, &mut out).unwrap();
        m.handle_line("ENCODER LOG 250", 0, &mut out).unwrap();
        assert_eq!(m.thermal().log_interval_ms, 1000);
        assert_eq!(m.encoder().config().log_interval_ms, 250);
    }
}
