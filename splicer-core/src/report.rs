//! Host-visible status lines
//!
//! Subsystems never print. They push [`StatusLine`] values into a
//! caller-supplied [`ReportSink`]; the transport decides how to render
//! them (the [`core::fmt::Display`] impl gives the line-oriented form).

use core::fmt;

use crate::command::CommandError;
use crate::motion::FeedInput;
use crate::safety::{ErrorCode, ErrorMessage, RecoveryPhase};
use crate::sequence::CutResult;
use crate::state::{RecipeError, RecipeState};
use crate::thermal::{HeatingStage, ThermalFault};

/// One host-visible event or telemetry record
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusLine {
    /// Thermal interlock tripped
    ThermalFault(ThermalFault),
    /// Relay autotune finished and gains applied
    AutotuneDone { kp: f32, ki: f32, kd: f32 },
    /// Relay autotune aborted
    AutotuneFailed(&'static str),
    /// Periodic heater telemetry
    TempLog {
        current_x10: i16,
        target_x10: i16,
        setpoint_x10: i16,
        pwm: u8,
        stage: HeatingStage,
    },
    /// Periodic encoder telemetry
    EncoderLog {
        ticks: i64,
        position_mm: f32,
        velocity_mm_s: f32,
        slip_mm: f32,
        quality: f32,
        failed: bool,
    },
    /// Encoder calibration stored
    EncoderCalibrated { ticks_per_mm: f32 },
    /// A cut finished
    CutDone(CutResult),
    /// Blade maintenance interval reached
    CutterMaintenance { cuts_since: u32 },
    /// A feed finished
    FeedDone { input: FeedInput, fed_mm: f32 },
    /// Runout sensor tripped during a feed
    FeedRunout(FeedInput),
    /// Encoder stopped moving during a feed
    FeedJam,
    /// Motion refused because the hot end is cold
    ColdExtrusionBlocked,
    /// A splice finished
    SpliceResult {
        success: bool,
        elapsed_ms: u32,
        quality: f32,
    },
    /// A fault was reported to the error handler
    Error { code: ErrorCode, message: ErrorMessage },
    /// Heater off, fan on, drivers disabled
    EmergencyShutdown,
    /// Recovery attempt started
    RecoveryBegin(ErrorCode),
    /// Recovery phase changed
    RecoveryPhase(RecoveryPhase),
    /// Recovery attempt ended
    RecoveryResult {
        success: bool,
        code: ErrorCode,
        retries: u8,
        elapsed_ms: u32,
    },
    /// Recovery aborted by the operator
    RecoveryAborted,
    /// Position tracking job started
    JobStarted(u32),
    /// Position tracking job ended
    JobStopped {
        distance_mm: f32,
        max_drift_mm: f32,
        drift_events: u16,
    },
    /// Drift above the severe threshold
    SevereDrift { error_mm: f32 },
    /// Recipe state changed
    StateChange { from: RecipeState, to: RecipeState },
    /// Recipe segment progress
    Progress { current: u16, total: u16 },
    /// Recipe finished
    RecipeDone,
    /// Recipe stopped in ERROR
    RecipeError(RecipeError),
    /// Reply to STATUS
    Status {
        state: RecipeState,
        current_x10: i16,
        target_x10: i16,
        stage: HeatingStage,
        error: ErrorCode,
    },
    /// Command accepted
    Ok,
    /// Command refused
    Rejected(CommandError),
}

fn tenths(value_x10: i16) -> f32 {
    value_x10 as f32 / 10.0
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::ThermalFault(fault) => write!(f, "THERMAL_FAULT {}", fault.label()),
            StatusLine::AutotuneDone { kp, ki, kd } => {
                write!(f, "PID_AUTOTUNE_DONE Kp={:.3} Ki={:.3} Kd={:.3}", kp, ki, kd)
            }
            StatusLine::AutotuneFailed(reason) => write!(f, "PID_AUTOTUNE_FAIL {}", reason),
            StatusLine::TempLog {
                current_x10,
                target_x10,
                setpoint_x10,
                pwm,
                stage,
            } => write!(
                f,
                "TEMP_LOG C={:.1} T={:.1} S={:.1} PWM={} STAGE={}",
                tenths(*current_x10),
                tenths(*target_x10),
                tenths(*setpoint_x10),
                pwm,
                stage.code()
            ),
            StatusLine::EncoderLog {
                ticks,
                position_mm,
                velocity_mm_s,
                slip_mm,
                quality,
                failed,
            } => write!(
                f,
                "ENC_LOG ticks={} pos={:.2} vel={:.2} slip={:.2} quality={:.2} failed={}",
                ticks, position_mm, velocity_mm_s, slip_mm, quality, *failed as u8
            ),
            StatusLine::EncoderCalibrated { ticks_per_mm } => {
                write!(f, "ENC_CAL ticks_per_mm={:.3}", ticks_per_mm)
            }
            StatusLine::CutDone(result) => write!(f, "CUT_DONE result={}", result.label()),
            StatusLine::CutterMaintenance { cuts_since } => {
                write!(f, "CUTTER_MAINT cuts_since={}", cuts_since)
            }
            StatusLine::FeedDone { input, fed_mm } => {
                write!(f, "FEED_DONE input={} fed={:.2}", input.label(), fed_mm)
            }
            StatusLine::FeedRunout(input) => write!(f, "FEED_RUNOUT {}", input.label()),
            StatusLine::FeedJam => f.write_str("FEED_JAM"),
            StatusLine::ColdExtrusionBlocked => f.write_str("ERROR COLD_EXTRUSION_BLOCK"),
            StatusLine::SpliceResult {
                success,
                elapsed_ms,
                quality,
            } => write!(
                f,
                "{} time={} quality={:.2}",
                if *success { "SPLICE_OK" } else { "SPLICE_FAIL" },
                elapsed_ms,
                quality
            ),
            StatusLine::Error { code, message } => {
                write!(f, "ERROR {}: {}", code.as_u8(), message.as_str())
            }
            StatusLine::EmergencyShutdown => f.write_str("EMERGENCY_SHUTDOWN"),
            StatusLine::RecoveryBegin(code) => write!(f, "RECOVERY BEGIN code={}", code.as_u8()),
            StatusLine::RecoveryPhase(phase) => write!(f, "RECOVERY {}", phase.label()),
            StatusLine::RecoveryResult {
                success,
                code,
                retries,
                elapsed_ms,
            } => write!(
                f,
                "{} code={} retries={} ms={}",
                if *success { "RECOVERY_OK" } else { "RECOVERY_FAIL" },
                code.as_u8(),
                retries,
                elapsed_ms
            ),
            StatusLine::RecoveryAborted => f.write_str("RECOVERY ABORTED"),
            StatusLine::JobStarted(id) => write!(f, "POS_JOB START id={}", id),
            StatusLine::JobStopped {
                distance_mm,
                max_drift_mm,
                drift_events,
            } => write!(
                f,
                "POS_JOB STOP dist={:.2} maxDrift={:.2} driftEvents={}",
                distance_mm, max_drift_mm, drift_events
            ),
            StatusLine::SevereDrift { error_mm } => write!(f, "POS_DRIFT SEVERE err={:.2}", error_mm),
            StatusLine::StateChange { from, to } => {
                write!(f, "STATE {} -> {}", from.name(), to.name())
            }
            StatusLine::Progress { current, total } => write!(f, "PROGRESS {}/{}", current, total),
            StatusLine::RecipeDone => f.write_str("DONE"),
            StatusLine::RecipeError(e) => write!(f, "RECIPE_ERROR {}", e.label()),
            StatusLine::Status {
                state,
                current_x10,
                target_x10,
                stage,
                error,
            } => write!(
                f,
                "STATUS state={} temp={:.1} target={:.1} stage={} error={}",
                state.name(),
                tenths(*current_x10),
                tenths(*target_x10),
                stage.code(),
                error.as_u8()
            ),
            StatusLine::Ok => f.write_str("OK"),
            StatusLine::Rejected(e) => write!(f, "ERR {}", e.label()),
        }
    }
}

/// Destination for status lines
pub trait ReportSink {
    /// Record one line
    fn emit(&mut self, line: StatusLine);
}

impl<T: ReportSink + ?Sized> ReportSink for &mut T {
    fn emit(&mut self, line: StatusLine) {
        (**self).emit(line);
    }
}

/// Buffers lines for the transport; drops lines once full
impl<const N: usize> ReportSink for heapless::Vec<StatusLine, N> {
    fn emit(&mut self, line: StatusLine) {
        if self.push(line).is_err() {
            warn!("status buffer full, line dropped");
        }
    }
}

/// Discards every line
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn emit(&mut self, _line: StatusLine) {}
}
