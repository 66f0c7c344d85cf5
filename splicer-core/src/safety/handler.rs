//! Current-fault bookkeeping and emergency shutdown

use super::error::{truncate_message, ErrorCode, ErrorMessage, RecoveryAction};
use crate::report::{ReportSink, StatusLine};
use crate::traits::{MotionControl, ThermalControl};

/// Stall faults are retried while the retry counter is below this
const STALL_RETRY_LIMIT: u8 = 2;

/// Holds at most one active fault
#[derive(Debug, Default)]
pub struct ErrorHandler {
    code: ErrorCode,
    message: ErrorMessage,
    retry_count: u8,
    shutdown_complete: bool,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fault, replacing any previous one
    ///
    /// Critical faults shut the machine down before returning.
    pub fn report<T, M, R>(
        &mut self,
        code: ErrorCode,
        message: &str,
        thermal: &mut T,
        motion: &mut M,
        sink: &mut R,
    ) where
        T: ThermalControl,
        M: MotionControl,
        R: ReportSink,
    {
        self.code = code;
        self.message = truncate_message(message);
        error!("fault {}: {}", code.as_u8(), message);
        sink.emit(StatusLine::Error {
            code,
            message: self.message.clone(),
        });

        if code.is_critical() {
            self.shutdown(thermal, motion, sink);
        }
    }

    /// Heater off, fan on, all motion stopped
    ///
    /// Runs once per fault; repeated calls do nothing until
    /// [`clear_error`](Self::clear_error).
    pub fn shutdown<T, M, R>(&mut self, thermal: &mut T, motion: &mut M, sink: &mut R)
    where
        T: ThermalControl,
        M: MotionControl,
        R: ReportSink,
    {
        if self.shutdown_complete {
            return;
        }
        thermal.heater_off();
        thermal.set_cooling_fan(true);
        motion.emergency_stop();
        self.shutdown_complete = true;
        warn!("emergency shutdown");
        sink.emit(StatusLine::EmergencyShutdown);
    }

    /// Drop the current fault and re-arm the shutdown latch
    pub fn clear_error(&mut self) {
        if self.code != ErrorCode::None {
            info!("fault {} cleared", self.code.as_u8());
        }
        self.code = ErrorCode::None;
        self.message.clear();
        self.retry_count = 0;
        self.shutdown_complete = false;
    }

    pub fn has_error(&self) -> bool {
        self.code != ErrorCode::None
    }

    pub fn error_code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_complete
    }

    /// Response prescribed for the current fault
    pub fn recovery_action(&self) -> RecoveryAction {
        match self.code {
            ErrorCode::None => RecoveryAction::None,
            ErrorCode::ThermalRunaway | ErrorCode::TempTooHigh => RecoveryAction::RetryAfterCool,
            ErrorCode::TempSensorFail => RecoveryAction::ManualRequired,
            ErrorCode::MotorStallA | ErrorCode::MotorStallB | ErrorCode::MotorStallWinder => {
                if self.retry_count < STALL_RETRY_LIMIT {
                    RecoveryAction::RetryOnce
                } else {
                    RecoveryAction::ManualRequired
                }
            }
            ErrorCode::FilamentJam
            | ErrorCode::FilamentOutA
            | ErrorCode::FilamentOutB => RecoveryAction::ManualRequired,
            ErrorCode::RecipeInvalid | ErrorCode::RecipeTooLarge => RecoveryAction::Abort,
            ErrorCode::CutterFail | ErrorCode::SerialTimeout => RecoveryAction::RetryOnce,
            ErrorCode::EmergencyStop => RecoveryAction::Reset,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recovery_action().is_automatic()
    }

    /// One automatic recovery step
    ///
    /// RetryOnce clears the fault; RetryAfterCool reports readiness and
    /// leaves clearing to the caller.
    pub fn attempt_recovery(&mut self) -> bool {
        let action = self.recovery_action();
        if !action.is_automatic() {
            return false;
        }
        self.retry_count = self.retry_count.saturating_add(1);
        match action {
            RecoveryAction::RetryOnce => {
                self.clear_error();
                true
            }
            RecoveryAction::RetryAfterCool => true,
            _ => false,
        }
    }
}
