//! Automatic fault recovery
//!
//! A recovery starts in ASSESSING, acts on the handler's
//! [`RecoveryAction`] and finishes in exactly one of RESOLVED or
//! UNRECOVERABLE unless it is aborted first.
//!
//! ```text
//! Idle -> Assessing -> Retrying -> Resolved
//!             |  ^         |
//!             |  +---------+----> Unrecoverable
//!             +-> CooldownWait -> Retrying
//!             +-> AwaitingUser -> Resolved (confirm)
//! ```

use heapless::HistoryBuffer;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::error::{ErrorCode, RecoveryAction};
use super::handler::ErrorHandler;
use crate::elapsed_ms;
use crate::report::{ReportSink, StatusLine};
use crate::traits::ThermalControl;

/// Attempts kept for inspection
pub const RECOVERY_HISTORY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecoveryPhase {
    #[default]
    Idle,
    Assessing,
    CooldownWait,
    Retrying,
    AwaitingUser,
    Resolved,
    Unrecoverable,
}

impl RecoveryPhase {
    pub fn label(self) -> &'static str {
        match self {
            RecoveryPhase::Idle => "IDLE",
            RecoveryPhase::Assessing => "ASSESSING",
            RecoveryPhase::CooldownWait => "COOLDOWN_WAIT",
            RecoveryPhase::Retrying => "RETRYING",
            RecoveryPhase::AwaitingUser => "AWAITING_USER",
            RecoveryPhase::Resolved => "RESOLVED",
            RecoveryPhase::Unrecoverable => "UNRECOVERABLE",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RecoveryPhase::Resolved | RecoveryPhase::Unrecoverable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecoveryConfig {
    /// Retries before giving up
    pub max_retries: u8,
    /// Longest wait for the hotend to cool (ms)
    pub cooldown_timeout_ms: u32,
    /// Cooldown completes at or below this (°C×10)
    pub cooldown_target_x10: i16,
    /// Pause before each retry (ms)
    pub retry_delay_ms: u32,
    /// Settling time before the action is read (ms)
    pub assess_delay_ms: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cooldown_timeout_ms: 60_000,
            cooldown_target_x10: 600,
            retry_delay_ms: 1000,
            assess_delay_ms: 500,
        }
    }
}

/// Record of one recovery
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecoveryAttempt {
    pub code: ErrorCode,
    pub action: RecoveryAction,
    pub phase: RecoveryPhase,
    pub retry_number: u8,
    pub started_ms: u32,
    pub duration_ms: u32,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecoveryStatistics {
    pub total_errors: u32,
    pub auto_recovered: u32,
    pub user_recovered: u32,
    pub unrecoverable: u32,
    pub total_retries: u32,
    pub aborted_jobs: u32,
    /// Mean duration of successful recoveries (ms)
    pub average_recovery_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecoveryError {
    /// A recovery is already running
    Busy,
    /// Nothing to recover from
    NoError,
    /// Not waiting on the operator
    NotAwaitingUser,
    /// No recovery running
    NotActive,
}

impl core::fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecoveryError::Busy => write!(f, "recovery in progress"),
            RecoveryError::NoError => write!(f, "no active error"),
            RecoveryError::NotAwaitingUser => write!(f, "not awaiting user"),
            RecoveryError::NotActive => write!(f, "no recovery active"),
        }
    }
}

pub struct RecoveryEngine {
    config: RecoveryConfig,
    phase: RecoveryPhase,
    phase_started_ms: u32,
    active: bool,
    current: RecoveryAttempt,
    history: HistoryBuffer<RecoveryAttempt, RECOVERY_HISTORY>,
    stats: RecoveryStatistics,
}

impl RecoveryEngine {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            phase: RecoveryPhase::Idle,
            phase_started_ms: 0,
            active: false,
            current: RecoveryAttempt::default(),
            history: HistoryBuffer::new(),
            stats: RecoveryStatistics::default(),
        }
    }

    /// Start recovering from the handler's current fault
    pub fn begin<R: ReportSink>(
        &mut self,
        handler: &ErrorHandler,
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), RecoveryError> {
        if self.active {
            return Err(RecoveryError::Busy);
        }
        if !handler.has_error() {
            return Err(RecoveryError::NoError);
        }

        let code = handler.error_code();
        self.active = true;
        self.current = RecoveryAttempt {
            code,
            action: handler.recovery_action(),
            started_ms: now_ms,
            ..RecoveryAttempt::default()
        };
        self.stats.total_errors += 1;
        info!("recovery started for fault {}", code.as_u8());
        sink.emit(StatusLine::RecoveryBegin(code));
        self.enter(RecoveryPhase::Assessing, now_ms, sink);
        Ok(())
    }

    /// Advance the recovery; a no-op when none is running
    pub fn tick<T, R>(&mut self, now_ms: u32, handler: &mut ErrorHandler, thermal: &mut T, sink: &mut R)
    where
        T: ThermalControl,
        R: ReportSink,
    {
        if !self.active {
            return;
        }
        let elapsed = elapsed_ms(now_ms, self.phase_started_ms);

        match self.phase {
            RecoveryPhase::Assessing => {
                if elapsed < self.config.assess_delay_ms {
                    return;
                }
                let action = handler.recovery_action();
                self.current.action = action;
                match action {
                    RecoveryAction::RetryOnce => self.enter(RecoveryPhase::Retrying, now_ms, sink),
                    RecoveryAction::RetryAfterCool => {
                        thermal.heater_off();
                        thermal.set_cooling_fan(true);
                        self.enter(RecoveryPhase::CooldownWait, now_ms, sink);
                    }
                    RecoveryAction::ManualRequired => {
                        self.enter(RecoveryPhase::AwaitingUser, now_ms, sink)
                    }
                    RecoveryAction::Abort | RecoveryAction::Reset => {
                        self.stats.aborted_jobs += 1;
                        self.finish(false, now_ms, sink);
                    }
                    RecoveryAction::None => self.finish(false, now_ms, sink),
                }
            }
            RecoveryPhase::CooldownWait => {
                if thermal.current_x10() <= self.config.cooldown_target_x10 {
                    thermal.set_cooling_fan(false);
                    self.enter(RecoveryPhase::Retrying, now_ms, sink);
                } else if elapsed > self.config.cooldown_timeout_ms {
                    warn!("recovery cooldown timed out");
                    thermal.set_cooling_fan(false);
                    self.finish(false, now_ms, sink);
                }
            }
            RecoveryPhase::Retrying => {
                if elapsed < self.config.retry_delay_ms {
                    return;
                }
                if self.current.retry_number >= self.config.max_retries {
                    self.finish(false, now_ms, sink);
                    return;
                }
                self.current.retry_number += 1;
                self.stats.total_retries += 1;
                debug!("recovery retry {}", self.current.retry_number);

                if handler.attempt_recovery() {
                    handler.clear_error();
                    self.finish(true, now_ms, sink);
                } else if self.current.retry_number >= self.config.max_retries {
                    self.finish(false, now_ms, sink);
                } else {
                    self.enter(RecoveryPhase::Assessing, now_ms, sink);
                }
            }
            // resolved only by confirm_user or abort
            RecoveryPhase::AwaitingUser => {}
            RecoveryPhase::Idle | RecoveryPhase::Resolved | RecoveryPhase::Unrecoverable => {}
        }
    }

    /// Operator has dealt with the fault
    pub fn confirm_user<R: ReportSink>(
        &mut self,
        handler: &mut ErrorHandler,
        now_ms: u32,
        sink: &mut R,
    ) -> Result<(), RecoveryError> {
        if !self.active || self.phase != RecoveryPhase::AwaitingUser {
            return Err(RecoveryError::NotAwaitingUser);
        }
        handler.clear_error();
        self.finish(true, now_ms, sink);
        Ok(())
    }

    /// Stop recovering: heater and fan off, fault cleared
    ///
    /// Aborting an in-flight splice is the caller's job.
    pub fn abort<T, R>(
        &mut self,
        handler: &mut ErrorHandler,
        thermal: &mut T,
        sink: &mut R,
    ) -> Result<(), RecoveryError>
    where
        T: ThermalControl,
        R: ReportSink,
    {
        if !self.active {
            return Err(RecoveryError::NotActive);
        }
        thermal.set_heater_power(0);
        thermal.set_cooling_fan(false);
        handler.clear_error();
        self.stats.aborted_jobs += 1;
        self.active = false;
        self.phase = RecoveryPhase::Idle;
        warn!("recovery aborted");
        sink.emit(StatusLine::RecoveryAborted);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub fn is_awaiting_user(&self) -> bool {
        self.active && self.phase == RecoveryPhase::AwaitingUser
    }

    /// Attempt currently running, or the last one finished
    pub fn current(&self) -> &RecoveryAttempt {
        &self.current
    }

    /// Finished attempts, oldest first
    pub fn history(&self) -> impl Iterator<Item = &RecoveryAttempt> {
        self.history.oldest_ordered()
    }

    pub fn statistics(&self) -> &RecoveryStatistics {
        &self.stats
    }

    pub fn reset_statistics(&mut self) {
        self.stats = RecoveryStatistics::default();
        self.history.clear();
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    fn enter<R: ReportSink>(&mut self, phase: RecoveryPhase, now_ms: u32, sink: &mut R) {
        self.phase = phase;
        self.phase_started_ms = now_ms;
        self.current.phase = phase;
        sink.emit(StatusLine::RecoveryPhase(phase));
    }

    fn finish<R: ReportSink>(&mut self, success: bool, now_ms: u32, sink: &mut R) {
        let duration = elapsed_ms(now_ms, self.current.started_ms);
        self.current.duration_ms = duration;
        self.current.succeeded = success;
        self.active = false;

        if success {
            if self.current.action == RecoveryAction::ManualRequired {
                self.stats.user_recovered += 1;
            } else {
                self.stats.auto_recovered += 1;
            }
            let recovered = self.stats.auto_recovered + self.stats.user_recovered;
            let prev = self.stats.average_recovery_ms as u64;
            self.stats.average_recovery_ms =
                ((prev * (recovered as u64 - 1) + duration as u64) / recovered as u64) as u32;
            info!("recovery succeeded in {} ms", duration);
        } else {
            self.stats.unrecoverable += 1;
            warn!("fault {} unrecoverable", self.current.code.as_u8());
        }

        self.enter(
            if success {
                RecoveryPhase::Resolved
            } else {
                RecoveryPhase::Unrecoverable
            },
            now_ms,
            sink,
        );
        self.history.write(self.current);
        sink.emit(StatusLine::RecoveryResult {
            success,
            code: self.current.code,
            retries: self.current.retry_number,
            elapsed_ms: duration,
        });
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::control::tests::motors;
    use crate::report::NullSink;
    use crate::thermal::tests::MockThermal;
    use proptest::prelude::*;

    struct Rig {
        handler: ErrorHandler,
        engine: RecoveryEngine,
        thermal: MockThermal,
        out: heapless::Vec<StatusLine, 32>,
    }

    impl Rig {
        fn with_fault(code: ErrorCode) -> Self {
            let mut handler = ErrorHandler::new();
            let mut thermal = MockThermal::default();
            let mut m = motors();
            handler.report(code, "test", &mut thermal, &mut m, &mut NullSink);
            Self {
                handler,
                engine: RecoveryEngine::default(),
                thermal,
                out: heapless::Vec::new(),
            }
        }

        fn tick(&mut self, now: u32) {
            self.engine
                .tick(now, &mut self.handler, &mut self.thermal, &mut self.out);
        }

        fn phases(&self) -> heapless::Vec<RecoveryPhase, 16> {
            self.out
                .iter()
                .filter_map(|l| match l {
                    StatusLine::RecoveryPhase(p) => Some(*p),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_default_timings() {
        let c = RecoveryConfig::default();
        assert_eq!(c.assess_delay_ms, 500);
        assert_eq!(c.retry_delay_ms, 1000);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.cooldown_timeout_ms, 60_000);
        assert_eq!(c.cooldown_target_x10, 600);
    }

    #[test]
    fn test_begin_requires_error() {
        let mut engine = RecoveryEngine::default();
        let handler = ErrorHandler::new();
        assert_eq!(
            engine.begin(&handler, 0, &mut NullSink),
            Err(RecoveryError::NoError)
        );
        assert!(!engine.is_active());
    }

    #[test]
    fn test_begin_twice_busy() {
        let mut rig = Rig::with_fault(ErrorCode::SerialTimeout);
        rig.engine.begin(&rig.handler, 0, &mut rig.out).unwrap();
        assert_eq!(
            rig.engine.begin(&rig.handler, 10, &mut rig.out),
            Err(RecoveryError::Busy)
        );
        assert_eq!(rig.engine.statistics().total_errors, 1);
    }

    #[test]
    fn test_retry_once_resolves() {
        let mut rig = Rig::with_fault(ErrorCode::MotorStallA);
        rig.engine.begin(&rig.handler, 0, &mut rig.out).unwrap();
        assert_eq!(rig.out[0], StatusLine::RecoveryBegin(ErrorCode::MotorStallA));

        rig.tick(499);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Assessing);
        rig.tick(500);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Retrying);
        rig.tick(1499);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Retrying);
        rig.tick(1500);

        assert_eq!(rig.engine.phase(), RecoveryPhase::Resolved);
        assert!(!rig.engine.is_active());
        assert!(!rig.handler.has_error());
        assert_eq!(
            rig.phases().as_slice(),
            &[
                RecoveryPhase::Assessing,
                RecoveryPhase::Retrying,
                RecoveryPhase::Resolved
            ]
        );
        assert_eq!(
            rig.out.last(),
            Some(&StatusLine::RecoveryResult {
                success: true,
                code: ErrorCode::MotorStallA,
                retries: 1,
                elapsed_ms: 1500,
            })
        );
        let stats = rig.engine.statistics();
        assert_eq!(stats.auto_recovered, 1);
        assert_eq!(stats.total_retries, 1);
        assert_eq!(stats.average_recovery_ms, 1500);
    }

    #[test]
    fn test_cooldown_path() {
        let mut rig = Rig::with_fault(ErrorCode::ThermalRunaway);
        rig.thermal.current_x10 = 2500;
        rig.thermal.set_target_x10(2100);
        rig.engine.begin(&rig.handler, 0, &mut rig.out).unwrap();

        rig.tick(1000);
        assert_eq!(rig.engine.phase(), RecoveryPhase::CooldownWait);
        assert_eq!(rig.thermal.heater_power(), 0);
        assert_eq!(rig.thermal.target_x10(), 0);
        assert_eq!(rig.thermal.cooling_fan_pwm(), 255);

        rig.tick(20_000);
        assert_eq!(rig.engine.phase(), RecoveryPhase::CooldownWait);

        rig.thermal.current_x10 = 600;
        rig.tick(30_000);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Retrying);
        assert_eq!(rig.thermal.cooling_fan_pwm(), 0);

        rig.tick(30_999);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Retrying);
        rig.tick(31_000);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Resolved);
        assert!(!rig.handler.has_error());
    }

    #[test]
    fn test_cooldown_timeout() {
        let mut rig = Rig::with_fault(ErrorCode::TempTooHigh);
        rig.thermal.current_x10 = 2900;
        rig.engine.begin(&rig.handler, 0, &mut rig.out).unwrap();
        rig.tick(1000);
        rig.tick(61_000);
        assert_eq!(rig.engine.phase(), RecoveryPhase::CooldownWait);
        rig.tick(61_001);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Unrecoverable);
        assert_eq!(rig.thermal.cooling_fan_pwm(), 0);
        assert!(rig.handler.has_error());
        assert_eq!(rig.engine.statistics().unrecoverable, 1);
    }

    #[test]
    fn test_manual_confirm() {
        let mut rig = Rig::with_fault(ErrorCode::FilamentJam);
        rig.engine.begin(&rig.handler, 0, &mut rig.out).unwrap();
        assert_eq!(
            rig.engine.confirm_user(&mut rig.handler, 10, &mut rig.out),
            Err(RecoveryError::NotAwaitingUser)
        );
        rig.tick(1000);
        assert!(rig.engine.is_awaiting_user());
        rig.tick(500_000);
        assert!(rig.engine.is_awaiting_user());

        rig.engine
            .confirm_user(&mut rig.handler, 501_000, &mut rig.out)
            .unwrap();
        assert_eq!(rig.engine.phase(), RecoveryPhase::Resolved);
        assert!(!rig.handler.has_error());
        assert_eq!(rig.engine.statistics().user_recovered, 1);
        assert_eq!(rig.engine.statistics().auto_recovered, 0);
    }

    #[test]
    fn test_abort_action_counts_job() {
        let mut rig = Rig::with_fault(ErrorCode::RecipeInvalid);
        rig.engine.begin(&rig.handler, 0, &mut rig.out).unwrap();
        rig.tick(1000);
        assert_eq!(rig.engine.phase(), RecoveryPhase::Unrecoverable);
        assert_eq!(rig.engine.statistics().aborted_jobs, 1);
    }

    #[test]
    fn test_abort() {
        let mut rig = Rig::with_fault(ErrorCode::ThermalRunaway);
        rig.thermal.current_x10 = 2500;
        rig.engine.begin(&rig.handler, 0, &mut rig.out).unwrap();
        rig.tick(1000);

        rig.engine
            .abort(&mut rig.handler, &mut rig.thermal, &mut rig.out)
            .unwrap();
        assert_eq!(rig.engine.phase(), RecoveryPhase::Idle);
        assert!(!rig.engine.is_active());
        assert!(!rig.handler.has_error());
        assert_eq!(rig.thermal.cooling_fan_pwm(), 0);
        assert_eq!(rig.out.last(), Some(&StatusLine::RecoveryAborted));
        assert_eq!(
            rig.engine.abort(&mut rig.handler, &mut rig.thermal, &mut rig.out),
            Err(RecoveryError::NotActive)
        );
    }

    #[test]
    fn test_history_drops_oldest() {
        let mut engine = RecoveryEngine::default();
        let mut handler = ErrorHandler::new();
        let mut thermal = MockThermal::default();
        let mut m = motors();
        let mut now = 0;
        for i in 0..10u32 {
            handler.report(ErrorCode::SerialTimeout, "rx", &mut thermal, &mut m, &mut NullSink);
            engine.begin(&handler, now, &mut NullSink).unwrap();
            now += 500 + i;
            engine.tick(now, &mut handler, &mut thermal, &mut NullSink);
            now += 1000;
            engine.tick(now, &mut handler, &mut thermal, &mut NullSink);
            assert!(!engine.is_active());
        }
        assert_eq!(engine.history().count(), RECOVERY_HISTORY);
        let first = engine.history().next().unwrap();
        assert_eq!(first.duration_ms, 1502);
        assert_eq!(engine.statistics().auto_recovered, 10);
    }

    proptest! {
        #[test]
        fn prop_recovery_terminates_within_budget(
            code_idx in 0usize..ErrorCode::ALL.len(),
            temps in prop::collection::vec(0i16..3000, 1..64),
        ) {
            let code = ErrorCode::ALL[code_idx];
            let mut rig = Rig::with_fault(code);
            rig.engine.begin(&rig.handler, 0, &mut NullSink).unwrap();

            let mut now = 0u32;
            let mut ticks = 0;
            while rig.engine.is_active() && ticks < 1000 {
                rig.thermal.current_x10 = temps[ticks % temps.len()];
                now += 997;
                rig.engine.tick(now, &mut rig.handler, &mut rig.thermal, &mut NullSink);
                if rig.engine.is_awaiting_user() {
                    rig.engine.confirm_user(&mut rig.handler, now, &mut NullSink).unwrap();
                }
                prop_assert!(rig.engine.current().retry_number <= rig.engine.config().max_retries);
                ticks += 1;
            }

            prop_assert!(!rig.engine.is_active());
            prop_assert!(rig.engine.phase().is_terminal());
            let stats = rig.engine.statistics();
            prop_assert_eq!(
                stats.auto_recovered + stats.user_recovered + stats.unrecoverable,
                1
            );
        }
    }
}
