//! Fault classification and recovery
//!
//! [`ErrorHandler`] owns the current fault, maps it to a
//! [`RecoveryAction`] and performs the immediate shutdown for critical
//! faults. [`RecoveryEngine`] executes that action as a bounded phase
//! sequence that always ends RESOLVED or UNRECOVERABLE.

pub mod error;
pub mod handler;
pub mod recovery;

pub use error::{ErrorCode, ErrorMessage, RecoveryAction, ERROR_MESSAGE_CAPACITY};
pub use handler::ErrorHandler;
pub use recovery::{
    RecoveryAttempt, RecoveryConfig, RecoveryEngine, RecoveryError, RecoveryPhase,
    RecoveryStatistics, RECOVERY_HISTORY,
};
