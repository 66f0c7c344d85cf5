//! Fault taxonomy

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::motion::{FeedInput, MotorAxis};
use crate::thermal::ThermalFault;

/// Bytes kept from an error message
pub const ERROR_MESSAGE_CAPACITY: usize = 64;

/// Error message storage
pub type ErrorMessage = heapless::String<ERROR_MESSAGE_CAPACITY>;

/// Machine fault codes; numeric values are stable on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    None = 0,
    ThermalRunaway = 10,
    TempSensorFail = 11,
    TempTooHigh = 12,
    MotorStallA = 20,
    MotorStallB = 21,
    MotorStallWinder = 22,
    FilamentJam = 30,
    FilamentOutA = 31,
    FilamentOutB = 32,
    CutterFail = 40,
    RecipeInvalid = 50,
    RecipeTooLarge = 51,
    SerialTimeout = 60,
    EmergencyStop = 99,
}

impl ErrorCode {
    /// Every fault code, NONE excluded
    pub const ALL: [ErrorCode; 14] = [
        ErrorCode::ThermalRunaway,
        ErrorCode::TempSensorFail,
        ErrorCode::TempTooHigh,
        ErrorCode::MotorStallA,
        ErrorCode::MotorStallB,
        ErrorCode::MotorStallWinder,
        ErrorCode::FilamentJam,
        ErrorCode::FilamentOutA,
        ErrorCode::FilamentOutB,
        ErrorCode::CutterFail,
        ErrorCode::RecipeInvalid,
        ErrorCode::RecipeTooLarge,
        ErrorCode::SerialTimeout,
        ErrorCode::EmergencyStop,
    ];

    /// Wire value
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        if value == 0 {
            return Some(ErrorCode::None);
        }
        Self::ALL.into_iter().find(|c| c.as_u8() == value)
    }

    /// Faults that shut the machine down at the point of report
    pub const fn is_critical(self) -> bool {
        matches!(
            self,
            ErrorCode::ThermalRunaway | ErrorCode::TempTooHigh | ErrorCode::EmergencyStop
        )
    }

    /// Stall code for a positional axis
    pub const fn stall(axis: MotorAxis) -> Option<Self> {
        match axis {
            MotorAxis::FeedA => Some(ErrorCode::MotorStallA),
            MotorAxis::FeedB => Some(ErrorCode::MotorStallB),
            MotorAxis::Winder => Some(ErrorCode::MotorStallWinder),
            MotorAxis::Cutter => None,
        }
    }

    /// Runout code for a feed input
    pub const fn runout(input: FeedInput) -> Self {
        match input {
            FeedInput::A => ErrorCode::FilamentOutA,
            FeedInput::B => ErrorCode::FilamentOutB,
        }
    }

    /// Code for a thermal interlock
    ///
    /// A stalled PID loop leaves the heater uncontrolled, so it is
    /// treated like runaway.
    pub const fn thermal(fault: ThermalFault) -> Self {
        match fault {
            ThermalFault::Thermistor => ErrorCode::TempSensorFail,
            ThermalFault::OverTemp => ErrorCode::TempTooHigh,
            ThermalFault::Runaway | ThermalFault::PidWatchdog => ErrorCode::ThermalRunaway,
        }
    }
}

/// Prescribed response to a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RecoveryAction {
    #[default]
    None,
    RetryOnce,
    RetryAfterCool,
    ManualRequired,
    Abort,
    Reset,
}

impl RecoveryAction {
    /// Whether the recovery engine may retry automatically
    pub const fn is_automatic(self) -> bool {
        matches!(self, RecoveryAction::RetryOnce | RecoveryAction::RetryAfterCool)
    }
}

/// Copy `message` into fixed storage, cutting at a char boundary
pub fn truncate_message(message: &str) -> ErrorMessage {
    let mut out = ErrorMessage::new();
    for c in message.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
