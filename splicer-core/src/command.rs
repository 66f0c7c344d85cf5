//! Line-oriented host commands
//!
//! Parsing is allocation-free: one whitespace-separated line in, one
//! [`Command`] out. Keywords are case-insensitive.
//!
//! ```text
//! STATUS | START | PAUSE | RESUME | ABORT | ESTOP | CLEAR
//! TEMP [<c>]              AUTOTUNE <c>         SPLICE <PLA|PETG|ABS|index>
//! CUT | CUT ACK           FEED <A|B> <mm>      RETRACT <A|B> <mm>
//! RECIPE BEGIN | RECIPE END | SEG <color> <mm>
//! ENCODER CAL <mm> | CAL DONE | CAL ABORT | RESET | LOOP <0|1> | LOG <ms>
//! TEMPLOG <ms>            JOB START | JOB STOP
//! RECOVERY BEGIN | CONFIRM | ABORT
//! ```

use core::str::SplitWhitespace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::Material;
use crate::encoder::CalibrationError;
use crate::motion::FeedInput;
use crate::safety::RecoveryError;
use crate::sequence::{CutError, FeedError, SpliceError};
use crate::state::{RecipeError, Segment};
use crate::traits::{MotionError, StorageError};

/// Hottest temperature a command may request (°C)
const MAX_COMMAND_TEMP_C: f32 = 280.0;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Status,
    Start,
    Pause,
    Resume,
    Abort,
    EmergencyStop,
    /// Drop the current fault
    ClearError,
    /// Query (`None`) or set the heater target (°C×10)
    Temp(Option<i16>),
    Autotune(i16),
    Splice(Material),
    Cut,
    AcknowledgeMaintenance,
    Feed { input: FeedInput, length_mm: f32 },
    Retract { input: FeedInput, length_mm: f32 },
    RecipeBegin,
    RecipeSegment(Segment),
    RecipeEnd,
    EncoderCalibrate(f32),
    EncoderCalibrateDone,
    EncoderCalibrateAbort,
    EncoderReset,
    EncoderClosedLoop(bool),
    /// Encoder log interval (ms, 0 disables)
    EncoderLog(u32),
    /// Temperature log interval (ms, 0 disables)
    TempLog(u32),
    JobStart,
    JobStop,
    RecoveryBegin,
    RecoveryConfirm,
    RecoveryAbort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CommandError {
    /// Blank line
    Empty,
    /// Unrecognized keyword
    Unknown,
    MissingArgument,
    InvalidArgument,
    /// Subsystem already running an operation
    Busy,
    /// Not allowed in the current state
    InvalidState,
    /// Hotend below extrusion temperature
    ColdExtrusion,
    /// Motion layer refused
    Motion,
    /// Persisting the result failed
    Storage,
}

impl CommandError {
    pub fn label(self) -> &'static str {
        match self {
            CommandError::Empty => "EMPTY",
            CommandError::Unknown => "UNKNOWN_COMMAND",
            CommandError::MissingArgument => "MISSING_ARGUMENT",
            CommandError::InvalidArgument => "INVALID_ARGUMENT",
            CommandError::Busy => "BUSY",
            CommandError::InvalidState => "INVALID_STATE",
            CommandError::ColdExtrusion => "COLD_EXTRUSION",
            CommandError::Motion => "MOTION",
            CommandError::Storage => "STORAGE",
        }
    }
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

impl From<MotionError> for CommandError {
    fn from(_: MotionError) -> Self {
        CommandError::Motion
    }
}

impl From<StorageError> for CommandError {
    fn from(_: StorageError) -> Self {
        CommandError::Storage
    }
}

impl From<FeedError> for CommandError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Busy => CommandError::Busy,
            FeedError::InvalidLength => CommandError::InvalidArgument,
            FeedError::ColdExtrusion => CommandError::ColdExtrusion,
            FeedError::Motion(_) => CommandError::Motion,
        }
    }
}

impl From<CutError> for CommandError {
    fn from(e: CutError) -> Self {
        match e {
            CutError::Busy => CommandError::Busy,
            CutError::Motion(_) => CommandError::Motion,
        }
    }
}

impl From<SpliceError> for CommandError {
    fn from(e: SpliceError) -> Self {
        match e {
            SpliceError::Busy => CommandError::Busy,
            SpliceError::Motion(_) => CommandError::Motion,
        }
    }
}

impl From<CalibrationError> for CommandError {
    fn from(e: CalibrationError) -> Self {
        match e {
            CalibrationError::InvalidLength | CalibrationError::OutOfRange => {
                CommandError::InvalidArgument
            }
            CalibrationError::NotActive | CalibrationError::NoMotion => CommandError::InvalidState,
            CalibrationError::Storage(_) => CommandError::Storage,
        }
    }
}

impl From<RecoveryError> for CommandError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::Busy => CommandError::Busy,
            RecoveryError::NoError | RecoveryError::NotAwaitingUser | RecoveryError::NotActive => {
                CommandError::InvalidState
            }
        }
    }
}

impl From<RecipeError> for CommandError {
    fn from(e: RecipeError) -> Self {
        match e {
            RecipeError::Busy => CommandError::Busy,
            RecipeError::TooLarge | RecipeError::Empty | RecipeError::InvalidSegment => {
                CommandError::InvalidArgument
            }
            RecipeError::Motion => CommandError::Motion,
            RecipeError::NotReady
            | RecipeError::NotRunning
            | RecipeError::NotPaused
            | RecipeError::HeaterTimeout => CommandError::InvalidState,
        }
    }
}

impl Command {
    /// Parse one command line
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let keyword = words.next().ok_or(CommandError::Empty)?;

        let command = if is(keyword, "STATUS") || keyword == "?" {
            Command::Status
        } else if is(keyword, "START") {
            Command::Start
        } else if is(keyword, "PAUSE") {
            Command::Pause
        } else if is(keyword, "RESUME") {
            Command::Resume
        } else if is(keyword, "ABORT") {
            Command::Abort
        } else if is(keyword, "ESTOP") {
            Command::EmergencyStop
        } else if is(keyword, "CLEAR") {
            Command::ClearError
        } else if is(keyword, "TEMP") {
            match words.next() {
                Some(value) => Command::Temp(Some(temperature(value)?)),
                None => Command::Temp(None),
            }
        } else if is(keyword, "AUTOTUNE") {
            Command::Autotune(temperature(required(&mut words)?)?)
        } else if is(keyword, "SPLICE") {
            Command::Splice(material(words.next())?)
        } else if is(keyword, "CUT") {
            match words.next() {
                None => Command::Cut,
                Some(w) if is(w, "ACK") => Command::AcknowledgeMaintenance,
                Some(_) => return Err(CommandError::InvalidArgument),
            }
        } else if is(keyword, "FEED") || is(keyword, "RETRACT") {
            let input = feed_input(required(&mut words)?)?;
            let length_mm = length(required(&mut words)?)?;
            if is(keyword, "FEED") {
                Command::Feed { input, length_mm }
            } else {
                Command::Retract { input, length_mm }
            }
        } else if is(keyword, "RECIPE") {
            let sub = required(&mut words)?;
            if is(sub, "BEGIN") {
                Command::RecipeBegin
            } else if is(sub, "END") {
                Command::RecipeEnd
            } else {
                return Err(CommandError::InvalidArgument);
            }
        } else if is(keyword, "SEG") {
            let color: u8 = number(required(&mut words)?)?;
            let length_mm = length(required(&mut words)?)?;
            Command::RecipeSegment(Segment::from_color(color, length_mm))
        } else if is(keyword, "ENCODER") {
            encoder(&mut words)?
        } else if is(keyword, "TEMPLOG") {
            Command::TempLog(number(required(&mut words)?)?)
        } else if is(keyword, "JOB") {
            let sub = required(&mut words)?;
            if is(sub, "START") {
                Command::JobStart
            } else if is(sub, "STOP") {
                Command::JobStop
            } else {
                return Err(CommandError::InvalidArgument);
            }
        } else if is(keyword, "RECOVERY") {
            let sub = required(&mut words)?;
            if is(sub, "BEGIN") {
                Command::RecoveryBegin
            } else if is(sub, "CONFIRM") {
                Command::RecoveryConfirm
            } else if is(sub, "ABORT") {
                Command::RecoveryAbort
            } else {
                return Err(CommandError::InvalidArgument);
            }
        } else {
            return Err(CommandError::Unknown);
        };
        Ok(command)
    }
}

fn encoder(words: &mut SplitWhitespace<'_>) -> Result<Command, CommandError> {
    let sub = required(words)?;
    if is(sub, "CAL") {
        let arg = required(words)?;
        if is(arg, "DONE") {
            Ok(Command::EncoderCalibrateDone)
        } else if is(arg, "ABORT") {
            Ok(Command::EncoderCalibrateAbort)
        } else {
            Ok(Command::EncoderCalibrate(length(arg)?))
        }
    } else if is(sub, "RESET") {
        Ok(Command::EncoderReset)
    } else if is(sub, "LOOP") {
        match required(words)? {
            "0" => Ok(Command::EncoderClosedLoop(false)),
            "1" => Ok(Command::EncoderClosedLoop(true)),
            _ => Err(CommandError::InvalidArgument),
        }
    } else if is(sub, "LOG") {
        Ok(Command::EncoderLog(number(required(words)?)?))
    } else {
        Err(CommandError::InvalidArgument)
    }
}

fn is(word: &str, keyword: &str) -> bool {
    word.eq_ignore_ascii_case(keyword)
}

fn required<'a>(words: &mut SplitWhitespace<'a>) -> Result<&'a str, CommandError> {
    words.next().ok_or(CommandError::MissingArgument)
}

fn number<N: core::str::FromStr>(word: &str) -> Result<N, CommandError> {
    word.parse().map_err(|_| CommandError::InvalidArgument)
}

/// Positive, finite millimetres
fn length(word: &str) -> Result<f32, CommandError> {
    let mm: f32 = number(word)?;
    if mm.is_finite() && mm > 0.0 {
        Ok(mm)
    } else {
        Err(CommandError::InvalidArgument)
    }
}

/// Degrees C to °C×10, rejecting anything outside 0..=280
fn temperature(word: &str) -> Result<i16, CommandError> {
    let celsius: f32 = number(word)?;
    if !(0.0..=MAX_COMMAND_TEMP_C).contains(&celsius) {
        return Err(CommandError::InvalidArgument);
    }
    Ok(libm::roundf(celsius * 10.0) as i16)
}

fn feed_input(word: &str) -> Result<FeedInput, CommandError> {
    if is(word, "A") || word == "0" {
        Ok(FeedInput::A)
    } else if is(word, "B") || word == "1" {
        Ok(FeedInput::B)
    } else {
        Err(CommandError::InvalidArgument)
    }
}

fn material(word: Option<&str>) -> Result<Material, CommandError> {
    let Some(word) = word else {
        return Ok(Material::Pla);
    };
    if let Some(m) = Material::from_name(word) {
        return Ok(m);
    }
    let index: u8 = number(word)?;
    Material::ALL
        .get(index as usize)
        .copied()
        .ok_or(CommandError::InvalidArgument)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_keywords() {
        assert_eq!(Command::parse("STATUS"), Ok(Command::Status));
        assert_eq!(Command::parse("  start \r\n"), Ok(Command::Start));
        assert_eq!(Command::parse("Pause"), Ok(Command::Pause));
        assert_eq!(Command::parse("ESTOP"), Ok(Command::EmergencyStop));
        assert_eq!(Command::parse("?"), Ok(Command::Status));
    }

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(Command::parse(""), Err(CommandError::Empty));
        assert_eq!(Command::parse("   "), Err(CommandError::Empty));
        assert_eq!(Command::parse("WELD"), Err(CommandError::Unknown));
    }

    #[test]
    fn test_temp() {
        assert_eq!(Command::parse("TEMP"), Ok(Command::Temp(None)));
        assert_eq!(Command::parse("TEMP 210"), Ok(Command::Temp(Some(2100))));
        assert_eq!(Command::parse("temp 205.5"), Ok(Command::Temp(Some(2055))));
        assert_eq!(Command::parse("TEMP 300"), Err(CommandError::InvalidArgument));
        assert_eq!(Command::parse("TEMP -5"), Err(CommandError::InvalidArgument));
        assert_eq!(Command::parse("TEMP hot"), Err(CommandError::InvalidArgument));
        assert_eq!(Command::parse("AUTOTUNE"), Err(CommandError::MissingArgument));
        assert_eq!(Command::parse("AUTOTUNE 200"), Ok(Command::Autotune(2000)));
    }

    #[test]
    fn test_splice_material() {
        assert_eq!(Command::parse("SPLICE"), Ok(Command::Splice(Material::Pla)));
        assert_eq!(Command::parse("SPLICE petg"), Ok(Command::Splice(Material::Petg)));
        assert_eq!(Command::parse("SPLICE 2"), Ok(Command::Splice(Material::Abs)));
        assert_eq!(Command::parse("SPLICE 7"), Err(CommandError::InvalidArgument));
    }

    #[test]
    fn test_feed() {
        assert_eq!(
            Command::parse("FEED A 20"),
            Ok(Command::Feed {
                input: FeedInput::A,
                length_mm: 20.0
            })
        );
        assert_eq!(
            Command::parse("retract b 2.5"),
            Ok(Command::Retract {
                input: FeedInput::B,
                length_mm: 2.5
            })
        );
        assert_eq!(Command::parse("FEED C 20"), Err(CommandError::InvalidArgument));
        assert_eq!(Command::parse("FEED A 0"), Err(CommandError::InvalidArgument));
        assert_eq!(Command::parse("FEED A"), Err(CommandError::MissingArgument));
    }

    #[test]
    fn test_cut() {
        assert_eq!(Command::parse("CUT"), Ok(Command::Cut));
        assert_eq!(Command::parse("CUT ACK"), Ok(Command::AcknowledgeMaintenance));
        assert_eq!(Command::parse("CUT NOW"), Err(CommandError::InvalidArgument));
    }

    #[test]
    fn test_recipe_upload() {
        assert_eq!(Command::parse("RECIPE BEGIN"), Ok(Command::RecipeBegin));
        assert_eq!(
            Command::parse("SEG 1 120.5"),
            Ok(Command::RecipeSegment(Segment::new(FeedInput::B, 120.5)))
        );
        assert_eq!(Command::parse("RECIPE END"), Ok(Command::RecipeEnd));
        assert_eq!(Command::parse("RECIPE"), Err(CommandError::MissingArgument));
    }

    #[test]
    fn test_encoder_subcommands() {
        assert_eq!(
            Command::parse("ENCODER CAL 100"),
            Ok(Command::EncoderCalibrate(100.0))
        );
        assert_eq!(
            Command::parse("encoder cal done"),
            Ok(Command::EncoderCalibrateDone)
        );
        assert_eq!(
            Command::parse("ENCODER CAL ABORT"),
            Ok(Command::EncoderCalibrateAbort)
        );
        assert_eq!(Command::parse("ENCODER RESET"), Ok(Command::EncoderReset));
        assert_eq!(
            Command::parse("ENCODER LOOP 0"),
            Ok(Command::EncoderClosedLoop(false))
        );
        assert_eq!(
            Command::parse("ENCODER LOOP 2"),
            Err(CommandError::InvalidArgument)
        );
        assert_eq!(Command::parse("ENCODER LOG 500"), Ok(Command::EncoderLog(500)));
        assert_eq!(Command::parse("TEMPLOG 0"), Ok(Command::TempLog(0)));
    }

    #[test]
    fn test_recovery_and_jobs() {
        assert_eq!(Command::parse("RECOVERY BEGIN"), Ok(Command::RecoveryBegin));
        assert_eq!(Command::parse("recovery confirm"), Ok(Command::RecoveryConfirm));
        assert_eq!(Command::parse("RECOVERY ABORT"), Ok(Command::RecoveryAbort));
        assert_eq!(Command::parse("RECOVERY NOW"), Err(CommandError::InvalidArgument));
        assert_eq!(Command::parse("JOB START"), Ok(Command::JobStart));
        assert_eq!(Command::parse("JOB STOP"), Ok(Command::JobStop));
    }

    #[test]
    fn test_subsystem_error_mapping() {
        assert_eq!(CommandError::from(FeedError::ColdExtrusion), CommandError::ColdExtrusion);
        assert_eq!(CommandError::from(RecipeError::NotPaused), CommandError::InvalidState);
        assert_eq!(CommandError::from(RecoveryError::Busy), CommandError::Busy);
        assert_eq!(
            CommandError::from(CalibrationError::OutOfRange),
            CommandError::InvalidArgument
        );
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(CommandError::Unknown.label(), "UNKNOWN_COMMAND");
        assert_eq!(CommandError::ColdExtrusion.label(), "COLD_EXTRUSION");
    }
}
