//! Durable record storage
//!
//! Records are small fixed-layout byte blobs addressed by key. Validation
//! (signature, checksum) is the caller's responsibility.

/// Storage keys for persisted records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum StorageKey {
    /// Encoder ticks-per-mm calibration
    EncoderCalibration = 0,
    /// Cutter statistics
    CutterStats = 1,
}

impl StorageKey {
    /// Get the key as a byte value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse a key from its byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StorageKey::EncoderCalibration),
            1 => Some(StorageKey::CutterStats),
            _ => None,
        }
    }
}

/// Storage operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Backing device failed
    Device,
    /// Key not found
    NotFound,
    /// Buffer too small
    BufferTooSmall,
}

/// Key/value record store (EEPROM, flash page, ...)
pub trait RecordStore {
    /// Read a record into `buf`, returning the number of bytes read
    fn read(&mut self, key: StorageKey, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Replace a record
    fn write(&mut self, key: StorageKey, data: &[u8]) -> Result<(), StorageError>;
}
