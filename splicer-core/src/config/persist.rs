//! Checksummed persistent records
//!
//! Each record is a fixed little-endian layout that starts with a
//! signature and ends with an XOR checksum over the preceding words and a
//! per-record salt. A record that is present but fails validation is
//! counted as corrupt and the caller falls back to defaults.

use crate::traits::{RecordStore, StorageError, StorageKey};

/// Largest encoded record
pub const MAX_RECORD_SIZE: usize = 32;

/// Encoder calibration signature
pub const CALIBRATION_SIGNATURE: u32 = 0x5333_4445;
const CALIBRATION_SALT: u32 = 0xA55A_A55A;

/// Cutter statistics signature ("CUTS")
pub const CUTTER_STATS_SIGNATURE: u32 = 0x4355_5453;
const CUTTER_STATS_SALT: u32 = 0xB44D_B44D;

/// Record validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    /// Storage layer failed
    Storage(StorageError),
    /// Fewer bytes than the layout needs
    Truncated,
    /// Signature does not match
    BadSignature,
    /// Checksum does not match
    BadChecksum,
}

impl From<StorageError> for RecordError {
    fn from(e: StorageError) -> Self {
        RecordError::Storage(e)
    }
}

/// A fixed-layout record
pub trait Record: Sized {
    /// Where the record lives
    const KEY: StorageKey;
    /// Encoded size in bytes
    const SIZE: usize;

    /// Encode into `buf` (at least `SIZE` bytes), computing the checksum
    fn encode(&self, buf: &mut [u8]);

    /// Decode and validate
    fn decode(buf: &[u8]) -> Result<Self, RecordError>;
}

/// Little-endian word cursor over a record buffer
struct Words<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Words<'a> {
    fn new(buf: &'a [u8], size: usize) -> Result<Self, RecordError> {
        if buf.len() < size {
            return Err(RecordError::Truncated);
        }
        Ok(Self { buf, pos: 0 })
    }

    fn next(&mut self) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_le_bytes(word)
    }
}

fn put_words(buf: &mut [u8], words: &[u32]) {
    for (chunk, word) in buf.chunks_exact_mut(4).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
}

fn xor_checksum(words: &[u32], salt: u32) -> u32 {
    words.iter().fold(salt, |acc, w| acc ^ w)
}

/// Durable encoder calibration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    /// Encoder ticks per millimetre of filament
    pub ticks_per_mm: f32,
    /// Completed calibration runs
    pub calibration_runs: u32,
}

impl CalibrationRecord {
    fn words(&self) -> [u32; 3] {
        [
            CALIBRATION_SIGNATURE,
            self.ticks_per_mm.to_bits(),
            self.calibration_runs,
        ]
    }
}

impl Record for CalibrationRecord {
    const KEY: StorageKey = StorageKey::EncoderCalibration;
    const SIZE: usize = 16;

    fn encode(&self, buf: &mut [u8]) {
        let words = self.words();
        let checksum = xor_checksum(&words, CALIBRATION_SALT);
        put_words(buf, &[words[0], words[1], words[2], checksum]);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let mut w = Words::new(buf, Self::SIZE)?;
        let signature = w.next();
        let bits = w.next();
        let runs = w.next();
        let checksum = w.next();
        if signature != CALIBRATION_SIGNATURE {
            return Err(RecordError::BadSignature);
        }
        if xor_checksum(&[signature, bits, runs], CALIBRATION_SALT) != checksum {
            return Err(RecordError::BadChecksum);
        }
        Ok(Self {
            ticks_per_mm: f32::from_bits(bits),
            calibration_runs: runs,
        })
    }
}

/// Durable cutter counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CutterStatsRecord {
    /// Cuts attempted
    pub total_cuts: u32,
    /// Cuts that finished with SUCCESS
    pub successful_cuts: u32,
    /// Cuts that finished otherwise
    pub failed_cuts: u32,
    /// `total_cuts` at the last acknowledged maintenance
    pub last_maintenance_cut: u32,
}

impl CutterStatsRecord {
    fn words(&self) -> [u32; 5] {
        [
            CUTTER_STATS_SIGNATURE,
            self.total_cuts,
            self.successful_cuts,
            self.failed_cuts,
            self.last_maintenance_cut,
        ]
    }
}

impl Record for CutterStatsRecord {
    const KEY: StorageKey = StorageKey::CutterStats;
    const SIZE: usize = 24;

    fn encode(&self, buf: &mut [u8]) {
        let words = self.words();
        let checksum = xor_checksum(&words, CUTTER_STATS_SALT);
        put_words(buf, &words);
        put_words(&mut buf[20..], &[checksum]);
    }

    fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        let mut w = Words::new(buf, Self::SIZE)?;
        let words = [w.next(), w.next(), w.next(), w.next(), w.next()];
        let checksum = w.next();
        if words[0] != CUTTER_STATS_SIGNATURE {
            return Err(RecordError::BadSignature);
        }
        if xor_checksum(&words, CUTTER_STATS_SALT) != checksum {
            return Err(RecordError::BadChecksum);
        }
        Ok(Self {
            total_cuts: words[1],
            successful_cuts: words[2],
            failed_cuts: words[3],
            last_maintenance_cut: words[4],
        })
    }
}

/// Record store wrapper that validates on load and counts corruption
pub struct Persistence<S> {
    store: S,
    corrupt_loads: u32,
}

impl<S: RecordStore> Persistence<S> {
    /// Wrap a store
    pub fn new(store: S) -> Self {
        Self {
            store,
            corrupt_loads: 0,
        }
    }

    /// Load a record
    ///
    /// Returns `None` when the record is absent or invalid. Invalid
    /// records (present but failing validation) bump the corruption
    /// counter.
    pub fn load<R: Record>(&mut self) -> Option<R> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let len = match self.store.read(R::KEY, &mut buf) {
            Ok(len) => len.min(MAX_RECORD_SIZE),
            Err(StorageError::NotFound) => {
                debug!("record {} not found", R::KEY.as_u8());
                return None;
            }
            Err(e) => {
                warn!("record {} read failed: {}", R::KEY.as_u8(), e);
                return None;
            }
        };
        match R::decode(&buf[..len]) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("record {} rejected: {}", R::KEY.as_u8(), e);
                self.corrupt_loads = self.corrupt_loads.saturating_add(1);
                None
            }
        }
    }

    /// Encode and write a record
    pub fn save<R: Record>(&mut self, record: &R) -> Result<(), StorageError> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        record.encode(&mut buf);
        self.store.write(R::KEY, &buf[..R::SIZE])
    }

    /// Records rejected since boot
    pub fn corrupt_loads(&self) -> u32 {
        self.corrupt_loads
    }

    /// Access the underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying store
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Unwrap the store
    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// In-memory store with one slot per key
    #[derive(Default)]
    pub(crate) struct MemStore {
        pub slots: [heapless::Vec<u8, MAX_RECORD_SIZE>; 2],
    }

    impl RecordStore for MemStore {
        fn read(&mut self, key: StorageKey, buf: &mut [u8]) -> Result<usize, StorageError> {
            let slot = &self.slots[key.as_u8() as usize];
            if slot.is_empty() {
                return Err(StorageError::NotFound);
            }
            if buf.len() < slot.len() {
                return Err(StorageError::BufferTooSmall);
            }
            buf[..slot.len()].copy_from_slice(slot);
            Ok(slot.len())
        }

        fn write(&mut self, key: StorageKey, data: &[u8]) -> Result<(), StorageError> {
            let slot = &mut self.slots[key.as_u8() as usize];
            slot.clear();
            slot.extend_from_slice(data)
                .map_err(|_| StorageError::BufferTooSmall)
        }
    }

    #[test]
    fn test_missing_record_is_not_corruption() {
        let mut p = Persistence::new(MemStore::default());
        assert!(p.load::<CalibrationRecord>().is_none());
        assert_eq!(p.corrupt_loads(), 0);
    }

    #[test]
    fn test_calibration_roundtrip() {
        let mut p = Persistence::new(MemStore::default());
        let rec = CalibrationRecord {
            ticks_per_mm: 14.25,
            calibration_runs: 3,
        };
        p.save(&rec).unwrap();
        assert_eq!(p.load::<CalibrationRecord>(), Some(rec));
    }

    #[test]
    fn test_cutter_stats_roundtrip() {
        let mut p = Persistence::new(MemStore::default());
        let rec = CutterStatsRecord {
            total_cuts: 501,
            successful_cuts: 498,
            failed_cuts: 3,
            last_maintenance_cut: 1,
        };
        p.save(&rec).unwrap();
        assert_eq!(p.load::<CutterStatsRecord>(), Some(rec));
    }

    #[test]
    fn test_wrong_signature_rejected() {
        let mut p = Persistence::new(MemStore::default());
        p.save(&CutterStatsRecord::default()).unwrap();
        p.store_mut().slots[1][0] ^= 0xFF;
        assert!(p.load::<CutterStatsRecord>().is_none());
        assert_eq!(p.corrupt_loads(), 1);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let mut p = Persistence::new(MemStore::default());
        p.store_mut()
            .write(StorageKey::EncoderCalibration, &[0x45, 0x44, 0x33])
            .unwrap();
        assert!(p.load::<CalibrationRecord>().is_none());
        assert_eq!(p.corrupt_loads(), 1);
    }

    proptest! {
        #[test]
        fn prop_any_corrupted_byte_rejected(
            total in 0u32..100_000,
            ok in 0u32..100_000,
            byte in 0usize..24,
            flip in 1u8..=255,
        ) {
            let mut p = Persistence::new(MemStore::default());
            let rec = CutterStatsRecord {
                total_cuts: total,
                successful_cuts: ok.min(total),
                failed_cuts: total - ok.min(total),
                last_maintenance_cut: 0,
            };
            p.save(&rec).unwrap();
            p.store_mut().slots[1][byte] ^= flip;
            prop_assert!(p.load::<CutterStatsRecord>().is_none());
            prop_assert_eq!(p.corrupt_loads(), 1);
        }

        #[test]
        fn prop_calibration_byte_flip_rejected(
            tpm in 1.0f32..200.0,
            byte in 0usize..16,
            flip in 1u8..=255,
        ) {
            let mut p = Persistence::new(MemStore::default());
            p.save(&CalibrationRecord { ticks_per_mm: tpm, calibration_runs: 1 }).unwrap();
            p.store_mut().slots[0][byte] ^= flip;
            prop_assert!(p.load::<CalibrationRecord>().is_none());
            prop_assert_eq!(p.corrupt_loads(), 1);
        }
    }
}
