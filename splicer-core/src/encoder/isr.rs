//! Quadrature edge handling shared with the interrupt
//!
//! The edge handler is the only writer. The control loop reads a whole
//! [`IsrSnapshot`] under one critical section so it never sees a torn
//! update, and individual fields are never exposed.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Signed step for each (previous << 2 | current) channel state pair
///
/// Zero entries are either "no change" or a skipped state; both count as
/// invalid transitions.
const TRANSITIONS: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

/// Decode one transition between 2-bit channel states (A = bit 1, B = bit 0)
#[inline]
pub const fn decode(previous: u8, current: u8) -> i8 {
    TRANSITIONS[(((previous & 0b11) << 2) | (current & 0b11)) as usize]
}

/// Pack channel levels into a 2-bit state
#[inline]
pub const fn channel_state(a: bool, b: bool) -> u8 {
    ((a as u8) << 1) | b as u8
}

/// Consistent copy of the interrupt-owned counters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IsrSnapshot {
    /// Running tick count
    pub tick_count: i64,
    /// Last sampled channel state
    pub last_state: u8,
    /// Any edge seen since reset
    pub edge_seen: bool,
    /// Timestamp of the last edge, valid or not (µs)
    pub last_edge_us: u32,
    /// Timestamp of the last valid step (µs)
    pub last_valid_edge_us: u32,
    /// A previous valid step exists to compute a rate from
    pub rate_valid: bool,
    /// Signed rate from the last two valid steps (ticks/s)
    pub tick_rate: f32,
    /// Decoded steps
    pub valid_transitions: u32,
    /// Bounced or skipped edges
    pub invalid_transitions: u32,
}

impl IsrSnapshot {
    const fn new() -> Self {
        Self {
            tick_count: 0,
            last_state: 0,
            edge_seen: false,
            last_edge_us: 0,
            last_valid_edge_us: 0,
            rate_valid: false,
            tick_rate: 0.0,
            valid_transitions: 0,
            invalid_transitions: 0,
        }
    }
}

impl Default for IsrSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-safe encoder cell
///
/// Intended to live in a `static` and be handed by reference to both the
/// pin interrupt and the encoder subsystem.
pub struct EncoderIsr {
    state: Mutex<CriticalSectionRawMutex, Cell<IsrSnapshot>>,
    debounce_us: u32,
}

impl EncoderIsr {
    /// Create a cell with the given minimum inter-edge time
    pub const fn new(debounce_us: u32) -> Self {
        Self {
            state: Mutex::new(Cell::new(IsrSnapshot::new())),
            debounce_us,
        }
    }

    /// Latch the initial channel state before interrupts are attached
    pub fn prime(&self, a: bool, b: bool, now_us: u32) {
        self.state.lock(|cell| {
            let mut s = cell.get();
            s.last_state = channel_state(a, b);
            s.last_valid_edge_us = now_us;
            cell.set(s);
        });
    }

    /// Handle one channel change; call from the pin interrupt
    pub fn on_edge(&self, a: bool, b: bool, now_us: u32) {
        self.state.lock(|cell| {
            let mut s = cell.get();
            if s.edge_seen && now_us.wrapping_sub(s.last_edge_us) < self.debounce_us {
                s.invalid_transitions = s.invalid_transitions.wrapping_add(1);
                cell.set(s);
                return;
            }

            let current = channel_state(a, b);
            let delta = decode(s.last_state, current);
            s.last_state = current;
            s.last_edge_us = now_us;
            s.edge_seen = true;

            if delta == 0 {
                s.invalid_transitions = s.invalid_transitions.wrapping_add(1);
                cell.set(s);
                return;
            }

            s.tick_count += delta as i64;
            s.valid_transitions = s.valid_transitions.wrapping_add(1);
            if s.rate_valid {
                let dt_us = now_us.wrapping_sub(s.last_valid_edge_us);
                if dt_us > 0 {
                    s.tick_rate = 1_000_000.0 * delta as f32 / dt_us as f32;
                }
            }
            s.rate_valid = true;
            s.last_valid_edge_us = now_us;
            cell.set(s);
        });
    }

    /// Take a consistent copy of all counters
    pub fn snapshot(&self) -> IsrSnapshot {
        self.state.lock(|cell| cell.get())
    }

    /// Zero the tick and transition counters
    ///
    /// The channel state and edge timestamps are kept so the next edge
    /// still decodes correctly.
    pub fn reset(&self) {
        self.state.lock(|cell| {
            let mut s = cell.get();
            s.tick_count = 0;
            s.valid_transitions = 0;
            s.invalid_transitions = 0;
            s.tick_rate = 0.0;
            s.rate_valid = false;
            cell.set(s);
        });
    }
}
