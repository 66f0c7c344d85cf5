//! Fixed-point arithmetic for the heater loop
//!
//! Q16.16 format. Keeps the PID free of hardware floating point on
//! parts without an FPU; gains arrive as `f32` and are converted once.

use core::ops::{Add, Neg, Sub};

use libm::roundf;

/// Q16.16 fixed-point number
///
/// Range: approximately -32768.0 to +32767.99998
/// Resolution: approximately 0.000015
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fixed32(pub i32);

impl Fixed32 {
    /// Zero value
    pub const ZERO: Self = Self(0);

    /// One (1.0)
    pub const ONE: Self = Self(1 << 16);

    /// Fractional bits (16)
    pub const FRAC_BITS: u32 = 16;

    /// Create from a whole integer
    ///
    /// # Example
    /// ```
    /// use splicer_drivers::heater::fixed::Fixed32;
    /// let two = Fixed32::from_int(2);
    /// assert_eq!(two.to_int(), 2);
    /// ```
    #[inline]
    pub const fn from_int(n: i16) -> Self {
        Self((n as i32) << Self::FRAC_BITS)
    }

    /// Create from a temperature in 0.1°C units
    ///
    /// # Example
    /// ```
    /// use splicer_drivers::heater::fixed::Fixed32;
    /// assert_eq!(Fixed32::from_tenths(2105).to_int(), 210);
    /// ```
    #[inline]
    pub const fn from_tenths(n: i16) -> Self {
        Self(((n as i32) << Self::FRAC_BITS) / 10)
    }

    /// Nearest representable value; saturates outside the range
    #[inline]
    pub fn from_f32(value: f32) -> Self {
        Self(roundf(value * 65536.0) as i32)
    }

    #[inline]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / 65536.0
    }

    /// Convert to whole integer (floors the fractional part)
    #[inline]
    pub const fn to_int(self) -> i16 {
        (self.0 >> Self::FRAC_BITS) as i16
    }

    /// Multiply two fixed-point numbers
    ///
    /// Uses an i64 intermediate and saturates the result.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn mul(self, other: Self) -> Self {
        let result = ((self.0 as i64) * (other.0 as i64)) >> Self::FRAC_BITS;
        Self(result.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }

    /// Divide by an integer
    ///
    /// Returns ZERO if divisor is zero.
    #[inline]
    pub fn div_int(self, divisor: i32) -> Self {
        if divisor == 0 {
            return Self::ZERO;
        }
        Self(self.0 / divisor)
    }

    /// Saturating addition (clamps on overflow)
    #[inline]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction (clamps on underflow)
    #[inline]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Clamp value to a range
    #[inline]
    pub fn clamp(self, min: Self, max: Self) -> Self {
        Self(self.0.clamp(min.0, max.0))
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Raw i32 representation
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl Add for Fixed32 {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        self.saturating_add(other)
    }
}

impl Sub for Fixed32 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        self.saturating_sub(other)
    }
}

impl Neg for Fixed32 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

impl From<i16> for Fixed32 {
    fn from(n: i16) -> Self {
        Self::from_int(n)
    }
}
