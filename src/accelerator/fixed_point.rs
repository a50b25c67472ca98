//! # fixed point arithmetic
//! - signed fixed point numbers with a configurable integer/fraction split.
//! - every conversion into a narrower or coarser type rounds to nearest and saturates.
//! - the reference configuration is [`Data`] (Q8.8 in 16 bits) for activations and weights,
//!   and [`Acc`] (Q16.16 in 32 bits) for accumulation.
//!
//! # Examples
//! ```
//! use cnn_accel::accelerator::fixed_point::{Acc, Data};
//! let a = Data::from_f64(1.5);
//! let w = Data::from_f64(-2.0);
//! let p: Acc = a.mul(w);
//! assert_eq!(p.to_f64(), -3.0);
//! let narrowed: Data = p.convert();
//! assert_eq!(narrowed, Data::from_f64(-3.0));
//! ```
use std::{cmp::Ordering, fmt};

/// a `BITS` wide signed fixed point value with `FRAC` fraction bits.
/// the raw integer is always inside the `BITS` wide two's complement range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed<const BITS: u32, const FRAC: u32> {
    raw: i32,
}

/// activations, weights and norm parameters: Q8.8
pub type Data = Fixed<16, 8>;
/// accumulator: Q16.16
pub type Acc = Fixed<32, 16>;

/// move `raw` from `from` fraction bits to `to` fraction bits.
/// dropping bits rounds to nearest, ties go towards positive infinity.
pub fn rescale(raw: i64, from: u32, to: u32) -> i64 {
    match from.cmp(&to) {
        Ordering::Equal => raw,
        Ordering::Less => raw.saturating_mul(1i64 << (to - from)),
        Ordering::Greater => {
            let shift = from - to;
            raw.saturating_add(1i64 << (shift - 1)) >> shift
        }
    }
}

impl<const BITS: u32, const FRAC: u32> Fixed<BITS, FRAC> {
    pub const MAX_RAW: i64 = (1i64 << (BITS - 1)) - 1;
    pub const MIN_RAW: i64 = -(1i64 << (BITS - 1));
    pub const ZERO: Self = Self { raw: 0 };
    pub const ONE: Self = Self { raw: 1 << FRAC };
    pub const MAX: Self = Self {
        raw: Self::MAX_RAW as i32,
    };
    pub const MIN: Self = Self {
        raw: Self::MIN_RAW as i32,
    };

    /// clamp a wide raw value into range, also report whether clamping happened
    pub fn saturate(raw: i64) -> (Self, bool) {
        if raw > Self::MAX_RAW {
            (Self::MAX, true)
        } else if raw < Self::MIN_RAW {
            (Self::MIN, true)
        } else {
            (Self { raw: raw as i32 }, false)
        }
    }

    pub fn from_raw_saturating(raw: i64) -> Self {
        Self::saturate(raw).0
    }

    pub fn from_raw(raw: i32) -> Self {
        Self::from_raw_saturating(raw as i64)
    }

    pub fn raw(self) -> i32 {
        self.raw
    }

    /// round to nearest representable value, clamp outside the range. NaN maps to zero.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        let scaled = (value * (1u64 << FRAC) as f64 + 0.5).floor();
        if scaled >= Self::MAX_RAW as f64 {
            Self::MAX
        } else if scaled <= Self::MIN_RAW as f64 {
            Self::MIN
        } else {
            Self { raw: scaled as i32 }
        }
    }

    pub fn from_f32(value: f32) -> Self {
        Self::from_f64(value as f64)
    }

    pub fn to_f64(self) -> f64 {
        self.raw as f64 / (1u64 << FRAC) as f64
    }

    pub fn to_f32(self) -> f32 {
        self.to_f64() as f32
    }

    /// the weight of one least significant bit
    pub fn lsb() -> f64 {
        1.0 / (1u64 << FRAC) as f64
    }

    /// convert into another format, rounding and saturating
    pub fn convert<const B2: u32, const F2: u32>(self) -> Fixed<B2, F2> {
        self.convert_checked().0
    }

    /// like [`Fixed::convert`], the flag tells whether the value was clamped
    pub fn convert_checked<const B2: u32, const F2: u32>(self) -> (Fixed<B2, F2>, bool) {
        Fixed::<B2, F2>::saturate(rescale(self.raw as i64, FRAC, F2))
    }

    /// full precision product, then one rounding step into the result format
    pub fn mul<const B2: u32, const F2: u32, const B3: u32, const F3: u32>(
        self,
        rhs: Fixed<B2, F2>,
    ) -> Fixed<B3, F3> {
        let product = self.raw as i64 * rhs.raw as i64;
        Fixed::<B3, F3>::from_raw_saturating(rescale(product, FRAC + F2, F3))
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        Self::from_raw_saturating(self.raw as i64 + rhs.raw as i64)
    }

    /// arithmetic right shift of the raw bits, rounds towards negative infinity
    pub fn shr(self, bits: u32) -> Self {
        Self {
            raw: self.raw >> bits,
        }
    }

    pub fn is_negative(self) -> bool {
        self.raw < 0
    }
}

impl<const BITS: u32, const FRAC: u32> fmt::Display for Fixed<BITS, FRAC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_trip_and_range() {
        assert_eq!(Data::from_f64(1.0).raw(), 256);
        assert_eq!(Data::from_f64(-0.5).raw(), -128);
        assert_eq!(Data::from_f64(200.0), Data::MAX);
        assert_eq!(Data::from_f64(-300.0), Data::MIN);
        assert_eq!(Data::MIN.to_f64(), -128.0);
        assert!((Data::MAX.to_f64() - 127.99609375).abs() < 1e-12);
        assert_eq!(Data::from_f64(f64::NAN), Data::ZERO);
        // 0.3 is between 76/256 and 77/256, nearest is 77
        assert_eq!(Data::from_f64(0.3).raw(), 77);
    }

    #[test]
    fn test_narrowing_rounds_to_nearest() {
        let exact = Acc::from_raw(65536 + 256);
        let d: Data = exact.convert();
        assert_eq!(d.raw(), 257);

        let half_up = Acc::from_raw(65536 + 128);
        let d: Data = half_up.convert();
        assert_eq!(d.raw(), 257);

        let below_half = Acc::from_raw(65536 + 127);
        let d: Data = below_half.convert();
        assert_eq!(d.raw(), 256);

        let negative_tie = Acc::from_raw(-(65536 + 128));
        let d: Data = negative_tie.convert();
        assert_eq!(d.raw(), -256);
    }

    #[test]
    fn test_narrowing_saturates() {
        let big = Acc::from_f64(1000.0);
        let (d, clamped): (Data, bool) = big.convert_checked();
        assert!(clamped);
        assert_eq!(d, Data::MAX);

        let small = Acc::from_f64(-1000.0);
        let (d, clamped): (Data, bool) = small.convert_checked();
        assert!(clamped);
        assert_eq!(d, Data::MIN);

        let (_, clamped): (Data, bool) = Acc::from_f64(12.25).convert_checked();
        assert!(!clamped);
    }

    #[test]
    fn test_widening_product_is_exact() {
        let a = Data::from_raw(i16::MAX as i32);
        let b = Data::from_raw(i16::MIN as i32);
        let p: Acc = a.mul(b);
        assert_eq!(p.raw() as i64, i16::MAX as i64 * i16::MIN as i64);

        let p: Acc = Data::from_f64(0.00390625).mul(Data::from_f64(0.00390625));
        assert_eq!(p.raw(), 1);
    }

    #[test]
    fn test_accumulator_saturates() {
        let near_top = Acc::MAX;
        assert_eq!(near_top.saturating_add(Acc::from_raw(1)), Acc::MAX);
        assert_eq!(Acc::MIN.saturating_add(Acc::from_raw(-1)), Acc::MIN);
        assert_eq!(
            Acc::from_f64(1.5).saturating_add(Acc::from_f64(2.25)),
            Acc::from_f64(3.75)
        );
    }

    #[test]
    fn test_shift_floors() {
        assert_eq!(Acc::from_f64(-8.0).shr(3), Acc::from_f64(-1.0));
        assert_eq!(Acc::from_raw(-1).shr(3), Acc::from_raw(-1));
        assert_eq!(Acc::from_f64(8.0).shr(3), Acc::from_f64(1.0));
    }

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(3, 4, 4), 3);
        assert_eq!(rescale(3, 4, 6), 12);
        assert_eq!(rescale(24, 4, 2), 6);
        assert_eq!(rescale(2, 2, 0), 1);
        assert_eq!(rescale(-2, 2, 0), 0);
        assert_eq!(rescale(-3, 2, 0), -1);
    }
}
