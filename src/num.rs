//! Fixed-point numeric primitives shared by every venue.
//!
//! Prices, quantities and volumes are signed 64-bit integers scaled by
//! 1e8. Wire formats carry decimal strings; parsing is exact (no float
//! round-trip) and formatting emits the canonical decimal with no
//! trailing zeros.

use std::fmt;
use thiserror::Error;

/// Fixed-point scale: 1.0 == 1e8 raw units.
pub const SCALE: i64 = 100_000_000;
const SCALE_DIGITS: u32 = 8;

/// Raw magnitudes outside this range are rejected by the parser.
const RAW_LIMIT: i64 = 1 << 62;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NumParseError {
    #[error("empty input")]
    Empty,
    #[error("invalid decimal: {0}")]
    Invalid(String),
    #[error("value out of range: {0}")]
    Overflow(String),
}

fn parse_fixed(s: &str) -> Result<i64, NumParseError> {
    if s.is_empty() {
        return Err(NumParseError::Empty);
    }

    let bytes = s.as_bytes();
    let (negative, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        b'+' => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return Err(NumParseError::Invalid(s.to_string()));
    }

    let mut parts = digits.splitn(2, |&b| b == b'.');
    let int_part = parts.next().unwrap_or(&[]);
    let frac_part = parts.next();

    if int_part.is_empty() && frac_part.map_or(true, |f| f.is_empty()) {
        return Err(NumParseError::Invalid(s.to_string()));
    }

    let mut raw: i128 = 0;
    for &b in int_part {
        if !b.is_ascii_digit() {
            return Err(NumParseError::Invalid(s.to_string()));
        }
        raw = raw * 10 + i128::from(b - b'0');
        if raw > i128::from(RAW_LIMIT) {
            return Err(NumParseError::Overflow(s.to_string()));
        }
    }
    raw *= i128::from(SCALE);

    if let Some(frac) = frac_part {
        if frac.iter().any(|b| !b.is_ascii_digit()) {
            return Err(NumParseError::Invalid(s.to_string()));
        }
        let keep = frac.len().min(SCALE_DIGITS as usize);
        let mut frac_scaled: i64 = 0;
        for &b in &frac[..keep] {
            frac_scaled = frac_scaled * 10 + i64::from(b - b'0');
        }
        frac_scaled *= 10_i64.pow(SCALE_DIGITS - keep as u32);
        raw += i128::from(frac_scaled);

        // Round half to even on the first dropped digit; any nonzero
        // digit after it breaks the tie upward.
        if frac.len() > SCALE_DIGITS as usize {
            let first_dropped = frac[SCALE_DIGITS as usize] - b'0';
            let rest_nonzero = frac[SCALE_DIGITS as usize + 1..].iter().any(|&b| b != b'0');
            if first_dropped > 5 || (first_dropped == 5 && (rest_nonzero || raw % 2 == 1)) {
                raw += 1;
            }
        }
    }

    if raw > i128::from(RAW_LIMIT) {
        return Err(NumParseError::Overflow(s.to_string()));
    }

    let raw = raw as i64;
    Ok(if negative { -raw } else { raw })
}

fn format_fixed(raw: i64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let abs = raw.unsigned_abs();
    let int = abs / SCALE as u64;
    let frac = abs % SCALE as u64;
    if raw < 0 {
        write!(f, "-")?;
    }
    if frac == 0 {
        write!(f, "{}", int)
    } else {
        let padded = format!("{:08}", frac);
        write!(f, "{}.{}", int, padded.trim_end_matches('0'))
    }
}

macro_rules! fixed_point {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(i64);

        impl $name {
            pub const ZERO: $name = $name(0);

            #[inline]
            pub const fn from_raw(raw: i64) -> Self {
                Self(raw)
            }

            /// Rounds half to even at the eighth decimal.
            #[inline]
            pub fn from_double(v: f64) -> Self {
                Self((v * SCALE as f64).round_ties_even() as i64)
            }

            pub fn from_decimal_str(s: &str) -> Result<Self, NumParseError> {
                parse_fixed(s).map(Self)
            }

            #[inline]
            pub const fn raw(self) -> i64 {
                self.0
            }

            #[inline]
            pub fn to_double(self) -> f64 {
                self.0 as f64 / SCALE as f64
            }

            #[inline]
            pub fn is_zero(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                format_fixed(self.0, f)
            }
        }
    };
}

fixed_point!(
    /// A price level, scaled by 1e8.
    Price
);
fixed_point!(
    /// An order or trade size, scaled by 1e8.
    Quantity
);
fixed_point!(
    /// A notional amount (price x quantity), scaled by 1e8.
    Volume
);

/// Strict float parsing for wire strings: rejects empty, partial,
/// non-numeric and non-finite input.
pub fn safe_parse_double(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Strict unsigned parsing for venue order ids and timestamps.
pub fn parse_u64(s: &str) -> Option<u64> {
    s.parse::<u64>().ok()
}
