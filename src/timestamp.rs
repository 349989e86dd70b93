//! Time bases, timestamps, and rescaling between them.
//!
//! Every stream, decoder, and encoder in a transcoding run counts time in
//! its own [`Rational`] unit. This module converts between those units with
//! the same rounding FFmpeg uses (`av_rescale_q`: nearest, halves away from
//! zero) and provides [`TimestampRescaler`], which keeps per-stream
//! presentation timestamps strictly increasing after conversion.
//!
//! # Example
//!
//! ```
//! use transpipe::{Rational, rescale};
//!
//! // 1.5 seconds at 90 kHz, expressed in milliseconds.
//! let ms = rescale(135_000, Rational::new(1, 90_000), Rational::new(1, 1_000));
//! assert_eq!(ms, 1_500);
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Sentinel for "timestamp unknown / not set" (FFmpeg's `AV_NOPTS_VALUE`).
///
/// It is never rescaled: every conversion passes it through unchanged.
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// A rational number used as a time base (seconds per tick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator.
    pub num: i32,
    /// Denominator.
    pub den: i32,
}

impl Rational {
    /// Microseconds, the unit of container-level times (`AV_TIME_BASE_Q`).
    pub const MICROSECONDS: Rational = Rational::new(1, 1_000_000);

    /// Create a new rational.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Returns `true` when both terms are strictly positive.
    pub fn is_valid(self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Swap numerator and denominator (a frame rate becomes a time base).
    pub fn invert(self) -> Self {
        Self::new(self.den, self.num)
    }

    /// The value as a floating-point number.
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Convert `value` from the `from` time base to the `to` time base.
///
/// Computes `value * from / to` with 128-bit intermediates, rounding to the
/// nearest tick and halves away from zero. [`NO_TIMESTAMP`] passes through,
/// and a degenerate base (zero term) yields [`NO_TIMESTAMP`].
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if value == NO_TIMESTAMP {
        return NO_TIMESTAMP;
    }

    let multiplier = from.num as i128 * to.den as i128;
    let divisor = from.den as i128 * to.num as i128;
    if divisor == 0 {
        return NO_TIMESTAMP;
    }

    let mut numerator = value as i128 * multiplier;
    let mut divisor = divisor;
    if divisor < 0 {
        numerator = -numerator;
        divisor = -divisor;
    }

    let half = divisor / 2;
    let quotient = if numerator >= 0 {
        (numerator + half) / divisor
    } else {
        -((-numerator + half) / divisor)
    };

    quotient.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64
}

/// Render a timestamp as `HH:MM:SS.mmm` for diagnostics.
///
/// The sentinel renders as `-` and `i64::MAX` (an unbounded ceiling) as `∞`.
pub fn format_timestamp(value: i64, base: Rational) -> String {
    if value == NO_TIMESTAMP {
        return "-".to_string();
    }
    if value == i64::MAX {
        return "∞".to_string();
    }

    let millis = rescale(value, base, Rational::new(1, 1_000));
    let sign = if millis < 0 { "-" } else { "" };
    let millis = millis.unsigned_abs();
    format!(
        "{sign}{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        (millis / 60_000) % 60,
        (millis / 1_000) % 60,
        millis % 1_000,
    )
}

/// Per-stream converter from decoder time to encoder time.
///
/// Subtracts the run's start offset (so the encoder starts near zero),
/// rescales, and bumps any presentation timestamp that would not advance
/// past the previously emitted one to `last_pts + 1`.
#[derive(Debug, Clone)]
pub struct TimestampRescaler {
    start_pts: i64,
    from: Rational,
    to: Rational,
    last_pts: i64,
}

impl TimestampRescaler {
    /// Create a rescaler. `start_pts` is expressed in `from` units.
    pub fn new(start_pts: i64, from: Rational, to: Rational) -> Self {
        Self {
            start_pts,
            from,
            to,
            last_pts: NO_TIMESTAMP,
        }
    }

    /// The last emitted presentation timestamp (in `to` units).
    pub fn last_pts(&self) -> i64 {
        self.last_pts
    }

    /// Source time base.
    pub fn from(&self) -> Rational {
        self.from
    }

    /// Destination time base.
    pub fn to(&self) -> Rational {
        self.to
    }

    /// Rescale a presentation timestamp, enforcing strict increase.
    ///
    /// Returns `None` for [`NO_TIMESTAMP`]; the frame carrying it must not
    /// be re-timed.
    pub fn rescale_pts(&mut self, pts: i64) -> Option<i64> {
        if pts == NO_TIMESTAMP {
            return None;
        }

        let start = if self.start_pts == NO_TIMESTAMP {
            0
        } else {
            self.start_pts
        };
        let mut rescaled = rescale(pts.saturating_sub(start), self.from, self.to);

        if self.last_pts != NO_TIMESTAMP && rescaled <= self.last_pts {
            self.last_pts += 1;
            rescaled = self.last_pts;
        } else {
            self.last_pts = rescaled;
        }

        Some(rescaled)
    }

    /// Rescale a duration (no offset, no collision rule).
    pub fn rescale_duration(&self, duration: i64) -> i64 {
        rescale(duration, self.from, self.to)
    }
}
