//! Time primitives for clock quantization
//!
//! A reference clock expresses "now" as a clock-native integer offset. The
//! unit of that offset is clock specific; the only thing the quantizer knows
//! about it is how many units fit in one millisecond.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of 100ns ticks in one millisecond
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

const NANOS_PER_MILLISECOND: u128 = 1_000_000;
const NANOS_PER_TICK: u128 = 100;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// Clock-native offset, in units of the clock that produced it
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockOffset(pub i64);

impl ClockOffset {
    pub const ZERO: ClockOffset = ClockOffset(0);

    #[inline]
    pub fn from_units(units: i64) -> Self {
        ClockOffset(units)
    }

    #[inline]
    pub fn units(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn saturating_add_units(self, units: i64) -> Self {
        ClockOffset(self.0.saturating_add(units))
    }

    /// Signed distance from `earlier` to `self`, in clock units
    #[inline]
    pub fn units_since(self, earlier: ClockOffset) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Debug for ClockOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "offset({})", self.0)
    }
}

/// Convert a duration to clock units, truncating sub-unit precision.
/// Saturates at `i64::MAX`; a non-positive rate yields zero.
#[inline]
pub fn duration_to_units(duration: Duration, units_per_millisecond: i64) -> i64 {
    if units_per_millisecond <= 0 {
        return 0;
    }
    let units = duration.as_nanos() * units_per_millisecond as u128 / NANOS_PER_MILLISECOND;
    units.min(i64::MAX as u128) as i64
}

/// Convert clock units to a duration, truncating to whole nanoseconds.
/// Negative unit counts saturate at `Duration::ZERO`.
#[inline]
pub fn units_to_duration(units: i64, units_per_millisecond: i64) -> Duration {
    if units <= 0 || units_per_millisecond <= 0 {
        return Duration::ZERO;
    }
    let nanos = units as u128 * NANOS_PER_MILLISECOND / units_per_millisecond as u128;
    Duration::new(
        (nanos / 1_000_000_000) as u64,
        (nanos % 1_000_000_000) as u32,
    )
}

/// 100ns ticks since the UNIX epoch; negative before the epoch.
/// Precision below one tick is truncated toward zero.
pub fn ticks_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => (after.as_nanos() / NANOS_PER_TICK).min(i64::MAX as u128) as i64,
        Err(before) => {
            let ticks = (before.duration().as_nanos() / NANOS_PER_TICK).min(i64::MAX as u128);
            -(ticks as i64)
        }
    }
}

/// Inverse of [`ticks_since_epoch`]. Times the platform cannot represent
/// collapse to the epoch.
pub fn system_time_from_ticks(ticks: i64) -> SystemTime {
    let magnitude = ticks.unsigned_abs();
    let span = Duration::new(
        magnitude / TICKS_PER_SECOND as u64,
        ((magnitude % TICKS_PER_SECOND as u64) * NANOS_PER_TICK as u64) as u32,
    );
    let time = if ticks >= 0 {
        UNIX_EPOCH.checked_add(span)
    } else {
        UNIX_EPOCH.checked_sub(span)
    };
    time.unwrap_or(UNIX_EPOCH)
}
