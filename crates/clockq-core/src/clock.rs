//! Clock capabilities consumed by the quantizer

use std::time::{Duration, SystemTime};

use crate::{
    duration_to_units, system_time_from_ticks, ticks_since_epoch, units_to_duration, ClockOffset,
    Notifier, TICKS_PER_MILLISECOND,
};

/// Reference clock
///
/// Reading the clock may be expensive or coarse; the quantizer reads it at
/// most once per advance.
pub trait Clock: Send + Sync {
    /// Current wall time
    fn now(&self) -> SystemTime;

    /// Current time as a clock-native offset
    fn now_offset(&self) -> ClockOffset;

    /// Number of offset units in one millisecond
    fn units_per_millisecond(&self) -> i64;

    /// Convert a wall time to a clock-native offset
    fn offset_of(&self, time: SystemTime) -> ClockOffset;

    /// Convert a clock-native offset to a wall time
    fn to_timestamp(&self, offset: ClockOffset) -> SystemTime;

    /// Truncates below one clock unit
    fn duration_to_units(&self, duration: Duration) -> i64 {
        duration_to_units(duration, self.units_per_millisecond())
    }

    fn units_to_duration(&self, units: i64) -> Duration {
        units_to_duration(units, self.units_per_millisecond())
    }
}

/// Raised by a temporal context after its clock was moved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockAdjusted {
    /// Clock offset right after the adjustment
    pub offset: ClockOffset,
}

/// Raised by a temporal context on every pulse of its own metronome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PulseTicked;

/// A clock that may also announce adjustments and supply its own pulse
pub trait TemporalContext: Clock {
    /// True if this context raises [`PulseTicked`] notifications, in which
    /// case the quantizer does not run a metronome of its own
    fn provides_pulse(&self) -> bool;

    fn clock_adjusted(&self) -> &Notifier<ClockAdjusted>;

    fn pulse_ticked(&self) -> &Notifier<PulseTicked>;
}

/// Wall clock with 100ns ticks since the UNIX epoch as offsets
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        SystemClock
    }
}

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn now_offset(&self) -> ClockOffset {
        self.offset_of(SystemTime::now())
    }

    fn units_per_millisecond(&self) -> i64 {
        TICKS_PER_MILLISECOND
    }

    fn offset_of(&self, time: SystemTime) -> ClockOffset {
        ClockOffset(ticks_since_epoch(time))
    }

    fn to_timestamp(&self, offset: ClockOffset) -> SystemTime {
        system_time_from_ticks(offset.0)
    }
}
