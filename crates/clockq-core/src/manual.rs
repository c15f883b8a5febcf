//! Manual clock - a synthetic clock that only moves when told to
//!
//! Useful for replay and for deterministic tests. Offsets are 100ns ticks
//! since the UNIX epoch, like [`SystemClock`](crate::SystemClock).

use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::{
    system_time_from_ticks, ticks_since_epoch, Clock, ClockAdjusted, ClockOffset, ClockqError,
    ClockqResult, Notifier, PulseTicked, TemporalContext, TICKS_PER_MILLISECOND,
};

/// Synthetic clock and temporal context
pub struct ManualClock {
    now: RwLock<SystemTime>,
    provides_pulse: bool,
    clock_adjusted: Notifier<ClockAdjusted>,
    pulse_ticked: Notifier<PulseTicked>,
}

impl ManualClock {
    /// Manual clock starting at `start`, without a pulse of its own
    pub fn new(start: SystemTime) -> Self {
        Self::build(start, false)
    }

    /// Manual clock starting at `start` whose pulse is fired by hand
    pub fn with_pulse(start: SystemTime) -> Self {
        Self::build(start, true)
    }

    fn build(start: SystemTime, provides_pulse: bool) -> Self {
        ManualClock {
            now: RwLock::new(start),
            provides_pulse,
            clock_adjusted: Notifier::new(),
            pulse_ticked: Notifier::new(),
        }
    }

    /// Move the clock forward by `span` and announce the adjustment
    pub fn add(&self, span: Duration) {
        let target = {
            let mut now = self.now.write();
            *now += span;
            *now
        };
        self.announce_adjustment(target);
    }

    /// Set the clock to `time` (either direction) and announce the adjustment
    pub fn adjust_to(&self, time: SystemTime) {
        *self.now.write() = time;
        self.announce_adjustment(time);
    }

    /// Fire a pulse without moving the clock
    pub fn fire_pulse(&self) -> ClockqResult<()> {
        self.check_pulse()?;
        self.pulse_ticked.notify(&PulseTicked);
        Ok(())
    }

    /// Move the clock forward to `time`, then fire a pulse. No
    /// [`ClockAdjusted`] is raised for this move.
    pub fn fire_pulse_at(&self, time: SystemTime) -> ClockqResult<()> {
        self.check_pulse()?;
        {
            let mut now = self.now.write();
            if time < *now {
                return Err(ClockqError::OutOfRange(
                    "pulse time lies before the current clock time".into(),
                ));
            }
            *now = time;
        }
        self.pulse_ticked.notify(&PulseTicked);
        Ok(())
    }

    fn check_pulse(&self) -> ClockqResult<()> {
        if self.provides_pulse {
            Ok(())
        } else {
            Err(ClockqError::InvalidOperation(
                "clock does not provide a pulse".into(),
            ))
        }
    }

    fn announce_adjustment(&self, time: SystemTime) {
        tracing::trace!(offset = ticks_since_epoch(time), "manual clock adjusted");
        self.clock_adjusted.notify(&ClockAdjusted {
            offset: ClockOffset(ticks_since_epoch(time)),
        });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.read()
    }

    fn now_offset(&self) -> ClockOffset {
        self.offset_of(self.now())
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

impl TemporalContext for ManualClock {
    fn provides_pulse(&self) -> bool {
        self.provides_pulse
    }

    fn clock_adjusted(&self) -> &Notifier<ClockAdjusted> {
        &self.clock_adjusted
    }

    fn pulse_ticked(&self) -> &Notifier<PulseTicked> {
        &self.pulse_ticked
    }
}
