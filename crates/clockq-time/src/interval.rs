//! Interval - an anchor offset plus a lock-free serial counter
//!
//! Within an interval there is no notion of time, only of the order in which
//! positions were issued. Several intervals may be alive at once: the
//! quantizer's current one, and superseded ones still held by callers.

use std::sync::atomic::{AtomicU32, Ordering};

use clockq_core::ClockOffset;

use crate::LazyPosition;

/// Time window anchored at one clock offset
#[derive(Debug)]
pub struct Interval {
    offset: ClockOffset,
    serial: AtomicU32,
}

impl Interval {
    pub(crate) fn new(offset: ClockOffset) -> Self {
        Interval {
            offset,
            serial: AtomicU32::new(0),
        }
    }

    /// Clock offset at which the interval started
    #[inline]
    pub fn offset(&self) -> ClockOffset {
        self.offset
    }

    /// Number of serials handed out so far, the seal included
    #[inline]
    pub fn issued(&self) -> u32 {
        self.serial.load(Ordering::Acquire)
    }

    /// Issue a new position. An interval reachable by callers is always
    /// sealed, so the result is never exact.
    ///
    /// Serials wrap after 2^32 claims on one interval; order is lost past
    /// that point, but a claimed position never reads as uninitialized.
    #[inline]
    pub fn new_position(&self) -> LazyPosition {
        LazyPosition::from_parts(self.offset, self.next_serial())
    }

    /// Initialize `position` off this interval unless it already holds a
    /// value and this interval has issued at least one serial.
    #[inline]
    pub fn ensure_initialized(&self, position: &mut LazyPosition) {
        if position.has_value() && self.serial.load(Ordering::Acquire) > 0 {
            return;
        }
        position.apply(self.offset, self.next_serial());
    }

    /// Forbid exact positions from here on: bumps the counter from 0 to 1,
    /// no-op if anything was issued already.
    pub(crate) fn seal(&self) {
        let _ = self
            .serial
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire);
    }

    #[inline]
    fn next_serial(&self) -> u32 {
        loop {
            let serial = self.serial.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
            // zero marks a position that was never taken
            if serial != 0 {
                return serial;
            }
        }
    }
}
