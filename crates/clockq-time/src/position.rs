//! Lazy time-serial position
//!
//! A [`LazyPosition`] is a point in time expressed as an interval anchor
//! offset plus a serial number within that interval. It starts out
//! uninitialized and is filled in place, as late as possible, through
//! [`Interval::ensure_initialized`](crate::Interval::ensure_initialized) or
//! the quantizer's `ensure_initialized*` calls.
//!
//! When initialized:
//! - serial `1` is "exact": it was issued when the interval started, so the
//!   anchor offset is the time the position was taken
//! - serial `N > 1` was issued after `N - 1` and before `N + 1` within the
//!   same interval

use std::cmp::Ordering;

use clockq_core::{ClockOffset, ClockqError, ClockqResult};

/// Snapshot of an interval's generator at claim time
#[derive(Clone, Copy, Debug, Default)]
struct Snapshot {
    offset: ClockOffset,
    serial: u32,
}

/// Time-serial position that may not have been taken yet
#[derive(Clone, Copy, Debug, Default)]
pub struct LazyPosition {
    snapshot: Snapshot,
}

impl LazyPosition {
    /// Uninitialized position
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn from_parts(offset: ClockOffset, serial: u32) -> Self {
        LazyPosition {
            snapshot: Snapshot { offset, serial },
        }
    }

    #[inline]
    pub(crate) fn apply(&mut self, offset: ClockOffset, serial: u32) {
        self.snapshot = Snapshot { offset, serial };
    }

    #[inline]
    pub fn has_value(&self) -> bool {
        self.snapshot.serial > 0
    }

    /// True if this is the first position issued in its interval
    #[inline]
    pub fn is_exact(&self) -> bool {
        self.snapshot.serial == 1
    }

    /// Anchor offset of the interval the position was issued from
    #[inline]
    pub fn offset(&self) -> ClockqResult<ClockOffset> {
        if self.has_value() {
            Ok(self.snapshot.offset)
        } else {
            Err(ClockqError::InvalidState("position has no value"))
        }
    }

    #[inline]
    pub fn serial(&self) -> ClockqResult<u32> {
        if self.has_value() {
            Ok(self.snapshot.serial)
        } else {
            Err(ClockqError::InvalidState("position has no value"))
        }
    }
}

impl PartialEq for LazyPosition {
    fn eq(&self, other: &Self) -> bool {
        match (self.has_value(), other.has_value()) {
            (false, false) => true,
            (true, true) => {
                self.snapshot.offset == other.snapshot.offset
                    && self.snapshot.serial == other.snapshot.serial
            }
            _ => false,
        }
    }
}

impl Eq for LazyPosition {}

impl PartialOrd for LazyPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.has_value(), other.has_value()) {
            (false, false) => Some(Ordering::Equal),
            (true, true) => Some(
                self.snapshot
                    .offset
                    .cmp(&other.snapshot.offset)
                    .then(self.snapshot.serial.cmp(&other.snapshot.serial)),
            ),
            _ => None,
        }
    }
}
