//! Clock quantization engine
//!
//! This crate divides a reference clock into discrete intervals:
//! - Interval: an anchor offset plus a lock-free serial counter
//! - LazyPosition: an on-stack (offset, serial) token initialized on demand
//! - Metronome: internal periodic scheduler
//! - MetronomeDriver: pulse source selection, relaying, and quiescence
//! - ClockQuantizer: advances intervals and raises boundary notifications

pub mod driver;
pub mod interval;
pub mod metronome;
pub mod position;
pub mod quantizer;

pub use driver::*;
pub use interval::*;
pub use metronome::*;
pub use position::*;
pub use quantizer::*;
