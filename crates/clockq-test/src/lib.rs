//! Clock quantization test harness
//!
//! This crate provides:
//! - A scriptable temporal context with manual or timer-driven metronome
//! - An event probe that records quantizer notifications
//! - Scenario tests spanning clock, context, driver and quantizer

pub mod context;
pub mod probe;

#[cfg(test)]
mod scenarios;

pub use context::*;
pub use probe::*;
