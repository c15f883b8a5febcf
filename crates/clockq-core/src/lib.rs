//! Clock quantization core - fundamental types and capabilities
//!
//! This crate defines what the quantizer consumes from the outside world:
//! - Clock offsets (clock-native integer units) and unit conversions
//! - The clock and temporal-context capabilities
//! - A synchronous, ordered notification registry
//! - A wall clock and a manual (synthetic) clock

pub mod clock;
pub mod error;
pub mod manual;
pub mod notify;
pub mod time;

pub use clock::*;
pub use error::*;
pub use manual::*;
pub use notify::*;
pub use time::*;
