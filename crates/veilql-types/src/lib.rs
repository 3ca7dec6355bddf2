//! Core type definitions for VeilQL.
//!
//! [`Value`] is the engine's tagged SQL value; label comparisons and all
//! seed derivations go through its canonical byte encoding so that grouping,
//! sibling matching, and noise seeding agree bit-for-bit. [`AnonConfig`] is
//! the validated anonymization parameter bundle passed (never global) into
//! every engine entry point.

mod config;
mod value;

pub use config::AnonConfig;
pub use value::{HistogramBin, NullableValue, Value, ValueType};
