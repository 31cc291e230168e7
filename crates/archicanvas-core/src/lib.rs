#![forbid(unsafe_code)]

//! Core: world-space geometry, fixed-capacity ring buffers, and logging.

pub mod geometry;
pub mod logging;
pub mod ring;

// Re-export tracing macros at crate root for ergonomic use.
#[cfg(feature = "tracing")]
pub use logging::{debug, debug_span, error, info, trace, warn};
