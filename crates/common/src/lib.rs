//! Shared types for the baton workspace.
//!
//! - [`error`]: the common [`enum@Error`] type and [`Result`] alias.
//! - [`time`]: the [`Clock`](time::Clock) abstraction with a monotonic and a
//!   manual implementation, plus nanosecond/millisecond helpers.

pub mod error;
pub mod time;

pub use error::{Error, Result};
pub use time::{Clock, ManualClock, MonotonicClock};
