//! Schedule clock.
//!
//! Owns the active schedule, knows whether calm mode is active right now,
//! and wakes itself up at the next transition instead of polling.

mod engine;
mod time_source;

pub use engine::{ClockState, ClockSubscription, ScheduleClock, SAFETY_POLL_INTERVAL, WAKEUP_BUFFER};
pub use time_source::{SystemTimeSource, TimeSource};
