//! Hosts wiring the clock, settings and rules together.
//!
//! [`ClockHost`] runs once per process on the tokio side. [`PageAgent`] runs
//! once per page on that page's single thread and talks to the clock host
//! through a [`ClockClient`].

mod clock_host;
mod page_agent;

pub use clock_host::{ChannelTransport, ClockHost, PageTransport};
pub use page_agent::{ClockClient, LocalClockClient, PageAgent, FETCH_ATTEMPTS, FETCH_BACKOFF};
