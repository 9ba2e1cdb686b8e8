//! # Overstim Core Library
//!
//! Core logic for Overstim Guard: a daily "calm period" clock plus a set of
//! reversible page adaptations that run while the calm period is active.
//! The `overstim` CLI is a thin layer over this library.
//!
//! ## Architecture
//!
//! - **Schedule**: fixed clock-time or sunset/sunrise windows, including
//!   windows that cross midnight
//! - **Clock**: knows whether calm mode is active and wakes itself at the
//!   next transition instead of polling
//! - **Rules**: idempotent, reversible page adaptations driven by a
//!   registry with per-domain override precedence
//! - **Hosts**: the clock host (settings, requests, broadcasts) and one
//!   page agent per page
//!
//! ## Key Components
//!
//! - [`ScheduleClock`]: calm-state clock
//! - [`RuleRegistry`]: rule lifecycle and override precedence
//! - [`ClockHost`] / [`PageAgent`]: the two sides of the message protocol
//! - [`UserSettings`]: persisted configuration

pub mod clock;
pub mod error;
mod fault;
pub mod host;
pub mod page;
pub mod protocol;
pub mod rules;
pub mod schedule;
pub mod storage;

pub use clock::{ClockState, ClockSubscription, ScheduleClock, SystemTimeSource, TimeSource};
pub use error::{ClockError, CoreError, RuleError, StorageError, TransportError, ValidationError};
pub use host::{ChannelTransport, ClockClient, ClockHost, LocalClockClient, PageAgent, PageTransport};
pub use page::{GestureTracker, MemoryPage, Page};
pub use protocol::{PageMessage, Request, Response};
pub use rules::{CalmSnapshot, DomainOverride, Rule, RuleContext, RuleRegistry};
pub use schedule::{ScheduleConfig, SolarCalculator, SunCalculator};
pub use storage::{SettingsStore, TomlSettingsStore, UserSettings};
