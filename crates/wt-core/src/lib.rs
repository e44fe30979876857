//! Core domain logic for watch-time tracking.
//!
//! This crate contains the fundamental types and logic for:
//! - Aggregates: per-day watch and listen minutes over a key-value store
//! - Tracking: the session accounting state machine and the page signal monitor
//! - Presentation: rollups, week windows and duration formatting
//! - Maintenance: first-run setup, retention pruning and reset

pub mod aggregate;
pub mod clock;
pub mod driver;
mod format;
pub mod maintenance;
pub mod monitor;
pub mod page;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod types;

pub use aggregate::{AggregateKind, Aggregates, DailyAggregate, parse_day};
pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{RunSummary, StopReason, run};
pub use format::format_minutes;
pub use maintenance::PruneReport;
pub use monitor::SignalMonitor;
pub use page::{HostEvent, HostPage, ReportedPage, VideoEvent};
pub use stats::{ActivityRow, ActivityTable, Rollup, WeekWindow, activity_table};
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use tracker::{Ambient, LiveStatus, Mode, Signal, TimingConfig, Tracker, TrackerStatus};
pub use types::{ElementId, ValidationError, VideoId};
