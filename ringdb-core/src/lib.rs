//! RingDB Core - Fixed-Capacity Round-Robin Trend Database
//!
//! A Rust storage engine for periodic numeric measurements (sensor
//! readings, counters) kept in bounded disk space for long-term trend
//! analysis.
//!
//! # Architecture
//!
//! One archive file per configured subsystem, each holding several
//! consolidation tiers at different resolutions:
//!
//! - **Schema Model**: validated configuration - subsystems, source
//!   definitions, global database options
//! - **Archive File**: the on-disk round-robin structure - fixed row
//!   capacity per tier, oldest rows overwritten at capacity
//! - **Store**: provisioning, sample updates, and availability/status
//!   over a schema and a storage backend
//! - **Backend**: the storage contract isolating the archive format so
//!   it can be swapped without touching the core

pub mod archive;
pub mod backend;
pub mod schema;
pub mod store;

mod error;
mod types;

pub use error::{Result, RingError};
pub use types::*;

/// RingDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Smallest permitted step interval in seconds
    pub const STEP_FLOOR_SECONDS: u32 = 60;

    /// Lower bound of the accepted start-time window (UTC seconds)
    pub const START_TIME_MIN: i64 = 1_344_000_000;

    /// Upper bound of the accepted start-time window (UTC seconds)
    pub const START_TIME_MAX: i64 = 1_999_999_999;

    /// Start time applied when the configured value is out of range
    pub const START_TIME_FALLBACK: i64 = 1_344_000_000;

    /// Archive creation is backdated by this many seconds so the first
    /// sample after provisioning is not rejected as too old
    pub const CREATE_BACKDATE_SECONDS: i64 = 600;

    /// Storage-format ceiling for source-slot names
    pub const MAX_SOURCE_NAME_LEN: usize = 18;

    /// Archive file extension
    pub const ARCHIVE_FILE_EXT: &str = "rra";
}
