//! Trend store - provisioning, sample updates and status
//!
//! A [`TrendStore`] ties one validated schema to a storage backend and
//! exposes the process-facing surface: `provision`, `update`, read-back
//! and the availability/status accessors.

mod engine;
mod status;

pub use engine::{Provisioned, TrendStore};
