//! Storage backend contract for round-robin archives
//!
//! The store talks to archive files only through this trait so the
//! on-disk engine can be swapped without touching provisioning, update
//! or status logic. The native backend drives the `archive` module
//! in-process; its mutation path is serialized behind a mutex so one
//! process cannot interleave appends to the same database.

use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::Path;

use crate::archive::{append_sample, create_archive, ArchiveReader};
use crate::{ArchiveSpec, ConsolidationFn, Result, RowSnapshot, SourceDef, TimeRange, Timestamp};

/// Contract between the store and the round-robin storage engine
pub trait RoundRobinBackend {
    /// Create one archive file with the given geometry
    fn create_archive(
        &self,
        path: &Path,
        start: Timestamp,
        step: u32,
        tiers: &[ArchiveSpec],
        sources: &[SourceDef],
    ) -> Result<()>;

    /// Merge one timestamped batch of values into an archive
    fn append_sample(&self, path: &Path, timestamp: Timestamp, values: &[(&str, f64)])
        -> Result<()>;

    /// Check that the archive file exists and is readable and writable
    fn file_accessible(&self, path: &Path) -> bool;

    /// Newest consolidated row of the highest-resolution tier
    fn latest_row(&self, path: &Path) -> Result<Option<RowSnapshot>>;

    /// Consolidated rows of the tier with the given function that
    /// intersect the range
    fn fetch_rows(
        &self,
        path: &Path,
        cfunc: ConsolidationFn,
        range: TimeRange,
    ) -> Result<Vec<RowSnapshot>>;
}

/// In-process backend writing the native archive format
#[derive(Debug, Default)]
pub struct NativeBackend {
    write_lock: Mutex<()>,
}

impl NativeBackend {
    /// Create a new native backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoundRobinBackend for NativeBackend {
    fn create_archive(
        &self,
        path: &Path,
        start: Timestamp,
        step: u32,
        tiers: &[ArchiveSpec],
        sources: &[SourceDef],
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        create_archive(path, start, step, tiers, sources)
    }

    fn append_sample(
        &self,
        path: &Path,
        timestamp: Timestamp,
        values: &[(&str, f64)],
    ) -> Result<()> {
        let _guard = self.write_lock.lock();
        append_sample(path, timestamp, values)
    }

    fn file_accessible(&self, path: &Path) -> bool {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .is_ok()
    }

    fn latest_row(&self, path: &Path) -> Result<Option<RowSnapshot>> {
        ArchiveReader::open(path)?.latest()
    }

    fn fetch_rows(
        &self,
        path: &Path,
        cfunc: ConsolidationFn,
        range: TimeRange,
    ) -> Result<Vec<RowSnapshot>> {
        ArchiveReader::open(path)?.fetch(cfunc, range)
    }
}
