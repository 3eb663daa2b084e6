//! Availability checks and status accessors

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::TrendStore;
use crate::backend::RoundRobinBackend;
use crate::{Result, Timestamp};

impl<B: RoundRobinBackend> TrendStore<B> {
    /// Check that archive files exist and are readable and writable
    ///
    /// With a subsystem long name, checks that subsystem's file; with
    /// `None`, true only if every configured subsystem passes (and at
    /// least one is configured).
    pub fn is_available(&self, subsystem: Option<&str>) -> bool {
        match subsystem {
            Some(name) => self.backend.file_accessible(&self.schema.archive_path(name)),
            None => {
                !self.schema.subsystems().is_empty()
                    && self.schema.subsystems().iter().all(|s| {
                        self.backend.file_accessible(&self.schema.archive_path(&s.name))
                    })
            }
        }
    }

    /// Check that every subsystem's archive file is in place
    pub fn is_provisioned(&self) -> bool {
        self.is_available(None)
    }

    /// Configured enablement flag
    pub fn is_enabled(&self) -> bool {
        self.schema.is_enabled()
    }

    /// Effective step interval in seconds
    pub fn step_seconds(&self) -> u32 {
        self.schema.step_seconds()
    }

    /// Effective default start time (UTC seconds)
    pub fn start_time_utc(&self) -> Timestamp {
        self.schema.start_time_utc()
    }

    /// Database base path/name
    pub fn filename(&self) -> &Path {
        self.schema.filename()
    }

    /// Alias to long-name mapping
    pub fn subsystem_aliases(&self) -> &BTreeMap<String, String> {
        self.schema.subsystem_aliases()
    }

    /// Alias to archive-filename mapping
    pub fn subsystem_filenames(&self) -> &BTreeMap<String, PathBuf> {
        self.schema.subsystem_filenames()
    }

    /// Archive filename for one alias
    pub fn subsystem_filename(&self, alias: &str) -> Result<&Path> {
        self.schema.subsystem_filename(alias)
    }
}
