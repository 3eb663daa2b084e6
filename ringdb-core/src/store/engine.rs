//! Store engine - provisioning and the update path

use chrono::Utc;
use std::path::Path;
use tracing::{info, warn};

use crate::backend::{NativeBackend, RoundRobinBackend};
use crate::schema::SchemaModel;
use crate::{
    config, ConsolidationFn, Result, RingError, RowSnapshot, TimeRange, Timestamp,
    DEFAULT_ARCHIVES,
};

/// Outcome of a provisioning call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// Archive files were created in this call
    Created,
    /// Every archive file already existed; nothing was touched
    AlreadyPresent,
}

/// One trend database: a validated schema plus a storage backend
///
/// All mutation goes through a single-process update path; the on-disk
/// format is the only serialization boundary between processes.
pub struct TrendStore<B: RoundRobinBackend = NativeBackend> {
    pub(super) schema: SchemaModel,
    pub(super) backend: B,
}

impl TrendStore<NativeBackend> {
    /// Create a store over the native archive backend
    pub fn new(schema: SchemaModel) -> Self {
        Self::with_backend(schema, NativeBackend::new())
    }

    /// Parse a JSON configuration document and create a store over it
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(Self::new(SchemaModel::from_json_str(json)?))
    }

    /// Read a JSON configuration file and create a store over it
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(SchemaModel::from_path(path)?))
    }
}

impl<B: RoundRobinBackend> TrendStore<B> {
    /// Create a store over a custom storage backend
    pub fn with_backend(schema: SchemaModel, backend: B) -> Self {
        Self { schema, backend }
    }

    /// The validated schema backing this store
    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    /// Bring every subsystem's archive file into existence
    ///
    /// A no-op when all files already exist. Explicit arguments override
    /// the configured start time and step. Creation is backdated by
    /// [`config::CREATE_BACKDATE_SECONDS`] so the first real sample is
    /// accepted. Existing files are never touched; if any file is still
    /// missing after the attempt, the call fails naming the database.
    pub fn provision(
        &self,
        start_time: Option<Timestamp>,
        step_seconds: Option<u32>,
    ) -> Result<Provisioned> {
        if self.is_provisioned() {
            info!("Database {:?} already created", self.schema.filename());
            return Ok(Provisioned::AlreadyPresent);
        }

        let start = start_time.unwrap_or_else(|| self.schema.start_time_utc());
        let step = step_seconds.unwrap_or_else(|| self.schema.step_seconds());

        let mut failed = false;
        for subsystem in self.schema.subsystems() {
            let path = self.schema.archive_path(&subsystem.name);
            if self.backend.file_accessible(&path) {
                continue;
            }
            if let Err(e) = self.backend.create_archive(
                &path,
                start - config::CREATE_BACKDATE_SECONDS,
                step,
                &DEFAULT_ARCHIVES,
                &subsystem.sources,
            ) {
                warn!(
                    "Archive creation failed for subsystem '{}': {}",
                    subsystem.name, e
                );
                failed = true;
            }
        }

        if failed || !self.is_provisioned() {
            return Err(RingError::Provisioning {
                database: self.schema.filename().display().to_string(),
            });
        }

        info!(
            "Provisioned database {:?}: {} subsystems, step {}s",
            self.schema.filename(),
            self.schema.subsystems().len(),
            step
        );
        Ok(Provisioned::Created)
    }

    /// Merge one batch of (source, value) pairs into a subsystem's
    /// archive as a single atomic sample
    ///
    /// The timestamp defaults to the current UTC time. Ordering is not
    /// pre-validated; a storage-layer refusal surfaces as
    /// [`RingError::UpdateRejected`] with the backend detail. No error
    /// means the whole batch was applied; any error means none of it
    /// was.
    pub fn update(
        &self,
        subsystem: &str,
        values: &[(&str, f64)],
        timestamp: Option<Timestamp>,
    ) -> Result<()> {
        let path = self.schema.archive_path(subsystem);
        if !self.backend.file_accessible(&path) {
            return Err(RingError::Unavailable {
                subsystem: subsystem.to_string(),
            });
        }
        if values.is_empty() {
            return Err(RingError::Validation("empty update batch".into()));
        }
        for (name, _) in values {
            if name.len() > config::MAX_SOURCE_NAME_LEN {
                return Err(RingError::Validation(format!(
                    "source name '{}' exceeds {} characters",
                    name,
                    config::MAX_SOURCE_NAME_LEN
                )));
            }
        }

        let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp());

        match self.backend.append_sample(&path, timestamp, values) {
            Ok(()) => Ok(()),
            Err(RingError::SampleRejected(detail)) => {
                warn!(
                    "Update rejected for '{}' at {}: {}",
                    subsystem, timestamp, detail
                );
                Err(RingError::UpdateRejected {
                    subsystem: subsystem.to_string(),
                    timestamp,
                    detail,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Newest consolidated sample of a subsystem
    pub fn latest(&self, subsystem: &str) -> Result<Option<RowSnapshot>> {
        let path = self.schema.archive_path(subsystem);
        if !self.backend.file_accessible(&path) {
            return Err(RingError::Unavailable {
                subsystem: subsystem.to_string(),
            });
        }
        self.backend.latest_row(&path)
    }

    /// Consolidated history of a subsystem from the tier with the given
    /// function
    pub fn fetch(
        &self,
        subsystem: &str,
        cfunc: ConsolidationFn,
        range: TimeRange,
    ) -> Result<Vec<RowSnapshot>> {
        let path = self.schema.archive_path(subsystem);
        if !self.backend.file_accessible(&path) {
            return Err(RingError::Unavailable {
                subsystem: subsystem.to_string(),
            });
        }
        self.backend.fetch_rows(&path, cfunc, range)
    }
}
