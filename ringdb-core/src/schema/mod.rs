//! Schema model - validated configuration for one trend database
//!
//! A structured configuration document declares the database base name,
//! the global options (enablement, step interval, start time) and the
//! subsystems with their ordered source definitions. Loading validates
//! the document once and produces immutable per-instance lookup state;
//! nothing here touches the filesystem beyond reading the document.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{config, Result, RingError, SourceDef, Timestamp};

/// Raw configuration document, the serde carrier
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseDocument {
    /// Base path/name for archive files
    pub dbname: String,
    /// Global database options
    #[serde(default)]
    pub database: DatabaseOptions,
    /// Subsystem blocks in declaration order
    #[serde(default)]
    pub subsystems: Vec<SubsystemDocument>,
}

/// Global database options block
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseOptions {
    /// Enablement flag; accepts bool, integer and "ON"/"1" string forms
    #[serde(default, deserialize_with = "de_enable")]
    pub enable: bool,
    /// Step interval in seconds, clamped to the 60-second floor
    #[serde(default = "default_step")]
    pub step_seconds: u32,
    /// Default archive start time (UTC seconds)
    #[serde(default = "default_start")]
    pub starttime_utc: Timestamp,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            enable: false,
            step_seconds: default_step(),
            starttime_utc: default_start(),
        }
    }
}

fn default_step() -> u32 {
    config::STEP_FLOOR_SECONDS
}

fn default_start() -> Timestamp {
    config::START_TIME_FALLBACK
}

/// One subsystem block of the document
#[derive(Debug, Clone, Deserialize)]
pub struct SubsystemDocument {
    /// Long name, unique across the document
    pub name: String,
    /// Short alias used as external lookup key
    #[serde(alias = "shortname")]
    pub alias: String,
    /// Source definitions in declaration order
    #[serde(default, alias = "logitems")]
    pub sources: Vec<SourceDef>,
}

/// Enablement accepts boolean, integer and string spellings; "ON" and
/// "1" (any case) mean enabled, everything else disabled.
fn de_enable<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n == 1,
        Flag::Text(s) => matches!(
            s.to_ascii_uppercase().as_str(),
            "ON" | "1" | "TRUE" | "YES"
        ),
    })
}

/// One validated subsystem with its ordered source definitions
#[derive(Debug, Clone)]
pub struct Subsystem {
    /// Long name, the update key
    pub name: String,
    /// Short alias, the external lookup key
    pub alias: String,
    /// Source definitions in declaration order
    pub sources: Vec<SourceDef>,
}

/// Validated, immutable schema for one database configuration
///
/// Alias lookups are per-instance state built once at load time.
#[derive(Debug, Clone)]
pub struct SchemaModel {
    dbname: PathBuf,
    enabled: bool,
    step_seconds: u32,
    start_time_utc: Timestamp,
    subsystems: Vec<Subsystem>,
    aliases: BTreeMap<String, String>,
    filenames: BTreeMap<String, PathBuf>,
}

impl SchemaModel {
    /// Validate a parsed document into a schema model
    pub fn from_document(doc: DatabaseDocument) -> Result<Self> {
        if doc.dbname.trim().is_empty() {
            return Err(RingError::Configuration(
                "'dbname' missing or empty in configuration".to_string(),
            ));
        }

        let step_seconds = doc.database.step_seconds.max(config::STEP_FLOOR_SECONDS);
        let start_time_utc = if doc.database.starttime_utc < config::START_TIME_MIN
            || doc.database.starttime_utc > config::START_TIME_MAX
        {
            config::START_TIME_FALLBACK
        } else {
            doc.database.starttime_utc
        };

        let dbname = PathBuf::from(doc.dbname);
        let mut subsystems = Vec::with_capacity(doc.subsystems.len());
        let mut aliases = BTreeMap::new();
        let mut filenames = BTreeMap::new();

        for part in doc.subsystems {
            if part.name.trim().is_empty() {
                return Err(RingError::Configuration(
                    "subsystem with empty name in configuration".to_string(),
                ));
            }
            if part.alias.trim().is_empty() {
                return Err(RingError::Configuration(format!(
                    "subsystem '{}' has an empty alias",
                    part.name
                )));
            }
            if subsystems.iter().any(|s: &Subsystem| s.name == part.name) {
                return Err(RingError::Configuration(format!(
                    "duplicate subsystem name '{}'",
                    part.name
                )));
            }
            if aliases.contains_key(&part.alias) {
                return Err(RingError::Configuration(format!(
                    "duplicate subsystem alias '{}'",
                    part.alias
                )));
            }
            for source in &part.sources {
                source.validate().map_err(|detail| {
                    RingError::Configuration(format!("subsystem '{}': {detail}", part.name))
                })?;
            }

            aliases.insert(part.alias.clone(), part.name.clone());
            filenames.insert(part.alias.clone(), archive_path(&dbname, &part.name));
            subsystems.push(Subsystem {
                name: part.name,
                alias: part.alias,
                sources: part.sources,
            });
        }

        info!(
            "Loaded schema for {:?}: {} subsystems, step {}s",
            dbname,
            subsystems.len(),
            step_seconds
        );

        Ok(Self {
            dbname,
            enabled: doc.database.enable,
            step_seconds,
            start_time_utc,
            subsystems,
            aliases,
            filenames,
        })
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let doc: DatabaseDocument = serde_json::from_str(json)
            .map_err(|e| RingError::Configuration(format!("malformed configuration: {e}")))?;
        Self::from_document(doc)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Database base path/name
    pub fn filename(&self) -> &Path {
        &self.dbname
    }

    /// Configured enablement flag
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Effective step interval in seconds (never below 60)
    pub fn step_seconds(&self) -> u32 {
        self.step_seconds
    }

    /// Effective default start time (UTC seconds, within the sane window)
    pub fn start_time_utc(&self) -> Timestamp {
        self.start_time_utc
    }

    /// Configured subsystems in declaration order
    pub fn subsystems(&self) -> &[Subsystem] {
        &self.subsystems
    }

    /// Look up a subsystem by long name
    pub fn subsystem(&self, name: &str) -> Option<&Subsystem> {
        self.subsystems.iter().find(|s| s.name == name)
    }

    /// Alias to long-name mapping
    pub fn subsystem_aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Alias to archive-filename mapping
    pub fn subsystem_filenames(&self) -> &BTreeMap<String, PathBuf> {
        &self.filenames
    }

    /// Archive filename for one alias
    pub fn subsystem_filename(&self, alias: &str) -> Result<&Path> {
        self.filenames
            .get(alias)
            .map(PathBuf::as_path)
            .ok_or_else(|| RingError::NotFound(format!("unknown subsystem alias '{alias}'")))
    }

    /// Archive path for a subsystem long name
    pub fn archive_path(&self, subsystem: &str) -> PathBuf {
        archive_path(&self.dbname, subsystem)
    }
}

fn archive_path(dbname: &Path, subsystem: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}_{}.{}",
        dbname.display(),
        subsystem,
        config::ARCHIVE_FILE_EXT
    ))
}
