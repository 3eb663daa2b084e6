//! Core types for RingDB

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::config;

/// Timestamp in UTC seconds since Unix epoch
pub type Timestamp = i64;

/// Data-source kind of one measurement slot
///
/// GAUGE stores the value as-is; COUNTER and DERIVE store the rate of
/// change per second (COUNTER with wrap correction, never negative);
/// ABSOLUTE treats the value as a counter reset on every read; COMPUTE
/// slots are derived from other sources and take no direct input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Gauge,
    Counter,
    Derive,
    Absolute,
    Compute,
}

impl SourceKind {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GAUGE" => Some(SourceKind::Gauge),
            "COUNTER" => Some(SourceKind::Counter),
            "DERIVE" => Some(SourceKind::Derive),
            "ABSOLUTE" => Some(SourceKind::Absolute),
            "COMPUTE" => Some(SourceKind::Compute),
            _ => None,
        }
    }

    /// Canonical uppercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Gauge => "GAUGE",
            SourceKind::Counter => "COUNTER",
            SourceKind::Derive => "DERIVE",
            SourceKind::Absolute => "ABSOLUTE",
            SourceKind::Compute => "COMPUTE",
        }
    }

    /// Wire code used in the archive header
    pub(crate) fn code(&self) -> u8 {
        match self {
            SourceKind::Gauge => 1,
            SourceKind::Counter => 2,
            SourceKind::Derive => 3,
            SourceKind::Absolute => 4,
            SourceKind::Compute => 5,
        }
    }

    /// Decode a wire code
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SourceKind::Gauge),
            2 => Some(SourceKind::Counter),
            3 => Some(SourceKind::Derive),
            4 => Some(SourceKind::Absolute),
            5 => Some(SourceKind::Compute),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SourceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SourceKind::from_str(&s).ok_or_else(|| {
            de::Error::custom(format!(
                "unknown source kind '{s}' (expected GAUGE, COUNTER, DERIVE, ABSOLUTE or COMPUTE)"
            ))
        })
    }
}

/// Consolidation function of one archive tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsolidationFn {
    Last,
    Average,
    Max,
    Min,
}

impl ConsolidationFn {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LAST" => Some(ConsolidationFn::Last),
            "AVERAGE" | "AVG" | "MEAN" => Some(ConsolidationFn::Average),
            "MAX" => Some(ConsolidationFn::Max),
            "MIN" => Some(ConsolidationFn::Min),
            _ => None,
        }
    }

    /// Canonical uppercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationFn::Last => "LAST",
            ConsolidationFn::Average => "AVERAGE",
            ConsolidationFn::Max => "MAX",
            ConsolidationFn::Min => "MIN",
        }
    }

    /// Wire code used in the archive header
    pub(crate) fn code(&self) -> u8 {
        match self {
            ConsolidationFn::Last => 1,
            ConsolidationFn::Average => 2,
            ConsolidationFn::Max => 3,
            ConsolidationFn::Min => 4,
        }
    }

    /// Decode a wire code
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConsolidationFn::Last),
            2 => Some(ConsolidationFn::Average),
            3 => Some(ConsolidationFn::Max),
            4 => Some(ConsolidationFn::Min),
            _ => None,
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ConsolidationFn {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConsolidationFn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ConsolidationFn::from_str(&s).ok_or_else(|| {
            de::Error::custom(format!(
                "unknown consolidation function '{s}' (expected LAST, AVERAGE, MAX or MIN)"
            ))
        })
    }
}

/// One measurement slot definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDef {
    /// Slot name, at most 18 characters
    pub name: String,
    /// Data-source kind
    #[serde(alias = "datause")]
    pub kind: SourceKind,
    /// Maximum plausible value; samples above it become unknown
    #[serde(alias = "maxvalue")]
    pub max: f64,
    /// Default value recorded at archive creation
    #[serde(default)]
    pub default: f64,
}

impl SourceDef {
    /// Create a new source definition
    pub fn new(name: impl Into<String>, kind: SourceKind, max: f64, default: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            max,
            default,
        }
    }

    /// Check the slot name against the storage-format constraints
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("source name must not be empty".to_string());
        }
        if self.name.len() > config::MAX_SOURCE_NAME_LEN {
            return Err(format!(
                "source name '{}' exceeds {} characters",
                self.name,
                config::MAX_SOURCE_NAME_LEN
            ));
        }
        Ok(())
    }
}

/// One consolidation tier definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    /// Consolidation function merging raw samples into one row
    pub cfunc: ConsolidationFn,
    /// Fixed row capacity of the tier
    pub rows: u32,
    /// Raw samples consolidated into one row
    pub cpoints: u32,
}

impl ArchiveSpec {
    /// Create a new tier definition
    pub const fn new(cfunc: ConsolidationFn, rows: u32, cpoints: u32) -> Self {
        Self {
            cfunc,
            rows,
            cpoints,
        }
    }

    /// Seconds covered by one consolidated row
    pub fn window_seconds(&self, step: u32) -> i64 {
        self.cpoints as i64 * step as i64
    }
}

/// Default tier table for provisioned archives
///
/// With a 60-second step: LAST every 5 minutes kept 10 years back,
/// AVERAGE every minute kept 1 year back, MAX and MIN every 5 minutes
/// kept 1 year back.
pub const DEFAULT_ARCHIVES: [ArchiveSpec; 4] = [
    ArchiveSpec::new(ConsolidationFn::Last, 1_051_200, 5),
    ArchiveSpec::new(ConsolidationFn::Average, 525_600, 1),
    ArchiveSpec::new(ConsolidationFn::Max, 105_120, 5),
    ArchiveSpec::new(ConsolidationFn::Min, 105_120, 5),
];

/// Time range in UTC seconds (inclusive bounds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Duration in seconds
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// One consolidated row read back from an archive
#[derive(Debug, Clone, PartialEq)]
pub struct RowSnapshot {
    /// Window-end timestamp of the row (UTC seconds)
    pub timestamp: Timestamp,
    /// Per-source values in slot order; unknown cells are NaN
    pub values: Vec<(String, f64)>,
}

impl RowSnapshot {
    /// Look up a value by source name
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}
