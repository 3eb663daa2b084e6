//! Archive reader for consolidated rows
//!
//! A reader is a snapshot: header, geometry and live state are loaded
//! at open and row reads resolve against that snapshot. Reopen to see
//! samples appended afterwards.

use bytes::Buf;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::format::{self, Header, Layout, LiveState};
use crate::{ArchiveSpec, ConsolidationFn, Result, RingError, RowSnapshot, SourceDef, TimeRange, Timestamp};

/// Read-only view of one archive file
pub struct ArchiveReader {
    path: PathBuf,
    header: Header,
    layout: Layout,
    state: LiveState,
}

impl ArchiveReader {
    /// Open an archive file and load its header and state
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let (header, layout, state) = format::load(&mut file)?;

        Ok(Self {
            path,
            header,
            layout,
            state,
        })
    }

    /// Step interval in seconds
    pub fn step(&self) -> u32 {
        self.header.step
    }

    /// Archive start time (UTC seconds)
    pub fn start(&self) -> Timestamp {
        self.header.start
    }

    /// Timestamp of the last accepted sample
    pub fn last_update(&self) -> Timestamp {
        self.state.last_update
    }

    /// Source slots in declaration order
    pub fn sources(&self) -> &[SourceDef] {
        &self.header.sources
    }

    /// Consolidation tiers in declaration order
    pub fn tiers(&self) -> &[ArchiveSpec] {
        &self.header.tiers
    }

    /// Newest consolidated row of the highest-resolution tier
    ///
    /// Returns `None` until that tier has completed its first window.
    pub fn latest(&self) -> Result<Option<RowSnapshot>> {
        let (tier, spec) = self
            .header
            .tiers
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.cpoints)
            .ok_or_else(|| RingError::InvalidFormat("archive has no tiers".into()))?;

        let tier_state = &self.state.tiers[tier];
        if tier_state.written == 0 {
            return Ok(None);
        }

        let slot = (tier_state.written - 1) % spec.rows as u64;
        let cells = self.read_row(tier, slot)?;
        let window = spec.window_seconds(self.header.step);
        let timestamp = self.header.start + tier_state.written as i64 * window;

        Ok(Some(self.snapshot(timestamp, cells)))
    }

    /// Consolidated rows of the first tier with the given function whose
    /// windows intersect the range, oldest first, clamped to what the
    /// ring still retains
    pub fn fetch(&self, cfunc: ConsolidationFn, range: TimeRange) -> Result<Vec<RowSnapshot>> {
        let (tier, spec) = self
            .header
            .tiers
            .iter()
            .enumerate()
            .find(|(_, s)| s.cfunc == cfunc)
            .ok_or_else(|| {
                RingError::NotFound(format!(
                    "no archive tier with consolidation function {cfunc}"
                ))
            })?;

        let tier_state = &self.state.tiers[tier];
        let window = spec.window_seconds(self.header.step);
        let oldest = tier_state.written.saturating_sub(spec.rows as u64);

        // conservative row-index bounds from the range, then an exact
        // per-row overlap check
        let lo = ((range.start - self.header.start) / window - 1).max(0) as u64;
        let hi = (((range.end - self.header.start) / window) + 1).max(0) as u64;
        let first = oldest.max(lo);
        let last = tier_state.written.min(hi);

        let mut rows = Vec::new();
        for index in first..last {
            let row_start = self.header.start + index as i64 * window;
            let row_end = row_start + window;
            if row_end < range.start || row_start > range.end {
                continue;
            }
            let cells = self.read_row(tier, index % spec.rows as u64)?;
            rows.push(self.snapshot(row_end, cells));
        }

        Ok(rows)
    }

    fn snapshot(&self, timestamp: Timestamp, cells: Vec<f64>) -> RowSnapshot {
        RowSnapshot {
            timestamp,
            values: self
                .header
                .sources
                .iter()
                .map(|s| s.name.clone())
                .zip(cells)
                .collect(),
        }
    }

    fn read_row(&self, tier: usize, slot: u64) -> Result<Vec<f64>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.layout.row_offset(tier, slot)))?;

        let mut buf = vec![0u8; self.layout.row_len];
        file.read_exact(&mut buf)?;

        let mut cells = &buf[..];
        Ok((0..self.header.sources.len())
            .map(|_| cells.get_f64_le())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{append_sample, create_archive};
    use crate::{SourceDef, SourceKind};
    use tempfile::TempDir;

    const START: Timestamp = 1_400_000_000;

    fn create_archive_with_rows(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("read.rra");
        let tiers = vec![
            ArchiveSpec::new(ConsolidationFn::Average, 8, 1),
            ArchiveSpec::new(ConsolidationFn::Max, 8, 2),
        ];
        let sources = vec![SourceDef::new("t", SourceKind::Gauge, 300.0, 0.0)];
        create_archive(&path, START, 60, &tiers, &sources).unwrap();

        for i in 1..=4 {
            append_sample(&path, START + 60 * i, &[("t", i as f64)]).unwrap();
        }
        path
    }

    #[test]
    fn test_open_exposes_metadata() {
        let dir = TempDir::new().unwrap();
        let path = create_archive_with_rows(&dir);

        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.step(), 60);
        assert_eq!(reader.start(), START);
        assert_eq!(reader.last_update(), START + 240);
        assert_eq!(reader.sources().len(), 1);
        assert_eq!(reader.tiers().len(), 2);
    }

    #[test]
    fn test_open_missing_file() {
        let result = ArchiveReader::open("/nonexistent/path.rra");
        assert!(matches!(result, Err(RingError::Io(_))));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("foreign.rra");
        std::fs::write(&path, b"definitely not an archive file").unwrap();

        let result = ArchiveReader::open(&path);
        assert!(matches!(result, Err(RingError::InvalidFormat(_))));
    }

    #[test]
    fn test_latest_prefers_highest_resolution_tier() {
        let dir = TempDir::new().unwrap();
        let path = create_archive_with_rows(&dir);

        // the 1-cpoint AVERAGE tier wins over the 2-cpoint MAX tier
        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.timestamp, START + 240);
        assert_eq!(row.value("t"), Some(4.0));
    }

    #[test]
    fn test_latest_none_before_first_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.rra");
        let tiers = vec![ArchiveSpec::new(ConsolidationFn::Average, 8, 1)];
        let sources = vec![SourceDef::new("t", SourceKind::Gauge, 300.0, 0.0)];
        create_archive(&path, START, 60, &tiers, &sources).unwrap();

        let reader = ArchiveReader::open(&path).unwrap();
        assert!(reader.latest().unwrap().is_none());
    }

    #[test]
    fn test_fetch_range_clamping() {
        let dir = TempDir::new().unwrap();
        let path = create_archive_with_rows(&dir);
        let reader = ArchiveReader::open(&path).unwrap();

        // full range: all four rows
        let all = reader
            .fetch(ConsolidationFn::Average, TimeRange::new(START, START + 240))
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].timestamp, START + 60);
        assert_eq!(all[3].timestamp, START + 240);

        // narrow range: only the overlapping rows
        let some = reader
            .fetch(
                ConsolidationFn::Average,
                TimeRange::new(START + 120, START + 180),
            )
            .unwrap();
        assert_eq!(some.len(), 3);
        assert_eq!(some[0].timestamp, START + 120);

        // disjoint range: nothing
        let none = reader
            .fetch(
                ConsolidationFn::Average,
                TimeRange::new(START + 10_000, START + 20_000),
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_fetch_consolidated_tier() {
        let dir = TempDir::new().unwrap();
        let path = create_archive_with_rows(&dir);
        let reader = ArchiveReader::open(&path).unwrap();

        // 4 bins over a 2-cpoint MAX tier: two rows, max of each pair
        let rows = reader
            .fetch(ConsolidationFn::Max, TimeRange::new(START, START + 240))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, START + 120);
        assert_eq!(rows[0].value("t"), Some(2.0));
        assert_eq!(rows[1].timestamp, START + 240);
        assert_eq!(rows[1].value("t"), Some(4.0));
    }

    #[test]
    fn test_fetch_unknown_cfunc() {
        let dir = TempDir::new().unwrap();
        let path = create_archive_with_rows(&dir);
        let reader = ArchiveReader::open(&path).unwrap();

        let result = reader.fetch(ConsolidationFn::Min, TimeRange::new(START, START + 240));
        assert!(matches!(result, Err(RingError::NotFound(_))));
    }
}
