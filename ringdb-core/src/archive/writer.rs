//! Archive creation and sample merging

use bytes::BufMut;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::info;

use super::format::{self, CdpSlot, Header, Layout, LiveState, TierState};
use crate::{ArchiveSpec, ConsolidationFn, Result, RingError, SourceDef, SourceKind, Timestamp};

/// Create a new archive file, preallocated to its final size
///
/// Fails if the file already exists; archives are never recreated in
/// place.
pub fn create_archive(
    path: &Path,
    start: Timestamp,
    step: u32,
    tiers: &[ArchiveSpec],
    sources: &[SourceDef],
) -> Result<()> {
    if step == 0 {
        return Err(RingError::Validation("step must be positive".into()));
    }
    if sources.is_empty() {
        return Err(RingError::Validation(
            "archive needs at least one source slot".into(),
        ));
    }
    if tiers.is_empty() {
        return Err(RingError::Validation(
            "archive needs at least one consolidation tier".into(),
        ));
    }
    for tier in tiers {
        if tier.rows == 0 || tier.cpoints == 0 {
            return Err(RingError::Validation(
                "tier rows and cpoints must be positive".into(),
            ));
        }
    }
    for (i, source) in sources.iter().enumerate() {
        source.validate().map_err(RingError::Validation)?;
        if sources[..i].iter().any(|s| s.name == source.name) {
            return Err(RingError::Validation(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }
    }

    let header = Header {
        step,
        start,
        sources: sources.to_vec(),
        tiers: tiers.to_vec(),
    };
    let encoded = header.encode();
    let layout = Layout::compute(&header, encoded.len());
    let state = LiveState::initial(&header);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(&encoded)?;
    file.write_all(&state.encode())?;
    file.set_len(layout.total_len)?;
    file.sync_all()?;

    info!(
        "Created archive {:?}: {} sources, {} tiers, step {}s, start {}",
        path,
        sources.len(),
        tiers.len(),
        step,
        start
    );

    Ok(())
}

/// Merge one timestamped batch of values into an archive
///
/// The batch is binned at step granularity from the archive start; a
/// sample that does not advance at least one whole bin past the last
/// accepted one is rejected. Row cells are written first, the state
/// block that commits the sample last, so a failed append leaves the
/// previous sample in effect.
pub fn append_sample(path: &Path, timestamp: Timestamp, values: &[(&str, f64)]) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let (header, layout, mut state) = format::load(&mut file)?;
    let step = header.step as i64;

    if timestamp <= state.last_update {
        return Err(RingError::SampleRejected(format!(
            "timestamp {timestamp} not after last update {}",
            state.last_update
        )));
    }
    let last_bin = (state.last_update - header.start) / step;
    let new_bin = (timestamp - header.start) / step;
    if new_bin <= last_bin {
        return Err(RingError::SampleRejected(format!(
            "timestamp {timestamp} falls within the current {step}s step (minimum one step between samples)"
        )));
    }

    let elapsed = timestamp - state.last_update;
    let n_bins = (new_bin - last_bin) as u64;

    // one primary data point per slot for the elapsed interval;
    // slots absent from the batch stay unknown
    let mut pdp = vec![f64::NAN; header.sources.len()];
    for (name, value) in values {
        let index = header
            .sources
            .iter()
            .position(|s| s.name == *name)
            .ok_or_else(|| RingError::SampleRejected(format!("unknown data source '{name}'")))?;
        let def = &header.sources[index];
        if def.kind == SourceKind::Compute {
            return Err(RingError::SampleRejected(format!(
                "data source '{name}' is computed and takes no direct input"
            )));
        }
        pdp[index] = primary_data_point(def, *value, state.last_values[index], elapsed);
        state.last_values[index] = *value;
    }

    let mut writes = Vec::new();
    for (tier, spec) in header.tiers.iter().enumerate() {
        roll_tier(tier, spec, &mut state.tiers[tier], &pdp, n_bins, &mut writes);
    }

    apply_writes(&mut file, &layout, &header, &writes)?;

    state.last_update = timestamp;
    file.seek(SeekFrom::Start(layout.state_offset))?;
    file.write_all(&state.encode())?;
    file.sync_all()?;

    Ok(())
}

/// Derive the primary data point for one slot over the elapsed interval
fn primary_data_point(def: &SourceDef, value: f64, last_raw: f64, elapsed: i64) -> f64 {
    if !value.is_finite() {
        return f64::NAN;
    }
    let pdp = match def.kind {
        SourceKind::Gauge => value,
        SourceKind::Absolute => value / elapsed as f64,
        SourceKind::Derive => {
            if last_raw.is_nan() {
                f64::NAN
            } else {
                (value - last_raw) / elapsed as f64
            }
        }
        SourceKind::Counter => {
            if last_raw.is_nan() {
                f64::NAN
            } else {
                let mut delta = value - last_raw;
                // counter wrap: try 32-bit, then 64-bit
                if delta < 0.0 {
                    delta += 4_294_967_296.0;
                }
                if delta < 0.0 {
                    delta += 18_446_744_069_414_584_320.0;
                }
                if delta < 0.0 {
                    f64::NAN
                } else {
                    delta / elapsed as f64
                }
            }
        }
        SourceKind::Compute => f64::NAN,
    };
    if !pdp.is_finite() || pdp > def.max {
        f64::NAN
    } else {
        pdp
    }
}

/// Pending row mutations produced while rolling the tiers
enum RowWrite {
    /// One consolidated row at a single ring slot
    One {
        tier: usize,
        slot: u64,
        cells: Vec<f64>,
    },
    /// `count` consecutive rows with identical cells, starting at the
    /// global row index `first_row` (slots wrap modulo the tier rows)
    Span {
        tier: usize,
        first_row: u64,
        count: u64,
        cells: Vec<f64>,
    },
}

/// Feed `n_bins` bins of the same PDP vector into one tier
///
/// Windows fed entirely by this sample consolidate to the PDP itself,
/// so a long fill collapses to at most one partial-window row, one span
/// of identical rows clipped to the ring capacity, and a fresh partial
/// window.
fn roll_tier(
    tier: usize,
    spec: &ArchiveSpec,
    state: &mut TierState,
    pdp: &[f64],
    mut n_bins: u64,
    out: &mut Vec<RowWrite>,
) {
    let cpoints = spec.cpoints as u64;
    let rows = spec.rows as u64;

    // finish the window already in progress
    if state.bins > 0 {
        let take = (cpoints - state.bins as u64).min(n_bins);
        accumulate(spec.cfunc, state, pdp, take);
        state.bins += take as u32;
        n_bins -= take;
        if state.bins as u64 == cpoints {
            let cells = finalize(spec.cfunc, state);
            out.push(RowWrite::One {
                tier,
                slot: state.written % rows,
                cells,
            });
            state.written += 1;
            state.bins = 0;
        }
    }

    // whole windows; only rows the ring still retains are written
    let full = n_bins / cpoints;
    if full > 0 {
        let count = full.min(rows);
        out.push(RowWrite::Span {
            tier,
            first_row: state.written + full - count,
            count,
            cells: pdp.to_vec(),
        });
        state.written += full;
    }

    // leftover bins open a fresh window
    let rem = n_bins % cpoints;
    if rem > 0 {
        accumulate(spec.cfunc, state, pdp, rem);
        state.bins = rem as u32;
    }
}

/// Accumulate `count` bins of the PDP vector into the open window
fn accumulate(cfunc: ConsolidationFn, state: &mut TierState, pdp: &[f64], count: u64) {
    if count == 0 {
        return;
    }
    for (slot, &p) in state.slots.iter_mut().zip(pdp) {
        if p.is_nan() {
            continue;
        }
        slot.value = if slot.known == 0 {
            match cfunc {
                ConsolidationFn::Average => p * count as f64,
                _ => p,
            }
        } else {
            match cfunc {
                ConsolidationFn::Average => slot.value + p * count as f64,
                ConsolidationFn::Min => slot.value.min(p),
                ConsolidationFn::Max => slot.value.max(p),
                ConsolidationFn::Last => p,
            }
        };
        slot.known += count as u32;
    }
}

/// Close the open window: consolidate the scratch into row cells and
/// reset it. A window with no known samples yields unknown cells.
fn finalize(cfunc: ConsolidationFn, state: &mut TierState) -> Vec<f64> {
    state
        .slots
        .iter_mut()
        .map(|slot| {
            let cell = if slot.known == 0 {
                f64::NAN
            } else if cfunc == ConsolidationFn::Average {
                slot.value / slot.known as f64
            } else {
                slot.value
            };
            *slot = CdpSlot::empty();
            cell
        })
        .collect()
}

fn apply_writes(
    file: &mut std::fs::File,
    layout: &Layout,
    header: &Header,
    writes: &[RowWrite],
) -> Result<()> {
    for write in writes {
        match write {
            RowWrite::One { tier, slot, cells } => {
                file.seek(SeekFrom::Start(layout.row_offset(*tier, *slot)))?;
                file.write_all(&encode_row(cells))?;
            }
            RowWrite::Span {
                tier,
                first_row,
                count,
                cells,
            } => {
                let rows = header.tiers[*tier].rows as u64;
                let row = encode_row(cells);
                let start_slot = first_row % rows;
                let first_len = (*count).min(rows - start_slot);
                write_repeated(file, layout.row_offset(*tier, start_slot), &row, first_len)?;
                if first_len < *count {
                    write_repeated(file, layout.row_offset(*tier, 0), &row, count - first_len)?;
                }
            }
        }
    }
    Ok(())
}

fn encode_row(cells: &[f64]) -> Vec<u8> {
    let mut row = Vec::with_capacity(cells.len() * 8);
    for cell in cells {
        row.put_f64_le(*cell);
    }
    row
}

/// Write `count` copies of one encoded row at a contiguous offset,
/// chunked so a full-ring rewrite stays a handful of writes
fn write_repeated(
    file: &mut std::fs::File,
    offset: u64,
    row: &[u8],
    count: u64,
) -> Result<()> {
    const CHUNK_ROWS: u64 = 4096;

    file.seek(SeekFrom::Start(offset))?;
    let chunk_rows = count.min(CHUNK_ROWS);
    let mut chunk = Vec::with_capacity(chunk_rows as usize * row.len());
    for _ in 0..chunk_rows {
        chunk.extend_from_slice(row);
    }

    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(chunk_rows);
        file.write_all(&chunk[..n as usize * row.len()])?;
        remaining -= n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveReader;
    use tempfile::TempDir;

    const START: Timestamp = 1_400_000_000;

    fn gauge(name: &str) -> SourceDef {
        SourceDef::new(name, SourceKind::Gauge, 300.0, 0.0)
    }

    fn small_tiers() -> Vec<ArchiveSpec> {
        vec![
            ArchiveSpec::new(ConsolidationFn::Average, 16, 1),
            ArchiveSpec::new(ConsolidationFn::Max, 8, 3),
            ArchiveSpec::new(ConsolidationFn::Min, 8, 3),
            ArchiveSpec::new(ConsolidationFn::Last, 8, 3),
        ]
    }

    fn create_small(dir: &TempDir, sources: &[SourceDef]) -> std::path::PathBuf {
        let path = dir.path().join("test.rra");
        create_archive(&path, START, 60, &small_tiers(), sources).unwrap();
        path
    }

    #[test]
    fn test_create_rejects_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("a")]);

        let result = create_archive(&path, START, 60, &small_tiers(), &[gauge("a")]);
        assert!(matches!(result, Err(RingError::Io(_))));
    }

    #[test]
    fn test_create_validates_inputs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.rra");

        assert!(matches!(
            create_archive(&path, START, 0, &small_tiers(), &[gauge("a")]),
            Err(RingError::Validation(_))
        ));
        assert!(matches!(
            create_archive(&path, START, 60, &small_tiers(), &[]),
            Err(RingError::Validation(_))
        ));
        assert!(matches!(
            create_archive(&path, START, 60, &[], &[gauge("a")]),
            Err(RingError::Validation(_))
        ));
        assert!(matches!(
            create_archive(
                &path,
                START,
                60,
                &small_tiers(),
                &[gauge("a"), gauge("a")]
            ),
            Err(RingError::Validation(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_gauge_append_and_latest() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("t_ist"), gauge("t_soll")]);

        append_sample(&path, START + 60, &[("t_ist", 22.3), ("t_soll", 21.0)]).unwrap();

        let reader = ArchiveReader::open(&path).unwrap();
        let row = reader.latest().unwrap().unwrap();
        assert_eq!(row.timestamp, START + 60);
        assert_eq!(row.value("t_ist"), Some(22.3));
        assert_eq!(row.value("t_soll"), Some(21.0));
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("a")]);

        append_sample(&path, START + 60, &[("a", 1.0)]).unwrap();
        let result = append_sample(&path, START + 60, &[("a", 2.0)]);
        assert!(matches!(result, Err(RingError::SampleRejected(_))));

        // the rejected sample must not have touched the committed row
        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.latest().unwrap().unwrap().value("a"), Some(1.0));
    }

    #[test]
    fn test_out_of_order_timestamp_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("a")]);

        append_sample(&path, START + 120, &[("a", 1.0)]).unwrap();
        assert!(matches!(
            append_sample(&path, START + 60, &[("a", 2.0)]),
            Err(RingError::SampleRejected(_))
        ));
    }

    #[test]
    fn test_sub_step_sample_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("a")]);

        append_sample(&path, START + 60, &[("a", 1.0)]).unwrap();
        // later timestamp, but still inside the same 60s bin
        assert!(matches!(
            append_sample(&path, START + 90, &[("a", 2.0)]),
            Err(RingError::SampleRejected(_))
        ));
    }

    #[test]
    fn test_unknown_source_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("a")]);

        let result = append_sample(&path, START + 60, &[("nope", 1.0)]);
        assert!(matches!(result, Err(RingError::SampleRejected(_))));
    }

    #[test]
    fn test_compute_source_takes_no_input() {
        let dir = TempDir::new().unwrap();
        let sources = vec![
            gauge("a"),
            SourceDef::new("derived", SourceKind::Compute, 1e9, 0.0),
        ];
        let path = create_small(&dir, &sources);

        assert!(matches!(
            append_sample(&path, START + 60, &[("derived", 1.0)]),
            Err(RingError::SampleRejected(_))
        ));

        // the compute slot stays unknown while siblings update
        append_sample(&path, START + 60, &[("a", 5.0)]).unwrap();
        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.value("a"), Some(5.0));
        assert!(row.value("derived").unwrap().is_nan());
    }

    #[test]
    fn test_counter_rate_of_change() {
        let dir = TempDir::new().unwrap();
        let sources = vec![SourceDef::new("pulses", SourceKind::Counter, 1e9, 0.0)];
        let path = create_small(&dir, &sources);

        // first sample seeds the raw value, rate still unknown
        append_sample(&path, START + 60, &[("pulses", 1000.0)]).unwrap();
        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert!(row.value("pulses").unwrap().is_nan());

        // 120 pulses over 60 seconds -> 2 per second
        append_sample(&path, START + 120, &[("pulses", 1120.0)]).unwrap();
        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.value("pulses"), Some(2.0));
    }

    #[test]
    fn test_counter_wrap_correction() {
        let dir = TempDir::new().unwrap();
        let sources = vec![SourceDef::new("pulses", SourceKind::Counter, 1e9, 0.0)];
        let path = create_small(&dir, &sources);

        append_sample(&path, START + 60, &[("pulses", 4_294_967_290.0)]).unwrap();
        append_sample(&path, START + 120, &[("pulses", 54.0)]).unwrap();

        // wrapped past 2^32: 6 counts to the wrap plus 54 after it
        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.value("pulses"), Some(1.0));
    }

    #[test]
    fn test_derive_allows_negative_rate() {
        let dir = TempDir::new().unwrap();
        let sources = vec![SourceDef::new("level", SourceKind::Derive, 1e9, 0.0)];
        let path = create_small(&dir, &sources);

        append_sample(&path, START + 60, &[("level", 600.0)]).unwrap();
        append_sample(&path, START + 120, &[("level", 540.0)]).unwrap();

        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.value("level"), Some(-1.0));
    }

    #[test]
    fn test_absolute_divides_by_elapsed() {
        let dir = TempDir::new().unwrap();
        let sources = vec![SourceDef::new("events", SourceKind::Absolute, 1e9, 0.0)];
        let path = create_small(&dir, &sources);

        append_sample(&path, START + 60, &[("events", 120.0)]).unwrap();

        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.value("events"), Some(2.0));
    }

    #[test]
    fn test_value_above_max_becomes_unknown() {
        let dir = TempDir::new().unwrap();
        let sources = vec![SourceDef::new("t", SourceKind::Gauge, 100.0, 0.0)];
        let path = create_small(&dir, &sources);

        append_sample(&path, START + 60, &[("t", 250.0)]).unwrap();

        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert!(row.value("t").unwrap().is_nan());
    }

    #[test]
    fn test_missing_source_stays_unknown() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("a"), gauge("b")]);

        append_sample(&path, START + 60, &[("a", 1.5)]).unwrap();

        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.value("a"), Some(1.5));
        assert!(row.value("b").unwrap().is_nan());
    }

    #[test]
    fn test_average_consolidation_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("avg.rra");
        let tiers = vec![ArchiveSpec::new(ConsolidationFn::Average, 8, 3)];
        create_archive(&path, START, 60, &tiers, &[gauge("t")]).unwrap();

        append_sample(&path, START + 60, &[("t", 1.0)]).unwrap();
        append_sample(&path, START + 120, &[("t", 2.0)]).unwrap();
        assert!(ArchiveReader::open(&path).unwrap().latest().unwrap().is_none());

        // third bin closes the window: mean of 1, 2, 6
        append_sample(&path, START + 180, &[("t", 6.0)]).unwrap();
        let row = ArchiveReader::open(&path).unwrap().latest().unwrap().unwrap();
        assert_eq!(row.timestamp, START + 180);
        assert_eq!(row.value("t"), Some(3.0));
    }

    #[test]
    fn test_min_max_last_consolidation() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("t")]);

        for (i, v) in [5.0, 2.0, 8.0].iter().enumerate() {
            append_sample(&path, START + 60 * (i as i64 + 1), &[("t", *v)]).unwrap();
        }

        let reader = ArchiveReader::open(&path).unwrap();
        let range = crate::TimeRange::new(START, START + 600);
        let max = reader.fetch(ConsolidationFn::Max, range).unwrap();
        let min = reader.fetch(ConsolidationFn::Min, range).unwrap();
        let last = reader.fetch(ConsolidationFn::Last, range).unwrap();

        assert_eq!(max.len(), 1);
        assert_eq!(max[0].value("t"), Some(8.0));
        assert_eq!(min[0].value("t"), Some(2.0));
        assert_eq!(last[0].value("t"), Some(8.0));
    }

    #[test]
    fn test_ring_overwrites_oldest_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ring.rra");
        let tiers = vec![ArchiveSpec::new(ConsolidationFn::Average, 4, 1)];
        create_archive(&path, START, 60, &tiers, &[gauge("t")]).unwrap();

        for i in 1..=6 {
            append_sample(&path, START + 60 * i, &[("t", i as f64)]).unwrap();
        }

        let reader = ArchiveReader::open(&path).unwrap();
        let rows = reader
            .fetch(ConsolidationFn::Average, crate::TimeRange::new(START, START + 600))
            .unwrap();

        // 6 rows written into 4 slots: only the last 4 survive
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].timestamp, START + 180);
        assert_eq!(rows[0].value("t"), Some(3.0));
        assert_eq!(rows[3].timestamp, START + 360);
        assert_eq!(rows[3].value("t"), Some(6.0));
    }

    #[test]
    fn test_large_gap_fills_ring_efficiently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gap.rra");
        let tiers = vec![
            ArchiveSpec::new(ConsolidationFn::Average, 8, 1),
            ArchiveSpec::new(ConsolidationFn::Max, 4, 3),
        ];
        create_archive(&path, START, 60, &tiers, &[gauge("t")]).unwrap();

        // one sample a thousand bins after creation
        append_sample(&path, START + 60 * 1000, &[("t", 7.5)]).unwrap();

        let reader = ArchiveReader::open(&path).unwrap();
        let row = reader.latest().unwrap().unwrap();
        assert_eq!(row.timestamp, START + 60 * 1000);
        assert_eq!(row.value("t"), Some(7.5));

        let rows = reader
            .fetch(
                ConsolidationFn::Average,
                crate::TimeRange::new(START, START + 60 * 1000),
            )
            .unwrap();
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| r.value("t") == Some(7.5)));

        let max_rows = reader
            .fetch(
                ConsolidationFn::Max,
                crate::TimeRange::new(START, START + 60 * 1000),
            )
            .unwrap();
        assert_eq!(max_rows.len(), 4);
        assert!(max_rows.iter().all(|r| r.value("t") == Some(7.5)));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = create_small(&dir, &[gauge("t")]);

        append_sample(&path, START + 60, &[("t", 1.0)]).unwrap();
        append_sample(&path, START + 120, &[("t", 2.0)]).unwrap();

        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.last_update(), START + 120);

        // next append continues seamlessly after reopen
        append_sample(&path, START + 180, &[("t", 3.0)]).unwrap();
        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.latest().unwrap().unwrap().value("t"), Some(3.0));
    }
}
