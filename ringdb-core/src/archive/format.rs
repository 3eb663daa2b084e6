//! Archive file layout: header, live state, offset geometry
//!
//! All integers are little-endian. Layout:
//!
//! ```text
//! [ header | CRC32 ][ live state | CRC32 ][ tier 0 rows ][ tier 1 rows ] ...
//! ```
//!
//! The header is written once at creation. The live state has a fixed
//! encoded size for a given source/tier count and is rewritten in place
//! on every accepted sample. Row cells are raw f64 values; unknown
//! cells are NaN.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use super::{FORMAT_VERSION, MAGIC, MAX_HEADER_BYTES};
use crate::{
    config, ArchiveSpec, ConsolidationFn, Result, RingError, SourceDef, SourceKind, Timestamp,
};

/// Immutable archive metadata written at creation time
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// Step interval in seconds
    pub step: u32,
    /// Archive start time (UTC seconds); bins are counted from here
    pub start: Timestamp,
    /// Source slots in declaration order
    pub sources: Vec<SourceDef>,
    /// Consolidation tiers in declaration order
    pub tiers: Vec<ArchiveSpec>,
}

impl Header {
    /// Serialize the header with trailing CRC32
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        buf.put_slice(&MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(self.step);
        buf.put_i64_le(self.start);
        buf.put_u16_le(self.sources.len() as u16);
        buf.put_u16_le(self.tiers.len() as u16);

        for source in &self.sources {
            buf.put_u8(source.name.len() as u8);
            buf.put_slice(source.name.as_bytes());
            buf.put_u8(source.kind.code());
            buf.put_f64_le(source.max);
            buf.put_f64_le(source.default);
        }

        for tier in &self.tiers {
            buf.put_u8(tier.cfunc.code());
            buf.put_u32_le(tier.rows);
            buf.put_u32_le(tier.cpoints);
        }

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Deserialize a header from the start of `data`, validating magic,
    /// version and checksum. Returns the header and its encoded length.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut buf = data;
        if buf.remaining() < 24 {
            return Err(RingError::InvalidFormat("archive header truncated".into()));
        }

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(RingError::InvalidFormat("invalid archive magic".into()));
        }

        let version = buf.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(RingError::InvalidFormat(format!(
                "unsupported archive version: {version}"
            )));
        }

        let step = buf.get_u32_le();
        let start = buf.get_i64_le();
        let n_sources = buf.get_u16_le() as usize;
        let n_tiers = buf.get_u16_le() as usize;

        let mut sources = Vec::with_capacity(n_sources);
        for _ in 0..n_sources {
            if buf.remaining() < 1 {
                return Err(RingError::InvalidFormat("archive header truncated".into()));
            }
            let name_len = buf.get_u8() as usize;
            if name_len > config::MAX_SOURCE_NAME_LEN || buf.remaining() < name_len + 17 {
                return Err(RingError::InvalidFormat(
                    "invalid source entry in archive header".into(),
                ));
            }
            let mut name = vec![0u8; name_len];
            buf.copy_to_slice(&mut name);
            let name = String::from_utf8(name)
                .map_err(|e| RingError::InvalidFormat(e.to_string()))?;
            let kind = SourceKind::from_code(buf.get_u8()).ok_or_else(|| {
                RingError::InvalidFormat("unknown source kind code in archive header".into())
            })?;
            let max = buf.get_f64_le();
            let default = buf.get_f64_le();
            sources.push(SourceDef {
                name,
                kind,
                max,
                default,
            });
        }

        let mut tiers = Vec::with_capacity(n_tiers);
        for _ in 0..n_tiers {
            if buf.remaining() < 9 {
                return Err(RingError::InvalidFormat("archive header truncated".into()));
            }
            let cfunc = ConsolidationFn::from_code(buf.get_u8()).ok_or_else(|| {
                RingError::InvalidFormat(
                    "unknown consolidation function code in archive header".into(),
                )
            })?;
            let rows = buf.get_u32_le();
            let cpoints = buf.get_u32_le();
            tiers.push(ArchiveSpec {
                cfunc,
                rows,
                cpoints,
            });
        }

        if buf.remaining() < 4 {
            return Err(RingError::InvalidFormat("archive header truncated".into()));
        }
        let body_len = data.len() - buf.remaining();
        let expected = buf.get_u32_le();
        let actual = crc32fast::hash(&data[..body_len]);
        if expected != actual {
            return Err(RingError::ChecksumMismatch { expected, actual });
        }

        Ok((
            Self {
                step,
                start,
                sources,
                tiers,
            },
            body_len + 4,
        ))
    }
}

/// Consolidation scratch for one source slot of one tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdpSlot {
    /// Accumulator: running sum for AVERAGE, extremum for MIN/MAX, most
    /// recent known sample for LAST; NaN while the window is empty
    pub value: f64,
    /// Known (non-NaN) samples accumulated in the current window
    pub known: u32,
}

impl CdpSlot {
    pub(crate) fn empty() -> Self {
        Self {
            value: f64::NAN,
            known: 0,
        }
    }
}

/// Mutable consolidation state of one tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierState {
    /// Bins accumulated in the current consolidation window
    pub bins: u32,
    /// Consolidated rows written since creation (monotonic; the ring
    /// slot is `written % rows`)
    pub written: u64,
    /// Per-source scratch for the current window
    pub slots: Vec<CdpSlot>,
}

/// Mutable archive state, rewritten in place on every accepted sample
#[derive(Debug, Clone, PartialEq)]
pub struct LiveState {
    /// Timestamp of the last accepted sample (UTC seconds)
    pub last_update: Timestamp,
    /// Last raw input per source, NaN until the first sample; rate
    /// kinds derive their deltas from this
    pub last_values: Vec<f64>,
    /// Per-tier consolidation state
    pub tiers: Vec<TierState>,
}

impl LiveState {
    /// Fresh state for a newly created archive
    pub fn initial(header: &Header) -> Self {
        Self {
            last_update: header.start,
            last_values: vec![f64::NAN; header.sources.len()],
            tiers: header
                .tiers
                .iter()
                .map(|_| TierState {
                    bins: 0,
                    written: 0,
                    slots: vec![CdpSlot::empty(); header.sources.len()],
                })
                .collect(),
        }
    }

    /// Encoded size for the given source and tier counts
    pub fn encoded_len(n_sources: usize, n_tiers: usize) -> usize {
        8 + n_sources * 8 + n_tiers * (12 + n_sources * 12) + 4
    }

    /// Serialize the state with trailing CRC32; the result always has
    /// `encoded_len` bytes so it can be rewritten in place
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(
            self.last_values.len(),
            self.tiers.len(),
        ));

        buf.put_i64_le(self.last_update);
        for value in &self.last_values {
            buf.put_f64_le(*value);
        }
        for tier in &self.tiers {
            buf.put_u32_le(tier.bins);
            buf.put_u64_le(tier.written);
            for slot in &tier.slots {
                buf.put_f64_le(slot.value);
                buf.put_u32_le(slot.known);
            }
        }

        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);

        buf.freeze()
    }

    /// Deserialize a state block of exactly `encoded_len` bytes
    pub fn decode(data: &[u8], n_sources: usize, n_tiers: usize) -> Result<Self> {
        if data.len() != Self::encoded_len(n_sources, n_tiers) {
            return Err(RingError::InvalidFormat(
                "archive state block has unexpected size".into(),
            ));
        }

        let body_len = data.len() - 4;
        let expected = u32::from_le_bytes([
            data[body_len],
            data[body_len + 1],
            data[body_len + 2],
            data[body_len + 3],
        ]);
        let actual = crc32fast::hash(&data[..body_len]);
        if expected != actual {
            return Err(RingError::ChecksumMismatch { expected, actual });
        }

        let mut buf = &data[..body_len];
        let last_update = buf.get_i64_le();
        let last_values = (0..n_sources).map(|_| buf.get_f64_le()).collect();

        let mut tiers = Vec::with_capacity(n_tiers);
        for _ in 0..n_tiers {
            let bins = buf.get_u32_le();
            let written = buf.get_u64_le();
            let slots = (0..n_sources)
                .map(|_| CdpSlot {
                    value: buf.get_f64_le(),
                    known: buf.get_u32_le(),
                })
                .collect();
            tiers.push(TierState {
                bins,
                written,
                slots,
            });
        }

        Ok(Self {
            last_update,
            last_values,
            tiers,
        })
    }
}

/// Byte-offset geometry of one archive file
#[derive(Debug, Clone)]
pub struct Layout {
    /// Encoded header length including its CRC
    pub header_len: usize,
    /// Offset of the live state block
    pub state_offset: u64,
    /// Encoded state length including its CRC
    pub state_len: usize,
    /// Offset of the first tier's row region
    pub data_offset: u64,
    /// Absolute offset of each tier's row region
    pub tier_offsets: Vec<u64>,
    /// Bytes per row (sources x 8)
    pub row_len: usize,
    /// Total file size
    pub total_len: u64,
}

impl Layout {
    /// Compute the geometry for a header with the given encoded length
    pub fn compute(header: &Header, header_len: usize) -> Self {
        let n_sources = header.sources.len();
        let row_len = n_sources * 8;
        let state_len = LiveState::encoded_len(n_sources, header.tiers.len());
        let state_offset = header_len as u64;
        let data_offset = state_offset + state_len as u64;

        let mut tier_offsets = Vec::with_capacity(header.tiers.len());
        let mut offset = data_offset;
        for tier in &header.tiers {
            tier_offsets.push(offset);
            offset += tier.rows as u64 * row_len as u64;
        }

        Self {
            header_len,
            state_offset,
            state_len,
            data_offset,
            tier_offsets,
            row_len,
            total_len: offset,
        }
    }

    /// Absolute offset of one ring slot
    pub fn row_offset(&self, tier: usize, slot: u64) -> u64 {
        self.tier_offsets[tier] + slot * self.row_len as u64
    }
}

/// Read header, geometry and live state from an open archive file
pub(crate) fn load(file: &mut File) -> Result<(Header, Layout, LiveState)> {
    file.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(4096);
    file.by_ref().take(MAX_HEADER_BYTES).read_to_end(&mut head)?;

    let (header, header_len) = Header::decode(&head)?;
    let layout = Layout::compute(&header, header_len);

    let mut state_buf = vec![0u8; layout.state_len];
    file.seek(SeekFrom::Start(layout.state_offset))?;
    file.read_exact(&mut state_buf)?;
    let state = LiveState::decode(&state_buf, header.sources.len(), header.tiers.len())?;

    Ok((header, layout, state))
}
