//! Round-robin archive file implementation
//!
//! One archive file holds the measurement history of a single subsystem
//! in fixed disk space:
//!
//! - an immutable header describing step, start time, source slots and
//!   consolidation tiers
//! - a small mutable state block rewritten on every accepted sample
//! - per tier, a preallocated ring of consolidated rows; once a tier is
//!   full the oldest row is overwritten
//!
//! Both header and state are CRC32-protected. The file never grows
//! after creation.

mod format;
mod reader;
mod writer;

pub use format::{CdpSlot, Header, Layout, LiveState, TierState};
pub use reader::ArchiveReader;
pub use writer::{append_sample, create_archive};

/// Archive file magic number
pub const MAGIC: [u8; 4] = *b"RNG1";

/// Archive file format version
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound of the header region buffered when opening an archive
pub(crate) const MAX_HEADER_BYTES: u64 = 64 * 1024;
