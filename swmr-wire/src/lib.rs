//! Bit-exact codec for the two blocks that make up a SWMR shadow file: the
//! fixed-size header at page 0 and the variable-length index block that
//! follows it.
//!
//! Layout and field order are part of the wire format and must not change
//! without a version bump to [`HEADER_MAGIC`]/[`INDEX_MAGIC`]. All
//! multi-byte fields are little-endian; checksums cover every preceding byte
//! of the same block.

use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Tag identifying a shadow-file header block.
pub const HEADER_MAGIC: [u8; 4] = *b"SMH1";
/// Tag identifying a shadow-file index block.
pub const INDEX_MAGIC: [u8; 4] = *b"SMI1";

#[repr(C)]
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes)]
struct RawHeader {
    magic: [u8; 4],
    page_size: U32,
    tick: U64,
    index_offset: U64,
    index_length: U64,
    checksum: U32,
}

/// Size in bytes of the encoded header block. Page 0 of the shadow file is
/// exactly this many bytes of meaningful data, zero-padded to `page_size`.
pub const HEADER_SIZE: usize = core::mem::size_of::<RawHeader>();

#[repr(C)]
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes, PartialEq, Eq)]
struct RawIndexEntry {
    page: U32,
    shadow_page: U32,
    length: U32,
    checksum: U32,
}

/// Size in bytes of one encoded index entry.
pub const ENTRY_SIZE: usize = core::mem::size_of::<RawIndexEntry>();

/// `magic + tick + num_entries + checksum`, the fixed part of an index block.
const INDEX_BASE_SIZE: usize = 4 + 8 + 4 + 4;

/// A decoded shadow-file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub page_size: u32,
    pub tick: u64,
    pub index_offset: u64,
    pub index_length: u64,
}

/// A decoded index entry: a logical page's shadow-file location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexRecord {
    /// Logical page number, the sort key.
    pub page: u32,
    /// Shadow-file page number holding this image.
    pub shadow_page: u32,
    /// Length of the image in bytes (may exceed `page_size`).
    pub length: u32,
    /// Checksum of the on-shadow image.
    pub checksum: u32,
}

/// A decoded index block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexBlock {
    pub tick: u64,
    pub entries: Vec<IndexRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("header too short: got {0} bytes, need {HEADER_SIZE}")]
    HeaderTooShort(usize),
    #[error("bad header magic")]
    BadHeaderMagic,
    #[error("bad header checksum")]
    BadHeaderChecksum,
    #[error("index block too short: got {0} bytes, need {1}")]
    IndexTooShort(usize, usize),
    #[error("bad index magic")]
    BadIndexMagic,
    #[error("bad index checksum")]
    BadIndexChecksum,
    #[error("torn read: header advertises tick {header_tick} but index carries tick {index_tick}")]
    TornRead { header_tick: u64, index_tick: u64 },
}

impl Header {
    /// Encode this header, computing its trailing checksum.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = RawHeader {
            magic: HEADER_MAGIC,
            page_size: self.page_size.into(),
            tick: self.tick.into(),
            index_offset: self.index_offset.into(),
            index_length: self.index_length.into(),
            checksum: 0.into(),
        };

        let checksummed_len = HEADER_SIZE - core::mem::size_of::<U32>();
        let checksum = crc32fast::hash(&raw.as_bytes()[..checksummed_len]);
        raw.checksum = checksum.into();

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Decode and validate a header from its first [`HEADER_SIZE`] bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_SIZE {
            return Err(WireError::HeaderTooShort(bytes.len()));
        }

        let raw = RawHeader::read_from_prefix(bytes).expect("length checked above");
        if raw.magic != HEADER_MAGIC {
            return Err(WireError::BadHeaderMagic);
        }

        let checksummed_len = HEADER_SIZE - core::mem::size_of::<U32>();
        let expected = crc32fast::hash(&bytes[..checksummed_len]);
        if expected != raw.checksum.get() {
            return Err(WireError::BadHeaderChecksum);
        }

        Ok(Header {
            page_size: raw.page_size.get(),
            tick: raw.tick.get(),
            index_offset: raw.index_offset.get(),
            index_length: raw.index_length.get(),
        })
    }
}

impl IndexBlock {
    /// Encoded size of an index block holding `num_entries` entries.
    pub fn encoded_len(num_entries: usize) -> usize {
        INDEX_BASE_SIZE + num_entries * ENTRY_SIZE
    }

    /// Encode this index block, computing its trailing checksum.
    ///
    /// Saturates at `u32::MAX` entries rather than panicking, matching the
    /// index store's own saturation on doubling.
    pub fn encode(&self) -> Vec<u8> {
        let num_entries = u32::try_from(self.entries.len()).unwrap_or(u32::MAX) as usize;
        let mut out = Vec::with_capacity(Self::encoded_len(num_entries));

        out.extend_from_slice(&INDEX_MAGIC);
        out.extend_from_slice(U64::from(self.tick).as_bytes());
        out.extend_from_slice(U32::from(num_entries as u32).as_bytes());

        for entry in self.entries.iter().take(num_entries) {
            let raw = RawIndexEntry {
                page: entry.page.into(),
                shadow_page: entry.shadow_page.into(),
                length: entry.length.into(),
                checksum: entry.checksum.into(),
            };
            out.extend_from_slice(raw.as_bytes());
        }

        let checksum = crc32fast::hash(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Decode and validate an index block.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < INDEX_BASE_SIZE {
            return Err(WireError::IndexTooShort(bytes.len(), INDEX_BASE_SIZE));
        }
        if bytes[0..4] != INDEX_MAGIC[..] {
            return Err(WireError::BadIndexMagic);
        }

        let tick = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let num_entries = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let needed = Self::encoded_len(num_entries);
        if bytes.len() < needed {
            return Err(WireError::IndexTooShort(bytes.len(), needed));
        }

        let checksum_offset = needed - 4;
        let expected = crc32fast::hash(&bytes[..checksum_offset]);
        let actual = u32::from_le_bytes(
            bytes[checksum_offset..needed].try_into().unwrap(),
        );
        if expected != actual {
            return Err(WireError::BadIndexChecksum);
        }

        let mut entries = Vec::with_capacity(num_entries);
        let mut cursor = &bytes[INDEX_BASE_SIZE - 4..checksum_offset];
        for _ in 0..num_entries {
            let raw = RawIndexEntry::read_from_prefix(cursor).expect("bounds checked above");
            entries.push(IndexRecord {
                page: raw.page.get(),
                shadow_page: raw.shadow_page.get(),
                length: raw.length.get(),
                checksum: raw.checksum.get(),
            });
            cursor = &cursor[ENTRY_SIZE..];
        }

        Ok(IndexBlock { tick, entries })
    }
}

/// The twin-tick consistency check: a reader that sees a valid header but an
/// index whose `tick` differs from the header's must treat the read as torn.
pub fn check_twin_tick(header: &Header, index: &IndexBlock) -> Result<(), WireError> {
    if header.tick == index.tick {
        Ok(())
    } else {
        Err(WireError::TornRead {
            header_tick: header.tick,
            index_tick: index.tick,
        })
    }
}
