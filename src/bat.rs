//! Block allocation table scanner.
//!
//! The BAT (stored in the dynamic header region) holds one little-endian
//! `u32` per logical block.  [`UNALLOCATED`] marks a block with no backing
//! data; any other value is an indirection offset and counts as allocated.
//! Offsets are not range-checked here.
//!
//! The table is read in bounded chunks so a corrupt length field cannot force
//! one huge allocation.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{Result, XvdError};

pub const ENTRY_SIZE: u64 = 4;
pub const UNALLOCATED: u32 = 0xFFFF_FFFF;

/// Read buffer size; a multiple of [`ENTRY_SIZE`].
const CHUNK_SIZE: usize = 64 * 1024;

/// Result of one pass over the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatSummary {
    pub allocated:     u64,
    pub total_entries: u64,
    /// Largest allocated entry value, if any block is allocated.
    pub highest_entry: Option<u32>,
}

impl BatSummary {
    pub fn unallocated(&self) -> u64 {
        self.total_entries - self.allocated
    }

    fn record(&mut self, entry: u32) {
        self.total_entries += 1;
        if entry == UNALLOCATED {
            return;
        }
        self.allocated += 1;
        self.highest_entry = Some(self.highest_entry.map_or(entry, |h| h.max(entry)));
    }
}

/// Count allocated entries in the table of `table_size` bytes at
/// `table_offset`.
///
/// Fails with [`XvdError::MalformedTable`] if `table_size` is not a whole
/// number of entries, and with [`XvdError::Io`] if the file ends first.
pub fn scan<R>(reader: &mut R, table_offset: u64, table_size: u64) -> Result<BatSummary>
where
    R: Read + Seek,
{
    if table_size % ENTRY_SIZE != 0 {
        return Err(XvdError::MalformedTable { size: table_size });
    }

    reader.seek(SeekFrom::Start(table_offset))?;

    let mut summary   = BatSummary::default();
    let mut remaining = table_size;
    let mut buf       = vec![0u8; CHUNK_SIZE.min(table_size as usize)];

    while remaining > 0 {
        let want  = (remaining as usize).min(buf.len());
        let chunk = &mut buf[..want];
        reader.read_exact(chunk).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "block allocation table at {table_offset:#x} ends {remaining:#x} bytes early"
                    ),
                )
            } else {
                e
            }
        })?;

        for entry in chunk.chunks_exact(ENTRY_SIZE as usize) {
            summary.record(LittleEndian::read_u32(entry));
        }
        remaining -= want as u64;
    }

    Ok(summary)
}
