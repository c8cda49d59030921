//! Finding a partition by type in the GPT partition-entry array.

use core::fmt;

use log::debug;

use crate::{
    copy::CopyError,
    diag::Diagnostics,
    gpt::{find_partition_by_guid, Guid, Header, PartitionRange},
    sd::SdCard,
    spi::SpiRegisters,
    BLOCK_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateError {
    /// Entries must fit in a block, and be large enough to hold the LBA fields.
    InvalidEntrySize(u32),
    /// A block of the entry array could not be read.
    Read { lba: u64, source: CopyError },
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateError::InvalidEntrySize(size) => write!(f, "invalid partition entry size {size}"),
            LocateError::Read { lba, source } => write!(f, "reading LBA {lba:#x}: {source}"),
        }
    }
}

/// Scan the partition-entry array described by `header` for a partition of type `guid`.
///
/// Each block of the array is read into `buf` in turn, so the header the caller parsed out of
/// `buf` must not be needed any more. Returns the first match, or `None` once all
/// `ceil(entries * entry_size / 512)` blocks have been looked at.
pub fn locate<R: SpiRegisters>(
    card: &mut SdCard<R>,
    header: &Header,
    guid: &Guid,
    buf: &mut [u8; BLOCK_SIZE],
    diag: &mut impl Diagnostics,
) -> Result<Option<PartitionRange>, LocateError> {
    let entry_size = header.partition_entry_size;
    if !(48..=BLOCK_SIZE as u32).contains(&entry_size) {
        return Err(LocateError::InvalidEntrySize(entry_size));
    }
    let entries_per_block = BLOCK_SIZE as u32 / entry_size;
    diag.print(format_args!("partition entries per block: {entries_per_block:#x}\r\n"));

    for lba in header.partition_entries_lba..header.entries_lba_end() {
        card.copy(buf, lba, 1, diag)
            .map_err(|source| LocateError::Read { lba, source })?;

        // Every slot of the block is looked at, the last block of the array included.
        let range = find_partition_by_guid(buf, guid, entries_per_block, entry_size as usize);
        if range.is_valid() {
            diag.print(format_args!(
                "partition range: {:#x} to {:#x}\r\n",
                range.first_lba, range.last_lba
            ));
            return Ok(Some(range));
        }
        debug!("gpt: no {guid} in LBA {lba:#x}");
    }
    Ok(None)
}
