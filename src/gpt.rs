//! The parts of the GUID Partition Table the boot code needs.
//!
//! All multi-byte fields are little-endian on disk.

use core::fmt;

use crate::BLOCK_SIZE;

/// The primary GPT header lives right after the protective MBR.
pub const HEADER_LBA: u64 = 1;

const SIGNATURE: &[u8; 8] = b"EFI PART";

// Header field offsets
const SIGNATURE_OFFSET: usize = 0;
const ENTRIES_LBA_OFFSET: usize = 72;
const NUM_ENTRIES_OFFSET: usize = 80;
const ENTRY_SIZE_OFFSET: usize = 84;

// Partition entry field offsets
const TYPE_GUID_OFFSET: usize = 0;
const FIRST_LBA_OFFSET: usize = 32;
const LAST_LBA_OFFSET: usize = 40;

/// A GUID in its on-disk byte order: the first three groups are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// EFI system partition, c12a7328-f81f-11d2-ba4b-00a0c93ec93b
    pub const EFI_SYSTEM: Guid = Guid([
        0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e, 0xc9,
        0x3b,
    ]);
    /// SiFive first stage bootloader, 5b193300-fc78-40cd-8002-e86c45580b47
    pub const SIFIVE_FSBL: Guid = Guid([
        0x00, 0x33, 0x19, 0x5b, 0x78, 0xfc, 0xcd, 0x40, 0x80, 0x02, 0xe8, 0x6c, 0x45, 0x58, 0x0b,
        0x47,
    ]);
    /// SiFive bare-metal payload, 2e54b353-1271-4842-806f-e436d6af6985
    pub const SIFIVE_BARE_METAL: Guid = Guid([
        0x53, 0xb3, 0x54, 0x2e, 0x71, 0x12, 0x42, 0x48, 0x80, 0x6f, 0xe4, 0x36, 0xd6, 0xaf, 0x69,
        0x85,
    ]);

    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            b[8],
            b[9],
        )?;
        for byte in &b[10..] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The fields of the GPT header used to find the partition-entry array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub signature: [u8; 8],
    pub partition_entries_lba: u64,
    pub num_partition_entries: u32,
    pub partition_entry_size: u32,
}

impl Header {
    pub fn parse(block: &[u8; BLOCK_SIZE]) -> Self {
        Self {
            signature: read_array(block, SIGNATURE_OFFSET),
            partition_entries_lba: u64::from_le_bytes(read_array(block, ENTRIES_LBA_OFFSET)),
            num_partition_entries: u32::from_le_bytes(read_array(block, NUM_ENTRIES_OFFSET)),
            partition_entry_size: u32::from_le_bytes(read_array(block, ENTRY_SIZE_OFFSET)),
        }
    }

    pub fn has_signature(&self) -> bool {
        &self.signature == SIGNATURE
    }

    /// Blocks spanned by the partition-entry array, rounded up.
    pub fn entry_array_blocks(&self) -> u64 {
        let bytes = self.num_partition_entries as u64 * self.partition_entry_size as u64;
        bytes.div_ceil(BLOCK_SIZE as u64)
    }

    /// Exclusive end of the partition-entry array.
    pub fn entries_lba_end(&self) -> u64 {
        self.partition_entries_lba
            .saturating_add(self.entry_array_blocks())
    }
}

/// An inclusive range of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    pub first_lba: u64,
    pub last_lba: u64,
}

impl PartitionRange {
    /// Returned when no partition matched. LBA 0 holds the protective MBR, so no partition can
    /// start there.
    pub const INVALID: PartitionRange = PartitionRange {
        first_lba: 0,
        last_lba: 0,
    };

    pub const fn is_valid(&self) -> bool {
        self.first_lba != 0 && self.last_lba >= self.first_lba
    }

    /// Number of blocks in the range. Zero for an invalid range.
    pub const fn block_count(&self) -> u64 {
        if self.is_valid() {
            self.last_lba - self.first_lba + 1
        } else {
            0
        }
    }
}

/// Look through the first `num_entries` entries of a block of the partition-entry array for
/// one with partition type `guid`.
///
/// Entries are `entry_size` bytes apart; entries that would run past the end of the block are
/// not looked at. Returns [`PartitionRange::INVALID`] when nothing matches.
pub fn find_partition_by_guid(
    block: &[u8],
    guid: &Guid,
    num_entries: u32,
    entry_size: usize,
) -> PartitionRange {
    if entry_size < LAST_LBA_OFFSET + 8 {
        return PartitionRange::INVALID;
    }
    block
        .chunks_exact(entry_size)
        .take(num_entries as usize)
        .find(|entry| entry[TYPE_GUID_OFFSET..TYPE_GUID_OFFSET + 16] == guid.0)
        .map(|entry| PartitionRange {
            first_lba: u64::from_le_bytes(read_array(entry, FIRST_LBA_OFFSET)),
            last_lba: u64::from_le_bytes(read_array(entry, LAST_LBA_OFFSET)),
        })
        .unwrap_or(PartitionRange::INVALID)
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(&bytes[offset..offset + N]);
    array
}
