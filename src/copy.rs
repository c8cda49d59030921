//! Streaming blocks off the card with READ_MULTIPLE_BLOCK.

use core::{convert::Infallible, fmt};

use log::{debug, warn};

use crate::{
    crc::crc16_slice,
    diag::Diagnostics,
    hal::spi::SpiBus,
    sd::{Command, SdCard, SdError},
    spi::SpiRegisters,
    BLOCK_SIZE,
};

/// Start token of a data block for CMD17, CMD18 and CMD24.
pub const DATA_TOKEN: u8 = 0xFE;

/// Blocks between two progress dots in [`SdCard::copy`].
pub const DOT_INTERVAL: usize = 2000;

/// The spinner of [`SdCard::copy_partition`] turns every `1 << SPINNER_SHIFT` blocks.
pub const SPINNER_SHIFT: u32 = 6;
const SPINNER: [u8; 4] = *b"-/|\\";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyError {
    /// READ_MULTIPLE_BLOCK was not accepted.
    Cmd18(SdError),
    /// A block did not match its trailing CRC16. Its bytes were already written.
    CrcMismatch { lba: u64, expected: u16, computed: u16 },
    /// The destination cannot hold the requested blocks.
    DestinationTooSmall { needed: usize, available: usize },
    /// The card is addressed with 32 bit block numbers.
    LbaOutOfRange(u64),
}

impl CopyError {
    /// The numeric code reported for the failure.
    pub const fn code(&self) -> u8 {
        match self {
            CopyError::Cmd18(_) => 1,
            CopyError::CrcMismatch { .. } => 2,
            CopyError::DestinationTooSmall { .. } => 3,
            CopyError::LbaOutOfRange(_) => 4,
        }
    }
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyError::Cmd18(e) => write!(f, "CMD18 failure: {e}"),
            CopyError::CrcMismatch {
                lba,
                expected,
                computed,
            } => write!(
                f,
                "CRC mismatch at LBA {lba:#x}: expected {expected:#06x}, got {computed:#06x}"
            ),
            CopyError::DestinationTooSmall { needed, available } => {
                write!(f, "destination holds {available} bytes, {needed} needed")
            }
            CopyError::LbaOutOfRange(lba) => write!(f, "LBA {lba:#x} out of range"),
        }
    }
}

/// Feedback while blocks stream in. Purely cosmetic.
trait Progress {
    fn start(&mut self, _diag: &mut impl Diagnostics) {}

    /// `remaining` counts the block just read.
    fn block_done(&mut self, remaining: usize, diag: &mut impl Diagnostics);

    fn crc_failed(&mut self, _diag: &mut impl Diagnostics) {}

    fn finish(&mut self, _diag: &mut impl Diagnostics) {}
}

/// A dot every [`DOT_INTERVAL`] blocks.
struct Dots;

impl Progress for Dots {
    fn block_done(&mut self, remaining: usize, diag: &mut impl Diagnostics) {
        if remaining % DOT_INTERVAL == 0 {
            diag.puts(".");
        }
    }
}

/// A spinner redrawn in place.
struct Spinner;

impl Progress for Spinner {
    fn start(&mut self, diag: &mut impl Diagnostics) {
        diag.puts("CMD18");
        diag.print(format_args!("LOADING  "));
    }

    fn block_done(&mut self, remaining: usize, diag: &mut impl Diagnostics) {
        if remaining & ((1 << SPINNER_SHIFT) - 1) == 0 {
            diag.putc(b'\x08');
            diag.putc(SPINNER[(remaining >> SPINNER_SHIFT) & 0x3]);
        }
    }

    fn crc_failed(&mut self, diag: &mut impl Diagnostics) {
        diag.puts("\x08- CRC mismatch ");
    }

    fn finish(&mut self, diag: &mut impl Diagnostics) {
        diag.puts("\x08 ");
    }
}

impl<R: SpiRegisters> SdCard<R> {
    /// Copy `block_count` blocks starting at `start_lba` into the front of `dst`.
    pub fn copy(
        &mut self,
        dst: &mut [u8],
        start_lba: u64,
        block_count: usize,
        diag: &mut impl Diagnostics,
    ) -> Result<(), CopyError> {
        self.read_blocks(dst, start_lba, block_count, &mut Dots, diag)
    }

    /// Copy a partition into the payload region, with a spinner on the console.
    pub fn copy_partition(
        &mut self,
        payload: &mut [u8],
        start_lba: u64,
        block_count: usize,
        diag: &mut impl Diagnostics,
    ) -> Result<(), CopyError> {
        self.read_blocks(payload, start_lba, block_count, &mut Spinner, diag)
    }

    /// Discard bytes until the card sends [`DATA_TOKEN`].
    ///
    /// This never gives up: a card that stops answering hangs here. Wrap the boot in a watchdog
    /// if that matters.
    pub fn wait_for_data_token_unbounded(&mut self) {
        while self.link.idle_byte() != DATA_TOKEN {}
    }

    /// Read the 512 data bytes and the trailing CRC of one block, returning the computed and
    /// the received CRC.
    fn read_block(&mut self, block: &mut [u8]) -> (u16, u16) {
        SpiBus::read(&mut self.link, block).unwrap_or_else(|e: Infallible| match e {});
        let computed = crc16_slice(0, block);
        let expected = u16::from_be_bytes([self.link.idle_byte(), self.link.idle_byte()]);
        (computed, expected)
    }

    fn read_blocks(
        &mut self,
        dst: &mut [u8],
        start_lba: u64,
        block_count: usize,
        progress: &mut impl Progress,
        diag: &mut impl Diagnostics,
    ) -> Result<(), CopyError> {
        if block_count == 0 {
            return Ok(());
        }
        let needed = block_count.saturating_mul(BLOCK_SIZE);
        if dst.len() < needed {
            return Err(CopyError::DestinationTooSmall {
                needed,
                available: dst.len(),
            });
        }
        let arg = u32::try_from(start_lba).map_err(|_| CopyError::LbaOutOfRange(start_lba))?;

        progress.start(diag);
        let command = Command::ReadMultipleBlock;
        match self.command(command, arg) {
            Ok(0x00) => {}
            Ok(r1) => {
                self.end_command();
                return Err(CopyError::Cmd18(SdError::Rejected { command, r1 }));
            }
            Err(e) => {
                self.end_command();
                return Err(CopyError::Cmd18(e));
            }
        }

        let mut result = Ok(());
        for (index, block) in dst[..needed].chunks_exact_mut(BLOCK_SIZE).enumerate() {
            self.wait_for_data_token_unbounded();
            let (computed, expected) = self.read_block(block);
            if computed != expected {
                let lba = start_lba + index as u64;
                warn!("sd: block {lba:#x} crc {computed:#06x}, card sent {expected:#06x}");
                progress.crc_failed(diag);
                result = Err(CopyError::CrcMismatch {
                    lba,
                    expected,
                    computed,
                });
                break;
            }
            progress.block_done(block_count - index, diag);
        }

        // The card keeps streaming until told to stop, whichever way the loop ended. The R1 of
        // STOP_TRANSMISSION carries nothing actionable.
        if let Err(e) = self.command(Command::StopTransmission, 0) {
            debug!("sd: {e}");
        }
        self.end_command();
        progress.finish(diag);
        result
    }
}
