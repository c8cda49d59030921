//! The boot sequence: bring the card up, find the payload partition, load it.

use core::fmt;

use log::{info, warn};

use crate::{
    copy::CopyError,
    diag::Diagnostics,
    gpt::{Guid, Header, PartitionRange, HEADER_LBA},
    partition::{self, LocateError},
    sd::{SdCard, SdError, POWER_ON_IDLE_BYTES, RESPONSE_POLL_LIMIT},
    spi::SpiRegisters,
    BLOCK_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Frequency of the clock feeding the SPI controller.
    pub clock_hz: u32,
    /// SCK during bring-up. Cards must be initialized at 100-400 kHz.
    pub init_sck_hz: u32,
    pub transfer_sck_hz: u32,
    pub response_poll_limit: u32,
    pub power_on_idle_bytes: usize,
    pub gpt_header_lba: u64,
    pub partition_type: Guid,
}

impl BootConfig {
    /// Load the first stage bootloader partition, with the usual SD clocks.
    pub const fn new(clock_hz: u32) -> Self {
        Self {
            clock_hz,
            init_sck_hz: 300_000,
            transfer_sck_hz: 16_666_666,
            response_poll_limit: RESPONSE_POLL_LIMIT,
            power_on_idle_bytes: POWER_ON_IDLE_BYTES,
            gpt_header_lba: HEADER_LBA,
            partition_type: Guid::SIFIVE_FSBL,
        }
    }

    pub const fn with_partition_type(mut self, partition_type: Guid) -> Self {
        self.partition_type = partition_type;
        self
    }

    pub const fn init_divider(&self) -> u32 {
        divider(self.clock_hz, self.init_sck_hz)
    }

    pub const fn transfer_divider(&self) -> u32 {
        divider(self.clock_hz, self.transfer_sck_hz)
    }
}

const fn divider(clock_hz: u32, sck_hz: u32) -> u32 {
    match clock_hz.checked_div(sck_hz) {
        Some(0) | None => 1,
        Some(divider) => divider,
    }
}

/// What the boot code hands back to the entry stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExitStatus {
    /// The payload is loaded and the instruction stream synchronized.
    Success = 0,
    Failure = 1,
}

impl ExitStatus {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// The stage the boot stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    Init(SdError),
    GptHeader(CopyError),
    Locate(LocateError),
    PartitionNotFound(Guid),
    /// The partition does not fit the payload region. Nothing was copied.
    PayloadTooLarge { blocks: u64, capacity: usize },
    Payload(CopyError),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Init(e) => write!(f, "card init: {e}"),
            BootError::GptHeader(e) => write!(f, "sd_copy: gpt_header: {e}"),
            BootError::Locate(e) => write!(f, "finding partition: {e}"),
            BootError::PartitionNotFound(guid) => write!(f, "no partition of type {guid}"),
            BootError::PayloadTooLarge { blocks, capacity } => write!(
                f,
                "partition of {blocks} blocks exceeds the {capacity} byte payload region"
            ),
            BootError::Payload(e) => write!(f, "sd_copy: data: {e} (code {})", e.code()),
        }
    }
}

/// Load the partition of type `config.partition_type` into `payload`.
///
/// Returns the range that was copied. Stops at the first failing stage.
pub fn run<R: SpiRegisters>(
    card: &mut SdCard<R>,
    diag: &mut impl Diagnostics,
    config: &BootConfig,
    payload: &mut [u8],
) -> Result<PartitionRange, BootError> {
    diag.puts("INIT");
    card.set_poll_limit(config.response_poll_limit);
    card.power_on(config.init_divider(), config.power_on_idle_bytes);
    let info = card.initialize(diag).map_err(BootError::Init)?;
    info!("boot: card ready, ocr {:#010x}", info.ocr.bits());

    card.set_clock_divider(config.transfer_divider());

    let mut buf = [0u8; BLOCK_SIZE];
    diag.puts("sd_copy: gpt_header");
    card.copy(&mut buf, config.gpt_header_lba, 1, diag)
        .map_err(BootError::GptHeader)?;
    let header = Header::parse(&buf);
    if !header.has_signature() {
        warn!("boot: no GPT signature at LBA {:#x}", config.gpt_header_lba);
    }

    diag.puts("finding partition");
    let range = partition::locate(card, &header, &config.partition_type, &mut buf, diag)
        .map_err(BootError::Locate)?
        .ok_or(BootError::PartitionNotFound(config.partition_type))?;

    let blocks = range.block_count();
    if blocks.saturating_mul(BLOCK_SIZE as u64) > payload.len() as u64 {
        return Err(BootError::PayloadTooLarge {
            blocks,
            capacity: payload.len(),
        });
    }

    diag.puts("sd_copy: data");
    card.copy_partition(payload, range.first_lba, blocks as usize, diag)
        .map_err(BootError::Payload)?;
    info!(
        "boot: loaded LBA {:#x}..={:#x} ({blocks} blocks)",
        range.first_lba, range.last_lba
    );
    diag.puts("BOOT");
    Ok(range)
}

/// [`run`], reduced to the status handed back to the entry stub.
///
/// On success `sync` is called once before returning. It must make the freshly written payload
/// visible to instruction fetch (`fence.i` on RISC-V).
pub fn boot<R: SpiRegisters>(
    card: &mut SdCard<R>,
    diag: &mut impl Diagnostics,
    config: &BootConfig,
    payload: &mut [u8],
    sync: impl FnOnce(),
) -> ExitStatus {
    match run(card, diag, config, payload) {
        Ok(_) => {
            sync();
            ExitStatus::Success
        }
        Err(e) => {
            diag.print(format_args!("ERROR: {e}\r\n"));
            ExitStatus::Failure
        }
    }
}
