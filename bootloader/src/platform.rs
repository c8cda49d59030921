//! FU540-style memory map and clocks.

use sdboot::gpt::Guid;

pub const UART_ADDR: usize = 0x6400_0000;
pub const SPI_ADDR: usize = 0x6400_1000;

/// TileLink bus clock, feeding both the UART and the SPI controller.
pub const TL_CLK_HZ: u32 = 50_000_000;
pub const BAUD_RATE: u32 = 115_200;

#[cfg(not(feature = "bare-metal"))]
pub const PARTITION_TYPE: Guid = Guid::SIFIVE_FSBL;
#[cfg(feature = "bare-metal")]
pub const PARTITION_TYPE: Guid = Guid::SIFIVE_BARE_METAL;

#[cfg(feature = "verbose")]
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Trace;
#[cfg(not(feature = "verbose"))]
pub const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Warn;
