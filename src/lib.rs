//! Second-stage SD card boot for SiFive-style RISC-V platforms.
//!
//! The card is driven in SPI mode through a polled byte transport. After bring-up, the GPT
//! partition-entry array is scanned one block at a time for a partition-type GUID, and the
//! matching partition is streamed into the payload region with every block checked against its
//! CRC16.

// IMPORTANT: Every command frame must be followed by `SdCard::end_command` before the next frame
// is sent, even when the command failed. Leaving chip select in HOLD wedges the card.
#![cfg_attr(not(test), no_std)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod boot;
pub mod copy;
pub mod crc;
pub mod diag;
pub mod gpt;
pub mod partition;
pub mod sd;
pub mod spi;
pub mod uart;

#[cfg(test)]
mod sim;

pub(crate) use embedded_hal as hal;
pub(crate) use embedded_io as eio;

/// Size of every block moved over the bus, and of the GPT logical block.
pub const BLOCK_SIZE: usize = 512;
