//! SD card bring-up in SPI mode.
//!
//! Every command has the same shape on the wire: chip select held, one leading idle byte, the
//! six byte frame, then idle bytes until the card answers with an R1 byte whose top bit is
//! clear. Trailing response bytes follow, then [`SdCard::end_command`] clocks one more idle byte
//! and hands chip select back to the controller.

use core::{convert::Infallible, fmt};

use bitflags::bitflags;
use log::{debug, trace, warn};

use crate::{
    crc::command_crc,
    diag::Diagnostics,
    hal::spi::SpiBus,
    spi::{CsMode, SpiLink, SpiRegisters},
    BLOCK_SIZE,
};

/// Idle bytes polled for an R1 response before the command counts as timed out.
///
/// This is an iteration count tuned against the link's byte rate at the init clock, so it only
/// approximates a wall-clock timeout.
pub const RESPONSE_POLL_LIMIT: u32 = 1000;

/// Idle bytes clocked with chip select deasserted at power-on. The card needs at least 74
/// clock cycles.
pub const POWER_ON_IDLE_BYTES: usize = 10;

/// Voltage window and check pattern sent with CMD8 (2.7-3.6V, 0xAA).
const IF_COND_ARG: u32 = 0x1AA;
/// ACMD41 argument with the Host Capacity Support bit set.
const HCS: u32 = 1 << 30;

/// The commands issued by the boot code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GoIdleState,
    SendIfCond,
    StopTransmission,
    SetBlocklen,
    ReadMultipleBlock,
    AppCmd,
    /// Application specific, must follow [`Command::AppCmd`].
    SdSendOpCond,
    ReadOcr,
}

impl Command {
    pub const fn index(self) -> u8 {
        match self {
            Command::GoIdleState => 0,
            Command::SendIfCond => 8,
            Command::StopTransmission => 12,
            Command::SetBlocklen => 16,
            Command::ReadMultipleBlock => 18,
            Command::AppCmd => 55,
            Command::SdSendOpCond => 41,
            Command::ReadOcr => 58,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SdSendOpCond => write!(f, "ACMD{}", self.index()),
            _ => write!(f, "CMD{}", self.index()),
        }
    }
}

/// A command as clocked onto the bus: start bits and index, big-endian argument, CRC7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; 6]);

impl CommandFrame {
    pub const fn new(command: Command, arg: u32) -> Self {
        let [a, b, c, d] = arg.to_be_bytes();
        let head = [0x40 | command.index(), a, b, c, d];
        Self([head[0], a, b, c, d, command_crc(&head)])
    }

    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub const fn crc(&self) -> u8 {
        self.0[5]
    }
}

bitflags! {
    /// R1 response flags. A clear top bit marks the byte as a response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct R1: u8 {
        const IDLE = 1 << 0;
        const ERASE_RESET = 1 << 1;
        const ILLEGAL_COMMAND = 1 << 2;
        const CRC_ERROR = 1 << 3;
        const ERASE_SEQUENCE = 1 << 4;
        const ADDRESS_ERROR = 1 << 5;
        const PARAMETER_ERROR = 1 << 6;
    }

    /// Operation conditions register, as returned by CMD58.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ocr: u32 {
        /// Card power up status (busy bit, set once initialization finished).
        const POWER_UP_DONE = 1 << 31;
        /// Card capacity status, set for SDHC/SDXC.
        const CCS = 1 << 30;

        const _ = !0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// No R1 byte within the poll limit.
    Timeout(Command),
    /// The R1 byte was not the one required at this step.
    Rejected { command: Command, r1: u8 },
    /// CMD8 echoed a different voltage window or check pattern.
    InterfaceCondition([u8; 4]),
    /// CMD58 reported that the card has not finished powering up.
    NotPoweredUp(Ocr),
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Timeout(command) => write!(f, "{command} timed out"),
            SdError::Rejected { command, r1 } => write!(f, "{command} rejected, r1 {r1:#04x}"),
            SdError::InterfaceCondition(echo) => write!(f, "CMD8 echo mismatch {echo:02x?}"),
            SdError::NotPoweredUp(ocr) => {
                write!(f, "card not powered up, ocr {:#010x}", ocr.bits())
            }
        }
    }
}

/// What bring-up learnt about the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    pub ocr: Ocr,
}

impl CardInfo {
    pub fn high_capacity(&self) -> bool {
        self.ocr.contains(Ocr::CCS)
    }
}

/// An SD card on the SPI link.
pub struct SdCard<R> {
    pub(crate) link: SpiLink<R>,
    poll_limit: u32,
}

impl<R: SpiRegisters> SdCard<R> {
    pub fn new(link: SpiLink<R>) -> Self {
        Self {
            link,
            poll_limit: RESPONSE_POLL_LIMIT,
        }
    }

    pub fn set_poll_limit(&mut self, poll_limit: u32) {
        self.poll_limit = poll_limit;
    }

    pub fn set_clock_divider(&mut self, divider: u32) {
        self.link.set_clock_divider(divider);
    }

    pub fn link(&self) -> &SpiLink<R> {
        &self.link
    }

    pub fn into_link(self) -> SpiLink<R> {
        self.link
    }

    /// Slow the clock down, and give the card its idle cycles with chip select deasserted.
    pub fn power_on(&mut self, divider: u32, idle_bytes: usize) {
        self.link.set_clock_divider(divider);
        self.link.set_cs_mode(CsMode::Off);
        for _ in 0..idle_bytes {
            self.link.idle_byte();
        }
        self.link.set_cs_mode(CsMode::Auto);
    }

    /// Send a command frame and wait for its R1 byte.
    ///
    /// Chip select is left held whatever the outcome; the caller reads any trailing bytes and
    /// must then call [`SdCard::end_command`].
    pub(crate) fn command(&mut self, command: Command, arg: u32) -> Result<u8, SdError> {
        let frame = CommandFrame::new(command, arg);
        self.link.set_cs_mode(CsMode::Hold);
        self.link.idle_byte();
        SpiBus::write(&mut self.link, frame.as_bytes()).unwrap_or_else(|e: Infallible| match e {});

        for _ in 0..self.poll_limit {
            let r1 = self.link.idle_byte();
            if r1 & 0x80 == 0 {
                trace!("sd: {command}({arg:#x}) -> {r1:#04x}");
                return Ok(r1);
            }
        }
        warn!("sd: {command} timed out after {} polls", self.poll_limit);
        Err(SdError::Timeout(command))
    }

    /// Finish the command in progress and release chip select.
    pub(crate) fn end_command(&mut self) {
        self.link.idle_byte();
        self.link.set_cs_mode(CsMode::Auto);
    }

    /// A complete command: frame, R1, `N` trailing bytes, release.
    fn exchange<const N: usize>(
        &mut self,
        command: Command,
        arg: u32,
    ) -> Result<(u8, [u8; N]), SdError> {
        let mut trailing = [0u8; N];
        let r1 = self.command(command, arg);
        if r1.is_ok() {
            SpiBus::read(&mut self.link, &mut trailing).unwrap_or_else(|e: Infallible| match e {});
        }
        self.end_command();
        Ok((r1?, trailing))
    }

    fn expect(&mut self, command: Command, arg: u32, expected: u8) -> Result<(), SdError> {
        let (r1, []) = self.exchange::<0>(command, arg)?;
        if r1 != expected {
            return Err(SdError::Rejected { command, r1 });
        }
        Ok(())
    }

    fn go_idle(&mut self) -> Result<(), SdError> {
        self.expect(Command::GoIdleState, 0, R1::IDLE.bits())
    }

    fn send_if_cond(&mut self) -> Result<(), SdError> {
        let command = Command::SendIfCond;
        let (r1, echo) = self.exchange::<4>(command, IF_COND_ARG)?;
        if r1 != R1::IDLE.bits() {
            return Err(SdError::Rejected { command, r1 });
        }
        // echo[0]: command version, echo[1]: reserved
        if echo[2] & 0x0F != 0x1 || echo[3] != 0xAA {
            return Err(SdError::InterfaceCondition(echo));
        }
        Ok(())
    }

    /// CMD55 + ACMD41 until the card leaves the idle state.
    ///
    /// There is no iteration bound: the card answers "idle" until its own initialization is
    /// done.
    fn send_op_cond(&mut self) -> Result<(), SdError> {
        let mut polls = 0u32;
        loop {
            // The APP_CMD response carries nothing the loop needs.
            if let Err(e) = self.exchange::<0>(Command::AppCmd, 0) {
                debug!("sd: {e}");
            }
            let (r1, []) = self.exchange::<0>(Command::SdSendOpCond, HCS)?;
            polls += 1;
            match r1 {
                0x01 => continue,
                0x00 => {
                    debug!("sd: card ready after {polls} ACMD41");
                    return Ok(());
                }
                r1 => {
                    return Err(SdError::Rejected {
                        command: Command::SdSendOpCond,
                        r1,
                    })
                }
            }
        }
    }

    fn read_ocr(&mut self) -> Result<Ocr, SdError> {
        let command = Command::ReadOcr;
        let (r1, ocr) = self.exchange::<4>(command, 0)?;
        if r1 != 0x00 {
            return Err(SdError::Rejected { command, r1 });
        }
        let ocr = Ocr::from_bits_retain(u32::from_be_bytes(ocr));
        if !ocr.contains(Ocr::POWER_UP_DONE) {
            return Err(SdError::NotPoweredUp(ocr));
        }
        Ok(ocr)
    }

    fn set_block_length(&mut self) -> Result<(), SdError> {
        self.expect(Command::SetBlocklen, BLOCK_SIZE as u32, 0x00)
    }

    /// Run the bring-up sequence. Must follow [`SdCard::power_on`].
    ///
    /// Stops at the first step that fails.
    pub fn initialize(&mut self, diag: &mut impl Diagnostics) -> Result<CardInfo, SdError> {
        diag.puts("CMD0");
        self.go_idle()?;
        diag.puts("CMD8");
        self.send_if_cond()?;
        diag.puts("ACMD41");
        self.send_op_cond()?;
        diag.puts("CMD58");
        let ocr = self.read_ocr()?;
        diag.puts("CMD16");
        self.set_block_length()?;

        let info = CardInfo { ocr };
        if !info.high_capacity() {
            warn!("sd: standard capacity card, block addressing assumed");
        }
        Ok(info)
    }
}
