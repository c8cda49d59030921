//! Polled, full-duplex byte transport over the SPI controller.

mod registers;

use core::convert::Infallible;

use crate::hal;
pub use registers::{CsMode, FifoFlags, Mmio, SpiRegisters};

/// The byte clocked out when only the card's reply matters.
pub const IDLE: u8 = 0xFF;

/// The single SPI link to the card.
///
/// Every call blocks until the controller has clocked the byte through; there is no buffering
/// beyond the hardware FIFOs.
pub struct SpiLink<R> {
    regs: R,
}

impl<R: SpiRegisters> SpiLink<R> {
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    /// Send one byte and return the byte received in the same exchange.
    pub fn transfer(&mut self, byte: u8) -> u8 {
        self.regs.write_txfifo(byte);
        loop {
            let entry = self.regs.read_rxfifo();
            if !FifoFlags::from_bits_truncate(entry).contains(FifoFlags::FULL_OR_EMPTY) {
                return entry as u8;
            }
            core::hint::spin_loop();
        }
    }

    /// Clock out an idle byte to elicit a byte from the card.
    pub fn idle_byte(&mut self) -> u8 {
        self.transfer(IDLE)
    }

    pub fn set_clock_divider(&mut self, divider: u32) {
        self.regs.set_sckdiv(divider);
    }

    pub fn set_cs_mode(&mut self, mode: CsMode) {
        self.regs.set_csmode(mode);
    }

    pub fn regs(&self) -> &R {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn into_inner(self) -> R {
        self.regs
    }
}

impl<R> hal::spi::ErrorType for SpiLink<R> {
    type Error = Infallible;
}

impl<R: SpiRegisters> hal::spi::SpiBus for SpiLink<R> {
    /// Clocks out idle bytes while reading.
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words {
            *word = self.idle_byte();
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        for &word in words {
            self.transfer(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let len = read.len().max(write.len());
        for index in 0..len {
            let received = SpiLink::transfer(self, write.get(index).copied().unwrap_or(IDLE));
            if let Some(slot) = read.get_mut(index) {
                *slot = received;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        for word in words {
            *word = SpiLink::transfer(self, *word);
        }
        Ok(())
    }

    /// Every transfer already waits for its reply, so there is never anything in flight.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::spi::SpiBus;
    use std::collections::VecDeque;

    /// Echoes every transmitted byte, inverted, after a few empty RXFIFO reads.
    #[derive(Default)]
    struct Echo {
        latency: usize,
        pending: VecDeque<(usize, u8)>,
        sent: Vec<u8>,
        empty_reads: usize,
    }

    impl SpiRegisters for Echo {
        fn set_sckdiv(&mut self, _divider: u32) {}

        fn set_csmode(&mut self, _mode: CsMode) {}

        fn write_txfifo(&mut self, byte: u8) {
            self.sent.push(byte);
            self.pending.push_back((self.latency, !byte));
        }

        fn read_rxfifo(&mut self) -> u32 {
            match self.pending.front_mut() {
                Some((0, _)) => self.pending.pop_front().unwrap().1 as u32,
                Some((wait, _)) => {
                    *wait -= 1;
                    self.empty_reads += 1;
                    FifoFlags::FULL_OR_EMPTY.bits()
                }
                None => FifoFlags::FULL_OR_EMPTY.bits(),
            }
        }
    }

    #[test]
    fn transfer_polls_until_a_byte_arrives() {
        let mut link = SpiLink::new(Echo {
            latency: 3,
            ..Default::default()
        });
        assert_eq!(link.transfer(0x0F), 0xF0);
        assert_eq!(link.regs().empty_reads, 3);
    }

    #[test]
    fn idle_byte_sends_ff() {
        let mut link = SpiLink::new(Echo::default());
        assert_eq!(link.idle_byte(), 0x00);
        assert_eq!(link.regs().sent, [IDLE]);
    }

    #[test]
    fn bus_transfer_pads_the_shorter_side() {
        let mut link = SpiLink::new(Echo::default());
        let mut read = [0u8; 3];
        SpiBus::transfer(&mut link, &mut read, &[0x01]).unwrap();
        assert_eq!(read, [0xFE, 0x00, 0x00]);
        assert_eq!(link.regs().sent, [0x01, IDLE, IDLE]);

        let mut words = [0x10, 0x20];
        link.transfer_in_place(&mut words).unwrap();
        assert_eq!(words, [0xEF, 0xDF]);
    }
}
