use core::convert::Infallible;

use bitflags::bitflags;

use crate::eio;

// SiFive UART register map (FU540-C000 manual, chapter 13)
/// Transmit data
const TXDATA: usize = 0x00;
/// Transmit control
const TXCTRL: usize = 0x08;
/// Baud rate divisor
const DIV: usize = 0x18;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TxData: u32 {
        const FULL = 1 << 31;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TxCtrl: u32 {
        const ENABLE = 1 << 0;
    }
}

/// The console UART. Only the transmitter is used.
pub struct Uart {
    base: *mut u32,
}

impl Uart {
    /// # Safety
    ///
    /// `base` must be the address of a SiFive UART, and nothing else may drive its transmitter
    /// while this instance is alive.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base: base as _ }
    }

    fn register(&self, offset: usize) -> *mut u32 {
        // Safety: Every offset used is inside of the UART's register block.
        unsafe { self.base.byte_add(offset) }
    }

    pub fn enable_transmitter(&mut self) {
        // Safety: Address valid per the constructor contract.
        unsafe { self.register(TXCTRL).write_volatile(TxCtrl::ENABLE.bits()) };
    }

    /// Program the divisor for `baud_rate` given the peripheral clock.
    pub fn set_baud_rate(&mut self, clock_hz: u32, baud_rate: u32) {
        assert!(baud_rate > 0 && baud_rate <= clock_hz, "baud rate out of range");
        // Safety: As above.
        unsafe { self.register(DIV).write_volatile(clock_hz / baud_rate - 1) };
    }

    fn tx_full(&self) -> bool {
        // Safety: As above.
        let data = unsafe { self.register(TXDATA).read_volatile() };
        TxData::from_bits_retain(data).contains(TxData::FULL)
    }

    pub fn send_blocking(&mut self, bytes: impl IntoIterator<Item = u8>) {
        for byte in bytes {
            while self.tx_full() {
                core::hint::spin_loop();
            }
            // Safety: As above.
            unsafe { self.register(TXDATA).write_volatile(byte as u32) };
        }
    }
}

impl eio::ErrorType for Uart {
    type Error = Infallible;
}

impl eio::Write for Uart {
    /// Blocks until the first byte fits, then queues as many as the FIFO takes.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let Some((&first, rest)) = buf.split_first() else {
            return Ok(0);
        };
        self.send_blocking([first]);

        let mut written = 1;
        for &byte in rest {
            if self.tx_full() {
                break;
            }
            // Safety: As above.
            unsafe { self.register(TXDATA).write_volatile(byte as u32) };
            written += 1;
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
