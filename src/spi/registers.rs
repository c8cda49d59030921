use bitflags::bitflags;

// SiFive SPI controller register map (FU540-C000 manual, chapter 19)
/// Serial clock divisor
pub const SCKDIV: usize = 0x00;
/// Chip select mode
pub const CSMODE: usize = 0x18;
/// Transmit data
pub const TXFIFO: usize = 0x48;
/// Receive data
pub const RXFIFO: usize = 0x4C;

bitflags! {
    /// Flags carried in the upper bits of the FIFO data registers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FifoFlags: u32 {
        /// Set in TXFIFO when full, and in RXFIFO when empty.
        const FULL_OR_EMPTY = 1 << 31;
    }
}

/// Chip select behaviour of the controller.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsMode {
    /// Chip select is asserted for each frame and released after it.
    Auto = 0,
    /// Chip select stays asserted across frames until the mode changes.
    Hold = 2,
    /// Chip select is never asserted.
    Off = 3,
}

/// Named access to the fields of the SPI controller.
///
/// The protocol layers only talk to the hardware through this trait, which lets them run
/// against a simulated card as well as the memory mapped peripheral.
pub trait SpiRegisters {
    fn set_sckdiv(&mut self, divider: u32);

    fn set_csmode(&mut self, mode: CsMode);

    fn write_txfifo(&mut self, byte: u8);

    /// Raw RXFIFO read. Bit 31 is set when no byte was available.
    fn read_rxfifo(&mut self) -> u32;
}

/// The memory mapped SPI controller.
pub struct Mmio {
    base: *mut u32,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the address of a SiFive SPI controller, and no other `Mmio` may exist for
    /// it for as long as this one is alive.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base: base as _ }
    }

    fn register(&self, offset: usize) -> *mut u32 {
        // Safety: Every offset used is inside of the controller's register block.
        unsafe { self.base.byte_add(offset) }
    }
}

impl SpiRegisters for Mmio {
    fn set_sckdiv(&mut self, divider: u32) {
        // Safety: Address valid per the constructor contract, and we have exclusive access.
        unsafe { self.register(SCKDIV).write_volatile(divider) };
    }

    fn set_csmode(&mut self, mode: CsMode) {
        // Safety: As above.
        unsafe { self.register(CSMODE).write_volatile(mode as u32) };
    }

    fn write_txfifo(&mut self, byte: u8) {
        // Safety: As above.
        unsafe { self.register(TXFIFO).write_volatile(byte as u32) };
    }

    fn read_rxfifo(&mut self) -> u32 {
        // Safety: As above.
        unsafe { self.register(RXFIFO).read_volatile() }
    }
}
