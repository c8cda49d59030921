//! Boot ROM stage: copy the payload partition off the SD card into DRAM and jump to it.
#![cfg_attr(target_os = "none", no_std, no_main)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
mod logger;
#[cfg(target_os = "none")]
mod platform;

#[cfg(target_os = "none")]
mod entry {
    use sdboot::{
        boot::{self, BootConfig},
        diag::Console,
        sd::SdCard,
        spi::{Mmio, SpiLink},
        uart::Uart,
    };

    use crate::{logger, platform};

    core::arch::global_asm!(include_str!("boot.s"), options(raw));

    // Safety: Provided by the linker script.
    unsafe extern "C" {
        static mut __payload_start: u8;
        static __payload_end: u8;
    }

    /// Called from `_start` on hart 0. A zero return makes `_start` jump to the payload.
    #[no_mangle]
    pub extern "C" fn sdboot_main() -> u32 {
        // Safety: UART_ADDR is the console UART and nothing else drives it before the payload
        // runs.
        let mut uart = unsafe { Uart::new(platform::UART_ADDR) };
        uart.enable_transmitter();
        uart.set_baud_rate(platform::TL_CLK_HZ, platform::BAUD_RATE);
        logger::init();
        let mut console = Console::new(uart);

        // Safety: SPI_ADDR is the controller wired to the SD slot, owned by this link alone.
        let link = SpiLink::new(unsafe { Mmio::new(platform::SPI_ADDR) });
        let mut card = SdCard::new(link);

        // Safety: The payload region is DRAM reserved by the linker script, untouched by this
        // program except through this slice.
        let payload = unsafe {
            let start = &raw mut __payload_start;
            let len = (&raw const __payload_end).offset_from(start) as usize;
            core::slice::from_raw_parts_mut(start, len)
        };

        let config =
            BootConfig::new(platform::TL_CLK_HZ).with_partition_type(platform::PARTITION_TYPE);
        boot::boot(&mut card, &mut console, &config, payload, riscv::asm::fence_i).code()
    }

    #[panic_handler]
    fn panic(_info: &core::panic::PanicInfo) -> ! {
        loop {
            riscv::asm::wfi();
        }
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("bootloader runs from the boot ROM; build it for a riscv64 bare-metal target");
}
