use log::{Log, Metadata, Record};
use sdboot::{
    diag::{Console, Diagnostics},
    uart::Uart,
};

use crate::platform;

/// Log records go straight to the console UART, interleaved with the boot transcript.
pub struct UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Safety: Single hart, and the transcript console writes through the same registers
        // with the same blocking discipline, so bytes are never lost, only interleaved.
        let uart = unsafe { Uart::new(platform::UART_ADDR) };
        Console::new(uart).print(format_args!(
            "[{}] {}\r\n",
            record.level(),
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = UartLogger;

pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(platform::LOG_LEVEL);
    }
}
