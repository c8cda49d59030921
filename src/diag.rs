//! The boot transcript printed on the console.
//!
//! Components report progress through [`Diagnostics`] and never look at what happened to the
//! text, so a sink that drops everything is always valid.

use core::fmt;

use crate::eio;

pub trait Diagnostics {
    /// Print a line, terminated with CRLF.
    fn puts(&mut self, line: &str);

    fn putc(&mut self, c: u8);

    fn print(&mut self, args: fmt::Arguments<'_>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Diagnostics for Silent {
    fn puts(&mut self, _line: &str) {}

    fn putc(&mut self, _c: u8) {}

    fn print(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Transcript over any [`embedded_io::Write`] sink, usually the UART.
///
/// Write errors are dropped: a console that cannot print must not stop the boot.
pub struct Console<W> {
    writer: W,
}

impl<W: eio::Write> Console<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: eio::Write> Diagnostics for Console<W> {
    fn puts(&mut self, line: &str) {
        let _ = self.writer.write_all(line.as_bytes());
        let _ = self.writer.write_all(b"\r\n");
    }

    fn putc(&mut self, c: u8) {
        let _ = self.writer.write_all(&[c]);
    }

    fn print(&mut self, args: fmt::Arguments<'_>) {
        let _ = self.writer.write_fmt(args);
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for &mut D {
    fn puts(&mut self, line: &str) {
        (**self).puts(line)
    }

    fn putc(&mut self, c: u8) {
        (**self).putc(c)
    }

    fn print(&mut self, args: fmt::Arguments<'_>) {
        (**self).print(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_terminates_lines_with_crlf() {
        let mut buf = [0u8; 32];
        let mut console = Console::new(&mut buf[..]);
        console.puts("INIT");
        console.putc(b'-');
        console.print(format_args!("{:#x}", 0x22));
        let remaining = console.into_inner().len();
        let written = 32 - remaining;
        assert_eq!(&buf[..written], b"INIT\r\n-0x22");
    }

    #[test]
    fn console_ignores_a_full_sink() {
        let mut buf = [0u8; 2];
        let mut console = Console::new(&mut buf[..]);
        console.puts("BOOT");
        console.putc(b'.');
        assert_eq!(&buf, b"BO");
    }
}
