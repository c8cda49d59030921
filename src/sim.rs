//! An SD card answering in SPI mode, plus a recording console, for the unit tests.
//!
//! The card is driven entirely through [`SpiRegisters`]: every TXFIFO write clocks one byte in
//! and makes the byte the card drove during that exchange available in RXFIFO.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::{
    crc::{command_crc, crc16_slice},
    diag::Diagnostics,
    gpt::Guid,
    spi::{CsMode, FifoFlags, SpiRegisters},
    BLOCK_SIZE,
};

/// A command frame as the card received it.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    pub index: u8,
    pub arg: u32,
    pub crc_ok: bool,
}

pub struct SimCard {
    disk: HashMap<u64, [u8; BLOCK_SIZE]>,
    corrupt: HashSet<u64>,
    replies: HashMap<u8, VecDeque<Vec<u8>>>,
    acmd41_busy: usize,
    token_delay: usize,
    rx_latency: usize,

    pub frames: Vec<Frame>,
    pub cs_modes: Vec<CsMode>,
    pub dividers: Vec<u32>,
    pub power_on_idle_bytes: usize,
    exchanged: usize,
    exchanged_at_power_on: usize,

    cs: CsMode,
    incoming: Vec<u8>,
    outgoing: VecDeque<u8>,
    streaming: Option<u64>,
    rx: VecDeque<(usize, u8)>,
}

impl SimCard {
    /// A healthy SDHC card: ACMD41 reports busy once, then ready.
    pub fn new() -> Self {
        Self {
            disk: HashMap::new(),
            corrupt: HashSet::new(),
            replies: HashMap::new(),
            acmd41_busy: 1,
            token_delay: 1,
            rx_latency: 1,
            frames: Vec::new(),
            cs_modes: Vec::new(),
            dividers: Vec::new(),
            power_on_idle_bytes: 0,
            exchanged: 0,
            exchanged_at_power_on: 0,
            cs: CsMode::Auto,
            incoming: Vec::new(),
            outgoing: VecDeque::new(),
            streaming: None,
            rx: VecDeque::new(),
        }
    }

    /// Answer command `index` with `bytes` (R1 first) instead of the default. Queued replies are
    /// used in order, the last one sticks. An empty reply makes the command time out.
    pub fn reply(mut self, index: u8, bytes: &[u8]) -> Self {
        self.replies.entry(index).or_default().push_back(bytes.to_vec());
        self
    }

    pub fn acmd41_busy_polls(mut self, polls: usize) -> Self {
        self.acmd41_busy = polls;
        self
    }

    /// Idle bytes sent before each data token.
    pub fn token_delay(mut self, bytes: usize) -> Self {
        self.token_delay = bytes;
        self
    }

    /// Send a wrong CRC16 for this block.
    pub fn corrupt(mut self, lba: u64) -> Self {
        self.corrupt.insert(lba);
        self
    }

    pub fn write_block(&mut self, lba: u64, block: &[u8; BLOCK_SIZE]) {
        self.disk.insert(lba, *block);
    }

    /// Unwritten blocks read as zeros.
    pub fn block(&self, lba: u64) -> [u8; BLOCK_SIZE] {
        self.disk.get(&lba).copied().unwrap_or([0; BLOCK_SIZE])
    }

    pub fn commands(&self) -> Vec<u8> {
        self.frames.iter().map(|frame| frame.index).collect()
    }

    /// Bytes exchanged since chip select first went back to AUTO after power-on.
    pub fn bytes_after_power_on(&self) -> usize {
        self.exchanged - self.exchanged_at_power_on
    }

    fn default_reply(&mut self, index: u8, arg: u32) -> Vec<u8> {
        match index {
            0 => vec![0x01],
            8 => {
                let [_, _, voltage, pattern] = arg.to_be_bytes();
                vec![0x01, 0x00, 0x00, voltage, pattern]
            }
            55 => vec![0x01],
            41 if self.acmd41_busy > 0 => {
                self.acmd41_busy -= 1;
                vec![0x01]
            }
            41 => vec![0x00],
            // Powered up, CCS, 2.7-3.6V
            58 => vec![0x00, 0xC0, 0xFF, 0x80, 0x00],
            16 | 18 => vec![0x00],
            // Stuff byte, then R1
            12 => vec![0xFF, 0x00],
            _ => vec![0x04],
        }
    }

    fn reply_for(&mut self, index: u8, arg: u32) -> Vec<u8> {
        match self.replies.get_mut(&index) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue[0].clone(),
            None => self.default_reply(index, arg),
        }
    }

    fn receive(&mut self, byte: u8) {
        if self.cs == CsMode::Off || (self.incoming.is_empty() && byte & 0xC0 != 0x40) {
            return;
        }
        self.incoming.push(byte);
        if self.incoming.len() < 6 {
            return;
        }

        let frame: Vec<u8> = self.incoming.drain(..).collect();
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let head = [frame[0], frame[1], frame[2], frame[3], frame[4]];
        let crc_ok = command_crc(&head) == frame[5];
        self.frames.push(Frame { index, arg, crc_ok });

        if index == 12 {
            self.streaming = None;
            self.outgoing.clear();
        }
        let reply = if crc_ok {
            self.reply_for(index, arg)
        } else {
            vec![0x08]
        };
        if index == 18 && reply.first() == Some(&0x00) {
            self.streaming = Some(arg as u64);
        }
        // One byte of response latency
        self.outgoing.push_back(0xFF);
        self.outgoing.extend(reply);
    }

    fn next_block(&mut self) {
        let Some(lba) = self.streaming else {
            return;
        };
        let block = self.block(lba);
        let mut crc = crc16_slice(0, &block);
        if self.corrupt.contains(&lba) {
            crc ^= 0x0100;
        }
        self.outgoing.extend(std::iter::repeat(0xFF).take(self.token_delay));
        self.outgoing.push_back(0xFE);
        self.outgoing.extend(block);
        self.outgoing.extend(crc.to_be_bytes());
        self.streaming = Some(lba + 1);
    }
}

impl SpiRegisters for SimCard {
    fn set_sckdiv(&mut self, divider: u32) {
        self.dividers.push(divider);
    }

    fn set_csmode(&mut self, mode: CsMode) {
        if self.cs == CsMode::Off && mode != CsMode::Off {
            self.power_on_idle_bytes = self.exchanged - self.exchanged_at_power_on;
            self.exchanged_at_power_on = self.exchanged;
        }
        if mode == CsMode::Off {
            self.exchanged_at_power_on = self.exchanged;
        }
        self.cs = mode;
        self.cs_modes.push(mode);
    }

    fn write_txfifo(&mut self, byte: u8) {
        if self.outgoing.is_empty() {
            self.next_block();
        }
        let out = self.outgoing.pop_front().unwrap_or(0xFF);
        self.exchanged += 1;
        self.receive(byte);
        self.rx.push_back((self.rx_latency, out));
    }

    fn read_rxfifo(&mut self) -> u32 {
        match self.rx.front_mut() {
            Some((0, _)) => self.rx.pop_front().map_or(0, |(_, byte)| byte as u32),
            Some((wait, _)) => {
                *wait -= 1;
                FifoFlags::FULL_OR_EMPTY.bits()
            }
            None => FifoFlags::FULL_OR_EMPTY.bits(),
        }
    }
}

/// Records everything printed.
#[derive(Default)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> Vec<&str> {
        self.text.split_terminator("\r\n").collect()
    }
}

impl Diagnostics for Transcript {
    fn puts(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push_str("\r\n");
    }

    fn putc(&mut self, c: u8) {
        self.text.push(c as char);
    }

    fn print(&mut self, args: fmt::Arguments<'_>) {
        fmt::Write::write_fmt(&mut self.text, args).unwrap();
    }
}

/// Deterministic block contents that differ from block to block.
pub fn pattern_block(lba: u64) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    for (index, byte) in block.iter_mut().enumerate() {
        *byte = (lba as usize * 31 + index * 7) as u8;
    }
    block
}

pub fn gpt_header(entries_lba: u64, num_entries: u32, entry_size: u32) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..8].copy_from_slice(b"EFI PART");
    block[72..80].copy_from_slice(&entries_lba.to_le_bytes());
    block[80..84].copy_from_slice(&num_entries.to_le_bytes());
    block[84..88].copy_from_slice(&entry_size.to_le_bytes());
    block
}

pub fn gpt_entry(type_guid: &Guid, first_lba: u64, last_lba: u64) -> [u8; 128] {
    let mut entry = [0u8; 128];
    entry[..16].copy_from_slice(type_guid.as_bytes());
    entry[16..32].fill(0xA5);
    entry[32..40].copy_from_slice(&first_lba.to_le_bytes());
    entry[40..48].copy_from_slice(&last_lba.to_le_bytes());
    entry
}
