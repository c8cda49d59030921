//! CRC7 for command frames and CRC16-CCITT for data blocks.
//!
//! Both are plain folds: the caller owns the running value and feeds one byte at a time.

/// Fold one byte into a CRC7 remainder (polynomial x^7 + x^3 + 1, 0x89).
pub const fn crc7(prev: u8, byte: u8) -> u8 {
    let mut crc = prev;
    let mut bit = 0;
    while bit < 8 {
        crc <<= 1;
        if ((byte << bit) ^ crc) & 0x80 != 0 {
            crc ^= 0x09;
        }
        bit += 1;
    }
    crc & 0x7F
}

/// Fold one byte into a CRC16-CCITT value (polynomial 0x1021, initial value 0).
pub const fn crc16(prev: u16, byte: u8) -> u16 {
    let mut crc = prev.swap_bytes();
    crc ^= byte as u16;
    crc ^= (crc & 0xFF) >> 4;
    crc ^= crc << 12;
    crc ^= (crc & 0xFF) << 5;
    crc
}

pub fn crc7_slice(prev: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(prev, |crc, &byte| crc7(crc, byte))
}

pub fn crc16_slice(prev: u16, bytes: &[u8]) -> u16 {
    bytes.iter().fold(prev, |crc, &byte| crc16(crc, byte))
}

/// The last byte of a command frame: the CRC7 of the first five bytes, shifted left, with the
/// end bit set.
pub const fn command_crc(head: &[u8; 5]) -> u8 {
    let mut crc = 0;
    let mut index = 0;
    while index < head.len() {
        crc = crc7(crc, head[index]);
        index += 1;
    }
    (crc << 1) | 1
}
