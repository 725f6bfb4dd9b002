//! Varint and CRC-32 helpers shared by chunk files and other length-prefixed
//! logs built on top of this crate.

use std::io::Read;

use crate::{Result, SortError};

/// Append `v` to `out` as an unsigned LEB128 varint.
pub fn push_uvarint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
}

/// Decode a varint from `buf` starting at `off`. Returns the value and the
/// offset just past it, or `None` if the buffer ends early or the varint is
/// longer than 10 bytes.
pub fn read_uvarint(buf: &[u8], mut off: usize) -> Option<(u64, usize)> {
    let (mut x, mut s) = (0u64, 0u32);
    for _ in 0..10 {
        let b = *buf.get(off)? as u64;
        off += 1;
        x |= (b & 0x7f) << s;
        if b & 0x80 == 0 {
            return Some((x, off));
        }
        s += 7;
    }
    None
}

/// Decode a varint from a stream, feeding every consumed byte into `crc`.
pub fn read_uvarint_from<R: Read>(r: &mut R, crc: &mut Crc32) -> Result<u64> {
    let (mut x, mut s) = (0u64, 0u32);
    let mut byte = [0u8; 1];
    for _ in 0..10 {
        r.read_exact(&mut byte)?;
        crc.update(&byte);
        let b = byte[0] as u64;
        x |= (b & 0x7f) << s;
        if b & 0x80 == 0 {
            return Ok(x);
        }
        s += 7;
    }
    Err(SortError::Corrupt("varint longer than 10 bytes".into()))
}

/// Incremental IEEE CRC-32.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    pub fn new() -> Self {
        Crc32 { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.state;
        for &b in data {
            let mut x = (crc ^ (b as u32)) & 0xFF;
            for _ in 0..8 {
                let lsb = x & 1;
                x >>= 1;
                if lsb != 0 {
                    x ^= 0xEDB88320;
                }
            }
            crc = (crc >> 8) ^ x;
        }
        self.state = crc;
    }

    pub fn finalize(&self) -> u32 {
        self.state ^ 0xFFFF_FFFF
    }
}

/// Compute IEEE CRC-32 of `data` in one shot.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finalize()
}
