//! Modified UTF-8 as used by `CONSTANT_Utf8_info`.
//!
//! U+0000 is stored as `C0 80` and characters outside the BMP as two
//! three-byte surrogates. Entries holding unpaired surrogates have no `str`
//! equivalent; [`decode`] returns `None` for them.

use crate::error::ClassParseError;

pub const MAX_ENCODED_LEN: usize = u16::MAX as usize;

pub fn decode(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let first = bytes[pos];
        let unit = match first {
            0x01..=0x7F => {
                pos += 1;
                u16::from(first)
            }
            0xC0..=0xDF => {
                let second = continuation(bytes, pos + 1)?;
                pos += 2;
                (u16::from(first & 0x1F) << 6) | second
            }
            0xE0..=0xEF => {
                let second = continuation(bytes, pos + 1)?;
                let third = continuation(bytes, pos + 2)?;
                pos += 3;
                (u16::from(first & 0x0F) << 12) | (second << 6) | third
            }
            _ => return None,
        };
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

fn continuation(bytes: &[u8], pos: usize) -> Option<u16> {
    let byte = *bytes.get(pos)?;
    (byte & 0xC0 == 0x80).then_some(u16::from(byte & 0x3F))
}

pub fn encode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Encodes `value`, failing when it would not fit in a `u2` length.
pub fn encode_checked(value: &str) -> Result<Vec<u8>, ClassParseError> {
    let encoded = encode(value);
    if encoded.len() > MAX_ENCODED_LEN {
        return Err(ClassParseError::Utf8TooLong {
            length: encoded.len(),
        });
    }
    Ok(encoded)
}
