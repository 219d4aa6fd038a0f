//! Byte-to-string encoding used for the `d1` element of `kotlin.Metadata`.
//!
//! Annotation values can only hold strings, so the compiler packs the
//! protobuf payload into an array of strings. Current compilers use the
//! "UTF-8 mode": the first string starts with U+0000 and every following
//! char carries one byte. Old compilers used a 7-bit packing that is still
//! accepted on input.

use crate::error::MetadataError;

const UTF8_MODE_MARKER: char = '\u{0}';
const LEGACY_MODE_MARKER: char = '\u{FFFF}';
/// Upper bound of a `CONSTANT_Utf8` entry in modified UTF-8 bytes.
const MAX_UTF8_INFO_LENGTH: usize = 65535;

/// Decodes `d1` strings back into the raw protobuf bytes.
pub fn decode_bytes(strings: &[String]) -> Result<Vec<u8>, MetadataError> {
    if let Some(first) = strings.first() {
        if first.starts_with(UTF8_MODE_MARKER) {
            return strings_to_bytes(strings, UTF8_MODE_MARKER);
        }
        if first.starts_with(LEGACY_MODE_MARKER) {
            let mut bytes = strings_to_bytes(strings, LEGACY_MODE_MARKER)?;
            return decode_legacy(&mut bytes);
        }
    }

    let mut bytes = Vec::new();
    for string in strings {
        for c in string.chars() {
            bytes.push(char_to_byte(c)?);
        }
    }
    decode_legacy(&mut bytes)
}

/// Encodes bytes in UTF-8 mode, splitting strings so each fits into one
/// constant pool entry.
pub fn encode_bytes(data: &[u8]) -> Vec<String> {
    let mut result = Vec::new();
    let mut buffer = String::new();
    buffer.push(UTF8_MODE_MARKER);
    // U+0000 takes two bytes in modified UTF-8.
    let mut bytes_in_buffer = 2;

    for &byte in data {
        buffer.push(char::from(byte));
        bytes_in_buffer += if (1..=0x7F).contains(&byte) { 1 } else { 2 };
        if bytes_in_buffer >= MAX_UTF8_INFO_LENGTH - 1 {
            result.push(std::mem::take(&mut buffer));
            bytes_in_buffer = 0;
        }
    }

    if !buffer.is_empty() {
        result.push(buffer);
    }
    result
}

fn strings_to_bytes(strings: &[String], marker: char) -> Result<Vec<u8>, MetadataError> {
    let mut bytes = Vec::new();
    for (index, string) in strings.iter().enumerate() {
        let mut chars = string.chars();
        if index == 0 && string.starts_with(marker) {
            chars.next();
        }
        for c in chars {
            bytes.push(char_to_byte(c)?);
        }
    }
    Ok(bytes)
}

fn char_to_byte(c: char) -> Result<u8, MetadataError> {
    u8::try_from(u32::from(c)).map_err(|_| {
        MetadataError::Invalid(format!(
            "character U+{:04X} cannot appear in encoded metadata",
            u32::from(c)
        ))
    })
}

fn decode_legacy(bytes: &mut [u8]) -> Result<Vec<u8>, MetadataError> {
    for byte in bytes.iter_mut() {
        *byte = byte.wrapping_add(0x7F) & 0x7F;
    }
    decode_7to8(bytes)
}

fn decode_7to8(data: &[u8]) -> Result<Vec<u8>, MetadataError> {
    let result_len = 7 * data.len() / 8;
    let mut result = Vec::with_capacity(result_len);
    let mut byte_index = 0;
    let mut bit = 0;

    for _ in 0..result_len {
        let current = *data.get(byte_index).ok_or(MetadataError::UnexpectedEof)?;
        let first_part = u32::from(current) >> bit;
        byte_index += 1;
        let next = *data.get(byte_index).ok_or(MetadataError::UnexpectedEof)?;
        let second_part = (u32::from(next) & ((1 << (bit + 1)) - 1)) << (7 - bit);
        result.push((first_part + second_part) as u8);

        if bit == 6 {
            byte_index += 1;
            bit = 0;
        } else {
            bit += 1;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_mode_round_trips_every_byte_value() {
        let data: Vec<u8> = (0..=255u8).chain([0, 0, 0x80]).collect();
        let strings = encode_bytes(&data);
        assert_eq!(strings.len(), 1);
        assert!(strings[0].starts_with('\u{0}'));
        assert_eq!(decode_bytes(&strings).unwrap(), data);
    }

    #[test]
    fn utf8_mode_splits_long_payloads() {
        let data = vec![0u8; 70_000];
        let strings = encode_bytes(&data);
        assert!(strings.len() > 1);
        assert_eq!(decode_bytes(&strings).unwrap(), data);
    }

    #[test]
    fn decodes_legacy_seven_bit_strings() {
        // Each char is shifted by one before the 7-to-8 unpacking, so
        // U+0001 stands for a zero group.
        let zeros = "\u{1}".repeat(16);
        assert_eq!(decode_bytes(&[zeros.clone()]).unwrap(), vec![0u8; 14]);

        let marked = format!("\u{FFFF}{zeros}");
        assert_eq!(decode_bytes(&[marked]).unwrap(), vec![0u8; 14]);
    }

    #[test]
    fn rejects_wide_characters() {
        let error = decode_bytes(&["\u{0}\u{1234}".to_string()]).unwrap_err();
        assert!(matches!(error, MetadataError::Invalid(_)));
    }
}
