//! Minimal protobuf wire format codec.
//!
//! Only what the Kotlin metadata messages need: varints, length-delimited
//! fields, fixed 32/64-bit values and packed `int32` lists. Every field keeps
//! its raw encoding so messages can be re-emitted without touching fields the
//! caller does not interpret.

use crate::error::MetadataError;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LENGTH_DELIMITED: u8 = 2;
const WIRE_FIXED32: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldValue<'a> {
    Varint(u64),
    Fixed64(&'a [u8]),
    Bytes(&'a [u8]),
    Fixed32(&'a [u8]),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Field<'a> {
    pub number: u32,
    pub value: FieldValue<'a>,
    /// Tag and value exactly as they appeared in the input.
    pub raw: &'a [u8],
}

impl<'a> Field<'a> {
    pub fn as_i32(&self) -> Result<i32, MetadataError> {
        match self.value {
            FieldValue::Varint(value) => Ok(value as i32),
            _ => Err(self.unexpected()),
        }
    }

    pub fn as_bytes(&self) -> Result<&'a [u8], MetadataError> {
        match self.value {
            FieldValue::Bytes(bytes) => Ok(bytes),
            _ => Err(self.unexpected()),
        }
    }

    pub fn as_string(&self) -> Result<String, MetadataError> {
        Ok(String::from_utf8(self.as_bytes()?.to_vec())?)
    }

    /// Reads a repeated `int32`, accepting both packed and unpacked forms.
    pub fn extend_i32(&self, out: &mut Vec<i32>) -> Result<(), MetadataError> {
        match self.value {
            FieldValue::Varint(value) => {
                out.push(value as i32);
                Ok(())
            }
            FieldValue::Bytes(bytes) => {
                let mut reader = WireReader::new(bytes);
                while !reader.is_empty() {
                    out.push(reader.read_varint()? as i32);
                }
                Ok(())
            }
            _ => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> MetadataError {
        let wire_type = match self.value {
            FieldValue::Varint(_) => WIRE_VARINT,
            FieldValue::Fixed64(_) => WIRE_FIXED64,
            FieldValue::Bytes(_) => WIRE_LENGTH_DELIMITED,
            FieldValue::Fixed32(_) => WIRE_FIXED32,
        };
        MetadataError::UnsupportedWireType {
            field: self.number,
            wire_type,
        }
    }
}

pub(crate) struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_varint(&mut self) -> Result<u64, MetadataError> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self.data.get(self.pos).ok_or(MetadataError::UnexpectedEof)?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(MetadataError::MalformedVarint { offset: start })
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], MetadataError> {
        if self.pos + len > self.data.len() {
            return Err(MetadataError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a varint length prefix followed by that many bytes.
    pub fn read_delimited(&mut self) -> Result<&'a [u8], MetadataError> {
        let len = self.read_varint()? as usize;
        self.read_slice(len)
    }

    pub fn remaining_slice(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub fn read_field(&mut self) -> Result<Option<Field<'a>>, MetadataError> {
        if self.is_empty() {
            return Ok(None);
        }

        let start = self.pos;
        let tag = self.read_varint()?;
        let number = (tag >> 3) as u32;
        let wire_type = (tag & 0x7) as u8;
        let value = match wire_type {
            WIRE_VARINT => FieldValue::Varint(self.read_varint()?),
            WIRE_FIXED64 => FieldValue::Fixed64(self.read_slice(8)?),
            WIRE_LENGTH_DELIMITED => FieldValue::Bytes(self.read_delimited()?),
            WIRE_FIXED32 => FieldValue::Fixed32(self.read_slice(4)?),
            other => {
                return Err(MetadataError::UnsupportedWireType {
                    field: number,
                    wire_type: other,
                })
            }
        };

        Ok(Some(Field {
            number,
            value,
            raw: &self.data[start..self.pos],
        }))
    }
}

#[derive(Debug, Default)]
pub(crate) struct WireWriter {
    buffer: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buffer.push((value as u8 & 0x7F) | 0x80);
            value >>= 7;
        }
        self.buffer.push(value as u8);
    }

    fn write_tag(&mut self, number: u32, wire_type: u8) {
        self.write_varint(u64::from(number) << 3 | u64::from(wire_type));
    }

    pub fn write_i32_field(&mut self, number: u32, value: i32) {
        self.write_tag(number, WIRE_VARINT);
        self.write_varint(value as i64 as u64);
    }

    pub fn write_bytes_field(&mut self, number: u32, bytes: &[u8]) {
        self.write_tag(number, WIRE_LENGTH_DELIMITED);
        self.write_varint(bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_string_field(&mut self, number: u32, value: &str) {
        self.write_bytes_field(number, value.as_bytes());
    }

    /// Writes a packed repeated `int32`; empty lists are omitted.
    pub fn write_packed_i32(&mut self, number: u32, values: &[i32]) {
        if values.is_empty() {
            return;
        }
        let mut packed = WireWriter::new();
        for value in values {
            packed.write_varint(*value as i64 as u64);
        }
        self.write_bytes_field(number, &packed.buffer);
    }

    /// Writes a length-prefixed message, as `parseDelimitedFrom` expects.
    pub fn write_delimited(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_written_fields() {
        let mut writer = WireWriter::new();
        writer.write_i32_field(1, 300);
        writer.write_string_field(2, "com.foo");
        writer.write_packed_i32(3, &[1, 0, 2]);
        writer.write_i32_field(4, -1);
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        let first = reader.read_field().unwrap().unwrap();
        assert_eq!((first.number, first.as_i32().unwrap()), (1, 300));
        let second = reader.read_field().unwrap().unwrap();
        assert_eq!(second.as_string().unwrap(), "com.foo");
        let third = reader.read_field().unwrap().unwrap();
        let mut ids = Vec::new();
        third.extend_i32(&mut ids).unwrap();
        assert_eq!(ids, vec![1, 0, 2]);
        let fourth = reader.read_field().unwrap().unwrap();
        assert_eq!(fourth.as_i32().unwrap(), -1);
        assert!(reader.read_field().unwrap().is_none());
    }

    #[test]
    fn raw_field_bytes_cover_tag_and_value() {
        let mut writer = WireWriter::new();
        writer.write_string_field(7, "abc");
        let bytes = writer.into_bytes();
        let field = WireReader::new(&bytes).read_field().unwrap().unwrap();
        assert_eq!(field.raw, bytes.as_slice());
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut reader = WireReader::new(&[0x12, 0x05, b'a']);
        assert!(matches!(
            reader.read_field(),
            Err(MetadataError::UnexpectedEof)
        ));

        let mut groups = WireReader::new(&[0x0B]);
        assert!(matches!(
            groups.read_field(),
            Err(MetadataError::UnsupportedWireType { wire_type: 3, .. })
        ));
    }
}
