use crate::error::ClassParseError;
use crate::mutf8;
use crate::reader::{ByteWriter, ClassReader};
use std::collections::HashMap;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_STRING: u8 = 8;

#[derive(Debug, Clone)]
pub(crate) struct Utf8Entry<'a> {
    pub bytes: &'a [u8],
    /// `None` when the bytes are not valid modified UTF-8.
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) enum Constant<'a> {
    Utf8(Utf8Entry<'a>),
    Integer(i32),
    Class { name_index: u16 },
    String { string_index: u16 },
    NameAndType { descriptor_index: u16 },
    MethodType { descriptor_index: u16 },
    Package { name_index: u16 },
    Other,
    Unusable,
}

#[derive(Debug)]
struct Entry<'a> {
    constant: Constant<'a>,
    /// Tag and payload as read; empty for the slot after a long or double.
    raw: &'a [u8],
}

#[derive(Debug)]
pub(crate) struct ConstantPool<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> ConstantPool<'a> {
    pub fn parse(reader: &mut ClassReader<'a>) -> Result<Self, ClassParseError> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count);
        entries.push(Entry {
            constant: Constant::Unusable,
            raw: &[],
        });

        while entries.len() < count {
            let start = reader.position();
            let tag = reader.read_u1()?;
            let constant = match tag {
                TAG_UTF8 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?;
                    Constant::Utf8(Utf8Entry {
                        bytes,
                        text: mutf8::decode(bytes),
                    })
                }
                TAG_INTEGER => Constant::Integer(reader.read_u4()? as i32),
                4 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                5 | 6 => {
                    reader.skip(8)?;
                    Constant::Other
                }
                7 => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                TAG_STRING => Constant::String {
                    string_index: reader.read_u2()?,
                },
                9 | 10 | 11 | 17 | 18 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                12 => {
                    reader.read_u2()?; // name_index
                    Constant::NameAndType {
                        descriptor_index: reader.read_u2()?,
                    }
                }
                15 => {
                    reader.skip(3)?;
                    Constant::Other
                }
                16 => Constant::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                19 => {
                    reader.read_u2()?;
                    Constant::Other
                }
                20 => Constant::Package {
                    name_index: reader.read_u2()?,
                },
                other => return Err(ClassParseError::UnsupportedConstant { tag: other }),
            };

            let wide = matches!(tag, 5 | 6);
            entries.push(Entry {
                constant,
                raw: reader.since(start),
            });
            if wide {
                entries.push(Entry {
                    constant: Constant::Unusable,
                    raw: &[],
                });
            }
        }

        Ok(Self { entries })
    }

    /// Number of slots including the unused slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: u16) -> Result<&Constant<'a>, ClassParseError> {
        self.entries
            .get(index as usize)
            .map(|entry| &entry.constant)
            .ok_or(ClassParseError::InvalidConstantIndex { index })
    }

    pub fn utf8(&self, index: u16) -> Result<&Utf8Entry<'a>, ClassParseError> {
        match self.get(index)? {
            Constant::Utf8(entry) => Ok(entry),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    /// Decoded text of a Utf8 entry; undecodable entries are an error here.
    pub fn utf8_text(&self, index: u16) -> Result<&str, ClassParseError> {
        self.utf8(index)?
            .text
            .as_deref()
            .ok_or(ClassParseError::InvalidUtf8 { index })
    }

    pub fn integer(&self, index: u16) -> Result<i32, ClassParseError> {
        match self.get(index)? {
            Constant::Integer(value) => Ok(*value),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassParseError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8_text(*name_index),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant<'a>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (index as u16, &entry.constant))
    }

    pub fn utf8_entries(&self) -> impl Iterator<Item = (u16, &Utf8Entry<'a>)> {
        self.iter().filter_map(|(index, constant)| match constant {
            Constant::Utf8(entry) => Some((index, entry)),
            _ => None,
        })
    }
}

/// Pending changes to a [`ConstantPool`]: replaced Utf8 payloads, re-pointed
/// `CONSTANT_String` entries and appended constants.
pub(crate) struct PoolEditor<'p, 'a> {
    pool: &'p ConstantPool<'a>,
    replaced: HashMap<u16, Vec<u8>>,
    repointed: HashMap<u16, u16>,
    appended: Vec<Vec<u8>>,
    utf8_lookup: Option<HashMap<Vec<u8>, u16>>,
    integer_lookup: Option<HashMap<i32, u16>>,
}

impl<'p, 'a> PoolEditor<'p, 'a> {
    pub fn new(pool: &'p ConstantPool<'a>) -> Self {
        Self {
            pool,
            replaced: HashMap::new(),
            repointed: HashMap::new(),
            appended: Vec::new(),
            utf8_lookup: None,
            integer_lookup: None,
        }
    }

    pub fn is_changed(&self) -> bool {
        !self.replaced.is_empty() || !self.repointed.is_empty() || !self.appended.is_empty()
    }

    pub fn replace_utf8(&mut self, index: u16, value: &str) -> Result<(), ClassParseError> {
        self.replaced.insert(index, mutf8::encode_checked(value)?);
        self.utf8_lookup = None;
        Ok(())
    }

    /// Appends a Utf8 entry without looking for an equal one.
    pub fn append_utf8(&mut self, value: &str) -> Result<u16, ClassParseError> {
        let encoded = mutf8::encode_checked(value)?;
        let mut raw = ByteWriter::new();
        raw.put_u1(TAG_UTF8);
        raw.put_u2(encoded.len() as u16);
        raw.put_bytes(&encoded);
        let index = self.append(raw.into_bytes())?;
        if let Some(lookup) = self.utf8_lookup.as_mut() {
            lookup.entry(encoded).or_insert(index);
        }
        Ok(index)
    }

    /// Makes every `CONSTANT_String` that points at `utf8_index` point at
    /// `target` instead.
    pub fn repoint_strings(&mut self, utf8_index: u16, target: u16) {
        for (index, constant) in self.pool.iter() {
            if let Constant::String { string_index } = constant {
                if *string_index == utf8_index {
                    self.repointed.insert(index, target);
                }
            }
        }
    }

    /// Index of a Utf8 entry whose final value is `value`, appending one if
    /// none exists.
    pub fn intern_utf8(&mut self, value: &str) -> Result<u16, ClassParseError> {
        let encoded = mutf8::encode_checked(value)?;
        if self.utf8_lookup.is_none() {
            self.utf8_lookup = Some(self.build_utf8_lookup());
        }
        if let Some(index) = self.utf8_lookup.as_ref().and_then(|lookup| lookup.get(&encoded)) {
            return Ok(*index);
        }
        self.append_utf8(value)
    }

    pub fn intern_integer(&mut self, value: i32) -> Result<u16, ClassParseError> {
        let pool = self.pool;
        let lookup = self.integer_lookup.get_or_insert_with(|| {
            let mut lookup = HashMap::new();
            for (index, constant) in pool.iter() {
                if let Constant::Integer(existing) = constant {
                    lookup.entry(*existing).or_insert(index);
                }
            }
            lookup
        });
        if let Some(index) = lookup.get(&value) {
            return Ok(*index);
        }

        let mut raw = ByteWriter::new();
        raw.put_u1(TAG_INTEGER);
        raw.put_u4(value as u32);
        let index = self.append(raw.into_bytes())?;
        if let Some(lookup) = self.integer_lookup.as_mut() {
            lookup.insert(value, index);
        }
        Ok(index)
    }

    fn build_utf8_lookup(&self) -> HashMap<Vec<u8>, u16> {
        let mut lookup = HashMap::new();
        for (index, entry) in self.pool.utf8_entries() {
            let bytes = self
                .replaced
                .get(&index)
                .cloned()
                .unwrap_or_else(|| entry.bytes.to_vec());
            lookup.entry(bytes).or_insert(index);
        }
        for (offset, raw) in self.appended.iter().enumerate() {
            if raw.first() == Some(&TAG_UTF8) {
                let index = (self.pool.len() + offset) as u16;
                lookup.entry(raw[3..].to_vec()).or_insert(index);
            }
        }
        lookup
    }

    fn append(&mut self, raw: Vec<u8>) -> Result<u16, ClassParseError> {
        let index = self.pool.len() + self.appended.len();
        // constant_pool_count is a u2 and counts slot 0.
        if index >= u16::MAX as usize {
            return Err(ClassParseError::ConstantPoolOverflow);
        }
        self.appended.push(raw);
        Ok(index as u16)
    }

    /// Writes `constant_pool_count` and the pool with all edits applied.
    pub fn write(&self, out: &mut ByteWriter) {
        out.put_u2((self.pool.len() + self.appended.len()) as u16);
        for (index, entry) in self.pool.entries.iter().enumerate().skip(1) {
            let index = index as u16;
            if let Some(bytes) = self.replaced.get(&index) {
                out.put_u1(TAG_UTF8);
                out.put_u2(bytes.len() as u16);
                out.put_bytes(bytes);
            } else if let Some(target) = self.repointed.get(&index) {
                out.put_u1(TAG_STRING);
                out.put_u2(*target);
            } else {
                out.put_bytes(entry.raw);
            }
        }
        for raw in &self.appended {
            out.put_bytes(raw);
        }
    }
}
