//! `JvmProtoBuf.StringTableTypes`, the header of every `d1` payload.
//!
//! The table tells the compiler how each `d2` entry turns into a name:
//! which entries are descriptors, which are internal names, and which
//! substring of the entry is significant. Relocating `d2` therefore needs the
//! records to pick the right rewrite for each entry and to keep substring
//! ranges pointing at the end of strings whose length changed.

use crate::class_metadata::owned;
use crate::error::MetadataError;
use crate::wire::{WireReader, WireWriter};
use ksr_rules::RuleSet;
use std::borrow::Cow;

const FIELD_RECORD: u32 = 1;
const FIELD_LOCAL_NAME: u32 = 5;

const RECORD_RANGE: u32 = 1;
const RECORD_PREDEFINED_INDEX: u32 = 2;
const RECORD_OPERATION: u32 = 3;
const RECORD_SUBSTRING_INDEX: u32 = 4;
const RECORD_REPLACE_CHAR: u32 = 5;
const RECORD_STRING: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    None,
    InternalToClassId,
    DescToClassId,
    Other(i32),
}

impl Operation {
    fn from_raw(value: i32) -> Self {
        match value {
            0 => Operation::None,
            1 => Operation::InternalToClassId,
            2 => Operation::DescToClassId,
            other => Operation::Other(other),
        }
    }

    fn to_raw(self) -> i32 {
        match self {
            Operation::None => 0,
            Operation::InternalToClassId => 1,
            Operation::DescToClassId => 2,
            Operation::Other(value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub range: Option<i32>,
    pub predefined_index: Option<i32>,
    pub operation: Option<Operation>,
    pub substring_index: Vec<i32>,
    pub replace_char: Vec<i32>,
    pub string: Option<String>,
    /// Fields this crate does not interpret, kept verbatim.
    pub unknown: Vec<u8>,
}

impl Record {
    /// Number of consecutive `d2` entries this record describes.
    pub fn range(&self) -> usize {
        self.range.unwrap_or(1).max(0) as usize
    }

    pub fn operation(&self) -> Operation {
        self.operation.unwrap_or(Operation::None)
    }

    fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut record = Record {
            range: None,
            predefined_index: None,
            operation: None,
            substring_index: Vec::new(),
            replace_char: Vec::new(),
            string: None,
            unknown: Vec::new(),
        };

        let mut reader = WireReader::new(bytes);
        while let Some(field) = reader.read_field()? {
            match field.number {
                RECORD_RANGE => record.range = Some(field.as_i32()?),
                RECORD_PREDEFINED_INDEX => record.predefined_index = Some(field.as_i32()?),
                RECORD_OPERATION => {
                    record.operation = Some(Operation::from_raw(field.as_i32()?));
                }
                RECORD_SUBSTRING_INDEX => field.extend_i32(&mut record.substring_index)?,
                RECORD_REPLACE_CHAR => field.extend_i32(&mut record.replace_char)?,
                RECORD_STRING => record.string = Some(field.as_string()?),
                _ => record.unknown.extend_from_slice(field.raw),
            }
        }
        Ok(record)
    }

    fn encode(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        if let Some(range) = self.range {
            writer.write_i32_field(RECORD_RANGE, range);
        }
        if let Some(index) = self.predefined_index {
            writer.write_i32_field(RECORD_PREDEFINED_INDEX, index);
        }
        if let Some(operation) = self.operation {
            writer.write_i32_field(RECORD_OPERATION, operation.to_raw());
        }
        writer.write_packed_i32(RECORD_SUBSTRING_INDEX, &self.substring_index);
        writer.write_packed_i32(RECORD_REPLACE_CHAR, &self.replace_char);
        if let Some(string) = &self.string {
            writer.write_string_field(RECORD_STRING, string);
        }
        writer.write_raw(&self.unknown);
        writer.into_bytes()
    }

    /// Moves a substring end that pointed at the end of the old string to
    /// the end of the new one.
    fn adjust_substring(&mut self, old_len: usize, new_len: usize) {
        if old_len == new_len || self.substring_index.len() < 2 {
            return;
        }
        if self.substring_index[1] as usize == old_len {
            self.substring_index[1] = new_len as i32;
        }
    }
}

/// What [`StringTableTypes::relocate`] touched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableChanges {
    pub records: bool,
    pub strings: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StringTableTypes {
    pub records: Vec<Record>,
    pub local_name: Vec<i32>,
    pub unknown: Vec<u8>,
}

impl StringTableTypes {
    pub fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut table = StringTableTypes {
            records: Vec::new(),
            local_name: Vec::new(),
            unknown: Vec::new(),
        };

        let mut reader = WireReader::new(bytes);
        while let Some(field) = reader.read_field()? {
            match field.number {
                FIELD_RECORD => table.records.push(Record::parse(field.as_bytes()?)?),
                FIELD_LOCAL_NAME => field.extend_i32(&mut table.local_name)?,
                _ => table.unknown.extend_from_slice(field.raw),
            }
        }
        Ok(table)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        for record in &self.records {
            writer.write_bytes_field(FIELD_RECORD, &record.encode());
        }
        writer.write_packed_i32(FIELD_LOCAL_NAME, &self.local_name);
        writer.write_raw(&self.unknown);
        writer.into_bytes()
    }

    /// Relocates `strings` (the `d2` array) and the strings embedded in the
    /// records. Entries past the last record are treated as plain names.
    pub fn relocate(&mut self, strings: &mut [String], rules: &RuleSet) -> TableChanges {
        let mut changes = TableChanges::default();
        let mut records = Vec::with_capacity(self.records.len());
        let mut index = 0;

        for mut record in std::mem::take(&mut self.records) {
            let operation = record.operation();
            let end = (index + record.range()).min(strings.len());
            let mut lengths = Vec::with_capacity(end.saturating_sub(index));

            for value in &mut strings[index.min(end)..end] {
                let old_len = utf16_len(value);
                let relocated = owned(relocate_entry(rules, operation, value));
                if let Some(relocated) = relocated {
                    *value = relocated;
                    changes.strings = true;
                }
                lengths.push((old_len, utf16_len(value)));
            }

            if let Some(string) = record.string.take() {
                let relocated = relocate_entry(rules, operation, &string).into_owned();
                if relocated != string {
                    record.adjust_substring(utf16_len(&string), utf16_len(&relocated));
                    changes.records = true;
                }
                record.string = Some(relocated);
                records.push(record);
            } else if record.predefined_index.is_some() || record.substring_index.len() < 2 {
                records.push(record);
            } else if lengths.iter().all(|(old, new)| old == new) {
                records.push(record);
            } else if record.range() == 1 {
                let (old_len, new_len) = lengths[0];
                record.adjust_substring(old_len, new_len);
                changes.records = true;
                records.push(record);
            } else {
                // Each entry may now need its own substring end.
                for (old_len, new_len) in lengths {
                    let mut single = record.clone();
                    single.range = Some(1);
                    single.adjust_substring(old_len, new_len);
                    records.push(single);
                }
                changes.records = true;
            }

            index = end;
        }
        self.records = records;

        for value in strings.iter_mut().skip(index) {
            let relocated = owned(relocate_entry(rules, Operation::None, value));
            if let Some(relocated) = relocated {
                *value = relocated;
                changes.strings = true;
            }
        }

        changes
    }
}

/// Picks the rewrite matching how the compiler will interpret `value`.
pub(crate) fn relocate_entry<'a>(
    rules: &RuleSet,
    operation: Operation,
    value: &'a str,
) -> Cow<'a, str> {
    let structural = match operation {
        Operation::DescToClassId => rules.rewrite_descriptor(value).ok(),
        Operation::InternalToClassId => rules.rewrite_internal_name(value).ok(),
        _ if looks_like_descriptor(value) => rules.rewrite_descriptor(value).ok(),
        _ => None,
    };
    structural.unwrap_or_else(|| rules.rewrite(value))
}

fn looks_like_descriptor(value: &str) -> bool {
    value.starts_with('(')
        || value.starts_with('[')
        || (value.starts_with('L') && value.ends_with(';'))
}

fn utf16_len(value: &str) -> usize {
    value.encode_utf16().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::from_pairs([("com.foo", "com.relocated.foo")]).unwrap()
    }

    fn record(range: i32, operation: i32) -> Record {
        Record {
            range: Some(range),
            predefined_index: None,
            operation: Some(Operation::from_raw(operation)),
            substring_index: Vec::new(),
            replace_char: Vec::new(),
            string: None,
            unknown: Vec::new(),
        }
    }

    #[test]
    fn parses_and_encodes_records() {
        let mut writer = WireWriter::new();
        let mut first = WireWriter::new();
        first.write_i32_field(RECORD_RANGE, 3);
        first.write_i32_field(RECORD_OPERATION, 2);
        first.write_packed_i32(RECORD_SUBSTRING_INDEX, &[1, 4]);
        writer.write_bytes_field(FIELD_RECORD, &first.into_bytes());
        writer.write_packed_i32(FIELD_LOCAL_NAME, &[0, 2]);
        writer.write_string_field(9, "kept");
        let bytes = writer.into_bytes();

        let table = StringTableTypes::parse(&bytes).unwrap();
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].range(), 3);
        assert_eq!(table.records[0].operation(), Operation::DescToClassId);
        assert_eq!(table.records[0].substring_index, vec![1, 4]);
        assert_eq!(table.local_name, vec![0, 2]);
        assert_eq!(table.encode(), bytes);
    }

    #[test]
    fn classifies_entries_by_operation() {
        let mut table = StringTableTypes {
            records: vec![record(1, 2), record(1, 1), record(1, 0)],
            local_name: Vec::new(),
            unknown: Vec::new(),
        };
        let mut strings = vec![
            "Lcom/foo/Widget;".to_string(),
            "com/foo/Widget".to_string(),
            "(Lcom/foo/Widget;)V".to_string(),
            "com/foo/Extra".to_string(),
        ];

        let changes = table.relocate(&mut strings, &rules());
        assert_eq!(
            changes,
            TableChanges {
                records: false,
                strings: true
            }
        );
        assert_eq!(
            strings,
            vec![
                "Lcom/relocated/foo/Widget;",
                "com/relocated/foo/Widget",
                "(Lcom/relocated/foo/Widget;)V",
                "com/relocated/foo/Extra",
            ]
        );
    }

    #[test]
    fn moves_substring_end_with_the_string() {
        let mut single = record(1, 2);
        single.substring_index = vec![1, 16];
        let mut table = StringTableTypes {
            records: vec![single],
            local_name: Vec::new(),
            unknown: Vec::new(),
        };
        let mut strings = vec!["Lcom/foo/Widget;".to_string()];

        let changes = table.relocate(&mut strings, &rules());
        assert!(changes.records);
        assert_eq!(table.records[0].substring_index, vec![1, 26]);
    }

    #[test]
    fn splits_ranged_records_when_lengths_change() {
        let mut ranged = record(2, 0);
        ranged.substring_index = vec![0, 7];
        let mut table = StringTableTypes {
            records: vec![ranged],
            local_name: Vec::new(),
            unknown: Vec::new(),
        };
        let mut strings = vec!["com.foo".to_string(), "org.baz".to_string()];

        table.relocate(&mut strings, &rules());
        assert_eq!(strings, vec!["com.relocated.foo", "org.baz"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].substring_index, vec![0, 17]);
        assert_eq!(table.records[1].substring_index, vec![0, 7]);
        assert!(table.records.iter().all(|record| record.range() == 1));
    }

    #[test]
    fn rewrites_record_strings() {
        let mut named = record(1, 1);
        named.string = Some("com/foo/Widget".to_string());
        let mut table = StringTableTypes {
            records: vec![named],
            local_name: Vec::new(),
            unknown: Vec::new(),
        };
        let mut strings = vec!["ignored".to_string()];

        let changes = table.relocate(&mut strings, &rules());
        assert!(changes.records);
        assert!(!changes.strings);
        assert_eq!(
            table.records[0].string.as_deref(),
            Some("com/relocated/foo/Widget")
        );
    }
}
