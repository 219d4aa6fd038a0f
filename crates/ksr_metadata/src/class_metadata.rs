use crate::bit_encoding::{decode_bytes, encode_bytes};
use crate::error::MetadataError;
use crate::string_table::StringTableTypes;
use crate::version::MetadataVersion;
use crate::wire::{WireReader, WireWriter};
use ksr_rules::RuleSet;
use std::borrow::Cow;
use tracing::trace;

/// Value of the `k` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKind {
    Class,
    FileFacade,
    MultiFileClassFacade,
    MultiFileClassPart,
    SyntheticClass,
    Unknown(i32),
}

impl MetadataKind {
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => MetadataKind::Class,
            2 => MetadataKind::FileFacade,
            3 => MetadataKind::MultiFileClassFacade,
            4 => MetadataKind::MultiFileClassPart,
            5 => MetadataKind::SyntheticClass,
            other => MetadataKind::Unknown(other),
        }
    }
}

/// Elements of a `kotlin.Metadata` annotation, named after their Kotlin
/// properties. `None` means the element was absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KotlinClassMetadata {
    /// `k`
    pub kind: Option<i32>,
    /// `mv`
    pub metadata_version: Option<Vec<i32>>,
    /// `bv`
    pub bytecode_version: Option<Vec<i32>>,
    /// `d1`
    pub data1: Option<Vec<String>>,
    /// `d2`
    pub data2: Option<Vec<String>>,
    /// `xs`
    pub extra_string: Option<String>,
    /// `pn`
    pub package_name: Option<String>,
    /// `xi`
    pub extra_int: Option<i32>,
}

impl KotlinClassMetadata {
    /// The annotation default for `k` is a class.
    pub fn kind(&self) -> MetadataKind {
        MetadataKind::from_raw(self.kind.unwrap_or(1))
    }

    pub fn version(&self) -> MetadataVersion {
        MetadataVersion::new(self.metadata_version.clone().unwrap_or_default())
    }

    /// Returns the relocated metadata, or `None` when no rule applies to any
    /// name it carries.
    pub fn relocate(&self, rules: &RuleSet) -> Result<Option<Self>, MetadataError> {
        self.version().ensure_compatible()?;

        let mut relocated = self.clone();
        let mut changed = false;

        match self.kind() {
            MetadataKind::MultiFileClassFacade => {
                if let Some(parts) = relocated.data1.as_mut() {
                    changed |= relocate_all(parts, rules);
                }
            }
            _ => {
                if relocated.data1.as_ref().is_some_and(|d1| !d1.is_empty()) {
                    changed |= relocated.relocate_proto(rules)?;
                } else if let Some(strings) = relocated.data2.as_mut() {
                    changed |= relocate_all(strings, rules);
                }
            }
        }

        changed |= relocate_optional(&mut relocated.extra_string, rules);
        changed |= relocate_optional(&mut relocated.package_name, rules);

        if !changed {
            return Ok(None);
        }
        trace!(kind = ?self.kind(), "relocated kotlin metadata");
        relocated.metadata_version = Some(MetadataVersion::latest().components().to_vec());
        Ok(Some(relocated))
    }

    fn relocate_proto(&mut self, rules: &RuleSet) -> Result<bool, MetadataError> {
        let bytes = decode_bytes(self.data1.as_deref().unwrap_or_default())?;
        let mut reader = WireReader::new(&bytes);
        let mut table = StringTableTypes::parse(reader.read_delimited()?)?;
        let rest = reader.remaining_slice();

        let strings = self.data2.get_or_insert_with(Vec::new);
        let changes = table.relocate(strings, rules);

        if changes.records {
            let mut writer = WireWriter::new();
            writer.write_delimited(&table.encode());
            writer.write_raw(rest);
            self.data1 = Some(encode_bytes(&writer.into_bytes()));
        }
        Ok(changes.records || changes.strings)
    }
}

fn relocate_all(values: &mut [String], rules: &RuleSet) -> bool {
    let mut changed = false;
    for value in values {
        let relocated = owned(rules.rewrite(value));
        if let Some(relocated) = relocated {
            *value = relocated;
            changed = true;
        }
    }
    changed
}

fn relocate_optional(value: &mut Option<String>, rules: &RuleSet) -> bool {
    let relocated = value.as_deref().and_then(|current| owned(rules.rewrite(current)));
    if relocated.is_some() {
        *value = relocated;
        return true;
    }
    false
}

pub(crate) fn owned(value: Cow<'_, str>) -> Option<String> {
    match value {
        Cow::Owned(value) => Some(value),
        Cow::Borrowed(_) => None,
    }
}
