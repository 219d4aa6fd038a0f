//! The `META-INF/<module>.kotlin_module` sidecar.
//!
//! Layout: a big-endian `i32` count followed by that many `i32` version
//! components, an `i32` flags word for versions 1.4 and later, and then a
//! `JvmModuleProtoBuf.Module` message mapping every Kotlin package to the
//! file facades and multi-file parts compiled from it.

use crate::error::MetadataError;
use crate::version::MetadataVersion;
use crate::wire::{WireReader, WireWriter};
use indexmap::IndexMap;
use ksr_rules::{Rewrite, RuleSet};
use std::borrow::Cow;
use tracing::debug;

pub const MODULE_FILE_SUFFIX: &str = ".kotlin_module";

const MODULE_PACKAGE_PARTS: u32 = 1;
const MODULE_METADATA_PARTS: u32 = 2;
const MODULE_JVM_PACKAGE_NAME: u32 = 3;

const PARTS_PACKAGE_FQ_NAME: u32 = 1;
const PARTS_SHORT_CLASS_NAME: u32 = 2;
const PARTS_FACADE_ID: u32 = 3;
const PARTS_FACADE_SHORT_NAME: u32 = 4;
const PARTS_JVM_PACKAGE_SHORT_NAME: u32 = 5;
const PARTS_JVM_PACKAGE_ID: u32 = 6;
const PARTS_JVM_PACKAGE_FACADE_ID: u32 = 7;

/// Parts compiled from one Kotlin package, keyed by internal name and
/// mapped to the internal name of their multi-file facade, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageGroup {
    pub members: IndexMap<String, Option<String>>,
}

impl PackageGroup {
    /// Adds a part; the first facade recorded for a part wins.
    pub fn add_part(&mut self, part: impl Into<String>, facade: Option<String>) {
        self.members.entry(part.into()).or_insert(facade);
    }

    pub fn facade_of(&self, part: &str) -> Option<&str> {
        self.members.get(part).and_then(Option::as_deref)
    }
}

/// Entry of `metadata_parts`. Only the package name is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPart {
    pub package: String,
    pub rest: Vec<u8>,
}

impl MetadataPart {
    fn parse(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut package = None;
        let mut rest = Vec::new();
        let mut reader = WireReader::new(bytes);
        while let Some(field) = reader.read_field()? {
            match field.number {
                PARTS_PACKAGE_FQ_NAME => package = Some(field.as_string()?),
                _ => rest.extend_from_slice(field.raw),
            }
        }
        Ok(Self {
            package: package.ok_or(MetadataError::MissingField {
                message: "PackageParts",
                field: "package_fq_name",
            })?,
            rest,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_string_field(PARTS_PACKAGE_FQ_NAME, &self.package);
        writer.write_raw(&self.rest);
        writer.into_bytes()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub version: MetadataVersion,
    pub flags: Option<i32>,
    /// Kotlin package (dotted) to its parts, in file order.
    pub packages: IndexMap<String, PackageGroup>,
    pub metadata_parts: Vec<MetadataPart>,
    /// `Module` fields this crate does not interpret, kept verbatim.
    unknown: Vec<u8>,
}

impl ModuleMetadata {
    pub fn new(version: MetadataVersion) -> Self {
        let flags = version.is_at_least(1, 4, 0).then_some(0);
        Self {
            version,
            flags,
            packages: IndexMap::new(),
            metadata_parts: Vec::new(),
            unknown: Vec::new(),
        }
    }

    pub fn package_mut(&mut self, package: &str) -> &mut PackageGroup {
        self.packages.entry(package.to_string()).or_default()
    }

    pub fn read(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut pos = 0;
        let count = read_be_i32(bytes, &mut pos)?;
        if count < 0 || count as usize > bytes.len() / 4 {
            return Err(MetadataError::Invalid(format!(
                "version header declares {count} components"
            )));
        }
        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            components.push(read_be_i32(bytes, &mut pos)?);
        }

        let version = MetadataVersion::new(components);
        version.ensure_compatible()?;
        let flags = if version.is_at_least(1, 4, 0) {
            Some(read_be_i32(bytes, &mut pos)?)
        } else {
            None
        };

        let mut module = Self {
            version,
            flags,
            packages: IndexMap::new(),
            metadata_parts: Vec::new(),
            unknown: Vec::new(),
        };
        module.read_proto(&bytes[pos..])?;
        Ok(module)
    }

    fn read_proto(&mut self, bytes: &[u8]) -> Result<(), MetadataError> {
        let mut package_parts = Vec::new();
        let mut jvm_package_names = Vec::new();

        let mut reader = WireReader::new(bytes);
        while let Some(field) = reader.read_field()? {
            match field.number {
                MODULE_PACKAGE_PARTS => package_parts.push(field.as_bytes()?),
                MODULE_METADATA_PARTS => {
                    self.metadata_parts.push(MetadataPart::parse(field.as_bytes()?)?);
                }
                MODULE_JVM_PACKAGE_NAME => jvm_package_names.push(field.as_string()?),
                _ => self.unknown.extend_from_slice(field.raw),
            }
        }

        // The JVM package table follows the parts that index into it.
        for parts in package_parts {
            self.read_package_parts(parts, &jvm_package_names)?;
        }
        Ok(())
    }

    fn read_package_parts(
        &mut self,
        bytes: &[u8],
        jvm_package_names: &[String],
    ) -> Result<(), MetadataError> {
        let mut package = None;
        let mut short_names = Vec::new();
        let mut facade_ids = Vec::new();
        let mut facade_names = Vec::new();
        let mut jvm_short_names = Vec::new();
        let mut jvm_package_ids = Vec::new();
        let mut jvm_facade_ids = Vec::new();

        let mut reader = WireReader::new(bytes);
        while let Some(field) = reader.read_field()? {
            match field.number {
                PARTS_PACKAGE_FQ_NAME => package = Some(field.as_string()?),
                PARTS_SHORT_CLASS_NAME => short_names.push(field.as_string()?),
                PARTS_FACADE_ID => field.extend_i32(&mut facade_ids)?,
                PARTS_FACADE_SHORT_NAME => facade_names.push(field.as_string()?),
                PARTS_JVM_PACKAGE_SHORT_NAME => jvm_short_names.push(field.as_string()?),
                PARTS_JVM_PACKAGE_ID => field.extend_i32(&mut jvm_package_ids)?,
                PARTS_JVM_PACKAGE_FACADE_ID => field.extend_i32(&mut jvm_facade_ids)?,
                _ => {}
            }
        }

        let package = package.ok_or(MetadataError::MissingField {
            message: "PackageParts",
            field: "package_fq_name",
        })?;

        // Facade ids are stored off by one so that zero means "no facade".
        let facade = |ids: &[i32], index: usize, package: &str| -> Option<String> {
            let id = usize::try_from(*ids.get(index)?).ok()?.checked_sub(1)?;
            facade_names
                .get(id)
                .map(|short_name| internal_name(package, short_name))
        };

        let group = self.packages.entry(package.clone()).or_default();
        for (index, short_name) in short_names.iter().enumerate() {
            group.add_part(
                internal_name(&package, short_name),
                facade(&facade_ids, index, &package),
            );
        }

        if self.version.is_at_least(1, 1, 13) {
            for (index, short_name) in jvm_short_names.iter().enumerate() {
                // Trailing equal package ids are omitted by the writer.
                let Some(package_id) = jvm_package_ids.get(index).or(jvm_package_ids.last())
                else {
                    continue;
                };
                let Some(jvm_package) = usize::try_from(*package_id)
                    .ok()
                    .and_then(|id| jvm_package_names.get(id))
                else {
                    continue;
                };
                group.add_part(
                    internal_name(jvm_package, short_name),
                    facade(&jvm_facade_ids, index, jvm_package),
                );
            }
        }
        Ok(())
    }

    /// Serializes the module the way the Kotlin compiler lays it out.
    pub fn write(&self) -> Vec<u8> {
        let components = self.version.components();
        let mut out = Vec::new();
        out.extend_from_slice(&(components.len() as i32).to_be_bytes());
        for component in components {
            out.extend_from_slice(&component.to_be_bytes());
        }
        if self.version.is_at_least(1, 4, 0) {
            out.extend_from_slice(&self.flags.unwrap_or(0).to_be_bytes());
        }

        let mut jvm_package_names = Vec::new();
        let mut writer = WireWriter::new();
        for (package, group) in &self.packages {
            if group.members.is_empty() {
                continue;
            }
            let parts = encode_package_parts(package, group, &mut jvm_package_names);
            writer.write_bytes_field(MODULE_PACKAGE_PARTS, &parts);
        }
        for part in &self.metadata_parts {
            writer.write_bytes_field(MODULE_METADATA_PARTS, &part.encode());
        }
        for name in &jvm_package_names {
            writer.write_string_field(MODULE_JVM_PACKAGE_NAME, name);
        }
        writer.write_raw(&self.unknown);

        out.extend_from_slice(&writer.into_bytes());
        out
    }

    /// Returns the relocated module, or `None` when no rule applies.
    ///
    /// Packages that end up with the same name are merged, keeping the
    /// first facade recorded for each part.
    pub fn relocate(&self, rules: &RuleSet) -> Option<Self> {
        let mut changed = false;

        let mut packages: IndexMap<String, PackageGroup> = IndexMap::new();
        for (package, group) in &self.packages {
            let package = tracked(rules.rewrite(package), &mut changed);
            let target = packages.entry(package).or_default();
            for (part, facade) in &group.members {
                let part = tracked(rules.rewrite(part), &mut changed);
                let facade = facade
                    .as_deref()
                    .map(|facade| tracked(rules.rewrite(facade), &mut changed));
                target.add_part(part, facade);
            }
        }

        let metadata_parts = self
            .metadata_parts
            .iter()
            .map(|part| MetadataPart {
                package: tracked(rules.rewrite(&part.package), &mut changed),
                rest: part.rest.clone(),
            })
            .collect();

        if !changed {
            return None;
        }
        Some(Self {
            version: MetadataVersion::latest(),
            flags: self.flags,
            packages,
            metadata_parts,
            unknown: self.unknown.clone(),
        })
    }
}

/// Relocates the raw bytes of a `.kotlin_module` file.
pub fn relocate_module(bytes: &[u8], rules: &RuleSet) -> Result<Rewrite, MetadataError> {
    let module = ModuleMetadata::read(bytes)?;
    match module.relocate(rules) {
        Some(relocated) => {
            debug!(
                packages = relocated.packages.len(),
                version = %module.version,
                "relocated module mapping"
            );
            Ok(Rewrite::Changed(relocated.write()))
        }
        None => Ok(Rewrite::Unchanged),
    }
}

fn encode_package_parts(
    package: &str,
    group: &PackageGroup,
    jvm_package_names: &mut Vec<String>,
) -> Vec<u8> {
    let package_path = package.replace('.', "/");
    let (mut inside, mut outside): (Vec<_>, Vec<_>) = group
        .members
        .iter()
        .map(|(part, facade)| (part.as_str(), facade.as_deref()))
        .partition(|(part, _)| package_of(part) == package_path);

    // Multi-file parts grouped by facade first, single-file facades last.
    inside.sort_by_key(|(part, facade)| (facade.is_none(), *facade, *part));
    outside.sort_by_key(|(part, _)| (package_of(part), class_name(part)));

    let mut facades: IndexMap<&str, i32> = IndexMap::new();

    let mut short_names = Vec::new();
    let mut facade_ids = Vec::new();
    for (part, facade) in &inside {
        short_names.push(class_name(part));
        if let Some(facade) = facade {
            facade_ids.push(facade_id(&mut facades, class_name(facade)));
        }
    }

    let mut jvm_short_names = Vec::new();
    let mut jvm_package_ids = Vec::new();
    let mut jvm_facade_ids = Vec::new();
    for (part, facade) in &outside {
        let jvm_package = package_of(part).replace('/', ".");
        let package_id = match jvm_package_names.iter().position(|name| *name == jvm_package) {
            Some(id) => id,
            None => {
                jvm_package_names.push(jvm_package);
                jvm_package_names.len() - 1
            }
        };
        jvm_short_names.push(class_name(part));
        jvm_package_ids.push(package_id as i32);
        jvm_facade_ids.push(facade.map_or(0, |facade| facade_id(&mut facades, class_name(facade))));
    }
    while jvm_package_ids.len() > 1
        && jvm_package_ids[jvm_package_ids.len() - 1] == jvm_package_ids[jvm_package_ids.len() - 2]
    {
        jvm_package_ids.pop();
    }
    while jvm_facade_ids.last() == Some(&0) {
        jvm_facade_ids.pop();
    }

    let mut writer = WireWriter::new();
    writer.write_string_field(PARTS_PACKAGE_FQ_NAME, package);
    for name in &short_names {
        writer.write_string_field(PARTS_SHORT_CLASS_NAME, name);
    }
    writer.write_packed_i32(PARTS_FACADE_ID, &facade_ids);
    for name in facades.keys() {
        writer.write_string_field(PARTS_FACADE_SHORT_NAME, name);
    }
    for name in &jvm_short_names {
        writer.write_string_field(PARTS_JVM_PACKAGE_SHORT_NAME, name);
    }
    writer.write_packed_i32(PARTS_JVM_PACKAGE_ID, &jvm_package_ids);
    writer.write_packed_i32(PARTS_JVM_PACKAGE_FACADE_ID, &jvm_facade_ids);
    writer.into_bytes()
}

/// Stored id of a facade short name, allocating the next one if needed.
fn facade_id<'a>(facades: &mut IndexMap<&'a str, i32>, short_name: &'a str) -> i32 {
    let next = facades.len() as i32;
    *facades.entry(short_name).or_insert(next) + 1
}

fn internal_name(package: &str, short_name: &str) -> String {
    if package.is_empty() {
        short_name.to_string()
    } else {
        format!("{}/{}", package.replace('.', "/"), short_name)
    }
}

fn package_of(internal_name: &str) -> &str {
    internal_name
        .rsplit_once('/')
        .map_or("", |(package, _)| package)
}

fn class_name(internal_name: &str) -> &str {
    internal_name
        .rsplit_once('/')
        .map_or(internal_name, |(_, name)| name)
}

fn tracked(value: Cow<'_, str>, changed: &mut bool) -> String {
    if matches!(value, Cow::Owned(_)) {
        *changed = true;
    }
    value.into_owned()
}

fn read_be_i32(bytes: &[u8], pos: &mut usize) -> Result<i32, MetadataError> {
    let chunk = bytes
        .get(*pos..*pos + 4)
        .ok_or(MetadataError::UnexpectedEof)?;
    *pos += 4;
    Ok(i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}
