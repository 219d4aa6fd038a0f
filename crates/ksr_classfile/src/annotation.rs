//! Annotation structures (JVMS §4.7.16 - §4.7.22) and the `kotlin.Metadata`
//! annotation in particular.

use crate::error::ClassParseError;
use crate::layout::{RoleCollector, Roles};
use crate::pool::{ConstantPool, PoolEditor};
use crate::reader::{ByteWriter, ClassReader};
use ksr_metadata::KotlinClassMetadata;

pub(crate) const KOTLIN_METADATA: &str = "Lkotlin/Metadata;";

pub(crate) fn walk_annotation(
    reader: &mut ClassReader<'_>,
    collector: &mut RoleCollector,
    string_role: Roles,
) -> Result<(), ClassParseError> {
    collector.mark(reader.read_u2()?, Roles::DESCRIPTOR);
    walk_pairs(reader, collector, string_role)
}

pub(crate) fn walk_pairs(
    reader: &mut ClassReader<'_>,
    collector: &mut RoleCollector,
    string_role: Roles,
) -> Result<(), ClassParseError> {
    let count = reader.read_u2()?;
    for _ in 0..count {
        let _name_index = reader.read_u2()?;
        walk_element_value(reader, collector, string_role)?;
    }
    Ok(())
}

pub(crate) fn walk_element_value(
    reader: &mut ClassReader<'_>,
    collector: &mut RoleCollector,
    string_role: Roles,
) -> Result<(), ClassParseError> {
    let tag = reader.read_u1()?;
    walk_tagged_value(reader, collector, string_role, tag)
}

fn walk_tagged_value(
    reader: &mut ClassReader<'_>,
    collector: &mut RoleCollector,
    string_role: Roles,
    tag: u8,
) -> Result<(), ClassParseError> {
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => reader.skip(2),
        b's' => {
            collector.mark(reader.read_u2()?, string_role);
            Ok(())
        }
        b'e' => {
            collector.mark(reader.read_u2()?, Roles::DESCRIPTOR);
            reader.skip(2) // const_name_index
        }
        b'c' => {
            collector.mark(reader.read_u2()?, Roles::DESCRIPTOR);
            Ok(())
        }
        b'@' => walk_annotation(reader, collector, string_role),
        b'[' => {
            let count = reader.read_u2()?;
            for _ in 0..count {
                walk_element_value(reader, collector, string_role)?;
            }
            Ok(())
        }
        other => Err(ClassParseError::InvalidElementTag { tag: other }),
    }
}

pub(crate) fn walk_type_annotation(
    reader: &mut ClassReader<'_>,
    collector: &mut RoleCollector,
) -> Result<(), ClassParseError> {
    let target = reader.read_u1()?;
    match target {
        0x00 | 0x01 | 0x16 => reader.skip(1)?,
        0x10 | 0x11 | 0x12 | 0x17 | 0x42 | 0x43..=0x46 => reader.skip(2)?,
        0x13..=0x15 => {}
        0x40 | 0x41 => {
            let table_length = reader.read_u2()? as usize;
            reader.skip(table_length * 6)?;
        }
        0x47..=0x4B => reader.skip(3)?,
        other => return Err(ClassParseError::InvalidTargetType { target: other }),
    }
    let path_length = reader.read_u1()? as usize;
    reader.skip(path_length * 2)?;
    walk_annotation(reader, collector, Roles::ANNOTATION_LITERAL)
}

/// Decoded `kotlin.Metadata` annotation.
#[derive(Debug, Clone)]
pub(crate) struct KotlinAnnotation {
    pub type_index: u16,
    pub metadata: KotlinClassMetadata,
    /// Element-value pairs that are not metadata elements, verbatim.
    pub unknown: Vec<Vec<u8>>,
}

enum Value {
    Int(u16),
    String(u16),
    Array(Vec<Value>),
    Other,
}

impl Value {
    fn ints(&self) -> Option<Vec<u16>> {
        match self {
            Value::Array(values) => values
                .iter()
                .map(|value| match value {
                    Value::Int(index) => Some(*index),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    fn strings(&self) -> Option<Vec<u16>> {
        match self {
            Value::Array(values) => values
                .iter()
                .map(|value| match value {
                    Value::String(index) => Some(*index),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

fn read_value(
    reader: &mut ClassReader<'_>,
    collector: &mut RoleCollector,
) -> Result<Value, ClassParseError> {
    let tag = reader.read_u1()?;
    match tag {
        b'I' => Ok(Value::Int(reader.read_u2()?)),
        b's' => {
            let index = reader.read_u2()?;
            collector.mark(index, Roles::METADATA);
            Ok(Value::String(index))
        }
        b'[' => {
            let count = reader.read_u2()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(read_value(reader, collector)?);
            }
            Ok(Value::Array(values))
        }
        other => {
            walk_tagged_value(reader, collector, Roles::METADATA, other)?;
            Ok(Value::Other)
        }
    }
}

/// Reads the element-value pairs of `kotlin.Metadata`; `reader` is
/// positioned right after the annotation's `type_index`.
pub(crate) fn read_kotlin_metadata(
    reader: &mut ClassReader<'_>,
    pool: &ConstantPool<'_>,
    collector: &mut RoleCollector,
    type_index: u16,
) -> Result<KotlinAnnotation, ClassParseError> {
    let mut metadata = KotlinClassMetadata::default();
    let mut unknown = Vec::new();

    let count = reader.read_u2()?;
    for _ in 0..count {
        let start = reader.position();
        let name_index = reader.read_u2()?;
        let value = read_value(reader, collector)?;
        let name = pool.utf8(name_index)?.text.as_deref();

        let known = match (name, &value) {
            (Some("k"), Value::Int(index)) => {
                metadata.kind = Some(pool.integer(*index)?);
                true
            }
            (Some("xi"), Value::Int(index)) => {
                metadata.extra_int = Some(pool.integer(*index)?);
                true
            }
            (Some("xs"), Value::String(index)) => {
                metadata.extra_string = Some(pool.utf8_text(*index)?.to_string());
                true
            }
            (Some("pn"), Value::String(index)) => {
                metadata.package_name = Some(pool.utf8_text(*index)?.to_string());
                true
            }
            (Some(name @ ("mv" | "bv")), value) => match value.ints() {
                Some(indices) => {
                    let ints = indices
                        .iter()
                        .map(|index| pool.integer(*index))
                        .collect::<Result<Vec<_>, _>>()?;
                    if name == "mv" {
                        metadata.metadata_version = Some(ints);
                    } else {
                        metadata.bytecode_version = Some(ints);
                    }
                    true
                }
                None => false,
            },
            (Some(name @ ("d1" | "d2")), value) => match value.strings() {
                Some(indices) => {
                    let strings = indices
                        .iter()
                        .map(|index| pool.utf8_text(*index).map(str::to_string))
                        .collect::<Result<Vec<_>, _>>()?;
                    if name == "d1" {
                        metadata.data1 = Some(strings);
                    } else {
                        metadata.data2 = Some(strings);
                    }
                    true
                }
                None => false,
            },
            _ => false,
        };

        if !known {
            unknown.push(reader.since(start).to_vec());
        }
    }

    Ok(KotlinAnnotation {
        type_index,
        metadata,
        unknown,
    })
}

/// Writes the annotation with `metadata` as its elements, interning every
/// value into the final pool.
pub(crate) fn write_kotlin_metadata(
    annotation: &KotlinAnnotation,
    metadata: &KotlinClassMetadata,
    editor: &mut PoolEditor<'_, '_>,
    out: &mut ByteWriter,
) -> Result<(), ClassParseError> {
    let mut pairs = ByteWriter::new();
    let mut count: u16 = 0;

    if let Some(kind) = metadata.kind {
        put_name(&mut pairs, editor, "k")?;
        put_int(&mut pairs, editor, kind)?;
        count += 1;
    }
    for (name, ints) in [("mv", &metadata.metadata_version), ("bv", &metadata.bytecode_version)] {
        if let Some(ints) = ints {
            put_name(&mut pairs, editor, name)?;
            pairs.put_u1(b'[');
            pairs.put_u2(ints.len() as u16);
            for value in ints {
                put_int(&mut pairs, editor, *value)?;
            }
            count += 1;
        }
    }
    for (name, strings) in [("d1", &metadata.data1), ("d2", &metadata.data2)] {
        if let Some(strings) = strings {
            put_name(&mut pairs, editor, name)?;
            pairs.put_u1(b'[');
            pairs.put_u2(strings.len() as u16);
            for value in strings {
                put_string(&mut pairs, editor, value)?;
            }
            count += 1;
        }
    }
    for (name, value) in [("xs", &metadata.extra_string), ("pn", &metadata.package_name)] {
        if let Some(value) = value {
            put_name(&mut pairs, editor, name)?;
            put_string(&mut pairs, editor, value)?;
            count += 1;
        }
    }
    if let Some(extra) = metadata.extra_int {
        put_name(&mut pairs, editor, "xi")?;
        put_int(&mut pairs, editor, extra)?;
        count += 1;
    }
    for raw in &annotation.unknown {
        pairs.put_bytes(raw);
        count += 1;
    }

    out.put_u2(annotation.type_index);
    out.put_u2(count);
    out.put_bytes(&pairs.into_bytes());
    Ok(())
}

fn put_name(
    out: &mut ByteWriter,
    editor: &mut PoolEditor<'_, '_>,
    name: &str,
) -> Result<(), ClassParseError> {
    out.put_u2(editor.intern_utf8(name)?);
    Ok(())
}

fn put_int(
    out: &mut ByteWriter,
    editor: &mut PoolEditor<'_, '_>,
    value: i32,
) -> Result<(), ClassParseError> {
    out.put_u1(b'I');
    out.put_u2(editor.intern_integer(value)?);
    Ok(())
}

fn put_string(
    out: &mut ByteWriter,
    editor: &mut PoolEditor<'_, '_>,
    value: &str,
) -> Result<(), ClassParseError> {
    out.put_u1(b's');
    out.put_u2(editor.intern_utf8(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_nested_element_values() {
        let mut body = ByteWriter::new();
        body.put_u2(3); // type_index
        body.put_u2(2);
        body.put_u2(4); // name
        body.put_u1(b'[');
        body.put_u2(2);
        body.put_u1(b's');
        body.put_u2(5);
        body.put_u1(b'c');
        body.put_u2(6);
        body.put_u2(4);
        body.put_u1(b'@');
        body.put_u2(7);
        body.put_u2(1);
        body.put_u2(4);
        body.put_u1(b'e');
        body.put_u2(8);
        body.put_u2(9);
        let bytes = body.into_bytes();

        let mut collector = RoleCollector::default();
        let mut reader = ClassReader::new(&bytes);
        walk_annotation(&mut reader, &mut collector, Roles::ANNOTATION_LITERAL).unwrap();
        assert_eq!(reader.position(), bytes.len());

        for index in [3, 6, 7, 8] {
            assert!(collector.get(index).contains(Roles::DESCRIPTOR));
        }
        assert!(collector.get(5).contains(Roles::ANNOTATION_LITERAL));
        assert_eq!(collector.get(9), Roles::default());
    }

    #[test]
    fn rejects_unknown_element_tags() {
        let bytes = [b'x', 0, 1];
        let mut collector = RoleCollector::default();
        let mut reader = ClassReader::new(&bytes);
        assert!(matches!(
            walk_element_value(&mut reader, &mut collector, Roles::ANNOTATION_LITERAL),
            Err(ClassParseError::InvalidElementTag { tag: b'x' })
        ));
    }

    #[test]
    fn skips_type_annotation_targets() {
        let mut body = ByteWriter::new();
        body.put_u1(0x40); // local variable target
        body.put_u2(1);
        body.put_bytes(&[0; 6]);
        body.put_u1(1); // type_path length
        body.put_bytes(&[0, 0]);
        body.put_u2(3);
        body.put_u2(0);
        let bytes = body.into_bytes();

        let mut collector = RoleCollector::default();
        let mut reader = ClassReader::new(&bytes);
        walk_type_annotation(&mut reader, &mut collector).unwrap();
        assert_eq!(reader.position(), bytes.len());

        let mut reader = ClassReader::new(&[0x99]);
        assert!(matches!(
            walk_type_annotation(&mut reader, &mut collector),
            Err(ClassParseError::InvalidTargetType { target: 0x99 })
        ));
    }
}
