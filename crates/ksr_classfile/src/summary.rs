use crate::error::ClassParseError;
use crate::layout::{ClassLayout, Member};
use crate::pool::{Constant, ConstantPool};
use ksr_metadata::KotlinClassMetadata;

/// Name and descriptor of a field or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSummary {
    pub name: String,
    pub descriptor: String,
}

/// Read-only view of the names a class file refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSummary {
    pub major_version: u16,
    pub name: String,
    /// `None` only for `java/lang/Object` and module descriptors.
    pub super_name: Option<String>,
    pub signature: Option<String>,
    pub fields: Vec<MemberSummary>,
    pub methods: Vec<MemberSummary>,
    /// Every `CONSTANT_Class` entry, in pool order.
    pub class_references: Vec<String>,
    /// Every `CONSTANT_String` value, in pool order.
    pub string_literals: Vec<String>,
    /// Type descriptors of the class-level visible annotations.
    pub annotations: Vec<String>,
    pub kotlin_metadata: Option<KotlinClassMetadata>,
}

impl ClassSummary {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassParseError> {
        let layout = ClassLayout::parse(bytes)?;
        let pool = &layout.pool;

        let mut class_references = Vec::new();
        let mut string_literals = Vec::new();
        for (_, constant) in pool.iter() {
            match constant {
                Constant::Class { name_index } => {
                    class_references.push(pool.utf8_text(*name_index)?.to_string())
                }
                Constant::String { string_index } => {
                    string_literals.push(pool.utf8_text(*string_index)?.to_string())
                }
                _ => {}
            }
        }

        let super_name = match layout.super_class {
            0 => None,
            index => Some(pool.class_name(index)?.to_string()),
        };

        Ok(Self {
            major_version: layout.major,
            name: pool.class_name(layout.this_class)?.to_string(),
            super_name,
            signature: layout
                .signature
                .map(|index| pool.utf8_text(index).map(str::to_string))
                .transpose()?,
            fields: members(pool, &layout.fields)?,
            methods: members(pool, &layout.methods)?,
            class_references,
            string_literals,
            annotations: layout
                .annotation_types
                .iter()
                .map(|index| pool.utf8_text(*index).map(str::to_string))
                .collect::<Result<_, _>>()?,
            kotlin_metadata: layout.metadata.as_ref().map(|site| site.kotlin.metadata.clone()),
        })
    }
}

fn members(
    pool: &ConstantPool<'_>,
    members: &[Member],
) -> Result<Vec<MemberSummary>, ClassParseError> {
    members
        .iter()
        .map(|member| {
            Ok(MemberSummary {
                name: pool.utf8_text(member.name_index)?.to_string(),
                descriptor: pool.utf8_text(member.descriptor_index)?.to_string(),
            })
        })
        .collect()
}
