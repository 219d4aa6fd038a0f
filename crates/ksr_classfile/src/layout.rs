//! One pass over a class file that records what every Utf8 constant is
//! used for, plus the offsets needed to splice a rebuilt `kotlin.Metadata`
//! annotation back in.

use crate::annotation::{self, KotlinAnnotation};
use crate::error::ClassParseError;
use crate::pool::{Constant, ConstantPool};
use crate::reader::ClassReader;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

pub const MIN_MAJOR_VERSION: u16 = 45;
/// Java 25.
pub const MAX_MAJOR_VERSION: u16 = 69;

/// How a Utf8 constant is referenced. One entry may carry several roles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Roles(u8);

impl Roles {
    pub const CLASS_NAME: Roles = Roles(1 << 0);
    pub const DESCRIPTOR: Roles = Roles(1 << 1);
    pub const SIGNATURE: Roles = Roles(1 << 2);
    pub const PACKAGE_NAME: Roles = Roles(1 << 3);
    /// `s` element value outside `kotlin.Metadata`.
    pub const ANNOTATION_LITERAL: Roles = Roles(1 << 4);
    /// String owned by the `kotlin.Metadata` annotation.
    pub const METADATA: Roles = Roles(1 << 5);

    const STRUCTURAL: u8 = 0b1111;

    pub fn contains(self, other: Roles) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Roles) {
        self.0 |= other.0;
    }

    /// Roles whose value follows the class file grammar.
    pub fn is_structural(self) -> bool {
        self.0 & Self::STRUCTURAL != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AnnotationSlot {
    /// Absolute byte range of an annotation copied through unchanged.
    Raw(Range<usize>),
    Kotlin,
}

/// Class-level `RuntimeVisibleAnnotations` attribute that holds
/// `kotlin.Metadata`.
#[derive(Debug)]
pub(crate) struct MetadataSite {
    pub attribute: Range<usize>,
    pub attribute_name_index: u16,
    pub annotations: Vec<AnnotationSlot>,
    pub kotlin: KotlinAnnotation,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Member {
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[derive(Debug)]
pub(crate) struct ClassLayout<'a> {
    pub major: u16,
    pub pool: ConstantPool<'a>,
    pub pool_end: usize,
    pub this_class: u16,
    pub super_class: u16,
    pub fields: Vec<Member>,
    pub methods: Vec<Member>,
    pub signature: Option<u16>,
    /// Type descriptors of the class-level visible annotations.
    pub annotation_types: Vec<u16>,
    roles: RoleCollector,
    literals: HashSet<u16>,
    pub metadata: Option<MetadataSite>,
}

impl<'a> ClassLayout<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ClassParseError> {
        let mut reader = ClassReader::new(bytes);
        reader.expect_magic()?;
        let minor = reader.read_u2()?;
        let major = reader.read_u2()?;
        if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major) {
            return Err(ClassParseError::UnsupportedVersion { major, minor });
        }

        let pool = ConstantPool::parse(&mut reader)?;
        let pool_end = reader.position();

        let mut collector = RoleCollector::default();
        let mut literals = HashSet::new();
        for (_, constant) in pool.iter() {
            match constant {
                Constant::Class { name_index } => collector.mark(*name_index, Roles::CLASS_NAME),
                Constant::NameAndType { descriptor_index }
                | Constant::MethodType { descriptor_index } => {
                    collector.mark(*descriptor_index, Roles::DESCRIPTOR)
                }
                Constant::Package { name_index } => {
                    collector.mark(*name_index, Roles::PACKAGE_NAME)
                }
                Constant::String { string_index } => {
                    literals.insert(*string_index);
                }
                _ => {}
            }
        }

        let mut scanner = Scanner {
            pool: &pool,
            collector,
            annotation_types: Vec::new(),
        };

        let _access_flags = reader.read_u2()?;
        let this_class = reader.read_u2()?;
        let super_class = reader.read_u2()?;
        let interfaces_count = reader.read_u2()?;
        reader.skip(interfaces_count as usize * 2)?;

        let fields = scanner.members(&mut reader)?;
        let methods = scanner.members(&mut reader)?;

        let mut signature = None;
        let mut metadata = None;
        let attributes_count = reader.read_u2()?;
        for _ in 0..attributes_count {
            let start = reader.position();
            let name_index = reader.read_u2()?;
            let length = reader.read_u4()? as usize;
            let body_start = reader.position();
            let body = reader.read_slice(length)?;
            let name = scanner.attribute_name(name_index)?;

            if name == Some("Signature") {
                signature = Some(ClassReader::new(body).read_u2()?);
            }
            if name == Some("RuntimeVisibleAnnotations") && metadata.is_none() {
                metadata = scanner.class_annotations(
                    body,
                    body_start,
                    start..reader.position(),
                    name_index,
                )?;
            } else {
                scanner.attribute(name, body)?;
            }
        }

        let Scanner {
            collector: roles,
            annotation_types,
            ..
        } = scanner;
        Ok(Self {
            major,
            pool,
            pool_end,
            this_class,
            super_class,
            fields,
            methods,
            signature,
            annotation_types,
            roles,
            literals,
            metadata,
        })
    }

    pub fn roles(&self, index: u16) -> Roles {
        self.roles.get(index)
    }

    /// True when some `CONSTANT_String` points at the Utf8 entry.
    pub fn is_literal(&self, index: u16) -> bool {
        self.literals.contains(&index)
    }
}

#[derive(Debug, Default)]
pub(crate) struct RoleCollector {
    roles: HashMap<u16, Roles>,
}

impl RoleCollector {
    pub fn mark(&mut self, index: u16, role: Roles) {
        self.roles.entry(index).or_default().insert(role);
    }

    pub fn get(&self, index: u16) -> Roles {
        self.roles.get(&index).copied().unwrap_or_default()
    }
}

struct Scanner<'p, 'a> {
    pool: &'p ConstantPool<'a>,
    collector: RoleCollector,
    annotation_types: Vec<u16>,
}

impl<'p, 'a> Scanner<'p, 'a> {
    fn attribute_name(&self, index: u16) -> Result<Option<&'p str>, ClassParseError> {
        Ok(self.pool.utf8(index)?.text.as_deref())
    }

    fn members(&mut self, reader: &mut ClassReader<'_>) -> Result<Vec<Member>, ClassParseError> {
        let count = reader.read_u2()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let _access_flags = reader.read_u2()?;
            let name_index = reader.read_u2()?;
            let descriptor_index = reader.read_u2()?;
            self.collector.mark(descriptor_index, Roles::DESCRIPTOR);
            self.attributes(reader)?;
            members.push(Member {
                name_index,
                descriptor_index,
            });
        }
        Ok(members)
    }

    fn attributes(&mut self, reader: &mut ClassReader<'_>) -> Result<(), ClassParseError> {
        let count = reader.read_u2()?;
        for _ in 0..count {
            let name_index = reader.read_u2()?;
            let length = reader.read_u4()? as usize;
            let body = reader.read_slice(length)?;
            let name = self.attribute_name(name_index)?;
            self.attribute(name, body)?;
        }
        Ok(())
    }

    fn attribute(&mut self, name: Option<&str>, body: &[u8]) -> Result<(), ClassParseError> {
        let mut reader = ClassReader::new(body);
        match name {
            Some("Code") => {
                reader.skip(4)?; // max_stack, max_locals
                let code_length = reader.read_u4()? as usize;
                reader.skip(code_length)?;
                let exception_table_length = reader.read_u2()? as usize;
                reader.skip(exception_table_length * 8)?;
                self.attributes(&mut reader)?;
            }
            Some("Signature") => {
                self.collector.mark(reader.read_u2()?, Roles::SIGNATURE);
            }
            Some("LocalVariableTable") => self.local_variables(&mut reader, Roles::DESCRIPTOR)?,
            Some("LocalVariableTypeTable") => {
                self.local_variables(&mut reader, Roles::SIGNATURE)?
            }
            Some("RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations") => {
                let count = reader.read_u2()?;
                for _ in 0..count {
                    annotation::walk_annotation(
                        &mut reader,
                        &mut self.collector,
                        Roles::ANNOTATION_LITERAL,
                    )?;
                }
            }
            Some("RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations") => {
                let parameters = reader.read_u1()?;
                for _ in 0..parameters {
                    let count = reader.read_u2()?;
                    for _ in 0..count {
                        annotation::walk_annotation(
                            &mut reader,
                            &mut self.collector,
                            Roles::ANNOTATION_LITERAL,
                        )?;
                    }
                }
            }
            Some("AnnotationDefault") => {
                annotation::walk_element_value(
                    &mut reader,
                    &mut self.collector,
                    Roles::ANNOTATION_LITERAL,
                )?;
            }
            Some("RuntimeVisibleTypeAnnotations" | "RuntimeInvisibleTypeAnnotations") => {
                let count = reader.read_u2()?;
                for _ in 0..count {
                    annotation::walk_type_annotation(&mut reader, &mut self.collector)?;
                }
            }
            Some("Record") => {
                let count = reader.read_u2()?;
                for _ in 0..count {
                    let _name_index = reader.read_u2()?;
                    self.collector.mark(reader.read_u2()?, Roles::DESCRIPTOR);
                    self.attributes(&mut reader)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn local_variables(
        &mut self,
        reader: &mut ClassReader<'_>,
        role: Roles,
    ) -> Result<(), ClassParseError> {
        let count = reader.read_u2()?;
        for _ in 0..count {
            reader.skip(6)?; // start_pc, length, name_index
            self.collector.mark(reader.read_u2()?, role);
            reader.skip(2)?; // index
        }
        Ok(())
    }

    /// Walks the class-level visible annotations and, when `kotlin.Metadata`
    /// is among them, returns where it lives.
    fn class_annotations(
        &mut self,
        body: &'a [u8],
        body_start: usize,
        attribute: Range<usize>,
        attribute_name_index: u16,
    ) -> Result<Option<MetadataSite>, ClassParseError> {
        let mut reader = ClassReader::new(body);
        let count = reader.read_u2()?;
        let mut annotations = Vec::with_capacity(count as usize);
        let mut kotlin = None;

        for _ in 0..count {
            let start = reader.position();
            let type_index = reader.read_u2()?;
            self.annotation_types.push(type_index);
            let is_kotlin = kotlin.is_none()
                && self.pool.utf8(type_index)?.text.as_deref() == Some(annotation::KOTLIN_METADATA);
            if is_kotlin {
                self.collector.mark(type_index, Roles::DESCRIPTOR);
                kotlin = Some(annotation::read_kotlin_metadata(
                    &mut reader,
                    self.pool,
                    &mut self.collector,
                    type_index,
                )?);
                annotations.push(AnnotationSlot::Kotlin);
            } else {
                self.collector.mark(type_index, Roles::DESCRIPTOR);
                annotation::walk_pairs(
                    &mut reader,
                    &mut self.collector,
                    Roles::ANNOTATION_LITERAL,
                )?;
                annotations.push(AnnotationSlot::Raw(
                    body_start + start..body_start + reader.position(),
                ));
            }
        }

        Ok(kotlin.map(|kotlin| MetadataSite {
            attribute,
            attribute_name_index,
            annotations,
            kotlin,
        }))
    }
}
