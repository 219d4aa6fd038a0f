//! Hand-assembled class files for tests.

use crate::annotation::KOTLIN_METADATA;
use crate::mutf8;
use crate::reader::ByteWriter;
use ksr_metadata::KotlinClassMetadata;
use std::collections::HashMap;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_SUPER: u16 = 0x0020;

/// Builds a minimal but valid class file. Utf8 constants are shared, so a
/// string literal equal to a class name uses the same entry, the way javac
/// lays out its pool.
#[derive(Debug, Clone)]
pub struct ClassFileBuilder {
    major: u16,
    pool: Vec<Vec<u8>>,
    utf8: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    signature: Option<u16>,
    annotations: Vec<Vec<u8>>,
    attributes: Vec<Vec<u8>>,
}

impl ClassFileBuilder {
    /// A public class extending `java/lang/Object`, targeting Java 8.
    pub fn new(name: &str) -> Self {
        let mut builder = Self {
            major: 52,
            pool: Vec::new(),
            utf8: HashMap::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            signature: None,
            annotations: Vec::new(),
            attributes: Vec::new(),
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class("java/lang/Object");
        builder
    }

    pub fn major_version(&mut self, major: u16) -> &mut Self {
        self.major = major;
        self
    }

    fn push(&mut self, raw: Vec<u8>) -> u16 {
        self.pool.push(raw);
        self.pool.len() as u16
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8.get(value) {
            return *index;
        }
        let encoded = mutf8::encode(value);
        let mut raw = ByteWriter::new();
        raw.put_u1(1);
        raw.put_u2(encoded.len() as u16);
        raw.put_bytes(&encoded);
        let index = self.push(raw.into_bytes());
        self.utf8.insert(value.to_string(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.tagged(7, name_index)
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        self.tagged(8, string_index)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut raw = ByteWriter::new();
        raw.put_u1(3);
        raw.put_u4(value as u32);
        self.push(raw.into_bytes())
    }

    fn tagged(&mut self, tag: u8, index: u16) -> u16 {
        let mut raw = ByteWriter::new();
        raw.put_u1(tag);
        raw.put_u2(index);
        self.push(raw.into_bytes())
    }

    fn attribute(&mut self, name: &str, body: &[u8]) -> Vec<u8> {
        let mut raw = ByteWriter::new();
        raw.put_u2(self.utf8(name));
        raw.put_u4(body.len() as u32);
        raw.put_bytes(body);
        raw.into_bytes()
    }

    fn member(&mut self, name: &str, descriptor: &str, attributes: &[Vec<u8>]) -> Vec<u8> {
        let mut raw = ByteWriter::new();
        raw.put_u2(ACC_PUBLIC);
        raw.put_u2(self.utf8(name));
        raw.put_u2(self.utf8(descriptor));
        raw.put_u2(attributes.len() as u16);
        for attribute in attributes {
            raw.put_bytes(attribute);
        }
        raw.into_bytes()
    }

    pub fn field(&mut self, name: &str, descriptor: &str) -> &mut Self {
        let field = self.member(name, descriptor, &[]);
        self.fields.push(field);
        self
    }

    pub fn field_with_signature(
        &mut self,
        name: &str,
        descriptor: &str,
        signature: &str,
    ) -> &mut Self {
        let signature_index = self.utf8(signature);
        let attribute = self.attribute("Signature", &signature_index.to_be_bytes());
        let field = self.member(name, descriptor, &[attribute]);
        self.fields.push(field);
        self
    }

    /// Adds a method whose `Code` attribute holds `code` verbatim.
    pub fn method(&mut self, name: &str, descriptor: &str, code: &[u8]) -> &mut Self {
        let mut body = ByteWriter::new();
        body.put_u2(2); // max_stack
        body.put_u2(1); // max_locals
        body.put_u4(code.len() as u32);
        body.put_bytes(code);
        body.put_u2(0); // exception_table_length
        body.put_u2(0); // attributes_count
        let code = self.attribute("Code", &body.into_bytes());
        let method = self.member(name, descriptor, &[code]);
        self.methods.push(method);
        self
    }

    /// Adds `String name()` that loads `value` with `ldc_w`.
    pub fn method_returning_string(&mut self, name: &str, value: &str) -> &mut Self {
        const LDC_W: u8 = 0x13;
        const ARETURN: u8 = 0xB0;
        let [high, low] = self.string(value).to_be_bytes();
        self.method(name, "()Ljava/lang/String;", &[LDC_W, high, low, ARETURN])
    }

    pub fn signature(&mut self, signature: &str) -> &mut Self {
        self.signature = Some(self.utf8(signature));
        self
    }

    pub fn source_file(&mut self, file: &str) -> &mut Self {
        let file_index = self.utf8(file);
        let attribute = self.attribute("SourceFile", &file_index.to_be_bytes());
        self.attributes.push(attribute);
        self
    }

    /// Adds a class-level visible annotation whose elements are strings.
    pub fn annotation(&mut self, descriptor: &str, values: &[(&str, &str)]) -> &mut Self {
        let mut raw = ByteWriter::new();
        raw.put_u2(self.utf8(descriptor));
        raw.put_u2(values.len() as u16);
        for (name, value) in values {
            raw.put_u2(self.utf8(name));
            raw.put_u1(b's');
            raw.put_u2(self.utf8(value));
        }
        self.annotations.push(raw.into_bytes());
        self
    }

    pub fn kotlin_metadata(&mut self, metadata: &KotlinClassMetadata) -> &mut Self {
        let mut pairs = ByteWriter::new();
        let mut count: u16 = 0;

        if let Some(kind) = metadata.kind {
            self.int_pair(&mut pairs, "k", kind);
            count += 1;
        }
        for (name, ints) in [
            ("mv", &metadata.metadata_version),
            ("bv", &metadata.bytecode_version),
        ] {
            if let Some(ints) = ints {
                pairs.put_u2(self.utf8(name));
                pairs.put_u1(b'[');
                pairs.put_u2(ints.len() as u16);
                for value in ints {
                    pairs.put_u1(b'I');
                    pairs.put_u2(self.integer(*value));
                }
                count += 1;
            }
        }
        for (name, strings) in [("d1", &metadata.data1), ("d2", &metadata.data2)] {
            if let Some(strings) = strings {
                pairs.put_u2(self.utf8(name));
                pairs.put_u1(b'[');
                pairs.put_u2(strings.len() as u16);
                for value in strings {
                    pairs.put_u1(b's');
                    pairs.put_u2(self.utf8(value));
                }
                count += 1;
            }
        }
        for (name, value) in [("xs", &metadata.extra_string), ("pn", &metadata.package_name)] {
            if let Some(value) = value {
                pairs.put_u2(self.utf8(name));
                pairs.put_u1(b's');
                pairs.put_u2(self.utf8(value));
                count += 1;
            }
        }
        if let Some(extra) = metadata.extra_int {
            self.int_pair(&mut pairs, "xi", extra);
            count += 1;
        }

        let mut raw = ByteWriter::new();
        raw.put_u2(self.utf8(KOTLIN_METADATA));
        raw.put_u2(count);
        raw.put_bytes(&pairs.into_bytes());
        self.annotations.push(raw.into_bytes());
        self
    }

    fn int_pair(&mut self, out: &mut ByteWriter, name: &str, value: i32) {
        out.put_u2(self.utf8(name));
        out.put_u1(b'I');
        out.put_u2(self.integer(value));
    }

    pub fn build(&self) -> Vec<u8> {
        let mut class_attributes = self.attributes.clone();
        let mut out = ByteWriter::new();
        out.put_u4(0xCAFEBABE);
        out.put_u2(0); // minor
        out.put_u2(self.major);

        // Attribute names have to be in the pool before it is written.
        let mut pool = self.clone();
        if let Some(signature) = self.signature {
            class_attributes.push(pool.attribute("Signature", &signature.to_be_bytes()));
        }
        if !self.annotations.is_empty() {
            let mut body = ByteWriter::new();
            body.put_u2(self.annotations.len() as u16);
            for annotation in &self.annotations {
                body.put_bytes(annotation);
            }
            class_attributes.push(pool.attribute("RuntimeVisibleAnnotations", &body.into_bytes()));
        }

        out.put_u2(pool.pool.len() as u16 + 1);
        for raw in &pool.pool {
            out.put_bytes(raw);
        }
        out.put_u2(ACC_PUBLIC | ACC_SUPER);
        out.put_u2(self.this_class);
        out.put_u2(self.super_class);
        out.put_u2(0); // interfaces_count

        for members in [&self.fields, &self.methods] {
            out.put_u2(members.len() as u16);
            for member in members {
                out.put_bytes(member);
            }
        }

        out.put_u2(class_attributes.len() as u16);
        for attribute in &class_attributes {
            out.put_bytes(attribute);
        }
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClassSummary;

    #[test]
    fn builds_a_parseable_class() {
        let mut builder = ClassFileBuilder::new("com/foo/Widget");
        builder
            .field("count", "I")
            .method_returning_string("label", "widget")
            .source_file("Widget.java")
            .annotation("Lcom/foo/Marker;", &[("value", "x")]);

        let summary = ClassSummary::parse(&builder.build()).unwrap();
        assert_eq!(summary.name, "com/foo/Widget");
        assert_eq!(summary.major_version, 52);
        assert_eq!(summary.fields[0].name, "count");
        assert_eq!(summary.methods[0].descriptor, "()Ljava/lang/String;");
        assert_eq!(summary.string_literals, vec!["widget"]);
        assert_eq!(summary.annotations, vec!["Lcom/foo/Marker;"]);
        assert_eq!(summary.kotlin_metadata, None);
    }

    #[test]
    fn round_trips_kotlin_metadata() {
        let metadata = KotlinClassMetadata {
            kind: Some(1),
            metadata_version: Some(vec![1, 9, 0]),
            data1: Some(vec!["\u{0}payload".into()]),
            data2: Some(vec!["com/foo/Widget".into()]),
            extra_int: Some(50),
            ..Default::default()
        };
        let mut builder = ClassFileBuilder::new("com/foo/Widget");
        builder.kotlin_metadata(&metadata);

        let summary = ClassSummary::parse(&builder.build()).unwrap();
        assert_eq!(summary.kotlin_metadata, Some(metadata));
    }
}
