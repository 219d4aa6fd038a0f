use crate::annotation;
use crate::error::ClassParseError;
use crate::layout::{AnnotationSlot, ClassLayout, MetadataSite, Roles};
use crate::pool::PoolEditor;
use crate::reader::ByteWriter;
use ksr_metadata::KotlinClassMetadata;
use ksr_rules::{Rewrite, RuleSet};
use std::borrow::Cow;
use tracing::trace;

/// Relocates every namespace reference inside a class file.
///
/// Only constant pool payloads change. Member tables, code and attributes
/// are copied byte for byte, except for the class-level annotation
/// attribute when `kotlin.Metadata` has to be rebuilt.
#[derive(Debug, Clone, Copy)]
pub struct ClassRewriter<'r> {
    rules: &'r RuleSet,
    string_literals: bool,
}

impl<'r> ClassRewriter<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Self {
            rules,
            string_literals: true,
        }
    }

    /// Whether string constants shaped like qualified type names are
    /// relocated. Enabled by default.
    pub fn with_string_literals(mut self, enabled: bool) -> Self {
        self.string_literals = enabled;
        self
    }

    pub fn rewrite(&self, bytes: &[u8]) -> Result<Rewrite, ClassParseError> {
        let layout = ClassLayout::parse(bytes)?;
        let mut editor = PoolEditor::new(&layout.pool);
        let mut metadata_touched = false;

        for (index, entry) in layout.pool.utf8_entries() {
            let Some(text) = entry.text.as_deref() else {
                continue;
            };
            let roles = layout.roles(index);
            let is_literal = layout.is_literal(index);

            let literal = if self.string_literals
                && (is_literal || roles.contains(Roles::ANNOTATION_LITERAL))
            {
                self.rules.rewrite_type_literal(text)
            } else {
                None
            };

            let replacement = if roles.is_structural() {
                self.structural(roles, text)?
            } else {
                literal.clone()
            };
            if let Some(value) = &replacement {
                editor.replace_utf8(index, value)?;
                if roles.contains(Roles::METADATA) {
                    metadata_touched = true;
                }
            }

            // A string constant sharing its entry with a name must keep its
            // own value.
            if is_literal && roles.is_structural() {
                let entry_value = replacement.as_deref().unwrap_or(text);
                let literal_value = literal.as_deref().unwrap_or(text);
                if entry_value != literal_value {
                    let split = editor.append_utf8(literal_value)?;
                    editor.repoint_strings(index, split);
                }
            }
        }

        let mut metadata_attribute = None;
        if let Some(site) = &layout.metadata {
            let metadata = match site.kotlin.metadata.relocate(self.rules)? {
                Some(relocated) => Some(relocated),
                None if metadata_touched => Some(site.kotlin.metadata.clone()),
                None => None,
            };
            if let Some(metadata) = metadata {
                metadata_attribute = Some(write_metadata_attribute(
                    bytes,
                    site,
                    &metadata,
                    &mut editor,
                )?);
            }
        }

        if !editor.is_changed() && metadata_attribute.is_none() {
            return Ok(Rewrite::Unchanged);
        }

        let mut out = ByteWriter::new();
        out.put_bytes(&bytes[..8]);
        editor.write(&mut out);
        match (&layout.metadata, metadata_attribute) {
            (Some(site), Some(attribute)) => {
                out.put_bytes(&bytes[layout.pool_end..site.attribute.start]);
                out.put_bytes(&attribute);
                out.put_bytes(&bytes[site.attribute.end..]);
            }
            _ => out.put_bytes(&bytes[layout.pool_end..]),
        }

        trace!(
            class = layout.pool.class_name(layout.this_class).unwrap_or("<invalid>"),
            major = layout.major,
            "relocated class"
        );
        Ok(Rewrite::Changed(out.into_bytes()))
    }

    fn structural(&self, roles: Roles, text: &str) -> Result<Option<String>, ClassParseError> {
        let rewritten = if roles.contains(Roles::CLASS_NAME) {
            self.rules.rewrite_internal_name(text)?
        } else if roles.contains(Roles::DESCRIPTOR) {
            // `void.class` in an annotation is the bare return descriptor.
            if text == "V" {
                Cow::Borrowed(text)
            } else {
                self.rules.rewrite_descriptor(text)?
            }
        } else if roles.contains(Roles::SIGNATURE) {
            self.rules.rewrite_signature(text)?
        } else {
            self.rules.rewrite(text)
        };

        Ok(match rewritten {
            Cow::Owned(value) => Some(value),
            Cow::Borrowed(_) => None,
        })
    }
}

fn write_metadata_attribute(
    bytes: &[u8],
    site: &MetadataSite,
    metadata: &KotlinClassMetadata,
    editor: &mut PoolEditor<'_, '_>,
) -> Result<Vec<u8>, ClassParseError> {
    let mut body = ByteWriter::new();
    body.put_u2(site.annotations.len() as u16);
    for slot in &site.annotations {
        match slot {
            AnnotationSlot::Raw(range) => body.put_bytes(&bytes[range.clone()]),
            AnnotationSlot::Kotlin => {
                annotation::write_kotlin_metadata(&site.kotlin, metadata, editor, &mut body)?
            }
        }
    }

    let mut attribute = ByteWriter::new();
    attribute.put_u2(site.attribute_name_index);
    attribute.put_u4(body.len() as u32);
    attribute.put_bytes(&body.into_bytes());
    Ok(attribute.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ClassFileBuilder;
    use crate::{ClassSummary, MAX_MAJOR_VERSION};

    fn rules() -> RuleSet {
        RuleSet::from_pairs([("com.foo", "com.bar")]).unwrap()
    }

    fn rewrite(bytes: &[u8]) -> ClassSummary {
        let rewritten = ClassRewriter::new(&rules())
            .rewrite(bytes)
            .unwrap()
            .into_changed()
            .expect("class should change");
        ClassSummary::parse(&rewritten).unwrap()
    }

    #[test]
    fn relocates_names_descriptors_and_signatures() {
        let mut builder = ClassFileBuilder::new("com/foo/Widget");
        builder
            .field("parts", "Ljava/util/List;")
            .field_with_signature("helper", "Lcom/foo/Helper;", "Lcom/foo/Box<Lcom/foo/Part;>;")
            .method("copy", "(Lcom/foo/Widget;[Lcom/foo/Part;)V", &[0xB1])
            .signature("Ljava/lang/Object;Ljava/lang/Comparable<Lcom/foo/Widget;>;");
        builder.class("[Lcom/foo/Part;");
        builder.class("org/other/Thing");

        let summary = rewrite(&builder.build());
        assert_eq!(summary.name, "com/bar/Widget");
        assert_eq!(summary.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(summary.fields[1].descriptor, "Lcom/bar/Helper;");
        assert_eq!(summary.fields[0].descriptor, "Ljava/util/List;");
        assert_eq!(summary.methods[0].descriptor, "(Lcom/bar/Widget;[Lcom/bar/Part;)V");
        assert_eq!(
            summary.signature.as_deref(),
            Some("Ljava/lang/Object;Ljava/lang/Comparable<Lcom/bar/Widget;>;")
        );
        assert!(summary.class_references.contains(&"[Lcom/bar/Part;".to_string()));
        assert!(summary.class_references.contains(&"org/other/Thing".to_string()));
    }

    #[test]
    fn unrelated_class_is_unchanged() {
        let mut builder = ClassFileBuilder::new("org/other/Thing");
        builder
            .field("name", "Ljava/lang/String;")
            .method_returning_string("path", "com/foo/notice.txt");
        let rewritten = ClassRewriter::new(&rules()).rewrite(&builder.build()).unwrap();
        assert_eq!(rewritten, Rewrite::Unchanged);
    }

    #[test]
    fn string_literals_only_move_when_they_name_types() {
        let mut builder = ClassFileBuilder::new("org/other/Loader");
        builder
            .method_returning_string("resource", "com/foo/notice.txt")
            .method_returning_string("type", "com.foo.Widget")
            .method_returning_string("package", "com.foo");

        let summary = rewrite(&builder.build());
        assert_eq!(
            summary.string_literals,
            vec!["com/foo/notice.txt", "com.bar.Widget", "com.foo"]
        );
    }

    #[test]
    fn literal_sharing_a_class_name_entry_keeps_its_own_value() {
        let mut builder = ClassFileBuilder::new("com/foo/Widget");
        builder.method_returning_string("name", "com/foo/Widget");
        let bytes = builder.build();

        let summary = rewrite(&bytes);
        assert_eq!(summary.name, "com/bar/Widget");
        assert_eq!(summary.string_literals, vec!["com/bar/Widget"]);

        let rules = rules();
        let rewritten = ClassRewriter::new(&rules)
            .with_string_literals(false)
            .rewrite(&bytes)
            .unwrap()
            .into_changed()
            .unwrap();
        let summary = ClassSummary::parse(&rewritten).unwrap();
        assert_eq!(summary.name, "com/bar/Widget");
        assert_eq!(summary.string_literals, vec!["com/foo/Widget"]);
    }

    #[test]
    fn rebuilds_kotlin_metadata() {
        let metadata = KotlinClassMetadata {
            kind: Some(2),
            metadata_version: Some(vec![1, 9, 0]),
            // String table with one record covering both `d2` entries.
            data1: Some(ksr_metadata::encode_bytes(&[0x04, 0x0A, 0x02, 0x08, 0x02])),
            data2: Some(vec!["com/foo/Widget".into(), "size".into()]),
            package_name: Some("com.foo.jvm".into()),
            extra_int: Some(48),
            ..Default::default()
        };
        let mut builder = ClassFileBuilder::new("com/foo/WidgetKt");
        builder
            .annotation("Lorg/other/Marker;", &[("value", "kept")])
            .kotlin_metadata(&metadata);

        let summary = rewrite(&builder.build());
        let relocated = summary.kotlin_metadata.expect("metadata");
        assert_eq!(summary.name, "com/bar/WidgetKt");
        assert_eq!(relocated.metadata_version, Some(vec![2, 1, 0]));
        assert_eq!(
            relocated.data2,
            Some(vec!["com/bar/Widget".to_string(), "size".to_string()])
        );
        assert_eq!(relocated.package_name.as_deref(), Some("com.bar.jvm"));
        assert_eq!(relocated.extra_int, Some(48));
        assert_eq!(relocated.data1, metadata.data1);
        assert_eq!(summary.annotations, vec!["Lorg/other/Marker;", "Lkotlin/Metadata;"]);
    }

    #[test]
    fn metadata_keeps_values_whose_entries_were_rewritten() {
        // Facade `d2` entries are not names, but this one shares its entry
        // with a relocated string constant.
        let metadata = KotlinClassMetadata {
            kind: Some(3),
            metadata_version: Some(vec![1, 9, 0]),
            data1: Some(vec!["org/other/Utils__AKt".into()]),
            data2: Some(vec!["com/foo/Shared".into()]),
            ..Default::default()
        };
        let mut builder = ClassFileBuilder::new("org/other/Utils");
        builder
            .method_returning_string("shared", "com/foo/Shared")
            .kotlin_metadata(&metadata);

        let summary = rewrite(&builder.build());
        assert_eq!(summary.string_literals, vec!["com/bar/Shared"]);
        let kept = summary.kotlin_metadata.expect("metadata");
        assert_eq!(kept.data2, metadata.data2);
        assert_eq!(kept.metadata_version, metadata.metadata_version);
    }

    #[test]
    fn unsupported_and_malformed_inputs_are_distinguished() {
        let mut builder = ClassFileBuilder::new("com/foo/Widget");
        builder.major_version(MAX_MAJOR_VERSION + 1);
        let error = ClassRewriter::new(&rules()).rewrite(&builder.build()).unwrap_err();
        assert!(error.is_unsupported());

        let bytes = ClassFileBuilder::new("com/foo/Widget").build();
        let error = ClassRewriter::new(&rules())
            .rewrite(&bytes[..bytes.len() - 3])
            .unwrap_err();
        assert!(!error.is_unsupported());

        let metadata = KotlinClassMetadata {
            metadata_version: Some(vec![3, 0, 0]),
            ..Default::default()
        };
        let mut builder = ClassFileBuilder::new("com/foo/Future");
        builder.kotlin_metadata(&metadata);
        let error = ClassRewriter::new(&rules()).rewrite(&builder.build()).unwrap_err();
        assert!(error.is_unsupported());
    }
}
