use indexmap::IndexMap;
use ksr_classfile::{ClassFileBuilder, ClassSummary};
use ksr_metadata::{encode_bytes, KotlinClassMetadata, MetadataVersion, ModuleMetadata};
use ksr_relocate::{relocate_jar, ArchiveRelocator, RelocateError, RelocationOptions};
use ksr_rules::RuleSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

const MODULE_ENTRY: &str = "META-INF/app.kotlin_module";

fn widget_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/foo/Widget");
    builder
        .field("helper", "Lcom/foo/Helper;")
        .method("copy", "(Lcom/foo/Widget;)Lcom/foo/Widget;", &[0x2B, 0xB0])
        .source_file("Widget.kt");
    builder.build()
}

fn widget_facade_class() -> Vec<u8> {
    let metadata = KotlinClassMetadata {
        kind: Some(2),
        metadata_version: Some(vec![1, 9, 0]),
        bytecode_version: Some(vec![1, 0, 3]),
        data1: Some(encode_bytes(&[0x04, 0x0A, 0x02, 0x08, 0x02])),
        data2: Some(vec!["com/foo/Widget".into(), "widgetCount".into()]),
        extra_int: Some(48),
        ..Default::default()
    };
    let mut builder = ClassFileBuilder::new("com/foo/WidgetKt");
    builder
        .method("widgetCount", "(Lcom/foo/Widget;)I", &[0x03, 0xAC])
        .kotlin_metadata(&metadata);
    builder.build()
}

fn client_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("org/other/Client");
    builder
        .field("widget", "Lcom/foo/Widget;")
        .method_returning_string("notice", "com/foo/notice.txt")
        .method_returning_string("widgetType", "com/foo/Widget")
        .method_returning_string("reflective", "com.foo.Helper");
    builder.build()
}

fn plain_class() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("org/other/Plain");
    builder.field("name", "Ljava/lang/String;");
    builder.build()
}

fn module_mapping() -> Vec<u8> {
    let mut module = ModuleMetadata::new(MetadataVersion::new(vec![1, 9, 0]));
    module.package_mut("com.foo").add_part("com/foo/WidgetKt", None);
    module.package_mut("org.other").add_part("org/other/ClientKt", None);
    module.write()
}

fn timestamp() -> DateTime {
    DateTime::from_date_and_time(2021, 6, 15, 10, 30, 42).unwrap()
}

struct Entry {
    name: &'static str,
    bytes: Vec<u8>,
    method: CompressionMethod,
}

fn entry(name: &'static str, bytes: Vec<u8>) -> Entry {
    Entry {
        name,
        bytes,
        method: CompressionMethod::Deflated,
    }
}

fn default_entries() -> Vec<Entry> {
    vec![
        entry("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n".to_vec()),
        entry("com/foo/Widget.class", widget_class()),
        Entry {
            method: CompressionMethod::Stored,
            ..entry("com/foo/WidgetKt.class", widget_facade_class())
        },
        entry("com/foo/notice.txt", b"third party notice".to_vec()),
        entry("org/other/Client.class", client_class()),
        entry("org/other/Plain.class", plain_class()),
        entry(MODULE_ENTRY, module_mapping()),
    ]
}

fn write_jar(dir: &TempDir, entries: &[Entry]) -> PathBuf {
    let path = dir.path().join("app.jar");
    let mut writer = ZipWriter::new(File::create(&path).unwrap());
    writer.set_comment("built for tests");
    writer
        .add_directory("com/foo/", FileOptions::default())
        .unwrap();
    for entry in entries {
        let options = FileOptions::default()
            .compression_method(entry.method)
            .last_modified_time(timestamp())
            .unix_permissions(0o640);
        writer.start_file(entry.name, options).unwrap();
        writer.write_all(&entry.bytes).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn read_entry(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).unwrap();
    bytes
}

/// Entry names in central directory order.
fn entry_names(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|index| archive.by_index(index).unwrap().name().to_string())
        .collect()
}

#[test]
fn class_files_and_module_mapping_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let jar = write_jar(&dir, &default_entries());
    let names_before = entry_names(&jar);

    let report = relocate_jar(&jar, [("com/foo/", "com/bar/")]).unwrap();
    assert_eq!(report.entries, 8);
    assert_eq!(report.classes_scanned, 4);
    assert_eq!(report.classes_relocated, 3);
    assert_eq!(report.modules_relocated, 1);
    assert_eq!(entry_names(&jar), names_before);

    let widget = ClassSummary::parse(&read_entry(&jar, "com/foo/Widget.class")).unwrap();
    assert_eq!(widget.name, "com/bar/Widget");
    assert_eq!(widget.fields[0].descriptor, "Lcom/bar/Helper;");
    assert_eq!(widget.methods[0].descriptor, "(Lcom/bar/Widget;)Lcom/bar/Widget;");

    let facade = ClassSummary::parse(&read_entry(&jar, "com/foo/WidgetKt.class")).unwrap();
    assert_eq!(facade.name, "com/bar/WidgetKt");
    let metadata = facade.kotlin_metadata.unwrap();
    assert_eq!(
        metadata.data2,
        Some(vec!["com/bar/Widget".to_string(), "widgetCount".to_string()])
    );
    assert_eq!(
        metadata.metadata_version,
        Some(MetadataVersion::latest().components().to_vec())
    );

    let module = ModuleMetadata::read(&read_entry(&jar, MODULE_ENTRY)).unwrap();
    let packages: Vec<_> = module.packages.keys().map(String::as_str).collect();
    assert_eq!(packages, ["com.bar", "org.other"]);
    assert_eq!(
        module.packages["com.bar"].members,
        IndexMap::from([("com/bar/WidgetKt".to_string(), None::<String>)])
    );

    // The facade the mapping names is the class the jar now declares.
    assert!(module.packages["com.bar"].members.contains_key(&facade.name));
}

#[test]
fn module_mappings_outside_meta_inf_are_relocated() {
    let dir = tempfile::tempdir().unwrap();
    let mut entries = default_entries();
    entries.push(entry("kotlin/extra.kotlin_module", module_mapping()));
    let jar = write_jar(&dir, &entries);

    let report = relocate_jar(&jar, [("com.foo", "com.bar")]).unwrap();
    assert_eq!(report.modules_relocated, 2);

    let module = ModuleMetadata::read(&read_entry(&jar, "kotlin/extra.kotlin_module")).unwrap();
    let packages: Vec<_> = module.packages.keys().map(String::as_str).collect();
    assert_eq!(packages, ["com.bar", "org.other"]);
}

#[test]
fn string_literals_move_only_when_they_name_types() {
    let dir = tempfile::tempdir().unwrap();
    let jar = write_jar(&dir, &default_entries());

    relocate_jar(&jar, [("com.foo", "com.bar")]).unwrap();

    let client = ClassSummary::parse(&read_entry(&jar, "org/other/Client.class")).unwrap();
    assert_eq!(client.name, "org/other/Client");
    assert_eq!(client.fields[0].descriptor, "Lcom/bar/Widget;");
    assert_eq!(
        client.string_literals,
        ["com/foo/notice.txt", "com/bar/Widget", "com.bar.Helper"]
    );
}

#[test]
fn string_literal_relocation_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let jar = write_jar(&dir, &default_entries());
    let rules = RuleSet::from_pairs([("com.foo", "com.bar")]).unwrap();

    ArchiveRelocator::new(
        &rules,
        RelocationOptions {
            string_literals: false,
        },
    )
    .relocate(&jar)
    .unwrap();

    let client = ClassSummary::parse(&read_entry(&jar, "org/other/Client.class")).unwrap();
    assert_eq!(client.fields[0].descriptor, "Lcom/bar/Widget;");
    assert_eq!(
        client.string_literals,
        ["com/foo/notice.txt", "com/foo/Widget", "com.foo.Helper"]
    );
}

#[test]
fn unaffected_entries_are_copied_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let entries = default_entries();
    let jar = write_jar(&dir, &entries);
    relocate_jar(&jar, [("com.foo", "com.bar")]).unwrap();

    for name in ["META-INF/MANIFEST.MF", "com/foo/notice.txt", "org/other/Plain.class"] {
        let original = entries.iter().find(|entry| entry.name == name).unwrap();
        assert_eq!(read_entry(&jar, name), original.bytes, "{name}");
    }

    let mut archive = ZipArchive::new(File::open(&jar).unwrap()).unwrap();
    assert_eq!(archive.comment(), b"built for tests");
    for (name, method) in [
        ("com/foo/Widget.class", CompressionMethod::Deflated),
        ("com/foo/WidgetKt.class", CompressionMethod::Stored),
    ] {
        let entry = archive.by_name(name).unwrap();
        assert_eq!(entry.compression(), method, "{name}");
        let modified = entry.last_modified();
        assert_eq!(
            (modified.year(), modified.month(), modified.day(), modified.hour(), modified.minute()),
            (2021, 6, 15, 10, 30)
        );
        assert_eq!(entry.unix_mode().map(|mode| mode & 0o777), Some(0o640));
    }
}

#[test]
fn archives_without_matches_stay_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let jar = write_jar(&dir, &default_entries());
    let before = fs::read(&jar).unwrap();

    let report = relocate_jar(&jar, [("net.example", "shadow.net.example")]).unwrap();
    assert!(!report.is_modified());
    assert_eq!(report.classes_scanned, 4);
    assert_eq!(fs::read(&jar).unwrap(), before);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn malformed_class_aborts_and_keeps_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let mut entries = default_entries();
    let mut truncated = widget_class();
    truncated.truncate(truncated.len() / 2);
    entries.push(entry("com/foo/Broken.class", truncated));
    let jar = write_jar(&dir, &entries);
    let before = fs::read(&jar).unwrap();

    let error = relocate_jar(&jar, [("com.foo", "com.bar")]).unwrap_err();
    match error {
        RelocateError::MalformedBinary { entry, .. } => assert_eq!(entry, "com/foo/Broken.class"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fs::read(&jar).unwrap(), before);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn unsupported_class_version_is_reported_as_such() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = ClassFileBuilder::new("com/foo/Future");
    builder.major_version(ksr_classfile::MAX_MAJOR_VERSION + 1);
    let jar = write_jar(&dir, &[entry("com/foo/Future.class", builder.build())]);

    let error = relocate_jar(&jar, [("com.foo", "com.bar")]).unwrap_err();
    assert!(matches!(
        error,
        RelocateError::UnsupportedFormat { ref entry, .. } if entry == "com/foo/Future.class"
    ));
}

#[test]
fn conflicting_rules_fail_before_touching_the_archive() {
    let missing = Path::new("does/not/exist.jar");
    let error = relocate_jar(missing, [("a/b/", "x/"), ("a/b/c/", "y/")]).unwrap_err();
    assert!(matches!(error, RelocateError::ConflictingRule(_)));

    let error = relocate_jar(missing, [("a/b/", "x/"), ("c/d/", "y/")]).unwrap_err();
    assert!(matches!(error, RelocateError::Io { .. }));
}
