use crate::error::RelocateError;
use crate::metrics::timed_pass;
use crate::report::RelocationReport;
use ksr_classfile::ClassRewriter;
use ksr_metadata::{relocate_module, MODULE_FILE_SUFFIX};
use ksr_rules::{Rewrite, RuleSet};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Entries at least this large need zip64 headers.
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationOptions {
    /// Relocate string constants that look like qualified type names.
    pub string_literals: bool,
}

impl Default for RelocationOptions {
    fn default() -> Self {
        Self {
            string_literals: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Class,
    Module,
}

impl EntryKind {
    fn of(name: &str) -> Option<Self> {
        if name.ends_with(".class") {
            Some(EntryKind::Class)
        } else if name.ends_with(MODULE_FILE_SUFFIX) {
            Some(EntryKind::Module)
        } else {
            None
        }
    }
}

/// Rewrites the class files and Kotlin module mappings of a jar in place.
///
/// Every entry is relocated in memory first. The jar on disk is only
/// replaced, through a staging copy in the same directory, when at least one
/// entry changed and every entry was processed without error.
pub struct ArchiveRelocator<'r> {
    rules: &'r RuleSet,
    classes: ClassRewriter<'r>,
}

impl<'r> ArchiveRelocator<'r> {
    pub fn new(rules: &'r RuleSet, options: RelocationOptions) -> Self {
        Self {
            rules,
            classes: ClassRewriter::new(rules).with_string_literals(options.string_literals),
        }
    }

    pub fn relocate(&self, path: &Path) -> Result<RelocationReport, RelocateError> {
        timed_pass(path, || self.relocate_archive(path))
    }

    fn relocate_archive(&self, path: &Path) -> Result<RelocationReport, RelocateError> {
        let file = File::open(path).map_err(|source| io_error(path, source))?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|source| zip_error(path, source))?;

        let mut report = RelocationReport {
            entries: archive.len(),
            ..RelocationReport::default()
        };
        let mut replacements = HashMap::new();
        let mut buffer = Vec::new();

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|source| zip_error(path, source))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let Some(kind) = EntryKind::of(&name) else {
                continue;
            };

            buffer.clear();
            entry
                .read_to_end(&mut buffer)
                .map_err(|source| io_error(path, source))?;

            let outcome = match kind {
                EntryKind::Class => {
                    report.classes_scanned += 1;
                    self.classes
                        .rewrite(&buffer)
                        .map_err(|source| RelocateError::entry(&name, source))?
                }
                EntryKind::Module => relocate_module(&buffer, self.rules)
                    .map_err(|source| RelocateError::entry(&name, source))?,
            };

            if let Rewrite::Changed(bytes) = outcome {
                debug!(entry = %name, "relocated entry");
                match kind {
                    EntryKind::Class => report.classes_relocated += 1,
                    EntryKind::Module => report.modules_relocated += 1,
                }
                replacements.insert(index, bytes);
            }
        }

        if replacements.is_empty() {
            debug!(archive = %path.display(), "no entry references a relocated namespace");
            return Ok(report);
        }

        write_staged(path, archive, &replacements)?;
        Ok(report)
    }
}

/// Copies `archive` into a staging file next to `path`, substituting the
/// replaced entries, then moves it over `path`.
fn write_staged<R: Read + Seek>(
    path: &Path,
    mut archive: ZipArchive<R>,
    replacements: &HashMap<usize, Vec<u8>>,
) -> Result<(), RelocateError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staging = NamedTempFile::new_in(directory).map_err(|source| io_error(path, source))?;

    {
        let mut writer = ZipWriter::new(BufWriter::new(staging.as_file_mut()));
        let comment = archive.comment();
        if !comment.is_empty() {
            writer.set_comment(String::from_utf8_lossy(comment));
        }

        for index in 0..archive.len() {
            let entry = archive
                .by_index_raw(index)
                .map_err(|source| zip_error(path, source))?;
            let Some(bytes) = replacements.get(&index) else {
                writer
                    .raw_copy_file(entry)
                    .map_err(|source| zip_error(path, source))?;
                continue;
            };

            let mut options = FileOptions::default()
                .compression_method(entry.compression())
                .last_modified_time(entry.last_modified())
                .large_file(bytes.len() as u64 >= ZIP64_THRESHOLD);
            if let Some(mode) = entry.unix_mode() {
                options = options.unix_permissions(mode);
            }
            let name = entry.name().to_string();
            drop(entry);

            writer
                .start_file(name, options)
                .map_err(|source| zip_error(path, source))?;
            writer
                .write_all(bytes)
                .map_err(|source| io_error(path, source))?;
        }

        let mut out = writer.finish().map_err(|source| zip_error(path, source))?;
        out.flush().map_err(|source| io_error(path, source))?;
    }

    let permissions = fs::metadata(path)
        .map_err(|source| io_error(path, source))?
        .permissions();
    staging
        .as_file()
        .set_permissions(permissions)
        .map_err(|source| io_error(path, source))?;

    // The source archive has to be closed before it can be replaced on
    // every platform.
    drop(archive);
    staging
        .persist(path)
        .map_err(|error| io_error(path, error.error))?;
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> RelocateError {
    RelocateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn zip_error(path: &Path, source: ZipError) -> RelocateError {
    RelocateError::Zip {
        path: path.to_path_buf(),
        source,
    }
}
