use ksr_classfile::ClassParseError;
use ksr_metadata::MetadataError;
use ksr_rules::RuleError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use zip::result::ZipError;

/// Why a single archive entry could not be relocated.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Class(#[from] ClassParseError),
    #[error(transparent)]
    Module(#[from] MetadataError),
}

impl EntryError {
    pub fn is_unsupported(&self) -> bool {
        match self {
            EntryError::Class(error) => error.is_unsupported(),
            EntryError::Module(error) => error.is_unsupported(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error(transparent)]
    ConflictingRule(#[from] RuleError),
    #[error("unsupported format in {entry}: {source}")]
    UnsupportedFormat {
        entry: String,
        #[source]
        source: EntryError,
    },
    #[error("malformed binary {entry}: {source}")]
    MalformedBinary {
        entry: String,
        #[source]
        source: EntryError,
    },
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ZIP error on {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

impl RelocateError {
    pub(crate) fn entry(entry: &str, source: impl Into<EntryError>) -> Self {
        let source = source.into();
        let entry = entry.to_string();
        if source.is_unsupported() {
            RelocateError::UnsupportedFormat { entry, source }
        } else {
            RelocateError::MalformedBinary { entry, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_entry_failures() {
        let error = RelocateError::entry(
            "a/B.class",
            ClassParseError::UnsupportedVersion { major: 99, minor: 0 },
        );
        assert!(matches!(error, RelocateError::UnsupportedFormat { .. }));

        let error = RelocateError::entry("a/B.class", ClassParseError::UnexpectedEof);
        assert!(matches!(
            error,
            RelocateError::MalformedBinary { ref entry, .. } if entry == "a/B.class"
        ));
        assert_eq!(
            error.to_string(),
            "malformed binary a/B.class: unexpected end of class file"
        );
    }
}
