use crate::version::MetadataVersion;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("unexpected end of metadata payload")]
    UnexpectedEof,
    #[error("malformed varint at offset {offset}")]
    MalformedVarint { offset: usize },
    #[error("unsupported protobuf wire type {wire_type} for field {field}")]
    UnsupportedWireType { field: u32, wire_type: u8 },
    #[error("invalid UTF-8 in metadata string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("missing required field {field} in {message}")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },
    #[error("incompatible metadata version {version} (latest supported: {latest})")]
    UnsupportedVersion {
        version: MetadataVersion,
        latest: MetadataVersion,
    },
    #[error("invalid metadata: {0}")]
    Invalid(String),
}

impl MetadataError {
    /// True for payloads that are well formed but written by an
    /// incompatible compiler.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, MetadataError::UnsupportedVersion { .. })
    }
}
