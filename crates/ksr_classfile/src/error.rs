use ksr_metadata::MetadataError;
use ksr_rules::NameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassParseError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported class file version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("constant pool entry {index} is not valid modified UTF-8")]
    InvalidUtf8 { index: u16 },
    #[error("malformed annotation: unknown element value tag {tag:#04x}")]
    InvalidElementTag { tag: u8 },
    #[error("malformed type annotation: unknown target type {target:#04x}")]
    InvalidTargetType { target: u8 },
    #[error("constant pool would exceed 65535 entries")]
    ConstantPoolOverflow,
    #[error("string of {length} bytes does not fit in a constant pool entry")]
    Utf8TooLong { length: usize },
    #[error(transparent)]
    Name(#[from] NameError),
    #[error("kotlin metadata: {0}")]
    Metadata(#[from] MetadataError),
}

impl ClassParseError {
    /// True when the input is well formed but uses something this crate
    /// cannot rewrite; everything else means the input is corrupt.
    pub fn is_unsupported(&self) -> bool {
        match self {
            ClassParseError::UnsupportedVersion { .. }
            | ClassParseError::UnsupportedConstant { .. }
            | ClassParseError::ConstantPoolOverflow
            | ClassParseError::Utf8TooLong { .. } => true,
            ClassParseError::Metadata(error) => error.is_unsupported(),
            _ => false,
        }
    }
}
