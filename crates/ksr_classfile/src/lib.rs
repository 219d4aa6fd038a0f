//! JVM class file relocation.
//!
//! [`ClassRewriter`] rewrites the constant pool of a class in place: class
//! names, descriptors, generic signatures, package names, annotation values
//! and, when it is shaped like a type name, the occasional string literal.
//! The `kotlin.Metadata` annotation is decoded and rebuilt through
//! [`ksr_metadata`]. Everything else in the class is copied verbatim.

mod annotation;
mod error;
mod layout;
mod mutf8;
mod pool;
mod reader;
mod rewriter;
mod summary;

#[cfg(any(test, feature = "fixtures"))]
mod fixtures;

pub use error::ClassParseError;
pub use layout::{MAX_MAJOR_VERSION, MIN_MAJOR_VERSION};
pub use rewriter::ClassRewriter;
pub use summary::{ClassSummary, MemberSummary};

#[cfg(any(test, feature = "fixtures"))]
pub use fixtures::ClassFileBuilder;
