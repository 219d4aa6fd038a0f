//! Kotlin compiler metadata.
//!
//! Two binary formats carry namespace information the JVM class file grammar
//! does not know about: the payload of the `kotlin.Metadata` annotation
//! (see [`KotlinClassMetadata`]) and the per-module `.kotlin_module` sidecar
//! (see [`ModuleMetadata`]). Both are decoded fully, relocated through a
//! [`ksr_rules::RuleSet`] and re-encoded with the latest supported version.

mod bit_encoding;
mod class_metadata;
mod error;
mod module;
mod string_table;
mod version;
mod wire;

pub use bit_encoding::{decode_bytes, encode_bytes};
pub use class_metadata::{KotlinClassMetadata, MetadataKind};
pub use error::MetadataError;
pub use module::{relocate_module, MetadataPart, ModuleMetadata, PackageGroup, MODULE_FILE_SUFFIX};
pub use version::MetadataVersion;
