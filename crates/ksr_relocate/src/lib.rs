//! Kotlin-aware namespace relocation for jar archives.
//!
//! ```no_run
//! use ksr_relocate::relocate_jar;
//!
//! let report = relocate_jar("build/libs/app-all.jar", [("com.foo", "shadow.com.foo")])?;
//! println!("{report}");
//! # Ok::<(), ksr_relocate::RelocateError>(())
//! ```

mod archive;
pub mod config;
mod error;
mod metrics;
mod report;

pub use archive::{ArchiveRelocator, RelocationOptions};
pub use config::{LogLevel, RelocationConfig};
pub use error::{EntryError, RelocateError};
pub use report::RelocationReport;

use ksr_rules::RuleSet;
use std::path::Path;

/// Registers `pairs` and relocates the archive at `path` with default
/// options. Rules are validated before the archive is opened.
pub fn relocate_jar<I, P, D>(
    path: impl AsRef<Path>,
    pairs: I,
) -> Result<RelocationReport, RelocateError>
where
    I: IntoIterator<Item = (P, D)>,
    P: AsRef<str>,
    D: AsRef<str>,
{
    let rules = RuleSet::from_pairs(pairs)?;
    ArchiveRelocator::new(&rules, RelocationOptions::default()).relocate(path.as_ref())
}
