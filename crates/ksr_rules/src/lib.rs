//! Namespace relocation rules.
//!
//! A [`RuleSet`] is built once per relocation pass and handed by reference to
//! every rewriter taking part in it, so class files and Kotlin sidecars are
//! always rewritten through the same rules.

mod names;
mod outcome;
mod rule;

pub use names::NameError;
pub use outcome::Rewrite;
pub use rule::{RelocationRule, RuleError, RuleSet};
