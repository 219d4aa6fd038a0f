use std::borrow::Cow;

/// Result of running a rewriter over one binary artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Rewrite {
    /// No reference matched a rule; the input must be kept as is.
    Unchanged,
    /// At least one reference was relocated; carries the re-serialized bytes.
    Changed(Vec<u8>),
}

impl Rewrite {
    pub fn is_changed(&self) -> bool {
        matches!(self, Rewrite::Changed(_))
    }

    pub fn into_changed(self) -> Option<Vec<u8>> {
        match self {
            Rewrite::Changed(bytes) => Some(bytes),
            Rewrite::Unchanged => None,
        }
    }

    /// Returns the bytes that should end up in the archive.
    pub fn into_bytes(self, original: &[u8]) -> Cow<'_, [u8]> {
        match self {
            Rewrite::Changed(bytes) => Cow::Owned(bytes),
            Rewrite::Unchanged => Cow::Borrowed(original),
        }
    }
}
