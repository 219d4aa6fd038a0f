use crate::error::MetadataError;
use std::fmt;

/// Kotlin metadata version as stored in `mv` and in `.kotlin_module` headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataVersion(Vec<i32>);

impl MetadataVersion {
    const LATEST: [i32; 3] = [2, 1, 0];

    pub fn new(components: impl Into<Vec<i32>>) -> Self {
        Self(components.into())
    }

    /// Version written into every payload this crate re-encodes.
    pub fn latest() -> Self {
        Self(Self::LATEST.to_vec())
    }

    pub fn components(&self) -> &[i32] {
        &self.0
    }

    pub fn major(&self) -> i32 {
        self.0.first().copied().unwrap_or(0)
    }

    pub fn minor(&self) -> i32 {
        self.0.get(1).copied().unwrap_or(0)
    }

    pub fn patch(&self) -> i32 {
        self.0.get(2).copied().unwrap_or(0)
    }

    pub fn is_at_least(&self, major: i32, minor: i32, patch: i32) -> bool {
        (self.major(), self.minor(), self.patch()) >= (major, minor, patch)
    }

    /// Metadata from Kotlin 1.x and 2.x compilers can be read and rewritten.
    pub fn is_compatible(&self) -> bool {
        matches!(self.major(), 1 | 2)
    }

    pub(crate) fn ensure_compatible(&self) -> Result<(), MetadataError> {
        if self.is_compatible() {
            Ok(())
        } else {
            Err(MetadataError::UnsupportedVersion {
                version: self.clone(),
                latest: Self::latest(),
            })
        }
    }
}

impl fmt::Display for MetadataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<none>");
        }
        let parts: Vec<String> = self.0.iter().map(i32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_components() {
        let version = MetadataVersion::new(vec![1, 9, 0]);
        assert!(version.is_at_least(1, 4, 0));
        assert!(!version.is_at_least(2, 0, 0));
        assert!(MetadataVersion::new(vec![1, 4]).is_at_least(1, 4, 0));
    }

    #[test]
    fn rejects_unknown_major_versions() {
        assert!(MetadataVersion::new(vec![1, 1, 16]).is_compatible());
        assert!(MetadataVersion::new(vec![2, 3, 0]).is_compatible());
        let error = MetadataVersion::new(vec![3, 0, 0])
            .ensure_compatible()
            .unwrap_err();
        assert!(error.is_unsupported());
        assert!(MetadataVersion::new(Vec::new()).ensure_compatible().is_err());
        assert_eq!(MetadataVersion::latest().to_string(), "2.1.0");
    }
}
