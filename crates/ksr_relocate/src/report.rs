use std::fmt;
use std::time::Duration;

/// What a relocation pass did to one archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelocationReport {
    /// All entries in the archive, directories included.
    pub entries: usize,
    pub classes_scanned: usize,
    pub classes_relocated: usize,
    pub modules_relocated: usize,
    /// Wall-clock time of the pass.
    pub elapsed: Duration,
}

impl RelocationReport {
    /// True when at least one entry was rewritten, so the archive on disk
    /// was replaced.
    pub fn is_modified(&self) -> bool {
        self.classes_relocated + self.modules_relocated > 0
    }
}

impl fmt::Display for RelocationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} classes relocated, {} module mapping(s) relocated ({} entries, {} ms)",
            self.classes_relocated,
            self.classes_scanned,
            self.modules_relocated,
            self.entries,
            self.elapsed.as_millis()
        )
    }
}
