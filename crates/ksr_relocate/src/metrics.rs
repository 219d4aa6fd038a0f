//! Wall-clock timing of relocation passes.

use crate::error::RelocateError;
use crate::report::RelocationReport;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Runs one relocation pass over `archive`, stores its duration in the
/// returned report and logs the outcome.
pub(crate) fn timed_pass<F>(archive: &Path, pass: F) -> Result<RelocationReport, RelocateError>
where
    F: FnOnce() -> Result<RelocationReport, RelocateError>,
{
    let start = Instant::now();
    let result = pass();
    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

    match result {
        Ok(mut report) => {
            report.elapsed = elapsed;
            info!(
                archive = %archive.display(),
                elapsed_ms,
                modified = report.is_modified(),
                %report,
                "relocation finished"
            );
            Ok(report)
        }
        Err(error) => {
            warn!(archive = %archive.display(), elapsed_ms, %error, "relocation failed");
            Err(error)
        }
    }
}
