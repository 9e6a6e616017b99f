//! Preflight command - report on privilege and host tool availability.

use anyhow::{bail, Result};

use crate::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(strict: bool) -> Result<()> {
    let report = preflight::run_preflight();
    report.print();

    if strict && !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above first.",
            report.fail_count()
        );
    }
    Ok(())
}
