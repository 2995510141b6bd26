use anyhow::{anyhow, Result};
use atty::Stream;
use std::path::Path;
use std::sync::Arc;

use crate::file_utils;
use crate::report::*;
use crate::scrub::context::SCRUB_RET_OPERROR;

//------------------------------------------

pub fn check_mount_point(path: &Path) -> Result<()> {
    if !file_utils::file_exists(path) {
        return Err(anyhow!("Couldn't find mount point '{}'.", path.display()));
    }

    if !path.is_dir() {
        return Err(anyhow!("'{}' is not a directory.", path.display()));
    }

    Ok(())
}

pub fn mk_report(quiet: bool) -> Arc<Report> {
    if quiet {
        Arc::new(mk_quiet_report())
    } else if atty::is(Stream::Stdout) {
        Arc::new(mk_progress_bar_report())
    } else {
        Arc::new(mk_simple_report())
    }
}

/// Anything that stops the run before the phases could start is an
/// operational error.
pub fn to_exit_code<T>(report: &Arc<Report>, result: anyhow::Result<T>) -> exitcode::ExitCode {
    if let Err(e) = result {
        report.error(&format!("{:#}", e));
        SCRUB_RET_OPERROR
    } else {
        exitcode::OK
    }
}

//------------------------------------------
