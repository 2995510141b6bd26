use anyhow::Result;
use std::ffi::{OsStr, OsString};

//------------------------------------------

pub fn xfs_scrub_bin() -> &'static str {
    env!("CARGO_BIN_EXE_xfs_scrub")
}

pub struct Outcome {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

// Runs the program whatever its exit status.
pub fn run<S, I>(program: S, args: I) -> Result<Outcome>
where
    S: AsRef<OsStr>,
    I: IntoIterator,
    I::Item: Into<OsString>,
{
    let command = duct::cmd(program.as_ref(), args)
        .stdout_capture()
        .stderr_capture()
        .unchecked();
    let output = command.run()?;
    Ok(Outcome {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

//------------------------------------------
