extern crate clap;

use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches};
use std::path::Path;
use std::sync::Arc;

use crate::commands::utils::*;
use crate::commands::Command;
use crate::fs::linux::LinuxFs;
use crate::phases::scrub_filesystem;
use crate::report::*;
use crate::scrub::context::{ScrubMode, ScrubOptions, SCRUB_RET_SYNTAX};
use crate::version::*;

//------------------------------------------

pub struct XfsScrubCommand;

impl XfsScrubCommand {
    fn cli(&self) -> clap::Command {
        let cmd = clap::Command::new(self.name())
            .next_display_order(None)
            .version(crate::tools_version!())
            .disable_version_flag(true)
            .about("Check and repair the metadata of a mounted XFS filesystem.")
            // flags
            .arg(
                Arg::new("DRY_RUN")
                    .help("Report problems but don't change anything.")
                    .short('n')
                    .action(ArgAction::SetTrue)
                    .conflicts_with("PREEN"),
            )
            .arg(
                Arg::new("PREEN")
                    .help("Only optimize metadata; report corruption without fixing it.")
                    .short('p')
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("BACKGROUND")
                    .help("Run single threaded; repeat to slow down further.")
                    .short('b')
                    .action(ArgAction::Count),
            )
            .arg(
                Arg::new("VERIFY_DATA")
                    .help("Read verify all file data blocks.")
                    .short('x')
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("SKIP_TRIM")
                    .help("Don't discard free space when the scrub is done.")
                    .short('k')
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("QUIET")
                    .help("Suppress output messages, return only exit code.")
                    .short('q')
                    .long("quiet")
                    .action(ArgAction::SetTrue),
            )
            // options
            .arg(
                Arg::new("THREADS")
                    .help("Number of worker threads")
                    .short('t')
                    .long("threads")
                    .value_name("NR")
                    .value_parser(value_parser!(usize)),
            )
            .arg(
                Arg::new("MAX_ERRORS")
                    .help("Abort after this many errors")
                    .short('e')
                    .value_name("NR")
                    .value_parser(value_parser!(u64)),
            )
            .arg(
                Arg::new("MAX_NAME_WARNINGS")
                    .help("Stop reporting suspicious names after this many")
                    .short('w')
                    .value_name("NR")
                    .value_parser(value_parser!(u64)),
            )
            .arg(
                Arg::new("IO_SIZE")
                    .help("Size of each verification read")
                    .long("io-size")
                    .value_name("BYTES")
                    .value_parser(value_parser!(u64))
                    .hide(true),
            )
            .arg(
                Arg::new("IO_LOCALITY")
                    .help("Merge verification requests closer than this")
                    .long("io-locality")
                    .value_name("BYTES")
                    .value_parser(value_parser!(u64))
                    .hide(true),
            )
            // arguments
            .arg(
                Arg::new("MOUNTPOINT")
                    .help("Specify the mount point of the filesystem to check")
                    .required(true)
                    .index(1),
            );
        verbose_args(version_args(cmd))
    }
}

fn parse_options(matches: &ArgMatches) -> Result<ScrubOptions> {
    let mut opts = ScrubOptions::default();

    opts.mode = if matches.get_flag("DRY_RUN") {
        ScrubMode::DryRun
    } else if matches.get_flag("PREEN") {
        ScrubMode::Preen
    } else {
        ScrubMode::Repair
    };
    opts.background = matches.get_count("BACKGROUND") as u32;
    opts.verify_data = matches.get_flag("VERIFY_DATA");
    opts.skip_trim = matches.get_flag("SKIP_TRIM");

    if let Some(nr) = matches.get_one::<usize>("THREADS") {
        if *nr == 0 {
            return Err(anyhow!("thread count must be at least one"));
        }
        opts.nr_threads = Some(*nr);
    }
    if let Some(nr) = matches.get_one::<u64>("MAX_ERRORS") {
        opts.max_errors = *nr;
    }
    if let Some(nr) = matches.get_one::<u64>("MAX_NAME_WARNINGS") {
        opts.max_name_warnings = *nr;
    }

    if let Some(size) = matches.get_one::<u64>("IO_SIZE") {
        if *size == 0 || *size % 4096 != 0 {
            return Err(anyhow!("io size must be a non-zero multiple of 4096"));
        }
        opts.read_verify.sub_read_size = *size;
        opts.read_verify.max_io_size = opts.read_verify.max_io_size.max(*size);
    }
    if let Some(gap) = matches.get_one::<u64>("IO_LOCALITY") {
        opts.read_verify.locality = *gap;
    }

    Ok(opts)
}

impl<'a> Command<'a> for XfsScrubCommand {
    fn name(&self) -> &'a str {
        "xfs_scrub"
    }

    fn run(&self, args: &mut dyn Iterator<Item = std::ffi::OsString>) -> exitcode::ExitCode {
        let matches = match self.cli().try_get_matches_from(args) {
            Ok(m) => m,
            Err(e) => {
                let _ = e.print();
                // --help goes to stdout and isn't a failure
                return if e.use_stderr() {
                    SCRUB_RET_SYNTAX
                } else {
                    exitcode::OK
                };
            }
        };
        display_version(&matches, self.name());

        let report = mk_report(matches.get_flag("QUIET"));
        let log_level = match parse_log_level(&matches) {
            Ok(level) => level,
            Err(e) => {
                report.error(&e);
                return SCRUB_RET_SYNTAX;
            }
        };
        report.set_level(log_level);

        let opts = match parse_options(&matches) {
            Ok(opts) => opts,
            Err(e) => {
                report.error(&format!("{}", e));
                return SCRUB_RET_SYNTAX;
            }
        };

        let mount = Path::new(matches.get_one::<String>("MOUNTPOINT").unwrap());
        if let Err(e) = check_mount_point(mount) {
            return to_exit_code::<()>(&report, Err(e));
        }

        let fs = match LinuxFs::open(mount) {
            Ok(fs) => Arc::new(fs),
            Err(e) => return to_exit_code::<()>(&report, Err(e)),
        };

        match scrub_filesystem(fs, opts, report.clone()) {
            Ok(totals) => totals.exit_status(),
            Err(e) => to_exit_code::<()>(&report, Err(e)),
        }
    }
}

//------------------------------------------


//------------------------------------------
