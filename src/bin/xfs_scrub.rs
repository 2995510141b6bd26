use std::process::exit;

use xscrub::commands::xfs_scrub::XfsScrubCommand;
use xscrub::commands::Command;

fn main() {
    let mut args = std::env::args_os();
    exit(XfsScrubCommand.run(&mut args))
}
