use clap::ArgMatches;
use std::io::Write;

//------------------------------------------

#[macro_export]
macro_rules! tools_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

pub fn version_args(cmd: clap::Command) -> clap::Command {
    use clap::Arg;

    cmd.arg(
        Arg::new("VERSION")
            .help("Print version")
            .short('V')
            .exclusive(true)
            .action(clap::ArgAction::SetTrue),
    )
}

pub fn version_string(prog: &str) -> String {
    format!("{} version {}", prog, tools_version!())
}

/// Prints the version and exits if -V was given.
pub fn display_version(matches: &ArgMatches, prog: &str) {
    if matches.get_flag("VERSION") {
        let mut stdout = std::io::stdout();
        // ignore broken pipe errors
        let _ = writeln!(stdout, "{}", version_string(prog));
        let _ = stdout.flush();

        std::process::exit(0);
    }
}

//------------------------------------------


//------------------------------------------
