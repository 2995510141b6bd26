use clap::{Arg, ArgAction, ArgMatches};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

//------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum ReportOutcome {
    Success,
    NonFatal,
    Fatal,
}

use ReportOutcome::*;

impl ReportOutcome {
    pub fn combine(lhs: &ReportOutcome, rhs: &ReportOutcome) -> ReportOutcome {
        match (lhs, rhs) {
            (Success, rhs) => rhs.clone(),
            (lhs, Success) => lhs.clone(),
            (Fatal, _) => Fatal,
            (_, Fatal) => Fatal,
            (_, _) => NonFatal,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

pub struct Report {
    outcome: Mutex<ReportOutcome>,
    level: Mutex<LogLevel>,
    inner: Mutex<Box<dyn ReportInner + Send>>,
}

pub trait ReportInner {
    fn set_title(&mut self, txt: &str);
    fn set_sub_title(&mut self, txt: &str);
    fn progress(&mut self, percent: u8);
    fn log(&mut self, txt: &str);
    fn to_stdout(&mut self, txt: &str);
    fn complete(&mut self);
}

impl Report {
    pub fn new(inner: Box<dyn ReportInner + Send>) -> Report {
        Report {
            outcome: Mutex::new(Success),
            level: Mutex::new(LogLevel::Warning),
            inner: Mutex::new(inner),
        }
    }

    fn update_outcome(&self, rhs: ReportOutcome) {
        let mut lhs = self.outcome.lock().unwrap();
        *lhs = ReportOutcome::combine(&lhs, &rhs);
    }

    pub fn set_level(&self, level: LogLevel) {
        let mut lhs = self.level.lock().unwrap();
        *lhs = level;
    }

    pub fn get_level(&self) -> LogLevel {
        *self.level.lock().unwrap()
    }

    fn log(&self, level: LogLevel, txt: &str) {
        if level > self.get_level() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.log(txt)
    }

    pub fn set_title(&self, txt: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.set_title(txt)
    }

    pub fn set_sub_title(&self, txt: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.set_sub_title(txt)
    }

    pub fn progress(&self, percent: u8) {
        let mut inner = self.inner.lock().unwrap();
        inner.progress(percent)
    }

    pub fn error(&self, txt: &str) {
        self.update_outcome(Fatal);
        self.log(LogLevel::Error, txt)
    }

    pub fn warning(&self, txt: &str) {
        self.update_outcome(NonFatal);
        self.log(LogLevel::Warning, txt)
    }

    pub fn info(&self, txt: &str) {
        self.log(LogLevel::Info, txt)
    }

    pub fn debug(&self, txt: &str) {
        self.log(LogLevel::Debug, txt)
    }

    pub fn complete(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.complete();
    }

    pub fn get_outcome(&self) -> ReportOutcome {
        let outcome = self.outcome.lock().unwrap();
        outcome.clone()
    }

    // Force a message to be printed to stdout, eg. the final summary.
    pub fn to_stdout(&self, txt: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.to_stdout(txt)
    }
}

//------------------------------------------

pub fn verbose_args(cmd: clap::Command) -> clap::Command {
    cmd.arg(
        Arg::new("VERBOSE")
            .help("Verbose output")
            .short('v')
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("DEBUG")
            .help("Debug output")
            .short('d')
            .action(ArgAction::SetTrue),
    )
}

pub fn parse_log_level(matches: &ArgMatches) -> Result<LogLevel, String> {
    let verbose = matches.try_get_one::<bool>("VERBOSE").map_err(|e| e.to_string())?;
    let debug = matches.try_get_one::<bool>("DEBUG").map_err(|e| e.to_string())?;

    if debug.copied().unwrap_or(false) {
        Ok(LogLevel::Debug)
    } else if verbose.copied().unwrap_or(false) {
        Ok(LogLevel::Info)
    } else {
        Ok(LogLevel::Warning)
    }
}

//------------------------------------------

struct PBInner {
    title: String,
    bar: ProgressBar,
}

impl PBInner {
    fn new(title: String) -> Self {
        let bar = ProgressBar::new(100);
        let mut inner = Self { title, bar };
        inner.set_sub_title("");
        inner
    }

    fn restyle(&mut self, sub_title: &str) {
        let mut fmt = self.title.clone();
        fmt.push_str(" [{bar:40}] {pos:>3}%, {eta} left");
        if !sub_title.is_empty() {
            fmt.push_str(", ");
            fmt.push_str(sub_title);
        }
        if let Ok(style) = ProgressStyle::default_bar().template(&fmt) {
            self.bar.set_style(style.progress_chars("=> "));
        }
    }
}

impl ReportInner for PBInner {
    fn set_title(&mut self, txt: &str) {
        self.title = txt.to_string();
        self.bar.set_position(0);
        self.restyle("");
    }

    fn set_sub_title(&mut self, txt: &str) {
        self.restyle(txt);
    }

    fn progress(&mut self, percent: u8) {
        self.bar.set_position(percent as u64);
        self.bar.tick();
    }

    fn log(&mut self, txt: &str) {
        self.bar.println(txt);
    }

    fn to_stdout(&mut self, txt: &str) {
        println!("{}", txt);
    }

    fn complete(&mut self) {
        self.bar.finish_and_clear();
    }
}

pub fn mk_progress_bar_report() -> Report {
    Report::new(Box::new(PBInner::new("".to_string())))
}

//------------------------------------------

// Phases can run for hours, so progress is logged now and then rather
// than drawn.
const SIMPLE_PROGRESS_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

struct SimpleInner {
    title: String,
    last_progress: std::time::Instant,
    last_percent: Option<u8>,
}

impl SimpleInner {
    fn new() -> SimpleInner {
        SimpleInner {
            title: String::new(),
            last_progress: std::time::Instant::now(),
            last_percent: None,
        }
    }
}

impl ReportInner for SimpleInner {
    fn set_title(&mut self, txt: &str) {
        self.title = txt.to_string();
        self.last_progress = std::time::Instant::now();
        self.last_percent = None;
    }

    fn set_sub_title(&mut self, _txt: &str) {}

    fn progress(&mut self, percent: u8) {
        if self.title.is_empty() || self.last_percent == Some(percent) {
            return;
        }

        if self.last_progress.elapsed() > SIMPLE_PROGRESS_INTERVAL {
            eprintln!("{} {}% done.", self.title, percent);
            self.last_progress = std::time::Instant::now();
            self.last_percent = Some(percent);
        }
    }

    fn log(&mut self, txt: &str) {
        eprintln!("{}", txt);
    }

    fn to_stdout(&mut self, txt: &str) {
        println!("{}", txt);
    }

    fn complete(&mut self) {}
}

pub fn mk_simple_report() -> Report {
    Report::new(Box::new(SimpleInner::new()))
}

//------------------------------------------

struct QuietInner {}

impl ReportInner for QuietInner {
    fn set_title(&mut self, _txt: &str) {}

    fn set_sub_title(&mut self, _txt: &str) {}

    fn progress(&mut self, _percent: u8) {}

    fn log(&mut self, _txt: &str) {}

    fn to_stdout(&mut self, _txt: &str) {}

    fn complete(&mut self) {}
}

pub fn mk_quiet_report() -> Report {
    Report::new(Box::new(QuietInner {}))
}

//------------------------------------------

/// Keeps every line, for tests that want to look at what was said.
#[derive(Clone, Default)]
pub struct CaptureInner {
    pub lines: Arc<Mutex<Vec<String>>>,
}

impl ReportInner for CaptureInner {
    fn set_title(&mut self, _txt: &str) {}

    fn set_sub_title(&mut self, _txt: &str) {}

    fn progress(&mut self, _percent: u8) {}

    fn log(&mut self, txt: &str) {
        self.lines.lock().unwrap().push(txt.to_string());
    }

    fn to_stdout(&mut self, txt: &str) {
        self.lines.lock().unwrap().push(txt.to_string());
    }

    fn complete(&mut self) {}
}

pub fn mk_capture_report() -> (Report, Arc<Mutex<Vec<String>>>) {
    let inner = CaptureInner::default();
    let lines = inner.lines.clone();
    (Report::new(Box::new(inner)), lines)
}

//------------------------------------------

pub struct ProgressMonitor {
    tid: JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

impl ProgressMonitor {
    pub fn new<F>(report: Arc<Report>, total: u64, processed: F) -> Self
    where
        F: Fn() -> u64 + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));

        let stopped = stop_flag.clone();
        let tid = thread::spawn(move || {
            let interval = std::time::Duration::from_millis(250);
            loop {
                if stopped.load(Ordering::Relaxed) {
                    break;
                }

                let n = if total == 0 {
                    0
                } else {
                    std::cmp::min(processed() * 100 / total, 100)
                };

                report.progress(n as u8);
                thread::sleep(interval);
            }
        });

        ProgressMonitor { tid, stop_flag }
    }

    // Only the owner could stop the Monitor
    pub fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        let _ = self.tid.join();
    }
}

//------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_combine() {
        assert_eq!(ReportOutcome::combine(&Success, &NonFatal), NonFatal);
        assert_eq!(ReportOutcome::combine(&Fatal, &NonFatal), Fatal);
        assert_eq!(ReportOutcome::combine(&NonFatal, &NonFatal), NonFatal);
    }

    #[test]
    fn level_filters_messages() {
        let (report, lines) = mk_capture_report();
        report.info("hidden");
        report.warning("shown");
        report.set_level(LogLevel::Debug);
        report.debug("now shown");
        assert_eq!(*lines.lock().unwrap(), vec!["shown", "now shown"]);
        assert_eq!(report.get_outcome(), NonFatal);
    }
}

//------------------------------------------
