use std::sync::{Arc, Mutex};
use xscrub::fs::mock::MockFs;
use xscrub::phases::scrub_filesystem;
use xscrub::report::{mk_capture_report, LogLevel};
use xscrub::scrub::context::{RunTotals, ScrubMode, ScrubOptions};

//------------------------------------------

pub struct Run {
    pub totals: RunTotals,
    pub lines: Vec<String>,
}

impl Run {
    pub fn count_lines(&self, needle: &str) -> usize {
        self.lines.iter().filter(|l| l.contains(needle)).count()
    }
}

pub fn scrub(fs: &Arc<MockFs>, mode: ScrubMode) -> Run {
    let opts = ScrubOptions {
        mode,
        nr_threads: Some(4),
        ..Default::default()
    };
    let (report, lines): (_, Arc<Mutex<Vec<String>>>) = mk_capture_report();
    report.set_level(LogLevel::Info);

    let totals = scrub_filesystem(fs.clone(), opts, Arc::new(report)).unwrap();
    let lines = lines.lock().unwrap().clone();
    Run { totals, lines }
}

//------------------------------------------
