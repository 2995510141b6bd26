use std::sync::{Arc, Mutex};

use crate::fs::mock::MockFs;
use crate::report::{mk_capture_report, LogLevel};
use crate::scrub::context::*;

//------------------------------------------

pub struct Fixture {
    pub fs: Arc<MockFs>,
    pub ctx: Arc<ScrubContext>,
    pub lines: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    pub fn new(fs: MockFs, mode: ScrubMode) -> Self {
        let opts = ScrubOptions {
            mode,
            nr_threads: Some(2),
            ..Default::default()
        };
        Self::with_opts(fs, opts)
    }

    pub fn with_opts(fs: MockFs, opts: ScrubOptions) -> Self {
        let fs = Arc::new(fs);
        let (report, lines) = mk_capture_report();
        report.set_level(LogLevel::Debug);
        let ctx = ScrubContext::new(fs.clone(), opts, Arc::new(report)).unwrap();
        Fixture {
            fs,
            ctx: Arc::new(ctx),
            lines,
        }
    }

    pub fn count_lines(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }

    pub fn totals(&self) -> RunTotals {
        self.ctx.totals()
    }
}

//------------------------------------------
