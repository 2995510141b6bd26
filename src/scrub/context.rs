use anyhow::Result;
use fixedbitset::FixedBitSet;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::fs::{Filesystem, FsGeometry};
use crate::names::{DefaultNameChecker, NameChecker};
use crate::ptvar::PerThreadCounter;
use crate::read_verify::ReadVerifyConfig;
use crate::report::Report;
use crate::scrub::action_list::ActionList;
use crate::scrub::types::*;

//------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrubMode {
    DryRun,
    Preen,
    Repair,
}

#[derive(Clone, Debug)]
pub struct ScrubOptions {
    pub mode: ScrubMode,
    pub nr_threads: Option<usize>,

    /// Zero for normal operation; higher values run single threaded and
    /// pause between kernel calls.
    pub background: u32,
    pub verify_data: bool,
    pub skip_trim: bool,

    /// Abort once this many errors are found, zero for no limit.
    pub max_errors: u64,
    pub max_name_warnings: u64,
    pub read_verify: ReadVerifyConfig,
}

impl Default for ScrubOptions {
    fn default() -> Self {
        ScrubOptions {
            mode: ScrubMode::Repair,
            nr_threads: None,
            background: 0,
            verify_data: false,
            skip_trim: false,
            max_errors: 0,
            max_name_warnings: 100,
            read_verify: ReadVerifyConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub corruptions_found: u64,
    pub unfixable_errors: u64,
    pub runtime_errors: u64,
    pub warnings_found: u64,
    pub repairs: u64,
    pub preens: u64,
    pub unoptimized: u64,
    pub repair_rounds: u64,
    pub inodes_checked: u64,
    pub bytes_verified: u64,
}

pub const SCRUB_RET_CORRUPT: i32 = 1;
pub const SCRUB_RET_UNOPTIMIZED: i32 = 2;
pub const SCRUB_RET_OPERROR: i32 = 4;
pub const SCRUB_RET_SYNTAX: i32 = 8;

impl RunTotals {
    pub fn actionable_errors(&self) -> u64 {
        self.corruptions_found + self.runtime_errors
    }

    pub fn is_clean(&self) -> bool {
        self.actionable_errors() == 0
            && self.unfixable_errors == 0
            && self.warnings_found == 0
            && self.unoptimized == 0
    }

    pub fn exit_status(&self) -> i32 {
        let mut ret = 0;
        if self.corruptions_found > 0 || self.unfixable_errors > 0 {
            ret |= SCRUB_RET_CORRUPT;
        }
        if self.unoptimized > 0 {
            ret |= SCRUB_RET_UNOPTIMIZED;
        }
        if self.runtime_errors > 0 {
            ret |= SCRUB_RET_OPERROR;
        }
        ret
    }
}

//------------------------------------------

/// Shared state for one run of the tool.
pub struct ScrubContext {
    pub fs: Arc<dyn Filesystem>,
    pub geo: FsGeometry,
    pub opts: ScrubOptions,
    pub report: Arc<Report>,

    /// Deferred repairs.  Producers in the scan phases work one AG at a
    /// time, so they get one list per AG and never contend.
    pub fs_repair_list: ActionList,
    pub ag_repair_lists: Vec<ActionList>,
    pub file_repair_lists: Vec<ActionList>,
    pub file_repair_list: ActionList,

    pub inodes_checked: PerThreadCounter,
    pub progress: Arc<PerThreadCounter>,
    pub name_checker: Box<dyn NameChecker>,

    totals: Mutex<RunTotals>,
    aborted: AtomicBool,
    too_many_errors: AtomicBool,
    vectored: AtomicBool,
    preen_triggers: Mutex<FixedBitSet>,
    name_warnings: AtomicU64,
}

impl ScrubContext {
    pub fn new(fs: Arc<dyn Filesystem>, opts: ScrubOptions, report: Arc<Report>) -> Result<Self> {
        let geo = fs.geometry()?;
        let nr_ags = geo.ag_count as usize;
        let nr_threads = Self::threads_for(&opts);

        let mut ag_repair_lists = Vec::with_capacity(nr_ags);
        ag_repair_lists.resize_with(nr_ags, ActionList::new);
        let mut file_repair_lists = Vec::with_capacity(nr_ags);
        file_repair_lists.resize_with(nr_ags, ActionList::new);

        Ok(ScrubContext {
            fs,
            geo,
            opts,
            report,
            fs_repair_list: ActionList::new(),
            ag_repair_lists,
            file_repair_lists,
            file_repair_list: ActionList::new(),
            inodes_checked: PerThreadCounter::new(nr_threads + 1),
            progress: Arc::new(PerThreadCounter::new(nr_threads + 1)),
            name_checker: Box::new(DefaultNameChecker),
            totals: Mutex::new(RunTotals::default()),
            aborted: AtomicBool::new(false),
            too_many_errors: AtomicBool::new(false),
            vectored: AtomicBool::new(false),
            preen_triggers: Mutex::new(FixedBitSet::with_capacity(NR_SCRUB_TYPES)),
            name_warnings: AtomicU64::new(0),
        })
    }

    pub fn with_name_checker(mut self, checker: Box<dyn NameChecker>) -> Self {
        self.name_checker = checker;
        self
    }

    fn threads_for(opts: &ScrubOptions) -> usize {
        if opts.background > 0 {
            return 1;
        }
        std::cmp::max(opts.nr_threads.unwrap_or_else(num_cpus::get), 1)
    }

    pub fn nr_threads(&self) -> usize {
        Self::threads_for(&self.opts)
    }

    /// Worker count when the unit of parallelism is an AG.
    pub fn nr_ag_threads(&self) -> usize {
        std::cmp::max(
            std::cmp::min(self.nr_threads(), self.geo.ag_count as usize),
            1,
        )
    }

    pub fn mode(&self) -> ScrubMode {
        self.opts.mode
    }

    //--------------------------------

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn use_vectored(&self) -> bool {
        self.vectored.load(Ordering::SeqCst)
    }

    pub fn set_vectored(&self, enabled: bool) {
        self.vectored.store(enabled, Ordering::SeqCst);
    }

    pub fn totals(&self) -> RunTotals {
        let mut t = self.totals.lock().unwrap().clone();
        t.inodes_checked = self.inodes_checked.value();
        t
    }

    pub fn update_totals<F: FnOnce(&mut RunTotals)>(&self, f: F) {
        let mut t = self.totals.lock().unwrap();
        f(&mut t);
    }

    /// Have we hit the user's error limit?  Says so once.
    pub fn excessive_errors(&self) -> bool {
        if self.opts.max_errors == 0 {
            return false;
        }

        let errors = {
            let t = self.totals.lock().unwrap();
            t.corruptions_found + t.unfixable_errors
        };
        if errors < self.opts.max_errors {
            return false;
        }

        if !self.too_many_errors.swap(true, Ordering::SeqCst) {
            self.report.error(&format!(
                "{}: Too many errors; aborting.",
                self.fs.mount_point().display()
            ));
        }
        true
    }

    pub fn progress_add(&self, n: u64) {
        self.progress.add(n);
    }

    pub fn background_sleep(&self) {
        if self.opts.background > 1 {
            std::thread::sleep(Duration::from_micros(
                100 * (self.opts.background as u64 - 1),
            ));
        }
    }

    pub fn pending_repairs(&self) -> u64 {
        self.fs_repair_list.nr_repairs()
            + self.file_repair_list.nr_repairs()
            + self
                .ag_repair_lists
                .iter()
                .chain(self.file_repair_lists.iter())
                .map(|l| l.nr_repairs())
                .sum::<u64>()
    }

    //--------------------------------

    /// Name of the object itself, without the metadata type.
    pub fn describe_target(&self, target: &ScrubTarget) -> String {
        match target {
            ScrubTarget::Fs => self.mount_descr(),
            ScrubTarget::Ag(agno) => format!("AG {}", agno),
            ScrubTarget::Inode { ino, .. } => format!(
                "inode {} ({}/{})",
                ino,
                self.geo.ino_to_agno(*ino),
                self.geo.ino_to_agino(*ino)
            ),
        }
    }

    pub fn describe(&self, target: &ScrubTarget, t: ScrubType) -> String {
        match target {
            ScrubTarget::Fs => t.descr().to_string(),
            _ => format!("{} {}", self.describe_target(target), t.descr()),
        }
    }

    pub fn mount_descr(&self) -> String {
        self.fs.mount_point().display().to_string()
    }

    pub fn str_corrupt(&self, descr: &str, msg: &str) {
        self.update_totals(|t| t.corruptions_found += 1);
        self.report
            .error(&format!("Corruption: {}: {}", descr, msg));
    }

    pub fn str_unfixable(&self, descr: &str, msg: &str) {
        self.update_totals(|t| t.unfixable_errors += 1);
        self.report
            .error(&format!("Unfixable Error: {}: {}", descr, msg));
    }

    pub fn str_error(&self, descr: &str, msg: &str) {
        self.update_totals(|t| t.runtime_errors += 1);
        self.report.error(&format!("Error: {}: {}", descr, msg));
    }

    pub fn str_liberror(&self, descr: &str, err: &dyn Display) {
        self.str_error(descr, &err.to_string());
    }

    pub fn str_warn(&self, descr: &str, msg: &str) {
        self.update_totals(|t| t.warnings_found += 1);
        self.report.warning(&format!("Warning: {}: {}", descr, msg));
    }

    pub fn str_info(&self, descr: &str, msg: &str) {
        self.report.info(&format!("{}: {}", descr, msg));
    }

    pub fn str_debug(&self, descr: &str, msg: &str) {
        self.report.debug(&format!("{}: {}", descr, msg));
    }

    pub fn record_repair(&self, descr: &str, msg: &str) {
        self.update_totals(|t| t.repairs += 1);
        self.report.info(&format!("Repaired: {}: {}", descr, msg));
    }

    pub fn record_preen(&self, descr: &str, msg: &str) {
        self.update_totals(|t| t.preens += 1);
        self.report.info(&format!("Optimized: {}: {}", descr, msg));
    }

    /// A dry run found something that could be optimized.  These are
    /// reported once per type at the end of the run.
    pub fn trigger_preen(&self, t: ScrubType) {
        let mut triggers = self.preen_triggers.lock().unwrap();
        if !triggers.put(t.index()) {
            self.update_totals(|t| t.unoptimized += 1);
        }
    }

    pub fn report_preen_triggers(&self) {
        let triggers = self.preen_triggers.lock().unwrap();
        for i in triggers.ones() {
            if let Some(t) = ScrubType::from_index(i) {
                self.report.info(&format!(
                    "{}: Optimizations of {} are possible.",
                    self.mount_descr(),
                    t.descr()
                ));
            }
        }
    }

    /// Naming warnings are counted but only the first few are shown.
    pub fn name_warning(&self, descr: &str, msg: &str) {
        let n = self.name_warnings.fetch_add(1, Ordering::SeqCst) + 1;
        let max = self.opts.max_name_warnings;

        if max == 0 || n <= max {
            self.str_warn(descr, msg);
            return;
        }

        self.update_totals(|t| t.warnings_found += 1);
        if n == max + 1 {
            self.report.warning(&format!(
                "{}: Too many naming warnings; further warnings suppressed.",
                self.mount_descr()
            ));
        }
    }
}

//------------------------------------------


//------------------------------------------
