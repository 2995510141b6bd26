use anyhow::{anyhow, Result};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::Buffer;
use crate::fs::Disk;
use crate::math::*;
use crate::ptvar::{PerThread, PerThreadCounter};
use crate::workqueue::WorkQueue;


//------------------------------------------

pub const DEFAULT_MAX_IO_SIZE: u64 = 32 << 20;
pub const DEFAULT_SUB_READ_SIZE: u64 = 1 << 20;
pub const DEFAULT_IO_LOCALITY: u64 = 64 << 10;

const BUFFER_ALIGN: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadVerifyConfig {
    /// Largest range handed to a verifier as one request.
    pub max_io_size: u64,

    /// Largest single read a verifier issues.
    pub sub_read_size: u64,

    /// Requests closer than this to the staged range are merged into it.
    pub locality: u64,
}

impl Default for ReadVerifyConfig {
    fn default() -> Self {
        ReadVerifyConfig {
            max_io_size: DEFAULT_MAX_IO_SIZE,
            sub_read_size: DEFAULT_SUB_READ_SIZE,
            locality: DEFAULT_IO_LOCALITY,
        }
    }
}

/// Called with (start, length, error, request context) for every range
/// that could not be read.
pub type IoErrorFn<C> = Arc<dyn Fn(u64, u64, &io::Error, &C) + Send + Sync>;

pub fn is_media_error(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EIO) | Some(libc::EILSEQ))
}

//------------------------------------------

#[derive(Clone, Copy, Debug)]
struct Request<C> {
    start: u64,
    length: u64,
    ctx: Option<C>,
}

impl<C> Default for Request<C> {
    fn default() -> Self {
        Request {
            start: 0,
            length: 0,
            ctx: None,
        }
    }
}

impl<C> Request<C> {
    fn end(&self) -> u64 {
        self.start + self.length
    }
}

struct Verifier<C> {
    disk: Arc<dyn Disk>,
    min_io: u64,
    cfg: ReadVerifyConfig,
    ioerr: IoErrorFn<C>,
    verified: PerThreadCounter,
    progress: Option<Arc<PerThreadCounter>>,
    runtime_error: Mutex<Option<io::Error>>,
    failed: AtomicBool,
}

impl<C: Copy> Verifier<C> {
    fn record_runtime_error(&self, e: io::Error) {
        let mut err = self.runtime_error.lock().unwrap();
        if err.is_none() {
            *err = Some(e);
        }
        self.failed.store(true, Ordering::SeqCst);
    }

    fn advance(&self, rv: &mut Request<C>, n: u64) {
        self.verified.add(n);
        if let Some(progress) = &self.progress {
            progress.add(n);
        }
        rv.start += n;
        rv.length -= n;
    }

    // Read everything in the request.  On a media error the read size
    // drops to a single unit so we can tell exactly which units are bad,
    // and stays there for the rest of the request.
    fn verify(&self, mut rv: Request<C>) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }

        let ctx = match rv.ctx {
            Some(ctx) => ctx,
            None => return,
        };

        let mut buf = match Buffer::new(self.cfg.sub_read_size as usize, BUFFER_ALIGN) {
            Ok(buf) => buf,
            Err(e) => {
                self.record_runtime_error(io::Error::new(
                    io::ErrorKind::OutOfMemory,
                    e.to_string(),
                ));
                return;
            }
        };

        let mut io_max = self.cfg.sub_read_size;
        while rv.length > 0 {
            let len = std::cmp::min(rv.length, io_max);
            match self.disk.read_at(&mut buf.get_data()[..len as usize], rv.start) {
                Ok(()) => self.advance(&mut rv, len),
                Err(e) if is_media_error(&e) => {
                    if io_max > self.min_io {
                        io_max = self.min_io;
                        continue;
                    }

                    let bad = std::cmp::min(self.min_io - rv.start % self.min_io, rv.length);
                    (self.ioerr)(rv.start, bad, &e, &ctx);
                    self.advance(&mut rv, bad);
                }
                Err(e) => {
                    self.record_runtime_error(e);
                    return;
                }
            }
        }
    }
}

//------------------------------------------

/// Verifies that ranges of a disk can be read.  Submitters stage
/// requests per thread so that nearby requests from one thread merge
/// into a single larger read.
pub struct ReadVerifyPool<C: Copy + PartialEq + Send + Sync + 'static> {
    verifier: Arc<Verifier<C>>,
    wq: WorkQueue<Verifier<C>>,
    staged: PerThread<Request<C>>,
}

impl<C: Copy + PartialEq + Send + Sync + 'static> ReadVerifyPool<C> {
    pub fn new(
        disk: Arc<dyn Disk>,
        cfg: ReadVerifyConfig,
        nr_verifiers: usize,
        nr_submitters: usize,
        ioerr: IoErrorFn<C>,
        progress: Option<Arc<PerThreadCounter>>,
    ) -> Result<Self> {
        let min_io = disk.min_io();
        if min_io == 0 {
            return Err(anyhow!("disk reports a zero minimum io size"));
        }

        let sub_read_size = std::cmp::max(round_down(cfg.sub_read_size, min_io), min_io);
        let max_io_size = std::cmp::max(round_down(cfg.max_io_size, min_io), sub_read_size);
        let cfg = ReadVerifyConfig {
            max_io_size,
            sub_read_size,
            locality: cfg.locality,
        };

        let verifier = Arc::new(Verifier {
            disk,
            min_io,
            cfg,
            ioerr,
            verified: PerThreadCounter::new(nr_verifiers),
            progress,
            runtime_error: Mutex::new(None),
            failed: AtomicBool::new(false),
        });

        Ok(ReadVerifyPool {
            wq: WorkQueue::new("read_verify", verifier.clone(), nr_verifiers),
            verifier,
            staged: PerThread::new(nr_submitters),
        })
    }

    fn check_runtime_error(&self) -> Result<()> {
        if self.verifier.failed.load(Ordering::SeqCst) {
            let err = self.verifier.runtime_error.lock().unwrap();
            return match &*err {
                Some(e) => Err(anyhow!("read verification failed: {}", e)),
                None => Err(anyhow!("read verification failed")),
            };
        }
        Ok(())
    }

    fn queue(&self, rv: Request<C>) -> Result<()> {
        self.check_runtime_error()?;
        self.wq.add(0, move |v, _| v.verify(rv))
    }

    /// Schedule a range for verification.  The range is widened to whole
    /// units.  It may be merged with the calling thread's staged range if
    /// the two are within the locality window and share a context.
    pub fn schedule(&self, start: u64, length: u64, ctx: C) -> Result<()> {
        self.check_runtime_error()?;
        if length == 0 {
            return Ok(());
        }

        let min_io = self.verifier.min_io;
        let cfg = &self.verifier.cfg;
        let req_start = round_down(start, min_io);
        let req_end = round_up(start + length, min_io);

        let mut staged = self.staged.get();
        let staged_end = staged.end();
        let near = (req_start >= staged.start && req_start <= staged_end + cfg.locality)
            || (staged.start >= req_start && staged.start <= req_end + cfg.locality);
        let merged_start = std::cmp::min(staged.start, req_start);
        let merged_end = std::cmp::max(staged_end, req_end);

        if staged.length > 0
            && staged.ctx == Some(ctx)
            && near
            && merged_end - merged_start <= cfg.max_io_size
        {
            staged.start = merged_start;
            staged.length = merged_end - merged_start;
        } else {
            if staged.length > 0 {
                let rv = std::mem::take(&mut *staged);
                self.queue(rv)?;
            }

            let mut rv = Request {
                start: req_start,
                length: req_end - req_start,
                ctx: Some(ctx),
            };

            // Oversized requests go out in max_io_size pieces, the tail
            // stays staged.
            while rv.length > cfg.max_io_size {
                let head = Request {
                    start: rv.start,
                    length: cfg.max_io_size,
                    ctx: rv.ctx,
                };
                self.queue(head)?;
                rv.start += cfg.max_io_size;
                rv.length -= cfg.max_io_size;
            }
            *staged = rv;
        }

        Ok(())
    }

    /// Push the calling thread's staged range to the verifiers.
    pub fn force_io(&self) -> Result<()> {
        let rv = std::mem::take(&mut *self.staged.get());
        if rv.length > 0 {
            self.queue(rv)?;
        }
        Ok(())
    }

    /// Push every staged range, then wait for all verification to finish.
    pub fn flush(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        self.staged.foreach::<anyhow::Error, _>(|rv| {
            if rv.length > 0 {
                pending.push(std::mem::take(rv));
            }
            Ok(())
        })?;

        for rv in pending {
            self.queue(rv)?;
        }

        self.wq.terminate()?;
        self.check_runtime_error()
    }

    pub fn bytes_verified(&self) -> u64 {
        self.verifier.verified.value()
    }
}

//------------------------------------------
