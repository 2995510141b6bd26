use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use threadpool::ThreadPool;

//------------------------------------------

/// A fixed set of workers sharing a context.  Jobs receive the context
/// and the index they were queued with.  With one worker or fewer the
/// jobs run synchronously inside add().
pub struct WorkQueue<C: Send + Sync + 'static> {
    ctx: Arc<C>,
    pool: Option<ThreadPool>,
    terminated: bool,
}

impl<C: Send + Sync + 'static> WorkQueue<C> {
    pub fn new(name: &str, ctx: Arc<C>, nr_workers: usize) -> Self {
        let pool = if nr_workers > 1 {
            Some(
                threadpool::Builder::new()
                    .num_threads(nr_workers)
                    .thread_name(name.to_string())
                    .build(),
            )
        } else {
            None
        };

        WorkQueue {
            ctx,
            pool,
            terminated: false,
        }
    }

    pub fn add<F>(&self, index: u32, job: F) -> Result<()>
    where
        F: FnOnce(&C, u32) + Send + 'static,
    {
        if self.terminated {
            return Err(anyhow!("work queue has been terminated"));
        }

        match &self.pool {
            Some(pool) => {
                let ctx = self.ctx.clone();
                pool.execute(move || job(&ctx, index));
            }
            None => job(&self.ctx, index),
        }

        Ok(())
    }

    /// Wait for all queued work to finish.  No more work may be added
    /// afterwards.
    pub fn terminate(&mut self) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        if let Some(pool) = &self.pool {
            pool.join();
            let panics = pool.panic_count();
            if panics > 0 {
                return Err(anyhow!("{} worker job(s) panicked", panics));
            }
        }

        Ok(())
    }
}

impl<C: Send + Sync + 'static> Drop for WorkQueue<C> {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

//------------------------------------------

/// Holds the first error raised by a set of jobs.  Later errors are
/// dropped since they're usually fallout from the first.
#[derive(Default)]
pub struct FirstError {
    inner: Mutex<Option<anyhow::Error>>,
}

impl FirstError {
    pub fn set(&self, e: anyhow::Error) {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_none() {
            *inner = Some(e);
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    pub fn take(&self) -> Result<()> {
        match self.inner.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//------------------------------------------


//------------------------------------------
