//! Expiration Sweep Scheduler
//!
//! One-shot timers that enqueue a table's expiration sweep on a worker.
//!
//! All timers live on a single process-wide tokio runtime, built on first
//! use from [`Config::from_env`]. A fired timer hands the sweep to the
//! runtime's blocking pool, so sweeps (and the user callbacks they run)
//! never stall the timer threads.

use std::sync::Weak;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{info, trace};

use crate::config::Config;

static SWEEPER: Lazy<Runtime> = Lazy::new(|| {
    let config = Config::from_env();
    info!(
        threads = config.sweeper_threads,
        blocking_threads = config.sweeper_blocking_threads,
        "Starting expiration sweeper runtime"
    );
    Builder::new_multi_thread()
        .worker_threads(config.sweeper_threads)
        .max_blocking_threads(config.sweeper_blocking_threads)
        .thread_name("ttl-sweeper")
        .enable_time()
        .build()
        .expect("Failed to build the expiration sweeper runtime")
});

/// Something that can run an expiration sweep.
pub trait Sweep: Send + Sync + 'static {
    /// Runs on the sweeper's blocking pool when a timer fires.
    fn sweep(&self);
}

// == Sweep Timer ==
/// Handle to an armed one-shot sweep timer.
#[derive(Debug)]
pub struct SweepTimer {
    handle: JoinHandle<()>,
}

impl SweepTimer {
    /// Cancels the timer if it has not fired yet.
    ///
    /// A sweep that already started keeps running to completion.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Returns true once the timer fired (its sweep was handed to the blocking pool) or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Arms a one-shot timer that runs `target.sweep()` after `delay`.
///
/// Only a weak reference is held: if the target is gone when the timer
/// fires, nothing runs. A zero delay enqueues the sweep immediately.
///
/// # Example
/// ```ignore
/// let timer = schedule_sweep(Arc::downgrade(&table_inner), Duration::from_secs(1));
/// // Later, when re-arming or flushing:
/// timer.cancel();
/// ```
pub fn schedule_sweep<T: Sweep>(target: Weak<T>, delay: Duration) -> SweepTimer {
    let handle = SWEEPER.spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        trace!(delay = ?delay, "Sweep timer fired");

        // Off the timer thread; the sweep itself may block on locks and callbacks
        tokio::task::spawn_blocking(move || {
            if let Some(target) = target.upgrade() {
                target.sweep();
            }
        });
    });

    SweepTimer { handle }
}
