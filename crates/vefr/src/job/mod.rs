//! # Jobs — Dependency-Tracked Parallel Work
//!
//! A *job* is one scheduled unit of work over a query's result set, executed
//! on the scheduler's worker pool either as a single task or fanned out over
//! fixed-size batches. Scheduling a job returns a [`JobHandle`], a token for
//! its eventual completion that can be waited on, combined with other
//! handles, or passed as an explicit dependency of later jobs.
//!
//! ## Module Overview
//!
//! - [`handle`] — completion tokens: wait, combine, cancel, error surfacing
//! - [`tracker`] — per-component-type hazard state deriving implicit waits
//! - [`scheduler`] — the worker pool and dependency-ordered dispatch
//! - [`batch`] — the column views handed to work functions
//!
//! ## Hazard discipline
//!
//! Implicit dependencies come from declared component access, the same way a
//! register-renaming CPU serializes instructions: write-after-write,
//! write-after-read and read-after-write on a component type order the two
//! jobs; read-after-read runs concurrently. The tracker derives the wait set
//! at schedule time, so by the time a job runs, every conflicting predecessor
//! has finished and its column guards are free.

pub mod batch;
pub mod handle;
pub mod scheduler;
pub(crate) mod tracker;

pub use batch::Batch;
pub use handle::{JobError, JobHandle};
pub use scheduler::JobScheduler;

use std::sync::{Condvar, Mutex};

/// Default number of rows per parallel batch.
pub const DEFAULT_BATCH: usize = 128;

/// Counts jobs between schedule and completion. The store consults it to
/// reject structural changes while work is in flight, and
/// [`wait_idle`](JobGate::wait_idle) is the quiescence point before command
/// playback.
pub(crate) struct JobGate {
    active: Mutex<usize>,
    idle: Condvar,
}

impl JobGate {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    pub fn enter(&self) {
        *self.active.lock().expect("job gate poisoned") += 1;
    }

    pub fn exit(&self) {
        let mut active = self.active.lock().expect("job gate poisoned");
        debug_assert!(*active > 0);
        *active -= 1;
        if *active == 0 {
            self.idle.notify_all();
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.active.lock().expect("job gate poisoned")
    }

    pub fn wait_idle(&self) {
        let mut active = self.active.lock().expect("job gate poisoned");
        while *active > 0 {
            active = self.idle.wait(active).expect("job gate poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn gate_counts_and_goes_idle() {
        let gate = JobGate::new();
        assert_eq!(gate.in_flight(), 0);
        gate.enter();
        gate.enter();
        assert_eq!(gate.in_flight(), 2);
        gate.exit();
        gate.exit();
        assert_eq!(gate.in_flight(), 0);
        gate.wait_idle(); // returns immediately
    }

    #[test]
    fn wait_idle_blocks_until_exit() {
        let gate = Arc::new(JobGate::new());
        gate.enter();

        let g = gate.clone();
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            g.exit();
        });

        gate.wait_idle();
        assert_eq!(gate.in_flight(), 0);
        t.join().unwrap();
    }
}
