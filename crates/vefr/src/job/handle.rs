//! # Job Handles — Tokens for Eventual Completion
//!
//! Scheduling work returns a [`JobHandle`] immediately; the work itself
//! finishes later on the pool. The handle is the only channel back: waiters
//! block on it, later jobs depend on it, and the first error a work unit
//! raised surfaces through it.
//!
//! Handles are cheap to clone and freely shareable. Combining handles
//! ([`JobHandle::combine`], [`JobHandle::combine_all`]) produces a handle
//! that completes when every input has, which is how "all of this tick's
//! work" is expressed as a single token.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;

/// An error surfaced through a job handle.
///
/// A failing batch never takes down its siblings: the other batches of the
/// same job still run, and the handle reports the first error observed once
/// everything has finished.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The work function reported an error.
    #[error("job failed: {0}")]
    Failed(String),

    /// The job was cancelled before it ran, or between two of its batches.
    #[error("job cancelled")]
    Cancelled,

    /// A work function asked for a component type outside the job's declared
    /// access.
    #[error("component `{component}` is not part of this job's declared access")]
    MissingColumn { component: &'static str },

    /// A work function asked for mutable access to a component the job only
    /// declared as read.
    #[error("component `{component}` is read-only in this job")]
    ReadOnlyColumn { component: &'static str },
}

impl JobError {
    /// Shorthand for [`JobError::Failed`] with a formatted message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Pending,
    Running,
    Complete,
}

struct CoreState {
    phase: Phase,
    result: Option<Result<(), JobError>>,
    callbacks: Vec<Callback>,
}

/// Shared completion state for one scheduled job.
pub(crate) struct JobCore {
    label: String,
    cancelled: AtomicBool,
    state: Mutex<CoreState>,
    completed: Condvar,
}

impl JobCore {
    pub fn new(label: String) -> Arc<Self> {
        Arc::new(Self {
            label,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(CoreState {
                phase: Phase::Pending,
                result: None,
                callbacks: Vec::new(),
            }),
            completed: Condvar::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn mark_running(&self) {
        let mut state = self.state.lock().expect("job state poisoned");
        if state.phase == Phase::Pending {
            state.phase = Phase::Running;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().expect("job state poisoned").phase == Phase::Complete
    }

    /// Record the result, wake waiters, fire completion callbacks. Must be
    /// called exactly once.
    pub fn complete(&self, result: Result<(), JobError>) {
        let callbacks = {
            let mut state = self.state.lock().expect("job state poisoned");
            debug_assert!(state.phase != Phase::Complete, "job completed twice");
            state.phase = Phase::Complete;
            state.result = Some(result);
            std::mem::take(&mut state.callbacks)
        };
        self.completed.notify_all();
        for callback in callbacks {
            callback();
        }
    }

    pub fn wait(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().expect("job state poisoned");
        while state.phase != Phase::Complete {
            state = self.completed.wait(state).expect("job state poisoned");
        }
        state.result.clone().expect("complete job carries a result")
    }

    /// Run `callback` once the job completes; immediately if it already has.
    pub fn on_complete(&self, callback: Callback) {
        let mut state = self.state.lock().expect("job state poisoned");
        if state.phase == Phase::Complete {
            drop(state);
            callback();
        } else {
            state.callbacks.push(callback);
        }
    }
}

#[derive(Clone)]
enum Repr {
    /// Completes immediately. The zero element for `combine_all`.
    Ready,
    Single(Arc<JobCore>),
    Many(Arc<[JobHandle]>),
}

/// A token for one job's (or several jobs') eventual completion.
#[derive(Clone)]
pub struct JobHandle {
    repr: Repr,
}

impl JobHandle {
    /// A handle that is already complete. Useful as an initial dependency.
    pub fn ready() -> Self {
        Self { repr: Repr::Ready }
    }

    pub(crate) fn from_core(core: Arc<JobCore>) -> Self {
        Self {
            repr: Repr::Single(core),
        }
    }

    /// Block until completion. Returns the first error any batch raised, or
    /// `Ok` if everything ran clean.
    pub fn wait(&self) -> Result<(), JobError> {
        match &self.repr {
            Repr::Ready => Ok(()),
            Repr::Single(core) => core.wait(),
            Repr::Many(handles) => {
                let mut first = None;
                for handle in handles.iter() {
                    if let Err(error) = handle.wait() {
                        first.get_or_insert(error);
                    }
                }
                match first {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        match &self.repr {
            Repr::Ready => true,
            Repr::Single(core) => core.is_complete(),
            Repr::Many(handles) => handles.iter().all(JobHandle::is_complete),
        }
    }

    /// Request cancellation. A job that has not started yet never runs and
    /// completes with [`JobError::Cancelled`]; a running job observes the
    /// flag between batches, and a batch already underway always finishes.
    pub fn cancel(&self) {
        match &self.repr {
            Repr::Ready => {}
            Repr::Single(core) => core.cancel(),
            Repr::Many(handles) => {
                for handle in handles.iter() {
                    handle.cancel();
                }
            }
        }
    }

    /// A handle completing when both `self` and `other` have.
    pub fn combine(&self, other: &JobHandle) -> JobHandle {
        Self::combine_all([self.clone(), other.clone()])
    }

    /// A handle completing when every input has. An empty input yields a
    /// ready handle.
    pub fn combine_all(handles: impl IntoIterator<Item = JobHandle>) -> JobHandle {
        let mut collected: Vec<JobHandle> = handles.into_iter().collect();
        match collected.len() {
            0 => Self::ready(),
            1 => collected.pop().expect("length checked"),
            _ => Self {
                repr: Repr::Many(collected.into()),
            },
        }
    }

    /// Run `callback` once this handle completes; immediately if it already
    /// has.
    pub(crate) fn on_complete(&self, callback: Callback) {
        match &self.repr {
            Repr::Ready => callback(),
            Repr::Single(core) => core.on_complete(callback),
            Repr::Many(handles) => {
                debug_assert!(!handles.is_empty());
                let remaining = Arc::new(AtomicUsize::new(handles.len()));
                let slot = Arc::new(Mutex::new(Some(callback)));
                for handle in handles.iter() {
                    let remaining = remaining.clone();
                    let slot = slot.clone();
                    handle.on_complete(Box::new(move || {
                        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            if let Some(callback) =
                                slot.lock().expect("callback slot poisoned").take()
                            {
                                callback();
                            }
                        }
                    }));
                }
            }
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Ready => write!(f, "JobHandle(ready)"),
            Repr::Single(core) => write!(
                f,
                "JobHandle({}, complete: {})",
                core.label(),
                core.is_complete()
            ),
            Repr::Many(handles) => write!(f, "JobHandle({} combined)", handles.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_handle_is_complete() {
        let handle = JobHandle::ready();
        assert!(handle.is_complete());
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn wait_returns_recorded_result() {
        let core = JobCore::new("t".into());
        let handle = JobHandle::from_core(core.clone());
        assert!(!handle.is_complete());

        core.complete(Err(JobError::failed("boom")));
        assert!(handle.is_complete());
        assert_eq!(handle.wait(), Err(JobError::Failed("boom".into())));
    }

    #[test]
    fn wait_blocks_until_complete() {
        let core = JobCore::new("t".into());
        let handle = JobHandle::from_core(core.clone());

        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(30));
            core.complete(Ok(()));
        });
        assert_eq!(handle.wait(), Ok(()));
        t.join().unwrap();
    }

    #[test]
    fn combined_handle_surfaces_first_error() {
        let a = JobCore::new("a".into());
        let b = JobCore::new("b".into());
        let combined =
            JobHandle::from_core(a.clone()).combine(&JobHandle::from_core(b.clone()));

        assert!(!combined.is_complete());
        a.complete(Ok(()));
        assert!(!combined.is_complete());
        b.complete(Err(JobError::failed("late")));

        assert!(combined.is_complete());
        assert_eq!(combined.wait(), Err(JobError::Failed("late".into())));
    }

    #[test]
    fn combine_all_of_nothing_is_ready() {
        assert!(JobHandle::combine_all([]).is_complete());
    }

    #[test]
    fn callback_fires_once_all_parts_complete() {
        use std::sync::atomic::AtomicUsize;

        let a = JobCore::new("a".into());
        let b = JobCore::new("b".into());
        let combined =
            JobHandle::from_core(a.clone()).combine(&JobHandle::from_core(b.clone()));

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        combined.on_complete(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        a.complete(Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        b.complete(Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_on_completed_handle_runs_immediately() {
        use std::sync::atomic::AtomicUsize;

        let core = JobCore::new("t".into());
        core.complete(Ok(()));

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        JobHandle::from_core(core).on_complete(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_sets_the_flag() {
        let core = JobCore::new("t".into());
        let handle = JobHandle::from_core(core.clone());
        assert!(!core.is_cancelled());
        handle.cancel();
        assert!(core.is_cancelled());
    }
}
