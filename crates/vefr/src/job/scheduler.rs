//! # Job Scheduler — Worker Pool and Dependency-Ordered Dispatch
//!
//! The scheduler turns "run this work over that query" into pool tasks. The
//! interesting part is *when* a task may start:
//!
//! 1. At schedule time the query is resolved against the store: matching
//!    archetypes, their column handles, and a copy of their entity rows are
//!    captured. The job never touches the `World` again after this point.
//! 2. The [`AccessTracker`](super::tracker::AccessTracker) derives the
//!    implicit wait set from declared component access; explicit
//!    `depends_on` handles are appended.
//! 3. The job launches on the pool once every handle in the wait set has
//!    completed. Launch is edge-triggered through completion callbacks, so
//!    no pool thread ever blocks waiting for a dependency.
//!
//! At run time the job takes read/write guards on its captured columns.
//! Because hazard tracking already ordered every conflicting job before this
//! one, those acquisitions never contend; the locks exist so that a
//! scheduling bug surfaces as a stall instead of silent data corruption.
//!
//! Parallel jobs cut each archetype segment into fixed-size batches and fan
//! them out with a scoped spawn per batch. A batch that fails aborts only
//! itself; the remaining batches run, and the handle surfaces the first
//! error once everything has finished.

use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::ecs::component::{BoxedComponent, ComponentColumn};
use crate::ecs::entity::Entity;
use crate::ecs::query::Query;
use crate::ecs::world::World;

use super::batch::Batch;
use super::handle::{JobCore, JobError, JobHandle};
use super::tracker::AccessTracker;
use super::JobGate;

type WorkFn = Box<dyn Fn(&mut Batch<'_>) -> Result<(), JobError> + Send + Sync>;

#[derive(Clone, Copy)]
enum Dispatch {
    /// One task walks every batch in order.
    Sequential,
    /// One pool task per batch of `batch_size` rows.
    Parallel { batch_size: usize },
}

/// Column access captured at schedule time for one matching archetype.
struct ResolvedArchetype {
    entities: Vec<Entity>,
    reads: Vec<(TypeId, &'static str, Arc<RwLock<ComponentColumn>>)>,
    writes: Vec<(TypeId, &'static str, Arc<RwLock<ComponentColumn>>)>,
}

/// Everything a job needs to run, detached from the scheduler and the world.
struct JobTask {
    core: Arc<JobCore>,
    work: WorkFn,
    dispatch: Dispatch,
    archetypes: Vec<ResolvedArchetype>,
    gate: Arc<JobGate>,
    stats: Arc<JobStats>,
}

/// Running totals across the scheduler's lifetime.
#[derive(Default)]
pub(crate) struct JobStats {
    pub scheduled: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
}

/// Holds the task until its last dependency completes, then spawns it.
struct Launcher {
    task: Mutex<Option<JobTask>>,
    pool: Arc<rayon::ThreadPool>,
}

impl Launcher {
    fn launch(&self) {
        let task = self.task.lock().expect("launcher lock poisoned").take();
        if let Some(task) = task {
            self.pool.spawn(move || execute(task));
        }
    }
}

/// Schedules jobs against a [`World`] and executes them on a worker pool.
pub struct JobScheduler {
    pool: Arc<rayon::ThreadPool>,
    tracker: Mutex<AccessTracker>,
    stats: Arc<JobStats>,
    next_id: AtomicU64,
}

impl JobScheduler {
    /// Build a scheduler with its own worker pool. `threads == 0` sizes the
    /// pool to the machine.
    pub fn new(threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vefr-worker-{i}"))
            .build()
            .expect("failed to build the worker pool");
        log::debug!("job scheduler up with {} worker(s)", pool.current_num_threads());
        Self {
            pool: Arc::new(pool),
            tracker: Mutex::new(AccessTracker::new()),
            stats: Arc::new(JobStats::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Schedule `work` to run once over every batch of `query`'s result set,
    /// in order, on a single worker. Batches are whole archetype segments.
    ///
    /// Implicit dependencies follow from the query's component access;
    /// `depends_on` adds explicit ones on top.
    pub fn schedule<W>(
        &self,
        world: &World,
        query: &Query,
        work: W,
        depends_on: &[JobHandle],
    ) -> JobHandle
    where
        W: Fn(&mut Batch<'_>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        self.schedule_inner(world, query, Box::new(work), Dispatch::Sequential, depends_on)
    }

    /// Schedule `work` over `query`'s result set with one independent task
    /// per batch of at most `batch_size` rows. The returned handle completes
    /// only when every batch has.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn schedule_parallel<W>(
        &self,
        world: &World,
        query: &Query,
        batch_size: usize,
        work: W,
        depends_on: &[JobHandle],
    ) -> JobHandle
    where
        W: Fn(&mut Batch<'_>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        assert!(batch_size > 0, "batch size must be non-zero");
        self.schedule_inner(
            world,
            query,
            Box::new(work),
            Dispatch::Parallel { batch_size },
            depends_on,
        )
    }

    fn schedule_inner(
        &self,
        world: &World,
        query: &Query,
        work: WorkFn,
        dispatch: Dispatch,
        depends_on: &[JobHandle],
    ) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let core = JobCore::new(format!("job-{id}"));
        let handle = JobHandle::from_core(core.clone());

        let archetypes = resolve(world, query);

        let reads: Vec<TypeId> = query.reads.iter().map(|(id, _)| *id).collect();
        let writes: Vec<TypeId> = query.writes.iter().map(|(id, _)| *id).collect();
        let mut wait_on = self
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .plan(&reads, &writes, &handle);
        wait_on.extend(depends_on.iter().cloned());

        let gate = world.job_gate().clone();
        gate.enter();
        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);

        let task = JobTask {
            core,
            work,
            dispatch,
            archetypes,
            gate,
            stats: self.stats.clone(),
        };

        // Edge-triggered launch: the job fires when the counter hits zero.
        // The extra self-claim covers the registration window, so a
        // dependency completing mid-loop cannot launch the task early.
        let launcher = Arc::new(Launcher {
            task: Mutex::new(Some(task)),
            pool: self.pool.clone(),
        });
        let pending = Arc::new(AtomicUsize::new(wait_on.len() + 1));
        for dependency in &wait_on {
            let pending = pending.clone();
            let launcher = launcher.clone();
            dependency.on_complete(Box::new(move || {
                if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    launcher.launch();
                }
            }));
        }
        if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            launcher.launch();
        }

        handle
    }

    pub(crate) fn stats(&self) -> &JobStats {
        &self.stats
    }
}

fn resolve(world: &World, query: &Query) -> Vec<ResolvedArchetype> {
    let mut out = Vec::new();
    for archetype in world.archetypes() {
        if archetype.is_empty() || !query.matches(archetype) {
            continue;
        }
        let column = |id: &TypeId| {
            archetype
                .column(*id)
                .expect("matched archetype carries every required column")
                .clone()
        };
        out.push(ResolvedArchetype {
            entities: archetype.entities().to_vec(),
            reads: query
                .reads
                .iter()
                .map(|(id, name)| (*id, *name, column(id)))
                .collect(),
            writes: query
                .writes
                .iter()
                .map(|(id, name)| (*id, *name, column(id)))
                .collect(),
        });
    }
    out
}

fn execute(task: JobTask) {
    let JobTask {
        core,
        work,
        dispatch,
        archetypes,
        gate,
        stats,
    } = task;

    if core.is_cancelled() {
        finish(&core, &gate, &stats, Err(JobError::Cancelled));
        return;
    }
    core.mark_running();

    let first_error: Mutex<Option<JobError>> = Mutex::new(None);
    let skipped = AtomicBool::new(false);

    for resolved in &archetypes {
        if core.is_cancelled() {
            skipped.store(true, Ordering::Relaxed);
            break;
        }
        let rows = resolved.entities.len();
        if rows == 0 {
            continue;
        }
        let chunk = match dispatch {
            Dispatch::Sequential => rows,
            Dispatch::Parallel { batch_size } => batch_size,
        };

        // Uncontended by construction: every conflicting predecessor has
        // already completed and released its guards.
        let read_guards: Vec<_> = resolved
            .reads
            .iter()
            .map(|(id, name, column)| (*id, *name, column.read().expect("column lock poisoned")))
            .collect();
        let mut write_guards: Vec<_> = resolved
            .writes
            .iter()
            .map(|(id, name, column)| (*id, *name, column.write().expect("column lock poisoned")))
            .collect();

        let batch_count = rows.div_ceil(chunk);
        let mut write_chunks: Vec<(TypeId, &'static str, std::slice::ChunksMut<'_, BoxedComponent>)> =
            write_guards
                .iter_mut()
                .map(|(id, name, guard)| (*id, *name, guard.as_mut_slice().chunks_mut(chunk)))
                .collect();

        let mut batches: Vec<Batch<'_>> = Vec::with_capacity(batch_count);
        for index in 0..batch_count {
            let start = index * chunk;
            let end = ((index + 1) * chunk).min(rows);
            let writes: Vec<(TypeId, &'static str, &mut [BoxedComponent])> = write_chunks
                .iter_mut()
                .map(|(id, name, chunks)| {
                    (*id, *name, chunks.next().expect("one chunk per batch"))
                })
                .collect();
            let reads: Vec<(TypeId, &'static str, &[BoxedComponent])> = read_guards
                .iter()
                .map(|(id, name, guard)| (*id, *name, &guard.as_slice()[start..end]))
                .collect();
            batches.push(Batch {
                entities: &resolved.entities[start..end],
                base_row: start,
                reads,
                writes,
            });
        }

        match dispatch {
            Dispatch::Sequential => {
                for mut batch in batches {
                    if core.is_cancelled() {
                        skipped.store(true, Ordering::Relaxed);
                        break;
                    }
                    run_batch(&work, &mut batch, &first_error);
                }
            }
            Dispatch::Parallel { .. } => {
                let core = &core;
                let work = &work;
                let first_error = &first_error;
                let skipped = &skipped;
                rayon::scope(|scope| {
                    for mut batch in batches {
                        scope.spawn(move |_| {
                            // Cancellation is cooperative at batch
                            // granularity; a batch underway always finishes.
                            if core.is_cancelled() {
                                skipped.store(true, Ordering::Relaxed);
                                return;
                            }
                            run_batch(work, &mut batch, first_error);
                        });
                    }
                });
            }
        }
    }

    let error = first_error.into_inner().expect("error slot poisoned");
    let result = match error {
        Some(error) => Err(error),
        None if skipped.load(Ordering::Relaxed) => Err(JobError::Cancelled),
        None => Ok(()),
    };
    finish(&core, &gate, &stats, result);
}

/// Run one batch, containing both reported errors and panics. A panicking
/// work function must not take the pool down or leave the gate held.
fn run_batch(work: &WorkFn, batch: &mut Batch<'_>, first_error: &Mutex<Option<JobError>>) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work(batch)));
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(error)) => record_first(first_error, error),
        Err(_) => record_first(first_error, JobError::failed("work function panicked")),
    }
}

fn record_first(slot: &Mutex<Option<JobError>>, error: JobError) {
    slot.lock().expect("error slot poisoned").get_or_insert(error);
}

fn finish(core: &Arc<JobCore>, gate: &JobGate, stats: &JobStats, result: Result<(), JobError>) {
    if let Err(error) = &result {
        stats.failed.fetch_add(1, Ordering::Relaxed);
        log::warn!("{} finished with error: {error}", core.label());
    }
    stats.completed.fetch_add(1, Ordering::Relaxed);
    // Release the gate before waking waiters, so a waiter that immediately
    // issues a structural change does not race the in-flight count.
    gate.exit();
    core.complete(result);
}
