//! # Systems — Ordered Units of Simulation Logic
//!
//! A system is a named piece of logic that runs once per tick. Its `update`
//! receives a [`SystemContext`]: a read view of the world, the job
//! scheduler, a private command buffer, and an implicit dependency handle.
//! Systems do their heavy lifting by scheduling jobs, and defer structural
//! changes into the command buffer.
//!
//! ## Ordering
//!
//! Systems register into named groups and may declare `before`/`after`
//! constraints against individual systems or whole groups. The [`Schedule`]
//! flattens those constraints into one fixed topological order when it is
//! built; a cycle is a configuration error reported before the first tick
//! ever runs, never at runtime.
//!
//! Within a tick the order is only a *submission* order. Two systems whose
//! declared access sets do not overlap may have their jobs in flight at the
//! same time; a system whose access overlaps an earlier system's receives
//! that system's completion handle as an implicit dependency, and the job
//! scheduler's hazard tracking backstops the same rule per component type.
//!
//! ## Command buffer sync points
//!
//! A system's recorded commands are played back before the next system
//! updates, so structural effects are visible one step downstream. The
//! playback waits for job quiescence; when nothing was recorded, no barrier
//! is imposed at all.
//!
//! ## Lifecycle
//!
//! Created → Running → Stopped. `on_start` fires once before the first
//! update, `on_stop` once when the system is removed or the schedule shuts
//! down. Both receive `&mut World` directly: they run at quiescent points
//! where structural changes are legal.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::commands::CommandBuffer;
use crate::job::{JobHandle, JobScheduler};
use crate::time::Time;

use super::query::Query;
use super::world::World;

/// The component types a system reads and writes, declared up front.
///
/// The schedule uses declared access to decide which systems' jobs may
/// overlap; two access sets conflict when either writes something the other
/// touches.
#[derive(Clone, Debug, Default)]
pub struct Access {
    pub(crate) reads: Vec<(TypeId, &'static str)>,
    pub(crate) writes: Vec<(TypeId, &'static str)>,
}

impl Access {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<T: 'static + Send + Sync>(mut self) -> Self {
        let entry = (TypeId::of::<T>(), std::any::type_name::<T>());
        if !self.reads.contains(&entry) && !self.writes.contains(&entry) {
            self.reads.push(entry);
        }
        self
    }

    pub fn write<T: 'static + Send + Sync>(mut self) -> Self {
        let entry = (TypeId::of::<T>(), std::any::type_name::<T>());
        self.reads.retain(|e| *e != entry);
        if !self.writes.contains(&entry) {
            self.writes.push(entry);
        }
        self
    }

    /// Access equivalent to what a query touches.
    pub fn from_query(query: &Query) -> Self {
        Self {
            reads: query.reads.clone(),
            writes: query.writes.clone(),
        }
    }

    pub(crate) fn conflicts_with(&self, other: &Access) -> bool {
        let hits = |a: &Access, b: &Access| {
            a.writes.iter().any(|(id, _)| {
                b.reads.iter().any(|(other_id, _)| other_id == id)
                    || b.writes.iter().any(|(other_id, _)| other_id == id)
            })
        };
        hits(self, other) || hits(other, self)
    }
}

/// What a system sees during `update`.
pub struct SystemContext<'a> {
    world: &'a World,
    jobs: &'a JobScheduler,
    commands: &'a CommandBuffer,
    dependency: JobHandle,
    time: Time,
    produced: Vec<JobHandle>,
}

impl<'a> SystemContext<'a> {
    /// Read access to the store. Structural changes go through
    /// [`commands`](SystemContext::commands) instead.
    pub fn world(&self) -> &'a World {
        self.world
    }

    pub fn jobs(&self) -> &'a JobScheduler {
        self.jobs
    }

    /// This system's command buffer. Played back before the next system
    /// updates.
    pub fn commands(&self) -> &'a CommandBuffer {
        self.commands
    }

    /// Completion of every earlier system this tick whose declared access
    /// overlaps this system's. Ready if there is no such system.
    pub fn dependency(&self) -> JobHandle {
        self.dependency.clone()
    }

    pub fn time(&self) -> Time {
        self.time
    }

    /// Schedule sequential work over `query`, threading in the implicit
    /// dependency. The handle is also tracked as this system's output.
    pub fn schedule<W>(&mut self, query: &Query, work: W) -> JobHandle
    where
        W: Fn(&mut crate::job::Batch<'_>) -> Result<(), crate::job::JobError>
            + Send
            + Sync
            + 'static,
    {
        let handle = self.jobs.schedule(
            self.world,
            query,
            work,
            std::slice::from_ref(&self.dependency),
        );
        self.produced.push(handle.clone());
        handle
    }

    /// Parallel variant of [`schedule`](SystemContext::schedule), one task
    /// per batch of `batch_size` rows.
    pub fn schedule_parallel<W>(&mut self, query: &Query, batch_size: usize, work: W) -> JobHandle
    where
        W: Fn(&mut crate::job::Batch<'_>) -> Result<(), crate::job::JobError>
            + Send
            + Sync
            + 'static,
    {
        let handle = self.jobs.schedule_parallel(
            self.world,
            query,
            batch_size,
            work,
            std::slice::from_ref(&self.dependency),
        );
        self.produced.push(handle.clone());
        handle
    }

    /// Track an externally combined handle as part of this system's output,
    /// so downstream systems inherit it as a dependency.
    pub fn submit(&mut self, handle: JobHandle) {
        self.produced.push(handle);
    }
}

/// One unit of per-tick logic. A single trait with capability methods; the
/// lifecycle hooks have empty defaults.
pub trait System: Send + Sync {
    fn name(&self) -> &str;

    /// Declared component access, used for overlap decisions between
    /// systems.
    fn access(&self) -> Access;

    /// Runs once before the first update. Structural changes are legal here.
    fn on_start(&mut self, _world: &mut World) {}

    fn update(&mut self, ctx: &mut SystemContext<'_>);

    /// Runs once when the system is removed or the schedule shuts down.
    fn on_stop(&mut self, _world: &mut World) {}
}

/// A [`System`] backed by a closure, for logic that does not warrant its own
/// type.
pub struct FnSystem<F> {
    name: String,
    access: Access,
    update: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>) + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, access: Access, update: F) -> Self {
        Self {
            name: name.into(),
            access,
            update,
        }
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(&mut SystemContext<'_>) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self) -> Access {
        self.access.clone()
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) {
        (self.update)(ctx);
    }
}

/// An ordering constraint target: a single system or a whole group.
#[derive(Clone, Debug)]
pub enum OrderTarget {
    System(String),
    Group(String),
}

/// Registration options for a system: its group and ordering constraints.
#[derive(Clone, Debug)]
pub struct SystemConfig {
    group: String,
    before: Vec<OrderTarget>,
    after: Vec<OrderTarget>,
}

impl SystemConfig {
    pub fn new() -> Self {
        Self {
            group: Schedule::DEFAULT_GROUP.to_string(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn before_system(mut self, name: impl Into<String>) -> Self {
        self.before.push(OrderTarget::System(name.into()));
        self
    }

    pub fn after_system(mut self, name: impl Into<String>) -> Self {
        self.after.push(OrderTarget::System(name.into()));
        self
    }

    pub fn before_group(mut self, group: impl Into<String>) -> Self {
        self.before.push(OrderTarget::Group(group.into()));
        self
    }

    pub fn after_group(mut self, group: impl Into<String>) -> Self {
        self.after.push(OrderTarget::Group(group.into()));
        self
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration errors detected when the schedule is built. All of them
/// abort before the first tick; none can occur afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// The before/after constraints form a cycle.
    #[error("system ordering cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// A constraint names a system or group that was never registered.
    #[error("system `{system}` orders against unknown {kind} `{target}`")]
    UnknownTarget {
        system: String,
        kind: &'static str,
        target: String,
    },

    /// Two systems share a name, which would make constraints ambiguous.
    #[error("duplicate system name `{0}`")]
    DuplicateSystem(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SystemState {
    Created,
    Running,
    Stopped,
}

struct SystemEntry {
    system: Box<dyn System>,
    name: String,
    group: String,
    before: Vec<OrderTarget>,
    after: Vec<OrderTarget>,
    state: SystemState,
}

/// Per-system timing from the most recent tick.
#[cfg(feature = "diagnostics")]
pub(crate) struct SystemTiming {
    pub name: String,
    pub duration_us: f64,
}

/// The ordered collection of systems, executed once per tick.
pub struct Schedule {
    entries: Vec<SystemEntry>,
    /// Fixed topological order, computed by [`build`](Schedule::build).
    order: Option<Vec<usize>>,
    #[cfg(feature = "diagnostics")]
    pub(crate) timings: Vec<SystemTiming>,
}

impl Schedule {
    /// Group used when a registration does not name one.
    pub const DEFAULT_GROUP: &'static str = "update";

    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            order: None,
            #[cfg(feature = "diagnostics")]
            timings: Vec::new(),
        }
    }

    /// Register a system with default configuration.
    pub fn add_system(&mut self, system: impl System + 'static) {
        self.add_system_with(system, SystemConfig::new());
    }

    /// Register a system into a group with ordering constraints.
    pub fn add_system_with(&mut self, system: impl System + 'static, config: SystemConfig) {
        let name = system.name().to_string();
        self.entries.push(SystemEntry {
            system: Box::new(system),
            name,
            group: config.group,
            before: config.before,
            after: config.after,
            state: SystemState::Created,
        });
        // Any cached order is stale now.
        self.order = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten groups and constraints into one fixed execution order.
    ///
    /// Called implicitly by the first [`tick`](Schedule::tick); calling it
    /// explicitly at startup surfaces configuration errors before any
    /// simulation state exists.
    pub fn build(&mut self) -> Result<(), ScheduleError> {
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if by_name.insert(entry.name.as_str(), index).is_some() {
                return Err(ScheduleError::DuplicateSystem(entry.name.clone()));
            }
        }
        let mut by_group: HashMap<&str, Vec<usize>> = HashMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            by_group.entry(entry.group.as_str()).or_default().push(index);
        }

        let expand = |source: usize, target: &OrderTarget| -> Result<Vec<usize>, ScheduleError> {
            match target {
                OrderTarget::System(name) => by_name
                    .get(name.as_str())
                    .map(|&index| vec![index])
                    .ok_or_else(|| ScheduleError::UnknownTarget {
                        system: self.entries[source].name.clone(),
                        kind: "system",
                        target: name.clone(),
                    }),
                OrderTarget::Group(group) => by_group
                    .get(group.as_str())
                    .map(|members| members.iter().copied().filter(|&m| m != source).collect())
                    .ok_or_else(|| ScheduleError::UnknownTarget {
                        system: self.entries[source].name.clone(),
                        kind: "group",
                        target: group.clone(),
                    }),
            }
        };

        // Edges point from prerequisite to dependent.
        let mut edges: HashSet<(usize, usize)> = HashSet::new();
        for (index, entry) in self.entries.iter().enumerate() {
            for target in &entry.after {
                for prerequisite in expand(index, target)? {
                    edges.insert((prerequisite, index));
                }
            }
            for target in &entry.before {
                for dependent in expand(index, target)? {
                    edges.insert((index, dependent));
                }
            }
        }

        let count = self.entries.len();
        let mut indegree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for &(from, to) in &edges {
            indegree[to] += 1;
            dependents[from].push(to);
        }

        // Kahn's algorithm; registration index breaks ties so the order is
        // stable across runs.
        let mut ready: Vec<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
        ready.sort_unstable();
        let mut order = Vec::with_capacity(count);
        while let Some(&next) = ready.first() {
            ready.remove(0);
            order.push(next);
            for &dependent in &dependents[next] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    let position = ready
                        .binary_search(&dependent)
                        .expect_err("dependent enters ready at most once");
                    ready.insert(position, dependent);
                }
            }
        }

        if order.len() < count {
            let stuck: Vec<String> = (0..count)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.entries[i].name.clone())
                .collect();
            return Err(ScheduleError::Cycle(stuck));
        }

        log::info!(
            "schedule built: {}",
            order
                .iter()
                .map(|&i| self.entries[i].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        self.order = Some(order);
        Ok(())
    }

    /// Run one tick: every running system in order, then a final drain of
    /// outstanding jobs and command buffers.
    pub fn tick(&mut self, world: &mut World, jobs: &JobScheduler) -> Result<(), ScheduleError> {
        if self.order.is_none() {
            self.build()?;
        }
        let order = self.order.clone().expect("order built above");
        let time = world
            .get_resource::<Time>()
            .copied()
            .unwrap_or_else(Time::new);

        let mut produced: Vec<Vec<JobHandle>> = (0..self.entries.len()).map(|_| Vec::new()).collect();
        let mut pending_buffers: Vec<CommandBuffer> = Vec::new();
        #[cfg(feature = "diagnostics")]
        self.timings.clear();

        for &index in &order {
            if self.entries[index].state == SystemState::Stopped {
                continue;
            }

            // Structural sync point, paid only when something was recorded:
            // quiesce, then make the previous systems' mutations visible.
            if !pending_buffers.is_empty() {
                world.wait_idle();
                for buffer in pending_buffers.drain(..) {
                    let report = buffer
                        .playback(world)
                        .expect("store is idle and the buffer is fresh");
                    log::debug!(
                        "mid-tick playback before `{}`: {} applied, {} skipped",
                        self.entries[index].name,
                        report.applied,
                        report.skipped
                    );
                }
            }

            if self.entries[index].state == SystemState::Created {
                world.wait_idle();
                self.entries[index].system.on_start(world);
                self.entries[index].state = SystemState::Running;
            }

            let access = self.entries[index].system.access();
            let mut dependencies = Vec::new();
            for &earlier in &order {
                if earlier == index {
                    break;
                }
                if produced[earlier].is_empty() {
                    continue;
                }
                if access.conflicts_with(&self.entries[earlier].system.access()) {
                    dependencies.extend(produced[earlier].iter().cloned());
                }
            }

            let buffer = CommandBuffer::new();
            let mut ctx = SystemContext {
                world: &*world,
                jobs,
                commands: &buffer,
                dependency: JobHandle::combine_all(dependencies),
                time,
                produced: Vec::new(),
            };

            #[cfg(feature = "diagnostics")]
            let started = std::time::Instant::now();
            self.entries[index].system.update(&mut ctx);
            #[cfg(feature = "diagnostics")]
            self.timings.push(SystemTiming {
                name: self.entries[index].name.clone(),
                duration_us: started.elapsed().as_secs_f64() * 1_000_000.0,
            });

            produced[index] = ctx.produced;
            if !buffer.is_empty() {
                pending_buffers.push(buffer);
            }
        }

        // Tick boundary: all submitted work completes, remaining structural
        // changes apply.
        let all_handles: Vec<JobHandle> = produced.into_iter().flatten().collect();
        if let Err(error) = JobHandle::combine_all(all_handles).wait() {
            log::warn!("tick finished with a failed job: {error}");
        }
        world.wait_idle();
        for buffer in pending_buffers.drain(..) {
            let report = buffer
                .playback(world)
                .expect("store is idle and the buffer is fresh");
            log::debug!(
                "end-of-tick playback: {} applied, {} skipped",
                report.applied,
                report.skipped
            );
        }

        Ok(())
    }

    /// Stop and remove a system by name. Its `on_stop` hook fires if it ever
    /// started. Returns `false` if no such system exists.
    pub fn remove_system(&mut self, name: &str, world: &mut World) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) else {
            return false;
        };
        if entry.state == SystemState::Running {
            entry.system.on_stop(world);
        }
        entry.state = SystemState::Stopped;
        true
    }

    /// Stop every running system, firing `on_stop` hooks once each.
    pub fn shutdown(&mut self, world: &mut World) {
        for entry in &mut self.entries {
            if entry.state == SystemState::Running {
                entry.system.on_stop(world);
                entry.state = SystemState::Stopped;
            }
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    struct X(i64);
    struct Y(i64);
    struct Tag;

    fn recorder(name: &str, log: Arc<Mutex<Vec<String>>>) -> impl System + 'static {
        let name_owned = name.to_string();
        FnSystem::new(name, Access::new(), move |_ctx| {
            log.lock().unwrap().push(name_owned.clone());
        })
    }

    #[test]
    fn constraints_fix_the_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system_with(
            recorder("c", log.clone()),
            SystemConfig::new().after_system("b"),
        );
        schedule.add_system_with(
            recorder("b", log.clone()),
            SystemConfig::new().after_system("a"),
        );
        schedule.add_system(recorder("a", log.clone()));

        let mut world = World::new();
        let jobs = JobScheduler::new(2);
        schedule.tick(&mut world, &jobs).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn group_constraints_expand_to_members() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system_with(
            recorder("late", log.clone()),
            SystemConfig::new().after_group("sim"),
        );
        schedule.add_system_with(recorder("s1", log.clone()), SystemConfig::new().in_group("sim"));
        schedule.add_system_with(recorder("s2", log.clone()), SystemConfig::new().in_group("sim"));

        let mut world = World::new();
        let jobs = JobScheduler::new(2);
        schedule.tick(&mut world, &jobs).unwrap();

        let order = log.lock().unwrap().clone();
        assert_eq!(order.last().unwrap(), "late");
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn cycle_is_a_build_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system_with(
            recorder("a", log.clone()),
            SystemConfig::new().before_system("b"),
        );
        schedule.add_system_with(
            recorder("b", log.clone()),
            SystemConfig::new().before_system("a"),
        );

        match schedule.build() {
            Err(ScheduleError::Cycle(names)) => {
                assert!(names.contains(&"a".to_string()));
                assert!(names.contains(&"b".to_string()));
            }
            other => panic!("expected a cycle error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_target_is_a_build_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system_with(
            recorder("a", log.clone()),
            SystemConfig::new().after_system("ghost"),
        );
        assert!(matches!(
            schedule.build(),
            Err(ScheduleError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn duplicate_names_are_a_build_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut schedule = Schedule::new();
        schedule.add_system(recorder("same", log.clone()));
        schedule.add_system(recorder("same", log.clone()));
        assert_eq!(
            schedule.build(),
            Err(ScheduleError::DuplicateSystem("same".into()))
        );
    }

    #[test]
    fn lifecycle_hooks_fire_exactly_once() {
        struct Hooked {
            starts: Arc<AtomicU32>,
            stops: Arc<AtomicU32>,
        }
        impl System for Hooked {
            fn name(&self) -> &str {
                "hooked"
            }
            fn access(&self) -> Access {
                Access::new()
            }
            fn on_start(&mut self, _world: &mut World) {
                self.starts.fetch_add(1, Ordering::SeqCst);
            }
            fn update(&mut self, _ctx: &mut SystemContext<'_>) {}
            fn on_stop(&mut self, _world: &mut World) {
                self.stops.fetch_add(1, Ordering::SeqCst);
            }
        }

        let starts = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let mut schedule = Schedule::new();
        schedule.add_system(Hooked {
            starts: starts.clone(),
            stops: stops.clone(),
        });

        let mut world = World::new();
        let jobs = JobScheduler::new(2);
        schedule.tick(&mut world, &jobs).unwrap();
        schedule.tick(&mut world, &jobs).unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        schedule.shutdown(&mut world);
        schedule.shutdown(&mut world);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // A stopped system no longer updates.
        schedule.tick(&mut world, &jobs).unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recorded_commands_are_visible_to_the_next_system() {
        let mut schedule = Schedule::new();
        schedule.add_system(FnSystem::new("producer", Access::new(), |ctx| {
            if ctx.world().snapshot(&Query::new().read::<Tag>()).is_empty() {
                ctx.commands().record_spawn((Tag,));
            }
        }));

        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        schedule.add_system_with(
            FnSystem::new("consumer", Access::new(), move |ctx| {
                counter.store(
                    ctx.world().snapshot(&Query::new().read::<Tag>()).len() as u32,
                    Ordering::SeqCst,
                );
            }),
            SystemConfig::new().after_system("producer"),
        );

        let mut world = World::new();
        let jobs = JobScheduler::new(2);
        schedule.tick(&mut world, &jobs).unwrap();

        // The producer's spawn was played back before the consumer ran.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn ordered_reader_observes_writer_and_disjoint_system_overlaps() {
        // S1 writes X, S2 (after S1) reads X, S3 writes Y with no declared
        // relation. S3's job and S1's job must overlap in time; S2 must see
        // S1's completed writes.
        let mut world = World::new();
        for i in 0..4 {
            world.spawn((X(i), Y(0)));
        }
        let jobs = JobScheduler::new(4);

        let s1_started = Arc::new(AtomicBool::new(false));
        let s3_started = Arc::new(AtomicBool::new(false));

        let mut schedule = Schedule::new();

        let mine = s1_started.clone();
        let peer = s3_started.clone();
        schedule.add_system(FnSystem::new(
            "s1",
            Access::new().write::<X>(),
            move |ctx| {
                let mine = mine.clone();
                let peer = peer.clone();
                ctx.schedule_parallel(&Query::new().write::<X>(), 128, move |batch| {
                    mine.store(true, Ordering::SeqCst);
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while !peer.load(Ordering::SeqCst) {
                        if Instant::now() > deadline {
                            return Err(crate::job::JobError::failed("s3 never overlapped"));
                        }
                        std::hint::spin_loop();
                    }
                    for row in 0..batch.len() {
                        batch.get_mut::<X>(row)?.0 += 100;
                    }
                    Ok(())
                });
            },
        ));

        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        schedule.add_system_with(
            FnSystem::new("s2", Access::new().read::<X>(), move |ctx| {
                let sink = sink.clone();
                ctx.schedule(&Query::new().read::<X>(), move |batch| {
                    let mut sink = sink.lock().unwrap();
                    for row in 0..batch.len() {
                        sink.push(batch.get::<X>(row)?.0);
                    }
                    Ok(())
                });
            }),
            SystemConfig::new().after_system("s1"),
        );

        let mine = s3_started.clone();
        let peer = s1_started.clone();
        schedule.add_system(FnSystem::new(
            "s3",
            Access::new().write::<Y>(),
            move |ctx| {
                let mine = mine.clone();
                let peer = peer.clone();
                ctx.schedule(&Query::new().write::<Y>(), move |_batch| {
                    mine.store(true, Ordering::SeqCst);
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while !peer.load(Ordering::SeqCst) {
                        if Instant::now() > deadline {
                            return Err(crate::job::JobError::failed("s1 never overlapped"));
                        }
                        std::hint::spin_loop();
                    }
                    Ok(())
                });
            },
        ));

        schedule.tick(&mut world, &jobs).unwrap();

        // Both spin barriers resolved, so S1 and S3 ran concurrently.
        let mut values = observed.lock().unwrap().clone();
        values.sort();
        assert_eq!(values, vec![100, 101, 102, 103]);
    }

    #[test]
    fn access_conflicts() {
        let writes_x = Access::new().write::<X>();
        let reads_x = Access::new().read::<X>();
        let writes_y = Access::new().write::<Y>();

        assert!(writes_x.conflicts_with(&reads_x));
        assert!(writes_x.conflicts_with(&writes_x.clone()));
        assert!(!writes_x.conflicts_with(&writes_y));
        assert!(!reads_x.conflicts_with(&reads_x.clone()));
    }
}
