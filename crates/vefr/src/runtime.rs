//! # Runtime — The Assembled Pieces
//!
//! [`Runtime`] owns the three moving parts ([`World`], [`JobScheduler`],
//! [`Schedule`]) and drives them with an explicit [`tick`](Runtime::tick).
//! There is no event loop here: the host application decides when ticks
//! happen, whether that is a fixed-step loop, a test harness, or something
//! driven from outside.
//!
//! ## Example
//!
//! ```ignore
//! let mut runtime = Runtime::new()
//!     .insert_resource(Gravity(-9.81))
//!     .add_system(MovementSystem::default())
//!     .build()?;
//!
//! loop {
//!     runtime.tick()?;
//! }
//! ```
//!
//! `build()` validates system ordering up front: a constraint cycle or a
//! dangling target aborts construction, before any simulation state exists.

use crate::ecs::system::{Schedule, ScheduleError, System, SystemConfig};
use crate::ecs::world::World;
use crate::job::JobScheduler;
use crate::time::Time;

/// Builder for a [`Runtime`]. Configure, then [`build`](RuntimeBuilder::build).
pub struct RuntimeBuilder {
    world: World,
    schedule: Schedule,
    threads: usize,
}

impl RuntimeBuilder {
    /// Insert a resource into the world.
    pub fn insert_resource<T: 'static + Send + Sync>(mut self, value: T) -> Self {
        self.world.insert_resource(value);
        self
    }

    /// Size the worker pool explicitly. Zero (the default) matches the
    /// machine.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Register a system with default configuration.
    pub fn add_system(mut self, system: impl System + 'static) -> Self {
        self.schedule.add_system(system);
        self
    }

    /// Register a system into a group with ordering constraints.
    pub fn add_system_with(mut self, system: impl System + 'static, config: SystemConfig) -> Self {
        self.schedule.add_system_with(system, config);
        self
    }

    /// Pre-populate the world before the first tick.
    pub fn setup(mut self, f: impl FnOnce(&mut World)) -> Self {
        f(&mut self.world);
        self
    }

    /// Validate ordering and assemble the runtime. A configuration error
    /// here is fatal by design: nothing has run yet.
    pub fn build(mut self) -> Result<Runtime, ScheduleError> {
        self.schedule.build()?;
        self.world.insert_resource(Time::new());
        Ok(Runtime {
            world: self.world,
            jobs: JobScheduler::new(self.threads),
            schedule: self.schedule,
        })
    }
}

/// The assembled simulation runtime.
pub struct Runtime {
    world: World,
    jobs: JobScheduler,
    schedule: Schedule,
}

impl Runtime {
    /// Start configuring a runtime.
    pub fn new() -> RuntimeBuilder {
        RuntimeBuilder {
            world: World::new(),
            schedule: Schedule::new(),
            threads: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable store access between ticks, where structural changes are
    /// legal directly.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn jobs(&self) -> &JobScheduler {
        &self.jobs
    }

    /// Advance the simulation by one tick: update [`Time`], run every system
    /// in order, drain jobs, apply command buffers.
    pub fn tick(&mut self) -> Result<(), ScheduleError> {
        self.world.resource_mut::<Time>().advance();
        self.schedule.tick(&mut self.world, &self.jobs)
    }

    /// Completed tick count.
    pub fn ticks(&self) -> u64 {
        self.world.resource::<Time>().ticks()
    }

    /// Stop every system, firing `on_stop` hooks.
    pub fn shutdown(&mut self) {
        self.world.wait_idle();
        self.schedule.shutdown(&mut self.world);
    }

    /// A serializable snapshot of runtime state for diagnostics tooling.
    #[cfg(feature = "diagnostics")]
    pub fn snapshot(&self) -> crate::diag::RuntimeSnapshot {
        crate::diag::RuntimeSnapshot::capture(&self.world, &self.jobs, &self.schedule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::query::Query;
    use crate::ecs::system::{Access, FnSystem};

    #[derive(Debug, PartialEq)]
    struct Counter(u64);

    #[test]
    fn ticks_advance_time_and_systems() {
        let mut runtime = Runtime::new()
            .setup(|world| {
                world.spawn((Counter(0),));
            })
            .add_system(FnSystem::new(
                "count",
                Access::new().write::<Counter>(),
                |ctx| {
                    ctx.schedule(&Query::new().write::<Counter>(), |batch| {
                        for row in 0..batch.len() {
                            batch.get_mut::<Counter>(row)?.0 += 1;
                        }
                        Ok(())
                    });
                },
            ))
            .build()
            .unwrap();

        runtime.tick().unwrap();
        runtime.tick().unwrap();
        runtime.tick().unwrap();

        assert_eq!(runtime.ticks(), 3);
        let world = runtime.world();
        let entity = world.singleton::<Counter>().unwrap();
        assert_eq!(world.get::<Counter>(entity).unwrap().0, 3);
    }

    #[test]
    fn build_rejects_bad_ordering() {
        let result = Runtime::new()
            .add_system_with(
                FnSystem::new("a", Access::new(), |_| {}),
                SystemConfig::new().before_system("a"),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn world_mut_between_ticks_is_a_legal_fast_path() {
        let mut runtime = Runtime::new().build().unwrap();
        let entity = runtime.world_mut().spawn((Counter(9),));
        runtime.tick().unwrap();
        assert_eq!(runtime.world().get::<Counter>(entity).unwrap().0, 9);
        runtime.world_mut().despawn(entity).unwrap();
        assert_eq!(runtime.world().entity_count(), 0);
    }
}
