//! Diagnostics snapshots.
//!
//! Enabled by the `diagnostics` feature (on by default). A
//! [`RuntimeSnapshot`] is a plain serializable picture of the runtime at one
//! instant: entity and archetype population, per-system timings from the
//! last tick, and job counters. External tooling consumes it as JSON; the
//! runtime itself never reads it back.

use serde::Serialize;

use crate::ecs::system::Schedule;
use crate::ecs::world::World;
use crate::job::JobScheduler;
use crate::time::Time;

/// Initialise leveled logging from the environment (`RUST_LOG`), defaulting
/// to `info`. Safe to call more than once; later calls are no-ops.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// One archetype's population.
#[derive(Serialize)]
pub struct ArchetypeSnapshot {
    pub entity_count: usize,
    pub component_names: Vec<String>,
}

/// Wall-clock cost of one system's `update` in the last tick.
#[derive(Serialize)]
pub struct SystemTimingSnapshot {
    pub name: String,
    pub duration_us: f64,
}

/// Job scheduler counters since startup.
#[derive(Serialize)]
pub struct JobCounters {
    pub scheduled: u64,
    pub completed: u64,
    pub failed: u64,
}

/// A serializable picture of the runtime at one instant.
#[derive(Serialize)]
pub struct RuntimeSnapshot {
    pub tick: u64,
    pub entity_count: usize,
    pub archetype_count: usize,
    pub archetypes: Vec<ArchetypeSnapshot>,
    pub system_timings: Vec<SystemTimingSnapshot>,
    pub jobs: JobCounters,
}

impl RuntimeSnapshot {
    pub(crate) fn capture(world: &World, jobs: &JobScheduler, schedule: &Schedule) -> Self {
        use std::sync::atomic::Ordering;

        let archetypes = world
            .archetypes()
            .iter()
            .filter(|archetype| !archetype.is_empty())
            .map(|archetype| ArchetypeSnapshot {
                entity_count: archetype.len(),
                component_names: archetype
                    .component_names()
                    .iter()
                    .map(|name| short_type_name(name))
                    .collect(),
            })
            .collect();

        let stats = jobs.stats();
        Self {
            tick: world
                .get_resource::<Time>()
                .map(|time| time.ticks())
                .unwrap_or(0),
            entity_count: world.entity_count(),
            archetype_count: world.archetype_count(),
            archetypes,
            system_timings: schedule
                .timings
                .iter()
                .map(|timing| SystemTimingSnapshot {
                    name: timing.name.clone(),
                    duration_us: timing.duration_us,
                })
                .collect(),
            jobs: JobCounters {
                scheduled: stats.scheduled.load(Ordering::Relaxed),
                completed: stats.completed.load(Ordering::Relaxed),
                failed: stats.failed.load(Ordering::Relaxed),
            },
        }
    }

    /// The snapshot as a JSON string, the wire format diagnostics tooling
    /// expects.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("snapshot serialization cannot fail")
    }
}

/// Strip the module path from a fully-qualified type name
/// (`vefr::demo::Position` becomes `Position`).
fn short_type_name(full: &str) -> String {
    full.rsplit("::").next().unwrap_or(full).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    struct Velocity;

    #[test]
    fn snapshot_reflects_population() {
        let mut world = World::new();
        world.spawn((Position, Velocity));
        world.spawn((Position,));
        let jobs = JobScheduler::new(1);
        let schedule = Schedule::new();

        let snapshot = RuntimeSnapshot::capture(&world, &jobs, &schedule);
        assert_eq!(snapshot.entity_count, 2);
        assert_eq!(snapshot.archetype_count, 2);
        assert_eq!(snapshot.archetypes.len(), 2);

        let json = snapshot.to_json();
        assert!(json.contains("\"entity_count\":2"));
        assert!(json.contains("Position"));
    }

    #[test]
    fn short_names_drop_the_path() {
        assert_eq!(short_type_name("a::b::Component"), "Component");
        assert_eq!(short_type_name("Bare"), "Bare");
    }
}
