//! # Command Buffer — Deferred Structural Mutation
//!
//! Structural changes (spawn, despawn, insert, remove) are illegal while
//! jobs hold access to the store. A [`CommandBuffer`] is the sanctioned
//! detour: work records the *intent* as plain data during the pass, and the
//! whole log is applied in one single-threaded playback at a safe point.
//!
//! ```text
//! read pass (parallel)            sync point (single-threaded)
//! ┌──────────────────┐
//! │ batch ── record ─┼──┐
//! │ batch ── record ─┼──┼──▶ CommandBuffer ──▶ playback(&mut World)
//! │ batch ── record ─┼──┘         ordered log, applied once
//! └──────────────────┘
//! ```
//!
//! Recording is `&self` and internally locked, so concurrent batches of a
//! parallel job can append freely; the records land in a single total order.
//!
//! ## Pending entities
//!
//! A spawn recorded into a buffer has no real [`Entity`] yet. It returns a
//! [`PendingEntity`] placeholder instead, which later records may target;
//! playback resolves placeholders in record order, so spawn-then-insert
//! against the same pending entity does what it looks like it does.
//!
//! ## Lifecycle
//!
//! Created empty, appended to during one pass, played back exactly once,
//! then dead: a second playback returns
//! [`CommandError::AlreadyPlayedBack`]. Records whose target turned stale
//! between recording and playback are skipped with a warning and counted in
//! the [`PlaybackReport`]; the rest of the log still applies.

use std::any::TypeId;
use std::sync::Mutex;

use thiserror::Error;

use crate::ecs::component::BoxedComponent;
use crate::ecs::entity::Entity;
use crate::ecs::world::{Bundle, World, WorldError};

/// Errors raised by command buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The buffer was already played back; its records are gone.
    #[error("command buffer was already played back")]
    AlreadyPlayedBack,

    /// Playback ran while jobs still held access to the store. Wait for
    /// quiescence first.
    #[error("playback rejected: {0} job(s) in flight")]
    JobsInFlight(usize),
}

/// Placeholder for an entity that will exist once the buffer plays back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntity(u32);

/// A record's target: either a real entity or a placeholder from an earlier
/// [`record_spawn`](CommandBuffer::record_spawn) in the same buffer.
#[derive(Debug, Clone, Copy)]
pub enum CommandTarget {
    Real(Entity),
    Pending(PendingEntity),
}

impl From<Entity> for CommandTarget {
    fn from(entity: Entity) -> Self {
        Self::Real(entity)
    }
}

impl From<PendingEntity> for CommandTarget {
    fn from(pending: PendingEntity) -> Self {
        Self::Pending(pending)
    }
}

enum Command {
    Spawn {
        components: Vec<(TypeId, &'static str, BoxedComponent)>,
    },
    Despawn {
        target: CommandTarget,
    },
    Insert {
        target: CommandTarget,
        type_id: TypeId,
        name: &'static str,
        value: BoxedComponent,
    },
    Remove {
        target: CommandTarget,
        type_id: TypeId,
        name: &'static str,
    },
}

struct Inner {
    records: Vec<Command>,
    spawns: u32,
    played_back: bool,
}

/// An ordered, append-only log of structural mutations.
pub struct CommandBuffer {
    inner: Mutex<Inner>,
}

/// What a playback actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Records applied to the store.
    pub applied: usize,
    /// Records skipped because their target was stale at playback time.
    pub skipped: usize,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: Vec::new(),
                spawns: 0,
                played_back: false,
            }),
        }
    }

    /// Record the spawn of an entity with the given bundle. The returned
    /// placeholder can target later records in this same buffer.
    pub fn record_spawn<B: Bundle>(&self, bundle: B) -> PendingEntity {
        let mut inner = self.lock();
        let pending = PendingEntity(inner.spawns);
        inner.spawns += 1;
        inner.records.push(Command::Spawn {
            components: bundle.into_components(),
        });
        pending
    }

    /// Record the despawn of an entity.
    pub fn record_despawn(&self, target: impl Into<CommandTarget>) {
        self.lock().records.push(Command::Despawn {
            target: target.into(),
        });
    }

    /// Record adding component `T` (or replacing it, if the entity already
    /// carries one) on an entity.
    pub fn record_insert<T: 'static + Send + Sync>(
        &self,
        target: impl Into<CommandTarget>,
        value: T,
    ) {
        self.lock().records.push(Command::Insert {
            target: target.into(),
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            value: Box::new(value),
        });
    }

    /// Record removing component `T` from an entity.
    pub fn record_remove<T: 'static + Send + Sync>(&self, target: impl Into<CommandTarget>) {
        self.lock().records.push(Command::Remove {
            target: target.into(),
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        });
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Apply every record, in the order recorded, exactly once.
    ///
    /// Playback is a single-threaded structural phase: it refuses to run
    /// while any job is in flight. Afterwards the buffer is spent.
    pub fn playback(&self, world: &mut World) -> Result<PlaybackReport, CommandError> {
        let records = {
            let mut inner = self.lock();
            if inner.played_back {
                return Err(CommandError::AlreadyPlayedBack);
            }
            match world.jobs_in_flight() {
                0 => {}
                n => return Err(CommandError::JobsInFlight(n)),
            }
            inner.played_back = true;
            std::mem::take(&mut inner.records)
        };

        let mut spawned: Vec<Entity> = Vec::new();
        let mut report = PlaybackReport {
            applied: 0,
            skipped: 0,
        };

        for command in records {
            match command {
                Command::Spawn { components } => {
                    spawned.push(world.spawn_boxed(components));
                    report.applied += 1;
                }
                Command::Despawn { target } => {
                    let entity = resolve(target, &spawned);
                    apply(world.despawn(entity), "despawn", entity, &mut report);
                }
                Command::Insert {
                    target,
                    type_id,
                    name,
                    value,
                } => {
                    let entity = resolve(target, &spawned);
                    apply(
                        world.insert_boxed(entity, type_id, name, value),
                        "insert",
                        entity,
                        &mut report,
                    );
                }
                Command::Remove {
                    target,
                    type_id,
                    name,
                } => {
                    let entity = resolve(target, &spawned);
                    apply(
                        world.remove_boxed(entity, type_id, name),
                        "remove",
                        entity,
                        &mut report,
                    );
                }
            }
        }

        log::debug!(
            "command playback: {} applied, {} skipped",
            report.applied,
            report.skipped
        );
        Ok(report)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("command buffer lock poisoned")
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(target: CommandTarget, spawned: &[Entity]) -> Entity {
    match target {
        CommandTarget::Real(entity) => entity,
        // In-range by construction: the placeholder came from a spawn that
        // precedes this record in the same buffer.
        CommandTarget::Pending(PendingEntity(index)) => spawned[index as usize],
    }
}

fn apply(
    result: Result<(), WorldError>,
    what: &str,
    entity: Entity,
    report: &mut PlaybackReport,
) {
    match result {
        Ok(()) => report.applied += 1,
        Err(error) => {
            report.skipped += 1;
            log::warn!("skipping recorded {what} on {entity:?}: {error}");
        }
    }
}
