//! # World — The Component Store
//!
//! The [`World`] owns every entity, every component value, and the resource
//! map. It is the single source of truth the rest of the runtime reads from
//! and the only place structural changes are applied.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ World                                                │
//! │                                                      │
//! │  EntityAllocator: slot + generation lifecycle        │
//! │                                                      │
//! │  archetypes: Vec<Archetype>   (stable, ordered)      │
//! │  archetype_index: key → index into the vec           │
//! │                                                      │
//! │  locations: entity index → (archetype, row)          │
//! │                                                      │
//! │  resources: TypeId → Box<dyn Any>    (singletons)    │
//! │  hooks: per-type insert/remove callbacks             │
//! │  gate: in-flight job counter                         │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Archetypes live in a plain `Vec` with a key index on the side, so archetype
//! order (and with it query snapshot order) is stable across runs: first
//! archetype created is first enumerated.
//!
//! ## Structural changes vs. data writes
//!
//! A *data write* ([`set`](World::set), [`get_mut`](World::get_mut)) changes a
//! value in place and goes through the column lock, so it is safe at any time.
//! A *structural change* (spawn into a new shape, despawn, insert, remove)
//! relocates rows and rewrites the location table. Structural changes are
//! only legal while no scheduled job is in flight; otherwise they fail with
//! [`WorldError::JobsInFlight`] and must be routed through a
//! [`CommandBuffer`](crate::commands::CommandBuffer) instead. Spawning is the
//! one exception: it only appends rows, which cannot invalidate any running
//! job's view.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::job::JobGate;

use super::archetype::{Archetype, archetype_key};
use super::component::{BoxedComponent, ComponentColumn};
use super::entity::{Entity, EntityAllocator};
use super::query::{AccessMode, EntityBatch, Query, QueryParam};

/// Errors raised by store operations. All of them are recoverable: the store
/// is left unchanged by a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// The entity was despawned (or its slot recycled) before this call.
    /// Drop the handle.
    #[error("stale entity {0:?}")]
    StaleEntity(Entity),

    /// The entity is alive but does not carry the requested component.
    #[error("entity {entity:?} has no `{component}` component")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },

    /// A structural change was attempted while scheduled jobs still hold
    /// access to the store. Record it into a command buffer instead.
    #[error("structural change rejected: {0} job(s) in flight")]
    JobsInFlight(usize),

    /// No entity carries the requested singleton component.
    #[error("no entity carries `{0}`")]
    MissingSingleton(&'static str),

    /// More than one entity carries the requested singleton component.
    #[error("singleton lookup for `{0}` matched more than one entity")]
    AmbiguousSingleton(&'static str),
}

/// Where an entity's data lives.
#[derive(Clone, Copy)]
struct EntityLocation {
    archetype: usize,
    row: usize,
}

type Hook = Box<dyn Fn(Entity, &(dyn Any + Send + Sync)) + Send + Sync>;

/// Shared read access to one component, holding the column lock while alive.
pub struct ComponentRef<'w, T> {
    guard: RwLockReadGuard<'w, ComponentColumn>,
    row: usize,
    marker: PhantomData<T>,
}

impl<T: 'static> Deref for ComponentRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Row and type were validated when the ref was created.
        self.guard.get::<T>(self.row).expect("component ref invalidated")
    }
}

/// Exclusive access to one component, holding the column lock while alive.
pub struct ComponentRefMut<'w, T> {
    guard: RwLockWriteGuard<'w, ComponentColumn>,
    row: usize,
    marker: PhantomData<T>,
}

impl<T: 'static> Deref for ComponentRefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.get::<T>(self.row).expect("component ref invalidated")
    }
}

impl<T: 'static> DerefMut for ComponentRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard
            .get_mut::<T>(self.row)
            .expect("component ref invalidated")
    }
}

/// The central container for all simulation state.
pub struct World {
    allocator: EntityAllocator,
    archetypes: Vec<Archetype>,
    archetype_index: HashMap<Vec<TypeId>, usize>,
    locations: HashMap<u32, EntityLocation>,
    resources: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    insert_hooks: HashMap<TypeId, Hook>,
    remove_hooks: HashMap<TypeId, Hook>,
    gate: Arc<JobGate>,
}

impl World {
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::new(),
            archetypes: Vec::new(),
            archetype_index: HashMap::new(),
            locations: HashMap::new(),
            resources: HashMap::new(),
            insert_hooks: HashMap::new(),
            remove_hooks: HashMap::new(),
            gate: Arc::new(JobGate::new()),
        }
    }

    // ── Spawn / Despawn ──────────────────────────────────────────────

    /// Spawn an entity with a bundle of components (a tuple):
    ///
    /// ```ignore
    /// let e = world.spawn((Position { x: 0.0 }, Velocity { dx: 1.0 }));
    /// ```
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        self.spawn_boxed(bundle.into_components())
    }

    /// Spawn an entity with no components.
    pub fn spawn_empty(&mut self) -> Entity {
        self.spawn_boxed(Vec::new())
    }

    /// Type-erased spawn, shared with command playback.
    pub(crate) fn spawn_boxed(
        &mut self,
        values: Vec<(TypeId, &'static str, BoxedComponent)>,
    ) -> Entity {
        let entity = self.allocator.allocate();
        for (type_id, _, value) in &values {
            self.run_insert_hook(*type_id, entity, value.as_ref());
        }
        let types: Vec<(TypeId, &'static str)> =
            values.iter().map(|(id, name, _)| (*id, *name)).collect();
        let archetype = self.ensure_archetype(&types);
        let row = self.archetypes[archetype].push_row(entity, values);
        self.locations
            .insert(entity.index, EntityLocation { archetype, row });
        entity
    }

    /// Despawn an entity. Its slot's generation is bumped, so every handle to
    /// it becomes stale. Remove hooks fire for each component it carried.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.structural_ok()?;
        if !self.allocator.is_alive(entity) {
            return Err(WorldError::StaleEntity(entity));
        }
        let loc = self
            .locations
            .remove(&entity.index)
            .expect("live entity must have a location");
        let (values, moved) = self.archetypes[loc.archetype].take_row(loc.row);
        if let Some(moved) = moved {
            self.locations
                .get_mut(&moved.index)
                .expect("moved entity must have a location")
                .row = loc.row;
        }
        for (type_id, value) in &values {
            self.run_remove_hook(*type_id, entity, value.as_ref());
        }
        self.allocator.deallocate(entity);
        Ok(())
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    // ── Component Access ─────────────────────────────────────────────

    /// Shared access to one component of one entity.
    pub fn get<T: 'static + Send + Sync>(
        &self,
        entity: Entity,
    ) -> Result<ComponentRef<'_, T>, WorldError> {
        let loc = self.location(entity)?;
        let column = self.archetypes[loc.archetype]
            .column(TypeId::of::<T>())
            .ok_or(WorldError::MissingComponent {
                entity,
                component: std::any::type_name::<T>(),
            })?;
        let guard = column.read().expect("column lock poisoned");
        Ok(ComponentRef {
            guard,
            row: loc.row,
            marker: PhantomData,
        })
    }

    /// Exclusive access to one component of one entity.
    ///
    /// This is a data write, not a structural change: it is legal while jobs
    /// are in flight and will block on the column lock until any job writing
    /// the same component type finishes.
    pub fn get_mut<T: 'static + Send + Sync>(
        &self,
        entity: Entity,
    ) -> Result<ComponentRefMut<'_, T>, WorldError> {
        let loc = self.location(entity)?;
        let column = self.archetypes[loc.archetype]
            .column(TypeId::of::<T>())
            .ok_or(WorldError::MissingComponent {
                entity,
                component: std::any::type_name::<T>(),
            })?;
        let guard = column.write().expect("column lock poisoned");
        Ok(ComponentRefMut {
            guard,
            row: loc.row,
            marker: PhantomData,
        })
    }

    /// Overwrite an existing component value. Fails with
    /// [`WorldError::MissingComponent`] if the entity does not already carry
    /// `T`; use [`insert`](World::insert) to add it.
    pub fn set<T: 'static + Send + Sync>(
        &self,
        entity: Entity,
        value: T,
    ) -> Result<(), WorldError> {
        *self.get_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Whether the entity carries component `T`. `false` for stale handles.
    pub fn contains<T: 'static + Send + Sync>(&self, entity: Entity) -> bool {
        self.location(entity)
            .map(|loc| self.archetypes[loc.archetype].has(TypeId::of::<T>()))
            .unwrap_or(false)
    }

    // ── Structural Changes ───────────────────────────────────────────

    /// Add component `T` to an entity, moving it to the matching archetype.
    /// If the entity already carries `T`, the value is replaced in place (a
    /// data write, no move, no hooks).
    pub fn insert<T: 'static + Send + Sync>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<(), WorldError> {
        self.insert_boxed(
            entity,
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            Box::new(value),
        )
    }

    /// Type-erased insert, shared with command playback.
    pub(crate) fn insert_boxed(
        &mut self,
        entity: Entity,
        type_id: TypeId,
        name: &'static str,
        value: BoxedComponent,
    ) -> Result<(), WorldError> {
        let loc = self.location(entity)?;

        if self.archetypes[loc.archetype].has(type_id) {
            let column = self.archetypes[loc.archetype]
                .column(type_id)
                .expect("signature checked above");
            column
                .write()
                .expect("column lock poisoned")
                .replace(loc.row, value);
            return Ok(());
        }

        self.structural_ok()?;
        self.run_insert_hook(type_id, entity, value.as_ref());

        // Target signature: current types plus the new one.
        let old = &self.archetypes[loc.archetype];
        let mut types: Vec<(TypeId, &'static str)> = old
            .key()
            .iter()
            .map(|id| (*id, old.type_name(*id).unwrap_or("<unknown>")))
            .collect();
        types.push((type_id, name));
        let target = self.ensure_archetype(&types);

        let (values, moved) = self.archetypes[loc.archetype].take_row(loc.row);
        if let Some(moved) = moved {
            self.locations
                .get_mut(&moved.index)
                .expect("moved entity must have a location")
                .row = loc.row;
        }

        let names: HashMap<TypeId, &'static str> = types.iter().copied().collect();
        let mut row_values: Vec<(TypeId, &'static str, BoxedComponent)> = values
            .into_iter()
            .map(|(id, v)| (id, names[&id], v))
            .collect();
        row_values.push((type_id, name, value));

        let row = self.archetypes[target].push_row(entity, row_values);
        self.locations.insert(
            entity.index,
            EntityLocation {
                archetype: target,
                row,
            },
        );
        Ok(())
    }

    /// Remove component `T` from an entity, moving it to the matching
    /// archetype. The remove hook fires with the removed value before it is
    /// dropped.
    pub fn remove<T: 'static + Send + Sync>(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.remove_boxed(entity, TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// Type-erased remove, shared with command playback.
    pub(crate) fn remove_boxed(
        &mut self,
        entity: Entity,
        type_id: TypeId,
        name: &'static str,
    ) -> Result<(), WorldError> {
        let loc = self.location(entity)?;
        if !self.archetypes[loc.archetype].has(type_id) {
            return Err(WorldError::MissingComponent {
                entity,
                component: name,
            });
        }
        self.structural_ok()?;

        let old = &self.archetypes[loc.archetype];
        let types: Vec<(TypeId, &'static str)> = old
            .key()
            .iter()
            .filter(|id| **id != type_id)
            .map(|id| (*id, old.type_name(*id).unwrap_or("<unknown>")))
            .collect();
        let target = self.ensure_archetype(&types);

        let (values, moved) = self.archetypes[loc.archetype].take_row(loc.row);
        if let Some(moved) = moved {
            self.locations
                .get_mut(&moved.index)
                .expect("moved entity must have a location")
                .row = loc.row;
        }

        let names: HashMap<TypeId, &'static str> = types.iter().copied().collect();
        let mut row_values = Vec::with_capacity(values.len().saturating_sub(1));
        for (id, value) in values {
            if id == type_id {
                self.run_remove_hook(id, entity, value.as_ref());
            } else {
                row_values.push((id, names[&id], value));
            }
        }

        let row = self.archetypes[target].push_row(entity, row_values);
        self.locations.insert(
            entity.index,
            EntityLocation {
                archetype: target,
                row,
            },
        );
        Ok(())
    }

    // ── Resources ────────────────────────────────────────────────────

    /// Insert a resource (a singleton value keyed by type). Replaces any
    /// existing resource of the same type.
    pub fn insert_resource<T: 'static + Send + Sync>(&mut self, value: T) {
        self.resources.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Shared reference to a resource.
    ///
    /// # Panics
    ///
    /// Panics if the resource was never inserted.
    pub fn resource<T: 'static + Send + Sync>(&self) -> &T {
        self.get_resource::<T>().unwrap_or_else(|| {
            panic!(
                "resource `{}` not found, was it inserted?",
                std::any::type_name::<T>()
            )
        })
    }

    /// Mutable reference to a resource.
    ///
    /// # Panics
    ///
    /// Panics if the resource was never inserted.
    pub fn resource_mut<T: 'static + Send + Sync>(&mut self) -> &mut T {
        self.get_resource_mut::<T>().unwrap_or_else(|| {
            panic!(
                "resource `{}` not found, was it inserted?",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn get_resource<T: 'static + Send + Sync>(&self) -> Option<&T> {
        self.resources
            .get(&TypeId::of::<T>())
            .and_then(|r| r.downcast_ref::<T>())
    }

    pub fn get_resource_mut<T: 'static + Send + Sync>(&mut self) -> Option<&mut T> {
        self.resources
            .get_mut(&TypeId::of::<T>())
            .and_then(|r| r.downcast_mut::<T>())
    }

    pub fn has_resource<T: 'static + Send + Sync>(&self) -> bool {
        self.resources.contains_key(&TypeId::of::<T>())
    }

    // ── Singleton Entities ───────────────────────────────────────────

    /// The unique entity carrying component `T`.
    ///
    /// This is a convenience over the query engine, not a separate mechanism:
    /// it enumerates archetypes containing `T` and demands exactly one match.
    pub fn singleton<T: 'static + Send + Sync>(&self) -> Result<Entity, WorldError> {
        let type_id = TypeId::of::<T>();
        let mut found = None;
        for archetype in &self.archetypes {
            if !archetype.has(type_id) {
                continue;
            }
            for &entity in archetype.entities() {
                if found.is_some() {
                    return Err(WorldError::AmbiguousSingleton(std::any::type_name::<T>()));
                }
                found = Some(entity);
            }
        }
        found.ok_or(WorldError::MissingSingleton(std::any::type_name::<T>()))
    }

    // ── Component Hooks ──────────────────────────────────────────────

    /// Register a hook that runs whenever a `T` is attached to an entity
    /// (spawn, insert, or command playback). For components wrapping foreign
    /// resources this is where the external side gets created.
    pub fn on_insert<T: 'static + Send + Sync>(
        &mut self,
        hook: impl Fn(Entity, &T) + Send + Sync + 'static,
    ) {
        self.insert_hooks.insert(
            TypeId::of::<T>(),
            Box::new(move |entity, value: &(dyn Any + Send + Sync)| {
                if let Some(value) = value.downcast_ref::<T>() {
                    hook(entity, value);
                }
            }),
        );
    }

    /// Register a hook that runs whenever a `T` is detached (remove, despawn,
    /// or command playback), with the value it held. Foreign resources get
    /// released here, never implicitly.
    pub fn on_remove<T: 'static + Send + Sync>(
        &mut self,
        hook: impl Fn(Entity, &T) + Send + Sync + 'static,
    ) {
        self.remove_hooks.insert(
            TypeId::of::<T>(),
            Box::new(move |entity, value: &(dyn Any + Send + Sync)| {
                if let Some(value) = value.downcast_ref::<T>() {
                    hook(entity, value);
                }
            }),
        );
    }

    fn run_insert_hook(&self, type_id: TypeId, entity: Entity, value: &(dyn Any + Send + Sync)) {
        if let Some(hook) = self.insert_hooks.get(&type_id) {
            hook(entity, value);
        }
    }

    fn run_remove_hook(&self, type_id: TypeId, entity: Entity, value: &(dyn Any + Send + Sync)) {
        if let Some(hook) = self.remove_hooks.get(&type_id) {
            hook(entity, value);
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Capture the entities currently matching `query`, in archetype order.
    ///
    /// The result is a copy: structural changes after the call never affect
    /// it. Re-run the query for a current view.
    pub fn snapshot(&self, query: &Query) -> Vec<Entity> {
        let mut out = Vec::new();
        for archetype in &self.archetypes {
            if query.matches(archetype) {
                out.extend_from_slice(archetype.entities());
            }
        }
        out
    }

    /// Partition the entities matching `query` into batches of at most
    /// `batch_size` rows. A batch never spans two archetypes, so every batch
    /// is one contiguous slice of one storage segment.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is zero.
    pub fn batches(&self, query: &Query, batch_size: usize) -> Vec<EntityBatch> {
        assert!(batch_size > 0, "batch size must be non-zero");
        let mut out = Vec::new();
        for (index, archetype) in self.archetypes.iter().enumerate() {
            if !query.matches(archetype) || archetype.is_empty() {
                continue;
            }
            let len = archetype.len();
            let mut start = 0;
            while start < len {
                let end = (start + batch_size).min(len);
                out.push(EntityBatch {
                    archetype: index,
                    rows: start..end,
                    entities: archetype.entities()[start..end].to_vec(),
                });
                start = end;
            }
        }
        out
    }

    /// Visit each batch of `query`'s current matches in order, one call per
    /// batch. Equivalent to iterating [`batches`](World::batches); the job
    /// scheduler uses the same partitioning for parallel dispatch.
    pub fn for_each_batch(
        &self,
        query: &Query,
        batch_size: usize,
        mut f: impl FnMut(&EntityBatch),
    ) {
        for batch in self.batches(query, batch_size) {
            f(&batch);
        }
    }

    /// Iterate every entity carrying the tuple's component types:
    ///
    /// ```ignore
    /// world.for_each::<(&mut Position, &Velocity)>(|entity, (pos, vel)| {
    ///     pos.x += vel.dx;
    /// });
    /// ```
    ///
    /// Re-evaluated live: a structural change before this call is visible.
    ///
    /// # Panics
    ///
    /// Panics if the tuple names the same component type twice with write
    /// access anywhere, which would alias the column.
    pub fn for_each<Q: QueryParam>(&self, mut f: impl FnMut(Entity, Q::Item<'_>)) {
        self.for_each_inner::<Q>(&[], &[], &mut f);
    }

    /// Like [`for_each`](World::for_each), but only for entities that also
    /// carry marker component `M` (which is not yielded).
    pub fn for_each_with<Q: QueryParam, M: 'static + Send + Sync>(
        &self,
        mut f: impl FnMut(Entity, Q::Item<'_>),
    ) {
        self.for_each_inner::<Q>(&[TypeId::of::<M>()], &[], &mut f);
    }

    /// Like [`for_each`](World::for_each), but skipping entities that carry
    /// component `X`.
    pub fn for_each_without<Q: QueryParam, X: 'static + Send + Sync>(
        &self,
        mut f: impl FnMut(Entity, Q::Item<'_>),
    ) {
        self.for_each_inner::<Q>(&[], &[TypeId::of::<X>()], &mut f);
    }

    fn for_each_inner<Q: QueryParam>(
        &self,
        extra_required: &[TypeId],
        excluded: &[TypeId],
        f: &mut impl FnMut(Entity, Q::Item<'_>),
    ) {
        let accesses = Q::accesses();
        for (i, a) in accesses.iter().enumerate() {
            for b in &accesses[i + 1..] {
                if a.0 == b.0 && (a.1 == AccessMode::Write || b.1 == AccessMode::Write) {
                    panic!("query names `{}` twice with write access", a.2);
                }
            }
        }

        let mut required = Q::type_ids();
        required.extend_from_slice(extra_required);

        for archetype in &self.archetypes {
            if archetype.is_empty()
                || !archetype.has_all(&required)
                || !archetype.has_none(excluded)
            {
                continue;
            }
            let mut guard = Q::acquire(archetype);
            for row in 0..archetype.len() {
                f(archetype.entities()[row], Q::fetch(&mut guard, row));
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn location(&self, entity: Entity) -> Result<EntityLocation, WorldError> {
        if !self.allocator.is_alive(entity) {
            return Err(WorldError::StaleEntity(entity));
        }
        Ok(*self
            .locations
            .get(&entity.index)
            .expect("live entity must have a location"))
    }

    /// Index of the archetype for the given signature, creating it on first
    /// use.
    fn ensure_archetype(&mut self, types: &[(TypeId, &'static str)]) -> usize {
        let key = archetype_key(types.iter().map(|(id, _)| *id).collect());
        if let Some(&index) = self.archetype_index.get(&key) {
            return index;
        }
        let index = self.archetypes.len();
        self.archetypes.push(Archetype::new(types));
        self.archetype_index.insert(key, index);
        log::debug!("new archetype #{index} with {} component(s)", types.len());
        index
    }

    fn structural_ok(&self) -> Result<(), WorldError> {
        match self.gate.in_flight() {
            0 => Ok(()),
            n => Err(WorldError::JobsInFlight(n)),
        }
    }

    pub(crate) fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    pub(crate) fn job_gate(&self) -> &Arc<JobGate> {
        &self.gate
    }

    /// Number of scheduled jobs that have not yet completed.
    pub fn jobs_in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Block until every scheduled job has completed.
    pub fn wait_idle(&self) {
        self.gate.wait_idle();
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

// ── Bundles ──────────────────────────────────────────────────────────────

/// A set of components spawned together. Implemented for tuples of up to
/// eight components.
pub trait Bundle {
    /// Erase the bundle into (type, name, value) triples.
    fn into_components(self) -> Vec<(TypeId, &'static str, BoxedComponent)>;
}

macro_rules! impl_bundle {
    ($($T:ident),+) => {
        impl<$($T: 'static + Send + Sync),+> Bundle for ($($T,)+) {
            #[allow(non_snake_case)]
            fn into_components(self) -> Vec<(TypeId, &'static str, BoxedComponent)> {
                let ($($T,)+) = self;
                vec![
                    $((
                        TypeId::of::<$T>(),
                        std::any::type_name::<$T>(),
                        Box::new($T) as BoxedComponent,
                    ),)+
                ]
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    #[derive(Debug, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    struct Health(u32);
    struct Marker;
    struct Shield;

    #[test]
    fn spawn_and_read() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 1.0, y: 2.0 }, Velocity { dx: 0.5, dy: 0.0 }));
        assert!(world.is_alive(e));
        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.get::<Position>(e).unwrap().x, 1.0);
        assert_eq!(world.get::<Velocity>(e).unwrap().dx, 0.5);
    }

    #[test]
    fn get_missing_component() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0, y: 0.0 },));
        let err = world.get::<Velocity>(e).err().unwrap();
        assert!(matches!(err, WorldError::MissingComponent { .. }));
    }

    #[test]
    fn stale_handle_errors_everywhere() {
        let mut world = World::new();
        let e = world.spawn((Health(1),));
        world.despawn(e).unwrap();

        assert!(matches!(
            world.get::<Health>(e),
            Err(WorldError::StaleEntity(_))
        ));
        assert!(matches!(
            world.set(e, Health(2)),
            Err(WorldError::StaleEntity(_))
        ));
        assert!(matches!(
            world.insert(e, Marker),
            Err(WorldError::StaleEntity(_))
        ));
        assert!(matches!(
            world.remove::<Health>(e),
            Err(WorldError::StaleEntity(_))
        ));
        assert!(matches!(
            world.despawn(e),
            Err(WorldError::StaleEntity(_))
        ));
    }

    #[test]
    fn recycled_slot_does_not_alias() {
        let mut world = World::new();
        let old = world.spawn((Health(1),));
        world.despawn(old).unwrap();
        let new = world.spawn((Health(2),));
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        // The stale handle still fails even though the slot is occupied.
        assert!(world.get::<Health>(old).is_err());
        assert_eq!(world.get::<Health>(new).unwrap().0, 2);
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut world = World::new();
        let e = world.spawn((Health(10),));
        world.set(e, Health(99)).unwrap();
        assert_eq!(world.get::<Health>(e).unwrap().0, 99);
    }

    #[test]
    fn set_requires_existing_component() {
        let mut world = World::new();
        let e = world.spawn((Health(10),));
        assert!(matches!(
            world.set(e, Marker),
            Err(WorldError::MissingComponent { .. })
        ));
    }

    #[test]
    fn insert_moves_archetype_and_keeps_data() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 1.0, y: 2.0 },));
        world.insert(e, Velocity { dx: 3.0, dy: 4.0 }).unwrap();

        assert_eq!(world.get::<Position>(e).unwrap().x, 1.0);
        assert_eq!(world.get::<Velocity>(e).unwrap().dy, 4.0);
        assert_eq!(world.archetype_count(), 2);
    }

    #[test]
    fn insert_existing_replaces() {
        let mut world = World::new();
        let e = world.spawn((Health(1),));
        world.insert(e, Health(7)).unwrap();
        assert_eq!(world.get::<Health>(e).unwrap().0, 7);
        assert_eq!(world.archetype_count(), 1);
    }

    #[test]
    fn remove_moves_archetype() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 1.0, y: 2.0 }, Shield));
        world.remove::<Shield>(e).unwrap();
        assert!(!world.contains::<Shield>(e));
        assert_eq!(world.get::<Position>(e).unwrap().y, 2.0);
    }

    #[test]
    fn remove_missing_component_errors() {
        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0, y: 0.0 },));
        assert!(matches!(
            world.remove::<Shield>(e),
            Err(WorldError::MissingComponent { .. })
        ));
    }

    #[test]
    fn despawn_swap_remove_fixes_locations() {
        let mut world = World::new();
        let a = world.spawn((Health(10),));
        let _b = world.spawn((Health(20),));
        let c = world.spawn((Health(30),));

        world.despawn(a).unwrap();
        // c was swapped into a's row; its data must still resolve.
        assert_eq!(world.get::<Health>(c).unwrap().0, 30);
    }

    #[test]
    fn snapshot_is_immune_to_later_changes() {
        let mut world = World::new();
        let a = world.spawn((Marker,));
        let q = Query::new().read::<Marker>();
        let snap = world.snapshot(&q);
        assert_eq!(snap, vec![a]);

        let b = world.spawn((Marker,));
        // Old snapshot unchanged, fresh snapshot sees both.
        assert_eq!(snap, vec![a]);
        assert_eq!(world.snapshot(&q), vec![a, b]);
    }

    #[test]
    fn query_scenario_remove_via_requeries() {
        // Spawn E with {Position, Shield}; require {Position} → present.
        // Remove Shield; require {Position, Shield} → absent; {Position} → present.
        let mut world = World::new();
        let e = world.spawn((Position { x: 0.0, y: 0.0 }, Shield));

        let pos_only = Query::new().read::<Position>();
        let pos_and_shield = Query::new().read::<Position>().read::<Shield>();

        assert!(world.snapshot(&pos_only).contains(&e));
        assert!(world.snapshot(&pos_and_shield).contains(&e));

        world.remove::<Shield>(e).unwrap();

        assert!(world.snapshot(&pos_only).contains(&e));
        assert!(!world.snapshot(&pos_and_shield).contains(&e));
    }

    #[test]
    fn excluded_components_filter_archetypes() {
        let mut world = World::new();
        let plain = world.spawn((Position { x: 0.0, y: 0.0 },));
        let shielded = world.spawn((Position { x: 1.0, y: 1.0 }, Shield));

        let q = Query::new().read::<Position>().without::<Shield>();
        let snap = world.snapshot(&q);
        assert!(snap.contains(&plain));
        assert!(!snap.contains(&shielded));
    }

    #[test]
    fn batches_never_span_archetypes() {
        let mut world = World::new();
        for i in 0..5 {
            world.spawn((Health(i),));
        }
        for i in 0..3 {
            world.spawn((Health(i), Marker));
        }

        let q = Query::new().read::<Health>();
        let batches = world.batches(&q, 2);
        // 5 rows split as 2+2+1, 3 rows split as 2+1.
        let lens_by_archetype = |idx: usize| -> Vec<usize> {
            batches
                .iter()
                .filter(|b| b.archetype == idx)
                .map(|b| b.len())
                .collect()
        };
        assert_eq!(batches.len(), 5);
        assert_eq!(lens_by_archetype(0), vec![2, 2, 1]);
        assert_eq!(lens_by_archetype(1), vec![2, 1]);
        for batch in &batches {
            assert_eq!(batch.entities.len(), batch.rows.len());
        }
    }

    #[test]
    fn for_each_mutates() {
        let mut world = World::new();
        world.spawn((Position { x: 0.0, y: 0.0 }, Velocity { dx: 1.0, dy: 2.0 }));
        world.spawn((Position { x: 5.0, y: 5.0 },));

        world.for_each::<(&mut Position, &Velocity)>(|_, (pos, vel)| {
            pos.x += vel.dx;
            pos.y += vel.dy;
        });

        let mut seen = Vec::new();
        world.for_each::<(&Position,)>(|_, (pos,)| seen.push((pos.x, pos.y)));
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, vec![(1.0, 2.0), (5.0, 5.0)]);
    }

    #[test]
    fn for_each_without_skips_marked() {
        let mut world = World::new();
        world.spawn((Health(1), Marker));
        world.spawn((Health(2),));

        let mut seen = Vec::new();
        world.for_each_without::<(&Health,), Marker>(|_, (h,)| seen.push(h.0));
        assert_eq!(seen, vec![2]);
    }

    #[test]
    #[should_panic(expected = "twice with write access")]
    fn aliasing_query_panics() {
        let mut world = World::new();
        world.spawn((Health(1),));
        world.for_each::<(&Health, &mut Health)>(|_, _| {});
    }

    #[test]
    fn singleton_lookup() {
        let mut world = World::new();
        assert!(matches!(
            world.singleton::<Marker>(),
            Err(WorldError::MissingSingleton(_))
        ));

        let e = world.spawn((Marker, Health(1)));
        assert_eq!(world.singleton::<Marker>().unwrap(), e);

        world.spawn((Marker,));
        assert!(matches!(
            world.singleton::<Marker>(),
            Err(WorldError::AmbiguousSingleton(_))
        ));
    }

    #[test]
    fn hooks_fire_on_structural_changes() {
        use std::sync::Mutex;
        use std::sync::Arc;

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let mut world = World::new();

        let l = log.clone();
        world.on_insert::<Health>(move |e, h| {
            l.lock().unwrap().push(format!("+{} hp={}", e.index(), h.0));
        });
        let l = log.clone();
        world.on_remove::<Health>(move |e, h| {
            l.lock().unwrap().push(format!("-{} hp={}", e.index(), h.0));
        });

        let e = world.spawn((Health(5),));
        world.remove::<Health>(e).unwrap();
        world.insert(e, Health(6)).unwrap();
        world.despawn(e).unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "+0 hp=5".to_string(),
                "-0 hp=5".to_string(),
                "+0 hp=6".to_string(),
                "-0 hp=6".to_string(),
            ]
        );
    }

    #[test]
    fn structural_changes_blocked_while_jobs_run() {
        let mut world = World::new();
        let e = world.spawn((Health(1),));

        world.job_gate().enter();
        assert!(matches!(
            world.despawn(e),
            Err(WorldError::JobsInFlight(1))
        ));
        assert!(matches!(
            world.insert(e, Marker),
            Err(WorldError::JobsInFlight(1))
        ));
        // Data writes stay legal.
        world.set(e, Health(2)).unwrap();
        world.job_gate().exit();

        world.despawn(e).unwrap();
    }

    #[test]
    fn resources_roundtrip() {
        let mut world = World::new();
        world.insert_resource(42u32);
        assert_eq!(*world.resource::<u32>(), 42);
        *world.resource_mut::<u32>() = 7;
        assert_eq!(*world.resource::<u32>(), 7);
        assert!(world.get_resource::<String>().is_none());
    }
}
