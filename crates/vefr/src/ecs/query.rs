//! # Query — Selecting Entities by Component Signature
//!
//! A query names the component types an operation needs (required, with a
//! read or write access mode each) and the types that must be absent
//! (excluded). An archetype matches when its signature is a superset of the
//! required set and disjoint from the excluded set; entities are then
//! enumerated across all matching archetypes.
//!
//! Two query surfaces live here:
//!
//! - [`Query`], a runtime filter value. The [`World`](super::world::World)
//!   resolves it into ordered entity snapshots
//!   ([`snapshot`](super::world::World::snapshot)), fixed-size batches for
//!   parallel dispatch ([`batches`](super::world::World::batches)), and the
//!   job scheduler resolves it into column access at schedule time. A
//!   `Query` is re-evaluated against the live store on every use; a snapshot
//!   taken earlier never changes.
//! - [`QueryParam`], the typed tuple trait behind
//!   [`for_each`](super::world::World::for_each). `(&A, &mut B)` acquires a
//!   read guard on A's column and a write guard on B's column per matching
//!   archetype, then yields typed references row by row. Earlier revisions
//!   of this design moved columns out of the archetype map and back to
//!   satisfy the borrow checker; with columns behind locks the guards do the
//!   same job without the shuffle.

use std::any::TypeId;
use std::ops::Range;
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use super::archetype::Archetype;
use super::component::ComponentColumn;
use super::entity::Entity;

/// How a query or job touches one component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared access. Any number of concurrent readers may overlap.
    Read,
    /// Exclusive access for the duration of the work.
    Write,
}

/// A component filter: required types (each with an access mode) plus
/// excluded types.
///
/// Built with a chain of [`read`](Query::read), [`write`](Query::write) and
/// [`without`](Query::without) calls:
///
/// ```ignore
/// let q = Query::new().read::<Position>().write::<Velocity>().without::<Frozen>();
/// ```
///
/// The required and excluded sets must stay disjoint; the builder enforces
/// the invariant at construction time.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub(crate) reads: Vec<(TypeId, &'static str)>,
    pub(crate) writes: Vec<(TypeId, &'static str)>,
    pub(crate) excluded: Vec<(TypeId, &'static str)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require component `T` with shared access.
    ///
    /// # Panics
    ///
    /// Panics if `T` was already excluded via [`without`](Query::without).
    pub fn read<T: 'static + Send + Sync>(mut self) -> Self {
        let entry = (TypeId::of::<T>(), std::any::type_name::<T>());
        assert!(
            !self.excluded.contains(&entry),
            "query requires and excludes `{}`",
            entry.1
        );
        if !self.reads.contains(&entry) && !self.writes.contains(&entry) {
            self.reads.push(entry);
        }
        self
    }

    /// Require component `T` with exclusive access.
    ///
    /// # Panics
    ///
    /// Panics if `T` was already excluded via [`without`](Query::without).
    pub fn write<T: 'static + Send + Sync>(mut self) -> Self {
        let entry = (TypeId::of::<T>(), std::any::type_name::<T>());
        assert!(
            !self.excluded.contains(&entry),
            "query requires and excludes `{}`",
            entry.1
        );
        // A write subsumes an earlier read of the same type.
        self.reads.retain(|e| *e != entry);
        if !self.writes.contains(&entry) {
            self.writes.push(entry);
        }
        self
    }

    /// Reject any archetype containing component `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is part of the required set.
    pub fn without<T: 'static + Send + Sync>(mut self) -> Self {
        let entry = (TypeId::of::<T>(), std::any::type_name::<T>());
        assert!(
            !self.reads.contains(&entry) && !self.writes.contains(&entry),
            "query requires and excludes `{}`",
            entry.1
        );
        if !self.excluded.contains(&entry) {
            self.excluded.push(entry);
        }
        self
    }

    /// All required type IDs, reads first, then writes.
    pub(crate) fn required_ids(&self) -> Vec<TypeId> {
        self.reads
            .iter()
            .chain(self.writes.iter())
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn excluded_ids(&self) -> Vec<TypeId> {
        self.excluded.iter().map(|(id, _)| *id).collect()
    }

    /// Whether an archetype satisfies this filter.
    pub(crate) fn matches(&self, archetype: &Archetype) -> bool {
        archetype.has_all(&self.required_ids()) && archetype.has_none(&self.excluded_ids())
    }
}

/// One contiguous slice of a matching archetype, produced by
/// [`World::batches`](super::world::World::batches).
///
/// A batch never spans two archetypes and never splits an entity's row, so
/// each batch can be processed independently of every other.
#[derive(Clone, Debug)]
pub struct EntityBatch {
    /// Index of the archetype this batch was cut from.
    pub archetype: usize,
    /// Row range within that archetype.
    pub rows: Range<usize>,
    /// The entities occupying those rows, copied at partition time.
    pub entities: Vec<Entity>,
}

impl EntityBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Typed column access for one element of a `for_each` tuple.
///
/// Implemented for `&T` (read guard) and `&mut T` (write guard); tuples of
/// params are themselves params, so `(&A, &mut B, &C)` just works.
pub trait QueryParam {
    /// The guard(s) held while iterating one archetype.
    type Guard<'w>;
    /// The item yielded per row.
    type Item<'a>;

    /// The component types this parameter touches.
    fn type_ids() -> Vec<TypeId>;

    /// Types with their access mode, for aliasing checks and system access
    /// declarations.
    fn accesses() -> Vec<(TypeId, AccessMode, &'static str)>;

    /// Take the column guard(s) for one matching archetype.
    fn acquire<'w>(archetype: &'w Archetype) -> Self::Guard<'w>;

    /// Read one row out of the held guard(s).
    fn fetch<'a, 'w>(guard: &'a mut Self::Guard<'w>, row: usize) -> Self::Item<'a>;
}

impl<T: 'static + Send + Sync> QueryParam for &T {
    type Guard<'w> = RwLockReadGuard<'w, ComponentColumn>;
    type Item<'a> = &'a T;

    fn type_ids() -> Vec<TypeId> {
        vec![TypeId::of::<T>()]
    }

    fn accesses() -> Vec<(TypeId, AccessMode, &'static str)> {
        vec![(TypeId::of::<T>(), AccessMode::Read, std::any::type_name::<T>())]
    }

    fn acquire<'w>(archetype: &'w Archetype) -> Self::Guard<'w> {
        archetype
            .column(TypeId::of::<T>())
            .unwrap_or_else(|| {
                panic!(
                    "matched archetype has no `{}` column",
                    std::any::type_name::<T>()
                )
            })
            .read()
            .expect("column lock poisoned")
    }

    fn fetch<'a, 'w>(guard: &'a mut Self::Guard<'w>, row: usize) -> Self::Item<'a> {
        guard
            .get::<T>(row)
            .expect("row and type were validated by the archetype match")
    }
}

impl<T: 'static + Send + Sync> QueryParam for &mut T {
    type Guard<'w> = RwLockWriteGuard<'w, ComponentColumn>;
    type Item<'a> = &'a mut T;

    fn type_ids() -> Vec<TypeId> {
        vec![TypeId::of::<T>()]
    }

    fn accesses() -> Vec<(TypeId, AccessMode, &'static str)> {
        vec![(
            TypeId::of::<T>(),
            AccessMode::Write,
            std::any::type_name::<T>(),
        )]
    }

    fn acquire<'w>(archetype: &'w Archetype) -> Self::Guard<'w> {
        archetype
            .column(TypeId::of::<T>())
            .unwrap_or_else(|| {
                panic!(
                    "matched archetype has no `{}` column",
                    std::any::type_name::<T>()
                )
            })
            .write()
            .expect("column lock poisoned")
    }

    fn fetch<'a, 'w>(guard: &'a mut Self::Guard<'w>, row: usize) -> Self::Item<'a> {
        guard
            .get_mut::<T>(row)
            .expect("row and type were validated by the archetype match")
    }
}

macro_rules! impl_query_param_tuple {
    ($($P:ident),+) => {
        impl<$($P: QueryParam),+> QueryParam for ($($P,)+) {
            type Guard<'w> = ($($P::Guard<'w>,)+);
            type Item<'a> = ($($P::Item<'a>,)+);

            fn type_ids() -> Vec<TypeId> {
                let mut ids = Vec::new();
                $(ids.extend($P::type_ids());)+
                ids
            }

            fn accesses() -> Vec<(TypeId, AccessMode, &'static str)> {
                let mut all = Vec::new();
                $(all.extend($P::accesses());)+
                all
            }

            #[allow(non_snake_case)]
            fn acquire<'w>(archetype: &'w Archetype) -> Self::Guard<'w> {
                ($($P::acquire(archetype),)+)
            }

            #[allow(non_snake_case)]
            fn fetch<'a, 'w>(guard: &'a mut Self::Guard<'w>, row: usize) -> Self::Item<'a> {
                let ($($P,)+) = guard;
                ($($P::fetch($P, row),)+)
            }
        }
    };
}

impl_query_param_tuple!(A);
impl_query_param_tuple!(A, B);
impl_query_param_tuple!(A, B, C);
impl_query_param_tuple!(A, B, C, D);
impl_query_param_tuple!(A, B, C, D, E);
impl_query_param_tuple!(A, B, C, D, E, F);
impl_query_param_tuple!(A, B, C, D, E, F, G);
impl_query_param_tuple!(A, B, C, D, E, F, G, H);
