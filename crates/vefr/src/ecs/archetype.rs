//! # Archetype — Entities Grouped by Component Signature
//!
//! An archetype is one exact set of component types. Every entity carrying
//! precisely that set lives in the same archetype table, one column per
//! component type plus a parallel row vector of entity handles:
//!
//! ```text
//! Archetype { key: [Position, Velocity] }
//!
//!   Position: [p0, p1, p2]      columns, one per component type
//!   Velocity: [v0, v1, v2]
//!   entities: [e0, e1, e2]      row i across all columns is one entity
//! ```
//!
//! Queries match whole archetypes, then scan rows linearly, which is why
//! adding or removing a component is a *structural* change: the entity's rows
//! must physically move to a different table.
//!
//! ## Columns behind locks
//!
//! Each column is wrapped in `Arc<RwLock<…>>`. Single-threaded store access
//! locks uncontended; scheduled jobs clone the `Arc`s at schedule time and
//! take read or write guards for their duration. The job scheduler's hazard
//! tracking guarantees that two jobs never contend for conflicting guards,
//! so the lock is a safety net rather than a synchronization point.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::component::{BoxedComponent, ComponentColumn};
use super::entity::Entity;

/// Sorted, deduplicated list of component `TypeId`s. Uniquely identifies an
/// archetype: `[A, B]` and `[B, A]` produce the same key.
pub(crate) type ArchetypeKey = Vec<TypeId>;

/// Normalize a list of type IDs into an [`ArchetypeKey`].
pub(crate) fn archetype_key(mut type_ids: Vec<TypeId>) -> ArchetypeKey {
    type_ids.sort_unstable();
    type_ids.dedup();
    type_ids
}

/// A table of entities that all share the same component types. Public for
/// the [`QueryParam`](super::query::QueryParam) trait's signatures; user
/// code goes through [`World`](super::world::World) instead.
pub struct Archetype {
    /// The sorted component signature.
    key: ArchetypeKey,
    /// One column per component type, in `key` order so that iteration and
    /// lookup are deterministic.
    columns: Vec<Arc<RwLock<ComponentColumn>>>,
    /// Entity handles, parallel to the column rows.
    entities: Vec<Entity>,
    /// Human-readable names for diagnostics and error messages.
    type_names: HashMap<TypeId, &'static str>,
}

impl Archetype {
    /// Create an empty table for the given signature.
    pub fn new(types: &[(TypeId, &'static str)]) -> Self {
        let key = archetype_key(types.iter().map(|(id, _)| *id).collect());
        let columns = key
            .iter()
            .map(|_| Arc::new(RwLock::new(ComponentColumn::new())))
            .collect();
        let type_names = types.iter().copied().collect();
        Self {
            key,
            columns,
            entities: Vec::new(),
            type_names,
        }
    }

    pub fn key(&self) -> &ArchetypeKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn has(&self, type_id: TypeId) -> bool {
        self.key.binary_search(&type_id).is_ok()
    }

    pub fn has_all(&self, type_ids: &[TypeId]) -> bool {
        type_ids.iter().all(|id| self.has(*id))
    }

    pub fn has_none(&self, type_ids: &[TypeId]) -> bool {
        !type_ids.iter().any(|id| self.has(*id))
    }

    /// The shared column handle for a component type, if the archetype has it.
    pub fn column(&self, type_id: TypeId) -> Option<&Arc<RwLock<ComponentColumn>>> {
        let slot = self.key.binary_search(&type_id).ok()?;
        Some(&self.columns[slot])
    }

    pub fn type_name(&self, type_id: TypeId) -> Option<&'static str> {
        self.type_names.get(&type_id).copied()
    }

    /// Component names in key order, for diagnostics.
    #[cfg(feature = "diagnostics")]
    pub fn component_names(&self) -> Vec<&'static str> {
        self.key
            .iter()
            .map(|id| self.type_names.get(id).copied().unwrap_or("<unknown>"))
            .collect()
    }

    /// Append a full row. `values` may arrive in any order; each value lands
    /// in its own column. Returns the new row index.
    ///
    /// The caller must supply exactly the signature's component set; anything
    /// else is a store bug.
    pub fn push_row(
        &mut self,
        entity: Entity,
        values: Vec<(TypeId, &'static str, BoxedComponent)>,
    ) -> usize {
        debug_assert_eq!(values.len(), self.key.len());
        let row = self.entities.len();
        self.entities.push(entity);
        for (type_id, name, value) in values {
            self.type_names.entry(type_id).or_insert(name);
            let slot = self
                .key
                .binary_search(&type_id)
                .expect("pushed component not in archetype signature");
            self.columns[slot]
                .write()
                .expect("column lock poisoned")
                .push_boxed(value);
        }
        row
    }

    /// Swap-remove a full row, returning its values and the entity (if any)
    /// that slid into the vacated row and needs its location fixed up.
    pub fn take_row(
        &mut self,
        row: usize,
    ) -> (Vec<(TypeId, BoxedComponent)>, Option<Entity>) {
        let mut values = Vec::with_capacity(self.key.len());
        for (slot, type_id) in self.key.iter().enumerate() {
            let value = self.columns[slot]
                .write()
                .expect("column lock poisoned")
                .take(row);
            values.push((*type_id, value));
        }
        self.entities.swap_remove(row);
        let moved = self.entities.get(row).copied();
        (values, moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty<T: 'static>() -> (TypeId, &'static str) {
        (TypeId::of::<T>(), std::any::type_name::<T>())
    }

    #[test]
    fn key_is_order_independent() {
        let ab = archetype_key(vec![TypeId::of::<u32>(), TypeId::of::<f64>()]);
        let ba = archetype_key(vec![TypeId::of::<f64>(), TypeId::of::<u32>()]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn key_dedups() {
        let key = archetype_key(vec![TypeId::of::<u32>(), TypeId::of::<u32>()]);
        assert_eq!(key.len(), 1);
    }

    #[test]
    fn push_and_take_roundtrip() {
        let mut arch = Archetype::new(&[ty::<u32>(), ty::<String>()]);
        let e = Entity {
            index: 0,
            generation: 0,
        };
        let row = arch.push_row(
            e,
            vec![
                (TypeId::of::<u32>(), "u32", Box::new(7u32)),
                (TypeId::of::<String>(), "String", Box::new("x".to_string())),
            ],
        );
        assert_eq!(row, 0);
        assert_eq!(arch.len(), 1);

        let (values, moved) = arch.take_row(0);
        assert!(moved.is_none());
        assert_eq!(values.len(), 2);
        assert!(arch.is_empty());
    }

    #[test]
    fn take_row_reports_moved_entity() {
        let mut arch = Archetype::new(&[ty::<u32>()]);
        let a = Entity {
            index: 0,
            generation: 0,
        };
        let b = Entity {
            index: 1,
            generation: 0,
        };
        arch.push_row(a, vec![(TypeId::of::<u32>(), "u32", Box::new(1u32))]);
        arch.push_row(b, vec![(TypeId::of::<u32>(), "u32", Box::new(2u32))]);

        let (_, moved) = arch.take_row(0);
        assert_eq!(moved, Some(b));
        assert_eq!(arch.entities(), &[b]);
        // b's value followed it into row 0.
        let col = arch.column(TypeId::of::<u32>()).unwrap();
        assert_eq!(col.read().unwrap().get::<u32>(0), Some(&2));
    }

    #[test]
    fn membership_checks() {
        let arch = Archetype::new(&[ty::<u32>(), ty::<f64>()]);
        assert!(arch.has(TypeId::of::<u32>()));
        assert!(!arch.has(TypeId::of::<String>()));
        assert!(arch.has_all(&[TypeId::of::<u32>(), TypeId::of::<f64>()]));
        assert!(!arch.has_all(&[TypeId::of::<u32>(), TypeId::of::<String>()]));
        assert!(arch.has_none(&[TypeId::of::<String>()]));
        assert!(!arch.has_none(&[TypeId::of::<f64>()]));
    }
}
