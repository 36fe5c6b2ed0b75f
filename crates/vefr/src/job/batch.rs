//! # Batch — The View a Work Function Receives
//!
//! A [`Batch`] is one contiguous run of rows from a single archetype,
//! together with slices of the columns the job declared. Batches of one job
//! never overlap, so a parallel job can hand each batch to a different
//! worker with no further coordination.
//!
//! Rows are batch-local: `0..len()`. [`base_row`](Batch::base_row) gives the
//! offset into the archetype for code that cares about the absolute
//! position.

use std::any::TypeId;

use crate::ecs::component::BoxedComponent;
use crate::ecs::entity::Entity;

use super::handle::JobError;

/// One batch of a job's data, scoped to a single archetype segment.
pub struct Batch<'a> {
    pub(crate) entities: &'a [Entity],
    pub(crate) base_row: usize,
    pub(crate) reads: Vec<(TypeId, &'static str, &'a [BoxedComponent])>,
    pub(crate) writes: Vec<(TypeId, &'static str, &'a mut [BoxedComponent])>,
}

impl<'a> Batch<'a> {
    /// Number of rows in this batch.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The entity at a batch-local row.
    pub fn entity(&self, row: usize) -> Entity {
        self.entities[row]
    }

    /// All entities in this batch, in row order.
    pub fn entities(&self) -> &[Entity] {
        self.entities
    }

    /// Offset of this batch's first row within its archetype segment.
    pub fn base_row(&self) -> usize {
        self.base_row
    }

    /// Read component `T` at a batch-local row. Works for both read and
    /// write declarations.
    pub fn get<T: 'static>(&self, row: usize) -> Result<&T, JobError> {
        let type_id = TypeId::of::<T>();
        if let Some(index) = self.writes.iter().position(|(id, _, _)| *id == type_id) {
            return Ok(self.writes[index].2[row]
                .downcast_ref::<T>()
                .expect("column type matches its id"));
        }
        if let Some(index) = self.reads.iter().position(|(id, _, _)| *id == type_id) {
            return Ok(self.reads[index].2[row]
                .downcast_ref::<T>()
                .expect("column type matches its id"));
        }
        Err(JobError::MissingColumn {
            component: std::any::type_name::<T>(),
        })
    }

    /// Mutate component `T` at a batch-local row. Only legal for components
    /// the job declared as writes.
    pub fn get_mut<T: 'static>(&mut self, row: usize) -> Result<&mut T, JobError> {
        let type_id = TypeId::of::<T>();
        if let Some(index) = self.writes.iter().position(|(id, _, _)| *id == type_id) {
            return Ok(self.writes[index].2[row]
                .downcast_mut::<T>()
                .expect("column type matches its id"));
        }
        if self.reads.iter().any(|(id, _, _)| *id == type_id) {
            return Err(JobError::ReadOnlyColumn {
                component: std::any::type_name::<T>(),
            });
        }
        Err(JobError::MissingColumn {
            component: std::any::type_name::<T>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(values: Vec<u32>) -> Vec<BoxedComponent> {
        values
            .into_iter()
            .map(|v| Box::new(v) as BoxedComponent)
            .collect()
    }

    fn entity(index: u32) -> Entity {
        Entity {
            index,
            generation: 0,
        }
    }

    #[test]
    fn typed_access_through_declared_columns() {
        let entities = [entity(0), entity(1)];
        let read_col = boxed(vec![10, 20]);
        let mut write_col = boxed(vec![1, 2]);

        let mut batch = Batch {
            entities: &entities,
            base_row: 0,
            reads: vec![(TypeId::of::<u32>(), "u32", &read_col)],
            writes: vec![(TypeId::of::<i64>(), "i64", &mut [])],
        };
        // u32 resolves through the read column.
        assert_eq!(batch.get::<u32>(1), Ok(&20u32));
        // Mutating a read-only column is rejected.
        assert_eq!(
            batch.get_mut::<u32>(0),
            Err(JobError::ReadOnlyColumn { component: "u32" })
        );
        // Undeclared types are rejected.
        assert!(matches!(
            batch.get::<String>(0),
            Err(JobError::MissingColumn { .. })
        ));

        drop(batch);
        // Writes resolve mutably.
        let mut batch = Batch {
            entities: &entities,
            base_row: 0,
            reads: Vec::new(),
            writes: vec![(TypeId::of::<u32>(), "u32", &mut write_col)],
        };
        *batch.get_mut::<u32>(0).unwrap() += 100;
        assert_eq!(batch.get::<u32>(0), Ok(&101u32));
    }

    #[test]
    fn batch_rows_are_local() {
        let entities = [entity(5), entity(6)];
        let batch = Batch {
            entities: &entities,
            base_row: 4,
            reads: Vec::new(),
            writes: Vec::new(),
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.base_row(), 4);
        assert_eq!(batch.entity(0), entity(5));
    }
}
