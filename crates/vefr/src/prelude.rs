//! Convenience re-exports. `use vefr::prelude::*` covers the common items.

pub use crate::commands::{CommandBuffer, CommandError, CommandTarget, PendingEntity};
pub use crate::ecs::{
    Access, AccessMode, Bundle, Entity, EntityBatch, FnSystem, Query, Schedule, ScheduleError,
    System, SystemConfig, SystemContext, World, WorldError,
};
pub use crate::job::{Batch, DEFAULT_BATCH, JobError, JobHandle, JobScheduler};
pub use crate::runtime::Runtime;
pub use crate::time::Time;
