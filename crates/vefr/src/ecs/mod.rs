//! # Archetype-Based Entity-Component Storage
//!
//! The storage half of the runtime: entities are opaque generational
//! handles, components are plain data grouped into archetypes by exact
//! component signature, and queries resolve signatures into snapshots,
//! batches, or typed iteration.
//!
//! ## Module Overview
//!
//! - [`entity`] — generational entity IDs and the slot allocator
//! - [`component`] — type-erased columnar storage
//! - [`archetype`] — entities grouped by component signature
//! - [`world`] — the central store (entities, components, resources, hooks)
//! - [`query`] — filters, snapshots, batches, typed iteration
//! - [`system`] — the `System` trait, ordering groups, and the `Schedule`

pub(crate) mod archetype;
pub(crate) mod component;
pub mod entity;
pub mod query;
pub mod system;
pub mod world;

pub use entity::Entity;
pub use query::{AccessMode, EntityBatch, Query};
pub use system::{Access, FnSystem, Schedule, ScheduleError, System, SystemConfig, SystemContext};
pub use world::{Bundle, World, WorldError};
