//! # Vefr — Data-Oriented Simulation Runtime
//!
//! A small entity-component runtime with a dependency-tracked parallel job
//! scheduler and deferred structural mutation, built for headless
//! simulations that want cache-friendly storage and safe parallelism
//! without a rendering stack attached.
//!
//! The pieces, in dependency order:
//!
//! - [`ecs`] — archetype storage, queries, and the system schedule
//! - [`job`] — job handles, hazard tracking, and the worker pool
//! - [`commands`] — command buffers for deferred structural changes
//! - [`runtime`] — the assembled tick loop
//!
//! Start with `use vefr::prelude::*` and build a [`Runtime`](runtime::Runtime).

pub mod commands;
pub mod ecs;
pub mod job;
pub mod prelude;
pub mod runtime;
pub mod time;

#[cfg(feature = "diagnostics")]
pub mod diag;
