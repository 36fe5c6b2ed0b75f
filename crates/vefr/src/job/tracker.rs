//! # Access Tracker — Deriving Waits from Declared Access
//!
//! The tracker holds, per component type, the most recent writer handle and
//! the readers that arrived since that writer. When a new job is planned its
//! wait set falls out directly:
//!
//! - reading `T` waits on `T`'s pending writer (read-after-write),
//! - writing `T` waits on `T`'s pending writer (write-after-write) and on
//!   every pending reader since it (write-after-read),
//! - reading never waits on readers.
//!
//! After planning, the type's state is updated to reflect the new job, so
//! the next plan sees it as a predecessor. Completed handles are pruned as
//! they are encountered; they impose no waits and hold no memory.

use std::any::TypeId;
use std::collections::HashMap;

use super::handle::JobHandle;

#[derive(Default)]
struct TypeAccess {
    last_writer: Option<JobHandle>,
    readers: Vec<JobHandle>,
}

pub(crate) struct AccessTracker {
    types: HashMap<TypeId, TypeAccess>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Compute the wait set for a job with the given access, then record the
    /// job as the newest toucher of those types.
    pub fn plan(
        &mut self,
        reads: &[TypeId],
        writes: &[TypeId],
        job: &JobHandle,
    ) -> Vec<JobHandle> {
        let mut waits = Vec::new();

        for type_id in reads {
            let slot = self.types.entry(*type_id).or_default();
            if let Some(writer) = &slot.last_writer {
                if !writer.is_complete() {
                    waits.push(writer.clone());
                }
            }
            slot.readers.retain(|reader| !reader.is_complete());
            slot.readers.push(job.clone());
        }

        for type_id in writes {
            let slot = self.types.entry(*type_id).or_default();
            if let Some(writer) = &slot.last_writer {
                if !writer.is_complete() {
                    waits.push(writer.clone());
                }
            }
            for reader in slot.readers.drain(..) {
                if !reader.is_complete() {
                    waits.push(reader);
                }
            }
            slot.last_writer = Some(job.clone());
        }

        waits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::handle::JobCore;

    struct X;
    struct Y;

    fn pending(label: &str) -> (JobHandle, std::sync::Arc<JobCore>) {
        let core = JobCore::new(label.into());
        (JobHandle::from_core(core.clone()), core)
    }

    #[test]
    fn readers_do_not_wait_on_readers() {
        let mut tracker = AccessTracker::new();
        let x = TypeId::of::<X>();

        let (r1, _c1) = pending("r1");
        let (r2, _c2) = pending("r2");

        assert!(tracker.plan(&[x], &[], &r1).is_empty());
        assert!(tracker.plan(&[x], &[], &r2).is_empty());
    }

    #[test]
    fn writer_waits_on_pending_readers() {
        let mut tracker = AccessTracker::new();
        let x = TypeId::of::<X>();

        let (r1, _c1) = pending("r1");
        let (r2, _c2) = pending("r2");
        let (w, _cw) = pending("w");

        tracker.plan(&[x], &[], &r1);
        tracker.plan(&[x], &[], &r2);
        let waits = tracker.plan(&[], &[x], &w);
        assert_eq!(waits.len(), 2);
    }

    #[test]
    fn reader_waits_on_pending_writer() {
        let mut tracker = AccessTracker::new();
        let x = TypeId::of::<X>();

        let (w, _cw) = pending("w");
        let (r, _cr) = pending("r");

        tracker.plan(&[], &[x], &w);
        let waits = tracker.plan(&[x], &[], &r);
        assert_eq!(waits.len(), 1);
    }

    #[test]
    fn writer_waits_on_pending_writer() {
        let mut tracker = AccessTracker::new();
        let x = TypeId::of::<X>();

        let (w1, _c1) = pending("w1");
        let (w2, _c2) = pending("w2");

        tracker.plan(&[], &[x], &w1);
        let waits = tracker.plan(&[], &[x], &w2);
        assert_eq!(waits.len(), 1);
    }

    #[test]
    fn completed_predecessors_impose_no_waits() {
        let mut tracker = AccessTracker::new();
        let x = TypeId::of::<X>();

        let (w, cw) = pending("w");
        tracker.plan(&[], &[x], &w);
        cw.complete(Ok(()));

        let (r, _cr) = pending("r");
        assert!(tracker.plan(&[x], &[], &r).is_empty());
    }

    #[test]
    fn disjoint_types_never_interact() {
        let mut tracker = AccessTracker::new();
        let x = TypeId::of::<X>();
        let y = TypeId::of::<Y>();

        let (wx, _cx) = pending("wx");
        let (wy, _cy) = pending("wy");

        tracker.plan(&[], &[x], &wx);
        assert!(tracker.plan(&[], &[y], &wy).is_empty());
    }

    #[test]
    fn chain_reader_sees_only_latest_writer() {
        let mut tracker = AccessTracker::new();
        let x = TypeId::of::<X>();

        let (w1, c1) = pending("w1");
        let (w2, _c2) = pending("w2");
        let (r, _cr) = pending("r");

        tracker.plan(&[], &[x], &w1);
        tracker.plan(&[], &[x], &w2);
        c1.complete(Ok(()));

        // Only w2 is still pending; the reader waits on exactly it.
        let waits = tracker.plan(&[x], &[], &r);
        assert_eq!(waits.len(), 1);
    }
}
