//! # Entity — Identity Without Data
//!
//! An [`Entity`] is a handle, nothing more. The [`World`](super::world::World)
//! maps handles to component data; the handle itself carries no state. Keeping
//! identity separate from data is what lets the store reorganize its memory
//! (archetype moves, swap-removes) without invalidating the handles user code
//! holds on to.
//!
//! ## Generational Indices
//!
//! Slot indices are recycled after despawn. A bare index would then silently
//! alias the next occupant of the slot:
//!
//! ```text
//! 1. spawn          → slot #7
//! 2. keep a copy    → saved = 7
//! 3. despawn #7
//! 4. spawn again    → slot #7 reused
//! 5. use `saved`    → now points at a different object
//! ```
//!
//! Pairing the index with a generation counter closes the hole. Despawning a
//! slot bumps its generation, so every handle minted before the despawn stops
//! matching. The store reports such handles as stale instead of resolving
//! them:
//!
//! ```text
//! Entity { index: 7, generation: 0 }   minted at spawn
//! Entity { index: 7, generation: 1 }   minted after the slot recycled
//! ```
//!
//! The invariant the rest of the crate relies on: a (index, generation) pair
//! is never handed out twice, and a despawned pair never resolves again.

use std::fmt;

/// A handle to an entity in the [`World`](super::world::World).
///
/// Handles are minted by [`World::spawn`](super::world::World::spawn) and
/// invalidated by [`World::despawn`](super::world::World::despawn). A handle
/// is only meaningful for the `World` that created it, and only while its
/// generation still matches the slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    /// Slot index. Recycled after despawn.
    pub(crate) index: u32,
    /// Bumped every time the slot is recycled, so outdated handles stop
    /// resolving.
    pub(crate) generation: u32,
}

impl Entity {
    /// The raw slot index. Intended for diagnostics output.
    pub fn index(self) -> u32 {
        self.index
    }

    /// The generation counter. Intended for diagnostics output.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Hands out entity slots and detects stale handles.
///
/// ```text
/// generations: [0, 2, 0, 1]   one counter per slot ever used
/// free_list:   [1]            slots ready for reuse
/// len:         4              next fresh index when the free list is empty
/// ```
///
/// Allocation pops the free list if possible, otherwise claims a fresh index.
/// Deallocation bumps the slot's generation and pushes the index back.
pub(crate) struct EntityAllocator {
    /// Current generation of every slot, indexed by `Entity::index`.
    generations: Vec<u32>,
    /// Slots whose occupant was despawned, available for reuse.
    free_list: Vec<u32>,
    /// Number of slots ever claimed. Doubles as the next fresh index.
    len: u32,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self {
            generations: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Claim a slot and mint a live handle for it.
    pub fn allocate(&mut self) -> Entity {
        match self.free_list.pop() {
            Some(index) => {
                // Generation was bumped at deallocation time, so the recycled
                // handle is already distinct from every prior occupant.
                let generation = self.generations[index as usize];
                Entity { index, generation }
            }
            None => {
                let index = self.len;
                self.len += 1;
                self.generations.push(0);
                Entity {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Release a slot. Returns `false` when the handle was already stale.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        let slot = entity.index as usize;
        if slot < self.generations.len() && self.generations[slot] == entity.generation {
            self.generations[slot] += 1;
            self.free_list.push(entity.index);
            true
        } else {
            false
        }
    }

    /// Whether the handle still matches its slot.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index as usize;
        slot < self.generations.len() && self.generations[slot] == entity.generation
    }

    /// Number of currently live entities.
    pub fn alive_count(&self) -> usize {
        self.len as usize - self.free_list.len()
    }

    /// Number of slots waiting on the free list.
    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_are_sequential() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_eq!((a.index, a.generation), (0, 0));
        assert_eq!((b.index, b.generation), (1, 0));
        assert_eq!(alloc.alive_count(), 2);
    }

    #[test]
    fn recycled_slot_gets_new_generation() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        assert!(alloc.deallocate(a));
        let reused = alloc.allocate();
        assert_eq!(reused.index, a.index);
        assert_eq!(reused.generation, a.generation + 1);
    }

    #[test]
    fn stale_handle_never_resolves() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        assert!(alloc.is_alive(a));
        alloc.deallocate(a);
        assert!(!alloc.is_alive(a));

        // The recycled occupant is live, the old handle stays dead.
        let b = alloc.allocate();
        assert!(alloc.is_alive(b));
        assert!(!alloc.is_alive(a));
    }

    #[test]
    fn double_deallocate_is_rejected() {
        let mut alloc = EntityAllocator::new();
        let a = alloc.allocate();
        assert!(alloc.deallocate(a));
        assert!(!alloc.deallocate(a));
        assert_eq!(alloc.free_count(), 1);
    }

    #[test]
    fn pair_is_never_reissued() {
        // Churn one slot repeatedly; every minted handle must be unique.
        let mut alloc = EntityAllocator::new();
        let mut seen = std::collections::HashSet::new();
        let mut current = alloc.allocate();
        assert!(seen.insert((current.index, current.generation)));
        for _ in 0..100 {
            alloc.deallocate(current);
            current = alloc.allocate();
            assert!(seen.insert((current.index, current.generation)));
        }
    }
}
