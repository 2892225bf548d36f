//! Entity type and allocation utilities.
//!
//! An [`Entity`] is a lightweight generational handle with no inherent data.
//! The slot index is recycled after an entity is removed; the generation is
//! bumped on every recycle so a stale handle never aliases a newer entity.

use serde::{Deserialize, Serialize};

/// A handle to a game object in the entity store.
///
/// Entities are pure identifiers: they carry no data of their own. Components
/// are attached to entities to give them meaning. Handles are `Copy` values,
/// not ownership tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    /// Build an entity handle from its raw parts.
    #[must_use]
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot index of this entity.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation of the slot at the time this handle was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    alive: bool,
}

/// Allocates entity handles, recycling the slots of removed entities.
///
/// Freed slots are reused in FIFO order so that a just-freed index is not
/// handed out again immediately.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: std::collections::VecDeque<u32>,
    alive: usize,
}

impl EntityAllocator {
    /// Creates a new, empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh or recycled entity handle.
    pub fn allocate(&mut self) -> Entity {
        self.alive += 1;
        if let Some(index) = self.free.pop_front() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            return Entity::from_raw_parts(index, slot.generation);
        }

        assert!(
            self.slots.len() < u32::MAX as usize,
            "entity index space exhausted"
        );
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            alive: true,
        });
        Entity::from_raw_parts(index, 0)
    }

    /// Releases `entity`, making its slot available for reuse.
    ///
    /// Returns `false` if the handle was already dead or stale.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = &mut self.slots[entity.index() as usize];
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push_back(entity.index());
        self.alive -= 1;
        true
    }

    /// Returns `true` if `entity` refers to a live slot of the same generation.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index() as usize)
            .is_some_and(|slot| slot.alive && slot.generation == entity.generation())
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Iterates over all live entity handles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.alive
                .then(|| Entity::from_raw_parts(index as u32, slot.generation))
        })
    }
}
