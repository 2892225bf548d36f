//! Per-type component storage.
//!
//! Each component type gets one [`ComponentTable`], created lazily on first
//! insertion. Tables are sparse sets: a sparse index keyed by entity slot
//! points into densely packed entity/value arrays. Iteration walks the dense
//! arrays, so the order is stable for a given table state (insertion order,
//! disturbed only by swap-removal).

use std::any::Any;
use std::collections::HashMap;

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;

const EMPTY: u32 = u32::MAX;

/// Type-erased view of a [`ComponentTable`].
pub trait AnyTable: Any {
    /// Remove `entity` from the table. Returns `true` if it was present.
    fn remove_entity(&mut self, entity: Entity) -> bool;

    /// Returns `true` if the table holds a value for `entity`.
    fn contains(&self, entity: Entity) -> bool;

    /// The entities stored in this table, in iteration order.
    fn entities(&self) -> &[Entity];

    /// Number of stored values.
    fn len(&self) -> usize;

    /// Returns `true` if the table is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Storage for every value of one component type.
#[derive(Debug)]
pub struct ComponentTable<T> {
    sparse: Vec<u32>,
    dense: Vec<Entity>,
    data: Vec<T>,
}

impl<T> Default for ComponentTable<T> {
    fn default() -> Self {
        Self {
            sparse: Vec::new(),
            dense: Vec::new(),
            data: Vec::new(),
        }
    }
}

impl<T> ComponentTable<T> {
    /// Create a new, empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dense.len()
    }

    /// Returns `true` if the table holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    fn dense_index(&self, entity: Entity) -> Option<usize> {
        let slot = *self.sparse.get(entity.index() as usize)?;
        if slot == EMPTY {
            return None;
        }
        let slot = slot as usize;
        (self.dense[slot] == entity).then_some(slot)
    }

    /// Returns `true` if `entity` has a value in this table.
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.dense_index(entity).is_some()
    }

    /// Insert or replace the value for `entity`, returning the previous one.
    ///
    /// A value left behind by an older generation of the same slot is
    /// replaced as well.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        let idx = entity.index() as usize;
        if idx >= self.sparse.len() {
            self.sparse.resize(idx + 1, EMPTY);
        }

        let slot = self.sparse[idx];
        if slot != EMPTY {
            let slot = slot as usize;
            let previous = std::mem::replace(&mut self.data[slot], value);
            let same = self.dense[slot] == entity;
            self.dense[slot] = entity;
            return same.then_some(previous);
        }

        self.sparse[idx] = self.dense.len() as u32;
        self.dense.push(entity);
        self.data.push(value);
        None
    }

    /// Remove and return the value for `entity`.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.dense_index(entity)?;
        self.sparse[entity.index() as usize] = EMPTY;

        // Swap-remove to keep the arrays packed.
        let last = self.dense.len() - 1;
        if slot != last {
            let moved = self.dense[last];
            self.sparse[moved.index() as usize] = slot as u32;
        }
        self.dense.swap_remove(slot);
        Some(self.data.swap_remove(slot))
    }

    /// Returns the value for `entity`, if present.
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.dense_index(entity).map(|slot| &self.data[slot])
    }

    /// Returns the value for `entity` mutably, if present.
    #[must_use]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.dense_index(entity).map(|slot| &mut self.data[slot])
    }

    /// The stored entities, in iteration order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.dense
    }

    /// Iterate over `(entity, &value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.dense.iter().copied().zip(self.data.iter())
    }

    /// Iterate over `(entity, &mut value)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.dense.iter().copied().zip(self.data.iter_mut())
    }
}

impl<T: 'static> AnyTable for ComponentTable<T> {
    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn contains(&self, entity: Entity) -> bool {
        ComponentTable::contains(self, entity)
    }

    fn entities(&self) -> &[Entity] {
        &self.dense
    }

    fn len(&self) -> usize {
        self.dense.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// All component tables of a store, keyed by component type.
#[derive(Default)]
pub struct Tables {
    tables: HashMap<ComponentTypeId, Box<dyn AnyTable>>,
}

impl Tables {
    /// Create an empty table map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table for `T`, if one was ever created.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<&ComponentTable<T>> {
        self.tables
            .get(&ComponentTypeId::of::<T>())?
            .as_any()
            .downcast_ref::<ComponentTable<T>>()
    }

    /// Returns the table for `T` mutably, if one was ever created.
    #[must_use]
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut ComponentTable<T>> {
        self.tables
            .get_mut(&ComponentTypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<ComponentTable<T>>()
    }

    /// Returns the table for `T`, creating it on first use.
    pub fn get_or_create<T: Component>(&mut self) -> &mut ComponentTable<T> {
        let table = self
            .tables
            .entry(ComponentTypeId::of::<T>())
            .or_insert_with(|| Box::new(ComponentTable::<T>::new()));
        match table.as_any_mut().downcast_mut::<ComponentTable<T>>() {
            Some(table) => table,
            None => unreachable!("table keyed by {} holds another type", T::type_name()),
        }
    }

    /// Insert or replace the `T` value for `entity`.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Option<T> {
        self.get_or_create::<T>().insert(entity, value)
    }

    /// Remove the `T` value for `entity`.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.get_mut::<T>()?.remove(entity)
    }

    /// Remove the value of type `type_id` for `entity`, without knowing the
    /// static type.
    pub fn remove_dyn(&mut self, type_id: ComponentTypeId, entity: Entity) -> bool {
        self.tables
            .get_mut(&type_id)
            .is_some_and(|table| table.remove_entity(entity))
    }

    /// Returns `true` if the table of `type_id` holds a value for `entity`.
    #[must_use]
    pub fn contains_dyn(&self, type_id: ComponentTypeId, entity: Entity) -> bool {
        self.tables
            .get(&type_id)
            .is_some_and(|table| table.contains(entity))
    }

    /// Number of tables created so far.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

impl std::fmt::Debug for Tables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.tables.iter().map(|(id, table)| (id.name(), table.len())))
            .finish()
    }
}
