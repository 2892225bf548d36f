//! Type-indexed singleton container.
//!
//! [`Resources`] shares services (clocks, uid registries, sequence filters,
//! outboxes) between systems and RPC handlers without global state. It holds
//! at most one value per type and is passed around by reference.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::ResourceError;

/// A registry holding at most one value of each type.
#[derive(Default)]
pub struct Resources {
    values: HashMap<TypeId, Box<dyn Any>>,
}

impl Resources {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource, returning the value it replaced.
    pub fn insert<T: 'static>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns the resource of type `T`, if present.
    #[must_use]
    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    /// Returns the resource of type `T` mutably, if present.
    #[must_use]
    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values.get_mut(&TypeId::of::<T>())?.downcast_mut::<T>()
    }

    /// Returns the resource of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::NotFound`] if no such resource is registered.
    pub fn fetch<T: 'static>(&self) -> Result<&T, ResourceError> {
        self.get::<T>()
            .ok_or(ResourceError::NotFound(std::any::type_name::<T>()))
    }

    /// Returns the resource of type `T` mutably.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::NotFound`] if no such resource is registered.
    pub fn fetch_mut<T: 'static>(&mut self) -> Result<&mut T, ResourceError> {
        self.get_mut::<T>()
            .ok_or(ResourceError::NotFound(std::any::type_name::<T>()))
    }

    /// Returns the resource of type `T`, inserting `init()` first if absent.
    pub fn get_or_insert_with<T: 'static>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        let value = self
            .values
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(init()));
        match value.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!(
                "resource keyed by {} holds another type",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Remove and return the resource of type `T`.
    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Returns `true` if a resource of type `T` is registered.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("len", &self.values.len())
            .finish()
    }
}
