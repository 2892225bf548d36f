//! The entity store.
//!
//! [`World`] owns every component value. Entities are generational handles
//! handed out by an [`EntityAllocator`]; component values live in one
//! sparse-set table per type. Each structural mutation queues exactly one
//! [`ChangeEvent`] which the [`ChangeNotifier`](crate::ChangeNotifier)
//! delivers later.

use heist_component::{
    Bundle, Component, ComponentSet, ComponentTypeId, DynBundle, Entity, EntityAllocator, Query,
    QueryIter, Tables,
};
use tracing::debug;

use crate::command::{Command, CommandBuffer, CommandScope};
use crate::error::WorldError;
use crate::events::{ChangeEvent, ChangeKind};

/// Entity and component storage for one simulation.
#[derive(Debug, Default)]
pub struct World {
    allocator: EntityAllocator,
    tables: Tables,
    /// Component types held per entity slot, in insertion order.
    held: Vec<Vec<ComponentTypeId>>,
    changes: Vec<ChangeEvent>,
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity holding every component of `bundle`.
    pub fn create_entity<B: Bundle>(&mut self, bundle: B) -> Entity {
        self.create_entity_dyn(Box::new(bundle))
    }

    /// Create an entity from a type-erased bundle.
    pub fn create_entity_dyn(&mut self, bundle: Box<dyn DynBundle>) -> Entity {
        let entity = self.allocator.allocate();
        let types = bundle.type_ids();
        bundle.insert_boxed(&mut self.tables, entity);

        let slot = entity.index() as usize;
        if slot >= self.held.len() {
            self.held.resize_with(slot + 1, Vec::new);
        }
        self.held[slot] = types.clone();

        self.changes.push(ChangeEvent {
            kind: ChangeKind::Added,
            entity,
            types,
        });
        entity
    }

    /// Returns `true` if `entity` is alive.
    #[must_use]
    pub fn contains_entity(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    fn ensure_alive(&self, entity: Entity) -> Result<(), WorldError> {
        if self.contains_entity(entity) {
            Ok(())
        } else {
            Err(WorldError::EntityNotFound(entity))
        }
    }

    /// Returns the `T` component of `entity`.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity is dead,
    /// [`WorldError::ComponentNotFound`] if it holds no `T`.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T, WorldError> {
        self.ensure_alive(entity)?;
        self.tables
            .get::<T>()
            .and_then(|table| table.get(entity))
            .ok_or(WorldError::ComponentNotFound {
                entity,
                component: T::type_name(),
            })
    }

    /// Returns the `T` component of `entity` mutably.
    ///
    /// # Errors
    ///
    /// Same as [`World::get_component`].
    pub fn get_component_mut<T: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<&mut T, WorldError> {
        self.ensure_alive(entity)?;
        self.tables
            .get_mut::<T>()
            .and_then(|table| table.get_mut(entity))
            .ok_or(WorldError::ComponentNotFound {
                entity,
                component: T::type_name(),
            })
    }

    /// Returns every component of `Q` for `entity`. Either all values are
    /// returned or the first missing type is reported.
    ///
    /// # Errors
    ///
    /// Same as [`World::get_component`].
    pub fn get_components<Q: Query>(&self, entity: Entity) -> Result<Q::Item<'_>, WorldError> {
        self.ensure_alive(entity)?;
        let types = Q::type_ids();
        if let Some(missing) = types
            .iter()
            .find(|type_id| !self.tables.contains_dyn(**type_id, entity))
        {
            return Err(WorldError::ComponentNotFound {
                entity,
                component: missing.name(),
            });
        }

        Q::fetch(&self.tables)
            .and_then(|fetch| Q::get(fetch, entity))
            .ok_or(WorldError::ComponentNotFound {
                entity,
                component: types.first().map_or("()", |type_id| type_id.name()),
            })
    }

    /// Returns `true` if `entity` is alive and holds a `T`.
    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.contains_entity(entity)
            && self
                .tables
                .contains_dyn(ComponentTypeId::of::<T>(), entity)
    }

    /// The component types held by `entity`, in the order they were added.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity is dead.
    pub fn component_types(&self, entity: Entity) -> Result<&[ComponentTypeId], WorldError> {
        self.ensure_alive(entity)?;
        Ok(self
            .held
            .get(entity.index() as usize)
            .map_or(&[], Vec::as_slice))
    }

    /// Iterate over every entity holding all component types of `Q`.
    #[must_use]
    pub fn query_components<Q: Query>(&self) -> QueryIter<'_, Q> {
        QueryIter::new(&self.tables)
    }

    /// Iterate over every `T` value.
    pub fn query_component<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> + '_ {
        self.tables
            .get::<T>()
            .into_iter()
            .flat_map(|table| table.iter())
    }

    /// Iterate mutably over every `T` value.
    ///
    /// Only values change; structural mutation still needs a command buffer.
    pub fn query_component_mut<T: Component>(
        &mut self,
    ) -> impl Iterator<Item = (Entity, &mut T)> + '_ {
        self.tables
            .get_mut::<T>()
            .into_iter()
            .flat_map(|table| table.iter_mut())
    }

    /// Add every component of `bundle` to `entity`, replacing values of types
    /// it already holds.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity is dead.
    pub fn add_components<B: Bundle>(
        &mut self,
        entity: Entity,
        bundle: B,
    ) -> Result<(), WorldError> {
        self.add_components_dyn(entity, Box::new(bundle))
    }

    /// Type-erased form of [`World::add_components`].
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity is dead.
    pub fn add_components_dyn(
        &mut self,
        entity: Entity,
        bundle: Box<dyn DynBundle>,
    ) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        let types = bundle.type_ids();
        bundle.insert_boxed(&mut self.tables, entity);

        let held = &mut self.held[entity.index() as usize];
        for type_id in &types {
            if !held.contains(type_id) {
                held.push(*type_id);
            }
        }

        self.changes.push(ChangeEvent {
            kind: ChangeKind::Added,
            entity,
            types,
        });
        Ok(())
    }

    /// Remove the component types of `S` from `entity`. Types the entity
    /// does not hold are ignored.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity is dead.
    pub fn remove_components<S: ComponentSet>(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.remove_types(entity, &S::type_ids())
    }

    /// Remove the listed component types from `entity`.
    ///
    /// # Errors
    ///
    /// [`WorldError::EntityNotFound`] if the entity is dead.
    pub fn remove_types(
        &mut self,
        entity: Entity,
        types: &[ComponentTypeId],
    ) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        let removed: Vec<ComponentTypeId> = types
            .iter()
            .copied()
            .filter(|type_id| self.tables.remove_dyn(*type_id, entity))
            .collect();

        self.held[entity.index() as usize].retain(|type_id| !removed.contains(type_id));
        self.changes.push(ChangeEvent {
            kind: ChangeKind::Removed,
            entity,
            types: removed,
        });
        Ok(())
    }

    /// Remove `entity` and all its components. Returns `false` if it was
    /// already dead.
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        if !self.allocator.free(entity) {
            return false;
        }

        let types = std::mem::take(&mut self.held[entity.index() as usize]);
        for type_id in &types {
            self.tables.remove_dyn(*type_id, entity);
        }
        self.changes.push(ChangeEvent {
            kind: ChangeKind::Removed,
            entity,
            types,
        });
        true
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.allocator.alive_count()
    }

    /// Iterate over the live entities in slot order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.allocator.iter()
    }

    /// Take every queued change event, oldest first.
    pub fn drain_changes(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.changes)
    }

    /// Change events queued but not yet drained.
    #[must_use]
    pub fn pending_changes(&self) -> &[ChangeEvent] {
        &self.changes
    }

    /// Open a command scope. Commands recorded through it are applied when
    /// the scope is dropped.
    pub fn command_scope(&mut self) -> CommandScope<'_> {
        CommandScope::new(self)
    }

    /// Run `f` with read access to the world and a command buffer, then
    /// apply the recorded commands.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&World, &mut CommandBuffer) -> R) -> R {
        let mut scope = self.command_scope();
        let (world, commands) = scope.split();
        f(world, commands)
    }

    /// Apply a command buffer in record order. Commands targeting dead
    /// entities are skipped.
    ///
    /// Returns the entities created by the buffer.
    pub fn apply(&mut self, buffer: CommandBuffer) -> Vec<Entity> {
        let mut created = Vec::new();
        for command in buffer.into_commands() {
            match command {
                Command::Create(bundle) => created.push(self.create_entity_dyn(bundle)),
                Command::Remove(entity) => {
                    if !self.remove_entity(entity) {
                        debug!(%entity, "deferred removal of dead entity skipped");
                    }
                }
                Command::Add(entity, bundle) => {
                    if let Err(err) = self.add_components_dyn(entity, bundle) {
                        debug!(error = %err, "deferred add skipped");
                    }
                }
                Command::RemoveTypes(entity, types) => {
                    if let Err(err) = self.remove_types(entity, &types) {
                        debug!(error = %err, "deferred remove skipped");
                    }
                }
            }
        }
        created
    }
}
