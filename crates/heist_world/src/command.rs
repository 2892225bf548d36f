//! Deferred structural mutation.
//!
//! A [`CommandBuffer`] records entity creation/removal and component
//! add/remove so that systems can decide on structural changes while they
//! iterate a query. Recorded commands are applied exactly once, in record
//! order, when the buffer is flushed into the [`World`].
//!
//! [`CommandScope`] ties a buffer to a mutable world borrow and flushes it
//! when the scope is dropped, on every exit path.

use heist_component::{Bundle, ComponentSet, ComponentTypeId, DynBundle, Entity};

use crate::world::World;

pub(crate) enum Command {
    Create(Box<dyn DynBundle>),
    Remove(Entity),
    Add(Entity, Box<dyn DynBundle>),
    RemoveTypes(Entity, Vec<ComponentTypeId>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create(bundle) => f.debug_tuple("Create").field(&bundle.type_ids()).finish(),
            Self::Remove(entity) => f.debug_tuple("Remove").field(entity).finish(),
            Self::Add(entity, bundle) => f
                .debug_tuple("Add")
                .field(entity)
                .field(&bundle.type_ids())
                .finish(),
            Self::RemoveTypes(entity, types) => f
                .debug_tuple("RemoveTypes")
                .field(entity)
                .field(types)
                .finish(),
        }
    }
}

/// A recorder of structural mutations.
///
/// A buffer can be applied through a [`CommandScope`], or kept across ticks
/// and handed to [`World::apply`] later.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
}

impl CommandBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the creation of an entity holding `bundle`.
    pub fn create_entity<B: Bundle>(&mut self, bundle: B) {
        self.commands.push(Command::Create(Box::new(bundle)));
    }

    /// Record the removal of `entity`.
    pub fn remove_entity(&mut self, entity: Entity) {
        self.commands.push(Command::Remove(entity));
    }

    /// Record adding `bundle` to `entity`.
    pub fn add_components<B: Bundle>(&mut self, entity: Entity, bundle: B) {
        self.commands.push(Command::Add(entity, Box::new(bundle)));
    }

    /// Record removing the component types of `S` from `entity`.
    pub fn remove_components<S: ComponentSet>(&mut self, entity: Entity) {
        self.commands
            .push(Command::RemoveTypes(entity, S::type_ids()));
    }

    /// Number of recorded commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// A command buffer bound to a world, flushed when dropped.
///
/// ```rust
/// # use heist_component::Component;
/// # use heist_world::World;
/// # struct Projectile;
/// # impl Component for Projectile {}
/// let mut world = World::new();
/// world.create_entity((Projectile,));
///
/// {
///     let mut scope = world.command_scope();
///     let (world, commands) = scope.split();
///     for (entity, _) in world.query_components::<(Projectile,)>() {
///         commands.remove_entity(entity);
///     }
/// }
///
/// assert_eq!(world.entity_count(), 0);
/// ```
#[derive(Debug)]
pub struct CommandScope<'w> {
    world: &'w mut World,
    commands: CommandBuffer,
}

impl<'w> CommandScope<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self {
            world,
            commands: CommandBuffer::new(),
        }
    }

    /// Read access to the world while recording.
    #[must_use]
    pub fn world(&self) -> &World {
        self.world
    }

    /// The buffer being recorded.
    pub fn commands(&mut self) -> &mut CommandBuffer {
        &mut self.commands
    }

    /// Borrow the world for reading and the buffer for recording at once.
    pub fn split(&mut self) -> (&World, &mut CommandBuffer) {
        (&*self.world, &mut self.commands)
    }
}

impl Drop for CommandScope<'_> {
    fn drop(&mut self) {
        let commands = std::mem::take(&mut self.commands);
        if !commands.is_empty() {
            self.world.apply(commands);
        }
    }
}
