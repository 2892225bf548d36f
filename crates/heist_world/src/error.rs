//! Entity store error types.

use heist_component::Entity;

/// Errors returned by entity store lookups and mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// The handle refers to an entity that was removed (or never existed).
    #[error("{0} not found")]
    EntityNotFound(Entity),

    /// The entity is alive but does not hold the requested component.
    #[error("component '{component}' not found on {entity}")]
    ComponentNotFound {
        /// The entity that was queried.
        entity: Entity,
        /// Name of the missing component type.
        component: &'static str,
    },
}

/// Errors returned by the resource registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// No resource of the requested type is registered.
    #[error("resource '{0}' not found")]
    NotFound(&'static str),
}
