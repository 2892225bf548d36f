//! Core [`Component`] trait and component type identity.
//!
//! Every piece of data stored in the entity store must implement
//! [`Component`]. Components are keyed by their Rust type: an entity holds at
//! most one value per component type and there is no subtyping.
//!
//! Tuples of components are [`Bundle`]s (values inserted together) and tuples
//! of component *types* are [`ComponentSet`]s (types named together, e.g. for
//! removal).

use std::any::TypeId;
use std::hash::{Hash, Hasher};

use crate::entity::Entity;
use crate::table::Tables;

/// A unique identifier for a component type.
///
/// Equality and hashing use the Rust [`TypeId`]; the type name is carried
/// along for log output only.
#[derive(Debug, Clone, Copy)]
pub struct ComponentTypeId {
    id: TypeId,
    name: &'static str,
}

impl ComponentTypeId {
    /// Returns the [`ComponentTypeId`] of component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: T::type_name(),
        }
    }

    /// The human-readable name of the component type.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ComponentTypeId {}

impl Hash for ComponentTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = self.name.rsplit("::").next().unwrap_or(self.name);
        f.write_str(short)
    }
}

/// The core component trait.
///
/// # Examples
///
/// ```rust
/// use heist_component::Component;
///
/// #[derive(Debug, Clone)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {}
/// ```
pub trait Component: Sized + 'static {
    /// A human-readable name for this component type.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::of::<Self>()
    }
}

/// A set of component types, named together.
///
/// Implemented for `()` and for tuples of up to eight component types.
pub trait ComponentSet: 'static {
    /// The distinct component types of this set, in declaration order.
    fn type_ids() -> Vec<ComponentTypeId>;
}

/// A group of component values inserted into an entity together.
///
/// Implemented for `()` and for tuples of up to eight components. When a
/// bundle names the same type twice, the later value wins.
pub trait Bundle: ComponentSet {
    /// Insert every component of the bundle into its table for `entity`.
    fn insert_into(self, tables: &mut Tables, entity: Entity);
}

/// Object-safe form of [`Bundle`], used to queue bundles in command buffers.
pub trait DynBundle {
    /// The component types this bundle will insert.
    fn type_ids(&self) -> Vec<ComponentTypeId>;

    /// Insert the boxed bundle for `entity`.
    fn insert_boxed(self: Box<Self>, tables: &mut Tables, entity: Entity);
}

impl<B: Bundle> DynBundle for B {
    fn type_ids(&self) -> Vec<ComponentTypeId> {
        B::type_ids()
    }

    fn insert_boxed(self: Box<Self>, tables: &mut Tables, entity: Entity) {
        (*self).insert_into(tables, entity);
    }
}

fn dedup_in_order(ids: Vec<ComponentTypeId>) -> Vec<ComponentTypeId> {
    let mut out: Vec<ComponentTypeId> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

impl ComponentSet for () {
    fn type_ids() -> Vec<ComponentTypeId> {
        Vec::new()
    }
}

impl Bundle for () {
    fn insert_into(self, _tables: &mut Tables, _entity: Entity) {}
}

macro_rules! impl_bundle {
    ($($name:ident),+) => {
        impl<$($name: Component),+> ComponentSet for ($($name,)+) {
            fn type_ids() -> Vec<ComponentTypeId> {
                dedup_in_order(vec![$(ComponentTypeId::of::<$name>()),+])
            }
        }

        #[allow(non_snake_case)]
        impl<$($name: Component),+> Bundle for ($($name,)+) {
            fn insert_into(self, tables: &mut Tables, entity: Entity) {
                let ($($name,)+) = self;
                $(tables.insert(entity, $name);)+
            }
        }
    };
}

impl_bundle!(A);
impl_bundle!(A, B);
impl_bundle!(A, B, C);
impl_bundle!(A, B, C, D);
impl_bundle!(A, B, C, D, E);
impl_bundle!(A, B, C, D, E, F);
impl_bundle!(A, B, C, D, E, F, G);
impl_bundle!(A, B, C, D, E, F, G, H);
