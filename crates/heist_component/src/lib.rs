//! # heist_component
//!
//! The "E" and "C" in ECS: entity handles, what a component is, how
//! components are stored, and how they are queried.
//!
//! This crate provides:
//!
//! - [`Entity`]: generational entity handles.
//! - [`EntityAllocator`]: slot allocator that recycles indices safely.
//! - [`Component`] trait, [`Bundle`] and [`ComponentSet`] tuples.
//! - [`ComponentTable`]: sparse-set storage, one table per component type.
//! - [`Query`]: AND-join over component tables.

pub mod component;
pub mod entity;
pub mod query;
pub mod table;

pub use component::{Bundle, Component, ComponentSet, ComponentTypeId, DynBundle};
pub use entity::{Entity, EntityAllocator};
pub use query::{Query, QueryIter};
pub use table::{AnyTable, ComponentTable, Tables};
