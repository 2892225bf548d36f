//! # heist_world
//!
//! The entity store and everything a simulation step needs around it:
//!
//! - [`World`]: entities, component tables, queries and immediate mutation.
//! - [`CommandBuffer`] / [`CommandScope`]: deferred structural mutation,
//!   safe to record while iterating a query.
//! - [`ChangeNotifier`]: fans out component added/removed events.
//! - [`Resources`]: type-indexed singletons shared by systems and handlers.

pub mod command;
pub mod error;
pub mod events;
pub mod resources;
pub mod world;

pub use command::{CommandBuffer, CommandScope};
pub use error::{ResourceError, WorldError};
pub use events::{
    ChangeEvent, ChangeHandler, ChangeKind, ChangeNotifier, FlushStats, MAX_FLUSH_ROUNDS,
};
pub use resources::Resources;
pub use world::World;
