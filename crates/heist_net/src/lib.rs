//! # heist_net
//!
//! Datagram RPC for the heist engine.
//!
//! This crate provides:
//!
//! - [`integrity`]: FNV-1 checksum envelope.
//! - [`layout`]: fixed-width, big-endian argument layouts.
//! - [`rpc`]: procedure registry, call encoding and dispatch.
//! - [`recycling`]: bounded FIFO membership set.
//! - [`sequence`]: per-peer duplicate suppression built on it.
//! - [`endpoint`]: polled UDP socket.
//! - [`error`]: network-layer error types.

pub mod endpoint;
pub mod error;
pub mod integrity;
pub mod layout;
pub mod recycling;
pub mod rpc;
pub mod sequence;

pub use endpoint::{Datagram, Endpoint};
pub use error::NetError;
pub use layout::{FieldCode, Layout, WireArgs, WirePrimitive, WireValue};
pub use recycling::RecyclingSet;
pub use rpc::{DispatchOutcome, Procedure, RpcContext, RpcId, RpcRegistry};
pub use sequence::SequenceFilter;
