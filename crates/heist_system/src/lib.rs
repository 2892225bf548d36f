//! # heist_system
//!
//! Session runtime for the heist engine.
//!
//! A [`Session`] bundles the entity store, resources, change handlers,
//! procedure registry and per-tick systems of one simulation. A [`Runner`]
//! binds it to a UDP endpoint and ticks it at a fixed rate:
//!
//! 1. Drain and dispatch the datagrams received since the last tick.
//! 2. Drop peers that went silent.
//! 3. Run every system in order.
//! 4. Deliver change events and [`NetEvent`]s to their handlers.
//! 5. Send what the handlers and systems queued in the [`Outbox`], plus a
//!    heartbeat to each connected peer when one is due.
//!
//! Peers are only ever admitted through [`Connections`]; broadcasts go to
//! connected peers and nobody else.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use heist_net::{RpcContext, RpcId};
//! use heist_system::{Outbox, Runner, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut session = Session::new(SessionConfig::new("server"))?;
//!     session.rpcs_mut().register(
//!         RpcId(1),
//!         "ping",
//!         |ctx: &mut RpcContext<'_>, (seq,): (u32,)| {
//!             let caller = ctx.caller();
//!             ctx.resources.fetch_mut::<Outbox>()?.send_to(caller, seq.to_be_bytes().to_vec());
//!             Ok(())
//!         },
//!     )?;
//!
//!     let mut runner = Runner::bind(session).await?;
//!     runner.run().await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod outbox;
pub mod replication;
pub mod runner;
pub mod session;

pub use config::SessionConfig;
pub use connection::{Connections, DisconnectReason, NetEvent, Refused};
pub use outbox::Outbox;
pub use replication::{NetEntity, NetEntityEvent, NetSynchronized, UidRegistry};
pub use runner::{Runner, TickReport};
pub use session::{HEARTBEAT, NetEventHandler, Session, StepReport, System};
