//! The simulation context.
//!
//! A [`Session`] owns everything one simulation (client or server) mutates:
//! the entity store, the resources, the change notifier, the procedure
//! registry and the systems run every tick. It is passed around explicitly;
//! nothing here is global.

use std::net::SocketAddr;

use anyhow::Result;
use heist_net::{DispatchOutcome, RpcContext, RpcId, RpcRegistry, SequenceFilter};
use heist_world::{ChangeNotifier, FlushStats, Resources, World};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::connection::{Connections, NetEvent};
use crate::outbox::Outbox;
use crate::replication::{self, UidRegistry};

/// Procedure id reserved for heartbeats.
pub const HEARTBEAT: RpcId = RpcId(0);

/// A system: runs once per tick against the world and resources.
pub type System = Box<dyn FnMut(&mut World, &mut Resources) -> anyhow::Result<()>>;

/// Reacts to a [`NetEvent`].
pub type NetEventHandler =
    Box<dyn FnMut(&mut World, &mut Resources, &NetEvent) -> anyhow::Result<()>>;

/// What happened during one [`Session::step`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// The tick that was run.
    pub tick: u64,
    /// Systems that returned an error.
    pub system_failures: usize,
    /// Change events delivered and handler failures.
    pub changes: FlushStats,
    /// Network events delivered.
    pub net_events: usize,
    /// Network event handler invocations that returned an error.
    pub net_failures: usize,
}

/// One simulation's state.
pub struct Session {
    config: SessionConfig,
    world: World,
    resources: Resources,
    notifier: ChangeNotifier,
    rpcs: RpcRegistry,
    systems: Vec<(&'static str, System)>,
    net_handlers: Vec<(&'static str, NetEventHandler)>,
    heartbeat: Vec<u8>,
    heartbeat_ticks: u64,
    tick: u64,
}

impl Session {
    /// Create a session with the standard resources ([`Outbox`],
    /// [`SequenceFilter`], [`Connections`], [`UidRegistry`]), net entity
    /// tracking and the [`HEARTBEAT`] procedure installed.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let mut resources = Resources::new();
        resources.insert(Outbox::new());
        resources.insert(SequenceFilter::new(config.sequence_window));
        let mut connections =
            Connections::new(config.max_peers, config.ticks_for(config.peer_timeout));
        connections.set_accept_incoming(config.accept_incoming);
        resources.insert(connections);

        let mut notifier = ChangeNotifier::new();
        replication::install(&mut notifier, &mut resources);

        // Any authentic datagram refreshes the sender; the handler has
        // nothing left to do.
        let mut rpcs = RpcRegistry::with_max_datagram(config.max_datagram);
        let heartbeat = rpcs
            .register(HEARTBEAT, "heartbeat", |_: &mut RpcContext<'_>, (): ()| Ok(()))?
            .encode_call(&())?;

        Ok(Self {
            rpcs,
            heartbeat,
            heartbeat_ticks: config.ticks_for(config.heartbeat_interval),
            config,
            world: World::new(),
            resources,
            notifier,
            systems: Vec::new(),
            net_handlers: Vec::new(),
            tick: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    #[must_use]
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    /// Register change handlers here.
    pub fn notifier_mut(&mut self) -> &mut ChangeNotifier {
        &mut self.notifier
    }

    #[must_use]
    pub fn rpcs(&self) -> &RpcRegistry {
        &self.rpcs
    }

    /// Register procedures here.
    pub fn rpcs_mut(&mut self) -> &mut RpcRegistry {
        &mut self.rpcs
    }

    /// Number of completed ticks.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Append a system. Systems run in the order they were added.
    pub fn add_system<F>(&mut self, name: &'static str, system: F)
    where
        F: FnMut(&mut World, &mut Resources) -> anyhow::Result<()> + 'static,
    {
        self.systems.push((name, Box::new(system)));
    }

    /// Number of registered systems.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Call `handler` with every [`NetEvent`], once per tick after the
    /// systems ran.
    pub fn on_net_event<F>(&mut self, name: &'static str, handler: F)
    where
        F: FnMut(&mut World, &mut Resources, &NetEvent) -> anyhow::Result<()> + 'static,
    {
        self.net_handlers.push((name, Box::new(handler)));
    }

    /// Hand one received datagram to the procedure registry. An authentic
    /// datagram from a connected peer counts as hearing from it.
    pub fn receive(&mut self, from: SocketAddr, datagram: &[u8]) -> DispatchOutcome {
        let mut ctx = RpcContext::new(&mut self.world, &mut self.resources, from);
        let outcome = self.rpcs.decode_and_dispatch(&mut ctx, datagram);
        if outcome != DispatchOutcome::IntegrityFailure {
            if let Some(connections) = self.resources.get_mut::<Connections>() {
                connections.refresh(from);
            }
        }
        outcome
    }

    /// Advance one tick:
    ///
    /// 1. Drop peers that went silent.
    /// 2. Run every system.
    /// 3. Deliver the change events they queued.
    /// 4. Deliver network events, then the change events their handlers
    ///    queued.
    /// 5. Queue heartbeats when one is due.
    ///
    /// Failing systems and handlers are logged and the rest still run.
    pub fn step(&mut self) -> StepReport {
        self.tick += 1;
        if let Some(connections) = self.resources.get_mut::<Connections>() {
            connections.advance(self.tick);
        }

        let mut system_failures = 0;
        for (name, system) in &mut self.systems {
            if let Err(err) = system(&mut self.world, &mut self.resources) {
                system_failures += 1;
                warn!(
                    session = %self.config.name,
                    system = *name,
                    tick = self.tick,
                    error = %format!("{err:#}"),
                    "system failed"
                );
            }
        }

        let mut changes = self.flush_changes();
        let (net_events, net_failures) = self.deliver_net_events();
        if net_events > 0 {
            let late = self.flush_changes();
            changes.events += late.events;
            changes.failures += late.failures;
        }
        self.queue_heartbeats();

        debug!(
            session = %self.config.name,
            tick = self.tick,
            events = changes.events,
            net_events,
            "tick done"
        );
        StepReport {
            tick: self.tick,
            system_failures,
            changes,
            net_events,
            net_failures,
        }
    }

    /// Deliver queued change events to their handlers.
    pub fn flush_changes(&mut self) -> FlushStats {
        self.notifier.flush(&mut self.world, &mut self.resources)
    }

    /// Take every datagram queued in the [`Outbox`], with broadcasts sent to
    /// each connected peer.
    pub fn take_outgoing(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let peers: Vec<SocketAddr> = self
            .resources
            .get::<Connections>()
            .map(|connections| connections.peers().collect())
            .unwrap_or_default();
        self.resources
            .get_mut::<Outbox>()
            .map(|outbox| outbox.take(&peers))
            .unwrap_or_default()
    }

    fn deliver_net_events(&mut self) -> (usize, usize) {
        let mut events = self
            .resources
            .get_mut::<Connections>()
            .map(Connections::drain_events)
            .unwrap_or_default();
        if let Some(uids) = self.resources.get_mut::<UidRegistry>() {
            events.extend(uids.drain_events().into_iter().map(NetEvent::Entity));
        }

        let mut failures = 0;
        for event in &events {
            if let NetEvent::Disconnected { peer, .. } = *event {
                self.forget_peer(peer);
            }
            for (name, handler) in &mut self.net_handlers {
                if let Err(err) = handler(&mut self.world, &mut self.resources, event) {
                    failures += 1;
                    warn!(
                        session = %self.config.name,
                        handler = *name,
                        ?event,
                        error = %format!("{err:#}"),
                        "net event handler failed"
                    );
                }
            }
        }
        (events.len(), failures)
    }

    fn forget_peer(&mut self, peer: SocketAddr) {
        if let Some(filter) = self.resources.get_mut::<SequenceFilter>() {
            filter.forget(peer);
        }
        if let Some(outbox) = self.resources.get_mut::<Outbox>() {
            outbox.forget_peer(peer);
        }
    }

    fn queue_heartbeats(&mut self) {
        if self.tick % self.heartbeat_ticks != 0 {
            return;
        }
        let connected = self
            .resources
            .get::<Connections>()
            .is_some_and(|connections| !connections.is_empty());
        if !connected {
            return;
        }
        if let Some(outbox) = self.resources.get_mut::<Outbox>() {
            outbox.broadcast(&self.heartbeat);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.config.name)
            .field("tick", &self.tick)
            .field("entities", &self.world.entity_count())
            .field("systems", &self.systems.iter().map(|(n, _)| *n).collect::<Vec<_>>())
            .field("net_handlers", &self.net_handlers.iter().map(|(n, _)| *n).collect::<Vec<_>>())
            .field("rpcs", &self.rpcs)
            .finish()
    }
}
